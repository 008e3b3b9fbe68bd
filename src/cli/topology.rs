use {
    crate::{
        cli::{GlobalArgs, TopologyArgs},
        config::Config,
        connection::{Connection, ConnectionError, DeviceHandle, DispHandle},
        dpy::DpyId,
        hardware::NullHardware,
        mode::ModeValidationParams,
        server::{PROTOCOL_VERSION, Server},
        utils::errorfmt::ErrorFmt,
    },
    std::sync::Arc,
};

pub fn main(global: GlobalArgs, args: TopologyArgs) {
    let logger = global.install_logger();
    let config = global.load_config(&logger, &args.config);
    let server = Server::new(config.server_config());
    add_gpus(&server, &config);
    let conn = match server.connect(PROTOCOL_VERSION) {
        Ok(c) => c,
        Err(e) => fatal!("Could not connect: {}", ErrorFmt(e)),
    };
    for gpu_id in server.gpu_ids() {
        if let Err(e) = print_gpu(&conn, gpu_id, args.modes) {
            log::error!("Could not query gpu {}: {}", gpu_id, ErrorFmt(e));
        }
    }
    conn.close();
}

pub fn add_gpus(server: &Server, config: &Config) {
    for gpu in &config.gpus {
        if let Err(e) = server.add_gpu(gpu.clone(), Arc::new(NullHardware)) {
            fatal!("Could not add gpu {}: {}", gpu.gpu_id, ErrorFmt(e));
        }
    }
}

fn print_gpu(conn: &Connection, gpu_id: u32, modes: bool) -> Result<(), ConnectionError> {
    let dev = conn.alloc_device(gpu_id)?;
    println!("gpu {} ({})", gpu_id, dev.gpu_name);
    let caps = &dev.caps;
    println!(
        "  syncpts: {}, swap groups: {}, vrr semaphores: {}, max pixel clock: {} kHz",
        caps.supports_syncpts,
        caps.supports_swap_groups,
        caps.num_vrr_semaphores,
        caps.max_pixel_clock_khz,
    );
    for &disp in &dev.disps {
        print_disp(conn, dev.handle, disp, modes)?;
    }
    if dev.num_framelocks > 0 {
        for fl in conn.query_framelock(dev.handle)? {
            let house = if fl.house_sync_capable { ", house sync" } else { "" };
            println!("  framelock {}: {}{}", fl.index, fl.name, house);
        }
    }
    conn.free_device(dev.handle)
}

fn print_disp(
    conn: &Connection,
    device: DeviceHandle,
    disp: DispHandle,
    modes: bool,
) -> Result<(), ConnectionError> {
    let info = conn.query_disp(device, disp)?;
    println!(
        "  disp {}: {} heads, layers per head {:?}",
        info.index, info.num_heads, info.layers_per_head
    );
    for &connector in &info.connectors {
        let sd = conn.query_connector_static_data(device, connector)?;
        let dd = conn.query_connector_dynamic_data(device, connector)?;
        print!("    connector {} ({:?}", sd.name, sd.kind);
        if sd.mst {
            print!(", mst");
        }
        if let Some(bw) = dd.link_bandwidth_kbps {
            print!(", link {} kbps", bw);
        }
        println!(")");
        if dd.dpys.is_empty() {
            println!("      nothing connected");
        }
        for dpy in dd.dpys.iter() {
            print_dpy(conn, device, disp, dpy, modes)?;
        }
    }
    Ok(())
}

fn print_dpy(
    conn: &Connection,
    device: DeviceHandle,
    disp: DispHandle,
    dpy: DpyId,
    modes: bool,
) -> Result<(), ConnectionError> {
    let sd = conn.query_dpy_static_data(device, disp, dpy)?;
    let dd = conn.query_dpy_dynamic_data(device, disp, dpy)?;
    print!("      {} \"{}\": {} modes", dpy, sd.name, dd.modes.len());
    if let Some(vrr) = dd.vrr {
        print!(", vrr {:?}", vrr);
    }
    if let Some(address) = &sd.address {
        print!(", address {}", address);
    }
    println!();
    if !modes {
        return Ok(());
    }
    let params = ModeValidationParams::default();
    for index in 0.. {
        let reply = conn.validate_mode_index(device, disp, dpy, index, &params)?;
        if reply.end {
            break;
        }
        let (Some(mode), Some(validation)) = (reply.mode, reply.validation) else {
            continue;
        };
        match validation.is_valid() {
            true => println!("        {}", mode),
            false => println!("        {} (invalid: {:?})", mode, validation.failed),
        }
    }
    Ok(())
}
