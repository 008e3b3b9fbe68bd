use {
    crate::{
        cli::{GlobalArgs, SimulateArgs, topology::add_gpus},
        connection::{Connection, ConnectionError, DeviceHandle, DispHandle, SurfaceHandle},
        dpy::{DpyId, DpyIdList},
        events::Event,
        flip::{FlipRequest, HeadFlipParams, LayerFlip},
        format::XRGB8888,
        mode::{Mode, ModeValidationParams},
        modeset::{SetModeHeadRequest, SetModeRequest, SetModeStatus},
        server::{PROTOCOL_VERSION, Server},
        surface::SurfaceParams,
        utils::errorfmt::ErrorFmt,
    },
};

pub fn main(global: GlobalArgs, args: SimulateArgs) {
    let logger = global.install_logger();
    let config = global.load_config(&logger, &args.config);
    let server = Server::new(config.server_config());
    add_gpus(&server, &config);
    let conn = match server.connect(PROTOCOL_VERSION) {
        Ok(c) => c,
        Err(e) => fatal!("Could not connect: {}", ErrorFmt(e)),
    };
    let mut sims = vec![];
    for gpu_id in server.gpu_ids() {
        match Simulation::start(&conn, gpu_id) {
            Ok(sim) => sims.push(sim),
            Err(e) => log::error!("Could not light up gpu {}: {}", gpu_id, ErrorFmt(e)),
        }
    }
    for _ in 0..args.frames {
        for sim in &mut sims {
            if let Err(e) = sim.flip(&conn) {
                log::error!("gpu {}: flip failed: {}", sim.gpu_id, ErrorFmt(e));
            }
        }
        server.vblank_all();
        while let Some(event) = conn.next_event() {
            log::trace!("{:?}", event);
            if let Event::FlipOccurred { device, .. } = event
                && let Some(sim) = sims.iter_mut().find(|s| s.device == device)
            {
                sim.flips_completed += 1;
            }
        }
    }
    for sim in &sims {
        println!(
            "gpu {}: {} heads lit, {} flips completed in {} frames",
            sim.gpu_id,
            sim.heads.len(),
            sim.flips_completed,
            args.frames
        );
    }
    conn.close();
}

struct SimHead {
    disp: usize,
    head: usize,
    surfaces: [SurfaceHandle; 2],
    front: usize,
}

struct Simulation {
    gpu_id: u32,
    device: DeviceHandle,
    heads: Vec<SimHead>,
    flips_completed: u64,
}

impl Simulation {
    /// Takes ownership of the device and drives every connected display with its
    /// preferred mode.
    fn start(conn: &Connection, gpu_id: u32) -> Result<Self, ConnectionError> {
        let dev = conn.alloc_device(gpu_id)?;
        conn.grab_ownership(dev.handle)?;
        let mut req = SetModeRequest::default().committing(true);
        let mut lit = vec![];
        for &disp in &dev.disps {
            let info = conn.query_disp(dev.handle, disp)?;
            let dpys = info.connected_dpys.iter().take(info.num_heads);
            for (head, dpy) in dpys.enumerate() {
                let Some(mode) = preferred_mode(conn, dev.handle, disp, dpy)? else {
                    log::warn!("{} has no valid mode", dpy);
                    continue;
                };
                log::info!("disp {} head {}: {} with {}", info.index, head, dpy, mode);
                let mut h = SetModeHeadRequest::new(DpyIdList::single(dpy), mode);
                h.allow_vrr = true;
                req = req.with_head(info.index, head, h);
                lit.push((info.index, head, mode));
            }
        }
        let reply = conn.set_mode(dev.handle, &req)?;
        if reply.status != SetModeStatus::Success {
            log::warn!("gpu {}: modeset failed: {:?}", gpu_id, reply);
            lit.clear();
        }
        let mut heads = vec![];
        for (disp, head, mode) in lit {
            let surface = || {
                let params = SurfaceParams::packed(
                    XRGB8888,
                    mode.h_visible as u32,
                    mode.v_visible as u32,
                );
                conn.register_surface(dev.handle, params)
            };
            heads.push(SimHead {
                disp,
                head,
                surfaces: [surface()?, surface()?],
                front: 0,
            });
        }
        Ok(Self {
            gpu_id,
            device: dev.handle,
            heads,
            flips_completed: 0,
        })
    }

    /// Flips every head to its back buffer.
    fn flip(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let mut req = FlipRequest {
            commit: true,
            ..Default::default()
        };
        for h in &mut self.heads {
            h.front ^= 1;
            let mut layer = LayerFlip::show(h.surfaces[h.front]);
            layer.notify = true;
            req = req.head(h.disp, h.head, HeadFlipParams::default().layer(0, layer));
        }
        if req.heads.is_empty() {
            return Ok(());
        }
        let reply = conn.flip(self.device, &req)?;
        log::debug!("gpu {}: flip {:?}", self.gpu_id, reply.status);
        if let Some(idx) = reply.vrr.semaphore_index {
            conn.vrr_signal_semaphore(self.device, idx)?;
        }
        Ok(())
    }
}

/// The first valid mode of the display's mode pool.
fn preferred_mode(
    conn: &Connection,
    device: DeviceHandle,
    disp: DispHandle,
    dpy: DpyId,
) -> Result<Option<Mode>, ConnectionError> {
    let params = ModeValidationParams::default();
    for index in 0.. {
        let reply = conn.validate_mode_index(device, disp, dpy, index, &params)?;
        if reply.end {
            break;
        }
        if let (Some(mode), Some(v)) = (reply.mode, reply.validation)
            && v.is_valid()
        {
            return Ok(Some(mode));
        }
    }
    Ok(None)
}
