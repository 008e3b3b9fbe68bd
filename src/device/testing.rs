use {
    crate::{
        config::{
            CapsDescription, ConnectorDescription, ConnectorKind, DispDescription, DpyDescription,
            FrameLockDescription, GpuDescription, ServerConfig, VrrDescription, VrrKind,
        },
        connection::{ConnectionId, DeviceHandle, SurfaceHandle},
        device::{Device, DeviceId, DeviceState, OpenDev, SurfaceRef},
        dpy::{DpyId, DpyIdList},
        events::EventQueue,
        flip::LayerContents,
        format::XRGB8888,
        grant::GrantTable,
        hardware::{DisplayHardware, HardwareError, HeadCommit},
        mode::Mode,
        modeset::{SetModeHeadRequest, SetModeReply, SetModeRequest, set_mode},
        surface::{SurfaceId, SurfaceParams},
    },
    parking_lot::Mutex,
    std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed},
    },
};

pub const DP: u32 = 0;
pub const HDMI: u32 = 1;
pub const MST: u32 = 2;

fn dpy_desc(name: &str, vrr: bool) -> DpyDescription {
    DpyDescription {
        name: name.to_string(),
        modes: vec![mode(), Mode::reduced_blanking(1280, 720, 60)],
        h_sync_khz: None,
        v_refresh_hz: None,
        max_pixel_clock_khz: None,
        supports_yuv420: false,
        vrr: vrr.then_some(VrrDescription {
            kind: VrrKind::AdaptiveSync,
            min_refresh_hz: 40,
        }),
        mux: false,
        backlight: true,
    }
}

fn connector(name: &str, kind: ConnectorKind, dpy: Option<DpyDescription>) -> ConnectorDescription {
    ConnectorDescription {
        name: name.to_string(),
        kind,
        excluded: vec![],
        max_pixel_clock_khz: None,
        link_bandwidth_kbps: None,
        mst: false,
        dpy,
    }
}

/// One disp with two heads of three layers. DP-0 drives a VRR monitor, HDMI-0 a plain
/// one and DP-1 is an empty MST connector.
pub fn gpu() -> GpuDescription {
    let mut mst = connector("DP-1", ConnectorKind::Dp, None);
    mst.mst = true;
    GpuDescription {
        gpu_id: 1,
        name: "test gpu".to_string(),
        caps: CapsDescription {
            supports_syncpts: true,
            requires_vrr_semaphores: true,
            num_vrr_semaphores: 2,
            ..Default::default()
        },
        disps: vec![DispDescription {
            num_heads: 2,
            layers_per_head: 3,
            connectors: vec![
                connector("DP-0", ConnectorKind::Dp, Some(dpy_desc("dp monitor", true))),
                connector("HDMI-0", ConnectorKind::Hdmi, Some(dpy_desc("hdmi monitor", false))),
                mst,
            ],
        }],
        framelocks: vec![FrameLockDescription {
            name: "board 0".to_string(),
            house_sync: false,
        }],
    }
}

pub fn dynamic_dpy_desc() -> DpyDescription {
    dpy_desc("mst monitor", false)
}

pub fn mode() -> Mode {
    Mode::reduced_blanking(1920, 1080, 60)
}

pub fn dpy(idx: u32) -> DpyId {
    DpyId::new(idx).unwrap()
}

pub fn dpys(idx: u32) -> DpyIdList {
    DpyIdList::single(dpy(idx))
}

pub fn conn(n: u64) -> ConnectionId {
    ConnectionId::from_raw(n)
}

pub fn device_with(gpu: &GpuDescription, hw: Arc<dyn DisplayHardware>) -> Arc<Device> {
    Device::new(
        DeviceId::from_raw(1),
        gpu,
        hw,
        &ServerConfig::default(),
        Arc::new(Mutex::new(GrantTable::default())),
    )
}

pub fn device() -> (Arc<Device>, Arc<TestHardware>) {
    let hw = Arc::new(TestHardware::default());
    (device_with(&gpu(), hw.clone()), hw)
}

/// Opens the device for the connection.
pub fn open(state: &mut DeviceState, conn: ConnectionId) -> Arc<EventQueue> {
    let events = Arc::new(EventQueue::default());
    let open = OpenDev::new(DeviceHandle::from_raw(1), events.clone(), state).unwrap();
    state.opens.insert(conn, open);
    events
}

/// Registers a 1920x1080 surface owned by the connection.
pub fn surface(state: &mut DeviceState, conn: ConnectionId) -> (SurfaceHandle, SurfaceId) {
    surface_with(state, conn, SurfaceParams::packed(XRGB8888, 1920, 1080))
}

pub fn surface_with(
    state: &mut DeviceState,
    conn: ConnectionId,
    params: SurfaceParams,
) -> (SurfaceHandle, SurfaceId) {
    let id = state.register_surface(conn, params).unwrap();
    let handle = state
        .open_mut(conn)
        .unwrap()
        .surfaces
        .alloc(SurfaceRef { id, owned: true })
        .unwrap();
    (handle, id)
}

/// Commits `dpy` on each listed head of disp 0.
pub fn commit(
    state: &mut DeviceState,
    hw: &dyn DisplayHardware,
    conn: ConnectionId,
    heads: &[(usize, u32)],
) -> SetModeReply {
    let mut req = SetModeRequest::default().committing(true);
    for &(head, d) in heads {
        let mut h = SetModeHeadRequest::new(dpys(d), mode());
        h.allow_vrr = true;
        req = req.with_head(0, head, h);
    }
    set_mode(state, hw, &ServerConfig::default(), conn, &req).unwrap()
}

/// Hardware that records what it is asked to do.
#[derive(Default)]
pub struct TestHardware {
    pub commits: Mutex<Vec<Vec<HeadCommit>>>,
    pub layers: Mutex<Vec<(usize, usize, usize, Option<SurfaceId>)>>,
    pub stopped: Mutex<Vec<(usize, usize)>>,
    pub restored: AtomicUsize,
    pub fail_commits: AtomicBool,
    pub busy: AtomicBool,
}

impl TestHardware {
    pub fn num_commits(&self) -> usize {
        self.commits.lock().len()
    }

    pub fn last_layer(&self) -> Option<(usize, usize, usize, Option<SurfaceId>)> {
        self.layers.lock().last().copied()
    }
}

impl DisplayHardware for TestHardware {
    fn commit_heads(&self, heads: &[HeadCommit]) -> Result<(), HardwareError> {
        if self.fail_commits.load(Relaxed) {
            return Err(HardwareError::Rejected("test".to_string()));
        }
        self.commits.lock().push(heads.to_vec());
        Ok(())
    }

    fn program_layer(&self, disp: usize, head: usize, layer: usize, contents: &LayerContents) {
        self.layers.lock().push((disp, head, layer, contents.surface));
    }

    fn channel_idle(&self, _disp: usize, _head: usize) -> bool {
        !self.busy.load(Relaxed)
    }

    fn force_stop_channel(&self, disp: usize, head: usize) {
        self.stopped.lock().push((disp, head));
    }

    fn restore_console(&self) {
        self.restored.fetch_add(1, Relaxed);
    }
}
