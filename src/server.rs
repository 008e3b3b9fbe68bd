use {
    crate::{
        config::{DpyDescription, GpuDescription, ServerConfig},
        connection::{Connection, ConnectionError, ConnectionIds},
        device::{Device, DeviceError, DeviceIds, DeviceState},
        dpy::DpyId,
        grant::GrantTable,
        hardware::DisplayHardware,
        vblank::now_ns,
    },
    ahash::AHashMap,
    parking_lot::Mutex,
    std::{sync::Arc, time::Duration},
    thiserror::Error,
};

/// The version of the request/reply layouts. Clients must match it exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// The interval of the vblank thread of a device.
const VBLANK_INTERVAL: Duration = Duration::from_micros(16_667);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("GPU {} has already been added", .0)]
    DuplicateGpu(u32),
    #[error("There is no GPU with id {}", .0)]
    UnknownGpu(u32),
    #[error("GPU {} has not been allocated by any client", .0)]
    NotAllocated(u32),
    #[error("The GPU description is invalid")]
    Config(#[source] crate::config::ConfigError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub struct Gpu {
    pub desc: GpuDescription,
    pub hw: Arc<dyn DisplayHardware>,
}

pub struct ServerState {
    pub config: ServerConfig,
    pub gpus: Mutex<Vec<Gpu>>,
    /// The allocated devices by GPU id.
    pub devices: Mutex<AHashMap<u32, Arc<Device>>>,
    pub grants: Arc<Mutex<GrantTable>>,
    pub connection_ids: ConnectionIds,
    pub device_ids: DeviceIds,
}

impl ServerState {
    /// Runs `open` on the device of the GPU, allocating the device if no connection has
    /// it open. The device cannot be torn down while `open` runs.
    pub fn open_device<T>(
        &self,
        gpu_id: u32,
        open: impl FnOnce(&Arc<Device>, &mut DeviceState) -> Result<T, ConnectionError>,
    ) -> Result<(Arc<Device>, T), ConnectionError> {
        let mut devices = self.devices.lock();
        let device = match devices.get(&gpu_id) {
            Some(dev) => dev.clone(),
            None => {
                let gpus = self.gpus.lock();
                let Some(gpu) = gpus.iter().find(|g| g.desc.gpu_id == gpu_id) else {
                    return Err(ConnectionError::NoHardwareAvailable(gpu_id));
                };
                let device = Device::new(
                    self.device_ids.next(),
                    &gpu.desc,
                    gpu.hw.clone(),
                    &self.config,
                    self.grants.clone(),
                );
                if self.config.threaded_vblank {
                    device.start_vblank_worker(VBLANK_INTERVAL);
                }
                devices.insert(gpu_id, device.clone());
                device
            }
        };
        let res = {
            let mut state = device.state.lock();
            let res = open(&device, &mut state);
            if res.is_ok() || !state.opens.is_empty() {
                return res.map(|t| (device.clone(), t));
            }
            res
        };
        devices.remove(&gpu_id);
        device.teardown();
        res.map(|t| (device, t))
    }

    /// Tears the device down if no connection has it open anymore.
    pub fn collect_device(&self, device: &Arc<Device>) {
        let mut devices = self.devices.lock();
        if device.state.lock().opens.is_empty() {
            if devices
                .get(&device.gpu_id)
                .is_some_and(|d| Arc::ptr_eq(d, device))
            {
                devices.remove(&device.gpu_id);
            }
            device.teardown();
        }
    }

    fn allocated(&self, gpu_id: u32) -> Result<Arc<Device>, ServerError> {
        self.devices
            .lock()
            .get(&gpu_id)
            .cloned()
            .ok_or(ServerError::NotAllocated(gpu_id))
    }
}

/// Process-wide state: the available GPUs, the allocated devices and the pending
/// grants.
pub struct Server {
    state: Arc<ServerState>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: Arc::new(ServerState {
                config,
                gpus: Default::default(),
                devices: Default::default(),
                grants: Default::default(),
                connection_ids: Default::default(),
                device_ids: Default::default(),
            }),
        }
    }

    pub fn add_gpu(
        &self,
        desc: GpuDescription,
        hw: Arc<dyn DisplayHardware>,
    ) -> Result<(), ServerError> {
        desc.validate().map_err(ServerError::Config)?;
        let mut gpus = self.state.gpus.lock();
        if gpus.iter().any(|g| g.desc.gpu_id == desc.gpu_id) {
            return Err(ServerError::DuplicateGpu(desc.gpu_id));
        }
        log::info!("Added GPU {} ({})", desc.gpu_id, desc.name);
        gpus.push(Gpu { desc, hw });
        Ok(())
    }

    pub fn gpu_ids(&self) -> Vec<u32> {
        self.state.gpus.lock().iter().map(|g| g.desc.gpu_id).collect()
    }

    /// Opens a control channel.
    pub fn connect(&self, version: u32) -> Result<Connection, ConnectionError> {
        if version != PROTOCOL_VERSION {
            log::warn!(
                "Rejecting client with protocol version {} (server: {})",
                version,
                PROTOCOL_VERSION
            );
            return Err(ConnectionError::VersionMismatch(version, PROTOCOL_VERSION));
        }
        let id = self.state.connection_ids.next();
        log::info!("Connection {} opened", id);
        Ok(Connection::new(id, self.state.clone()))
    }

    /// The number of pending grants.
    pub fn pending_grants(&self) -> usize {
        self.state.grants.lock().len()
    }

    pub fn device(&self, gpu_id: u32) -> Option<Arc<Device>> {
        self.state.devices.lock().get(&gpu_id).cloned()
    }

    pub fn connect_dynamic_dpy(
        &self,
        gpu_id: u32,
        disp: usize,
        connector: usize,
        address: &str,
        desc: DpyDescription,
    ) -> Result<DpyId, ServerError> {
        let device = self.state.allocated(gpu_id)?;
        let mut state = device.state.lock();
        Ok(state.connect_dynamic_dpy(disp, connector, address, desc)?)
    }

    pub fn disconnect_dynamic_dpy(
        &self,
        gpu_id: u32,
        disp: usize,
        address: &str,
    ) -> Result<DpyId, ServerError> {
        let device = self.state.allocated(gpu_id)?;
        let mut state = device.state.lock();
        Ok(state.disconnect_dynamic_dpy(&*device.hw, disp, address)?)
    }

    /// Runs one vblank on the device of the GPU.
    pub fn vblank(&self, gpu_id: u32) -> Result<(), ServerError> {
        if !self.state.gpus.lock().iter().any(|g| g.desc.gpu_id == gpu_id) {
            return Err(ServerError::UnknownGpu(gpu_id));
        }
        self.state.allocated(gpu_id)?.vblank(now_ns());
        Ok(())
    }

    /// Runs one vblank on every allocated device.
    pub fn vblank_all(&self) {
        let devices: Vec<_> = self.state.devices.lock().values().cloned().collect();
        let now = now_ns();
        for device in devices {
            device.vblank(now);
        }
    }
}
