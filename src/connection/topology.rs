use {
    crate::{
        attributes::{DispAttribute, DispAttributes, DpyAttribute, ValidValues},
        config::{ConnectorKind, VrrKind},
        connection::{
            Connection, ConnectionError, ConnectorHandle, DeviceHandle, DispHandle,
        },
        device::{DeviceCaps, DeviceError, DeviceState, OpenDev},
        dpy::{DpyId, DpyIdList},
        events::Event,
        framelock::{FrameLockAttribute, FrameLockInfo},
        mode::{Mode, ModeValidation, ModeValidationParams},
        modeset::{ModeIndexReply, validate_dpy_mode, validate_mode_index},
        mux::{MuxError, MuxOperation, MuxState},
        permissions::PermissionError,
    },
};

#[derive(Clone, Debug)]
pub struct AllocDeviceReply {
    pub handle: DeviceHandle,
    pub gpu_name: String,
    /// Indexed by disp.
    pub disps: Vec<DispHandle>,
    pub num_heads: Vec<usize>,
    pub caps: DeviceCaps,
    pub num_framelocks: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DispInfo {
    pub index: usize,
    pub num_heads: usize,
    pub layers_per_head: Vec<usize>,
    pub connectors: Vec<ConnectorHandle>,
    pub valid_dpys: DpyIdList,
    pub connected_dpys: DpyIdList,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectorStaticData {
    pub disp: DispHandle,
    pub index: usize,
    pub name: String,
    pub kind: ConnectorKind,
    pub excluded: Vec<ConnectorHandle>,
    pub max_pixel_clock_khz: Option<u32>,
    pub mst: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectorDynamicData {
    /// The connected displays driven through the connector.
    pub dpys: DpyIdList,
    pub link_bandwidth_kbps: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DpyStaticData {
    pub name: String,
    pub connector: ConnectorHandle,
    /// The MST address of a dynamic display.
    pub address: Option<String>,
    pub mux_capable: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DpyDynamicData {
    pub connected: bool,
    pub modes: Vec<Mode>,
    pub vrr: Option<VrrKind>,
    pub supports_yuv420: bool,
    pub mux_state: Option<MuxState>,
}

fn disp_index(open: &OpenDev, disp: DispHandle) -> Result<usize, ConnectionError> {
    Ok(*open.disps.get(disp)?)
}

/// Resolves a disp handle of the connection.
fn resolve_disp(
    conn: &Connection,
    state: &DeviceState,
    disp: DispHandle,
) -> Result<usize, ConnectionError> {
    disp_index(state.open(conn.id)?, disp)
}

impl Connection {
    /// Opens the device of a GPU.
    pub fn alloc_device(&self, gpu_id: u32) -> Result<AllocDeviceReply, ConnectionError> {
        let mut devices = self.devices.lock();
        let Some(devices) = &mut *devices else {
            return Err(ConnectionError::Closed);
        };
        if devices.iter().any(|(_, d)| d.gpu_id == gpu_id) {
            return Err(ConnectionError::DeviceAlreadyOpen(gpu_id));
        }
        let (_, reply) = self.server.open_device(gpu_id, |device, state| {
            let handle = devices.alloc(device.clone())?;
            let open = match OpenDev::new(handle, self.events.clone(), state) {
                Ok(open) => open,
                Err(e) => {
                    let _ = devices.free(handle);
                    return Err(e.into());
                }
            };
            let reply = AllocDeviceReply {
                handle,
                gpu_name: device.name.clone(),
                disps: open.disp_handles.clone(),
                num_heads: state.disps.iter().map(|d| d.heads.len()).collect(),
                caps: state.caps.clone(),
                num_framelocks: state.framelocks.len(),
            };
            state.opens.insert(self.id, open);
            Ok(reply)
        })?;
        log::info!(
            "Connection {} allocated gpu {} as {}",
            self.id,
            gpu_id,
            reply.handle
        );
        Ok(reply)
    }

    pub fn free_device(&self, device: DeviceHandle) -> Result<(), ConnectionError> {
        let dev = match &mut *self.devices.lock() {
            Some(devices) => devices.free(device)?,
            None => return Err(ConnectionError::Closed),
        };
        self.release_device(&dev);
        Ok(())
    }

    pub fn query_disp(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
    ) -> Result<DispInfo, ConnectionError> {
        self.with_state(device, |_, state| {
            let open = state.open(self.id)?;
            let index = disp_index(open, disp)?;
            let d = state.disp(index)?;
            Ok(DispInfo {
                index,
                num_heads: d.heads.len(),
                layers_per_head: d.heads.iter().map(|h| h.num_layers()).collect(),
                connectors: open
                    .connector_handles
                    .get(index)
                    .cloned()
                    .unwrap_or_default(),
                valid_dpys: d.valid_dpys(),
                connected_dpys: d.connected_dpys(),
            })
        })
    }

    pub fn query_connector_static_data(
        &self,
        device: DeviceHandle,
        connector: ConnectorHandle,
    ) -> Result<ConnectorStaticData, ConnectionError> {
        self.with_state(device, |_, state| {
            let open = state.open(self.id)?;
            let &(disp, index) = open.connectors.get(connector)?;
            let c = &state.disp(disp)?.connectors[index];
            let handles = &open.connector_handles[disp];
            Ok(ConnectorStaticData {
                disp: open.disp_handle(disp),
                index,
                name: c.name.clone(),
                kind: c.kind,
                excluded: c.excluded.iter().filter_map(|e| handles.get(*e).copied()).collect(),
                max_pixel_clock_khz: c.max_pixel_clock_khz,
                mst: c.mst,
            })
        })
    }

    pub fn query_connector_dynamic_data(
        &self,
        device: DeviceHandle,
        connector: ConnectorHandle,
    ) -> Result<ConnectorDynamicData, ConnectionError> {
        self.with_state(device, |_, state| {
            let &(disp, index) = state.open(self.id)?.connectors.get(connector)?;
            let d = state.disp(disp)?;
            Ok(ConnectorDynamicData {
                dpys: d
                    .dpys
                    .values()
                    .filter(|dp| dp.connector == index && dp.is_connected())
                    .map(|dp| dp.id)
                    .collect(),
                link_bandwidth_kbps: d.connectors[index].link_bandwidth_kbps,
            })
        })
    }

    pub fn query_dpy_static_data(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
    ) -> Result<DpyStaticData, ConnectionError> {
        self.with_state(device, |_, state| {
            let open = state.open(self.id)?;
            let disp = disp_index(open, disp)?;
            let dp = state.dpy(disp, dpy)?;
            Ok(DpyStaticData {
                name: dp.name.clone(),
                connector: open.connector_handles[disp][dp.connector],
                address: dp.dynamic.as_ref().map(|d| d.address.clone()),
                mux_capable: dp.mux.is_some(),
            })
        })
    }

    pub fn query_dpy_dynamic_data(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
    ) -> Result<DpyDynamicData, ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            let dp = state.dpy(disp, dpy)?;
            let connector = &state.disp(disp)?.connectors[dp.connector];
            Ok(DpyDynamicData {
                connected: dp.is_connected(),
                modes: dp.modes().to_vec(),
                vrr: dp.vrr(connector),
                supports_yuv420: dp.desc.as_ref().is_some_and(|d| d.supports_yuv420),
                mux_state: dp.mux.as_ref().map(|m| m.state()),
            })
        })
    }

    pub fn validate_mode(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
        mode: &Mode,
        params: &ModeValidationParams,
    ) -> Result<ModeValidation, ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            Ok(validate_dpy_mode(state, disp, dpy, mode, params)?)
        })
    }

    pub fn validate_mode_index(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
        index: usize,
        params: &ModeValidationParams,
    ) -> Result<ModeIndexReply, ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            Ok(validate_mode_index(state, disp, dpy, index, params)?)
        })
    }

    /// Declares or withdraws this connection's interest in a dynamic display. A display
    /// that somebody is interested in keeps its id while it is disconnected.
    pub fn declare_dynamic_dpy_interest(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
        interested: bool,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            let declared = state.open(self.id)?.dpy_interest.contains(&(disp, dpy));
            match (interested, declared) {
                (true, false) => {
                    state.add_dpy_interest(disp, dpy)?;
                    state.open_mut(self.id)?.dpy_interest.insert((disp, dpy));
                }
                (false, true) => {
                    state.open_mut(self.id)?.dpy_interest.remove(&(disp, dpy));
                    state.remove_dpy_interest(disp, dpy);
                }
                _ => {}
            }
            Ok(())
        })
    }

    pub fn get_dpy_attribute(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
        attr: DpyAttribute,
    ) -> Result<i64, ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            Ok(state.dpy(disp, dpy)?.attributes.get(attr)?)
        })
    }

    pub fn get_dpy_attribute_valid_values(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
        attr: DpyAttribute,
    ) -> Result<ValidValues, ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            Ok(state.dpy(disp, dpy)?.attributes.valid_values(attr)?)
        })
    }

    /// Sets an attribute of a display. Connections are notified if the value changed.
    pub fn set_dpy_attribute(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
        attr: DpyAttribute,
        value: i64,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            if state.dpy_mut(disp, dpy)?.attributes.set(attr, value)? {
                log::debug!("disp {} {}: {} = {}", disp, dpy, attr.name(), value);
                state.emit(|open| Event::DpyAttributeChanged {
                    device: open.handle,
                    disp: open.disp_handle(disp),
                    dpy,
                    attribute: attr,
                    value,
                });
            }
            Ok(())
        })
    }

    pub fn get_disp_attribute(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        attr: DispAttribute,
    ) -> Result<i64, ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            Ok(state.disp(disp)?.attributes.get(attr))
        })
    }

    pub fn get_disp_attribute_valid_values(&self, attr: DispAttribute) -> ValidValues {
        DispAttributes::valid_values(attr)
    }

    pub fn set_disp_attribute(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        attr: DispAttribute,
        value: i64,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            state.disp_mut(disp)?.attributes.set(attr, value)?;
            Ok(())
        })
    }

    pub fn query_framelock(
        &self,
        device: DeviceHandle,
    ) -> Result<Vec<FrameLockInfo>, ConnectionError> {
        self.with_state(device, |_, state| {
            Ok(state
                .framelocks
                .iter()
                .enumerate()
                .map(|(idx, fl)| fl.info(idx))
                .collect())
        })
    }

    pub fn get_framelock_attribute(
        &self,
        device: DeviceHandle,
        framelock: usize,
        attr: FrameLockAttribute,
    ) -> Result<i64, ConnectionError> {
        self.with_state(device, |_, state| {
            let fl = state
                .framelocks
                .get(framelock)
                .ok_or(DeviceError::InvalidFrameLock(framelock))?;
            Ok(fl.get(attr)?)
        })
    }

    pub fn get_framelock_attribute_valid_values(
        &self,
        device: DeviceHandle,
        framelock: usize,
        attr: FrameLockAttribute,
    ) -> Result<ValidValues, ConnectionError> {
        self.with_state(device, |_, state| {
            let fl = state
                .framelocks
                .get(framelock)
                .ok_or(DeviceError::InvalidFrameLock(framelock))?;
            Ok(fl.valid_values(attr)?)
        })
    }

    pub fn set_framelock_attribute(
        &self,
        device: DeviceHandle,
        framelock: usize,
        attr: FrameLockAttribute,
        value: i64,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let fl = state
                .framelocks
                .get_mut(framelock)
                .ok_or(DeviceError::InvalidFrameLock(framelock))?;
            if fl.set(attr, value)? {
                state.emit(|open| Event::FrameLockAttributeChanged {
                    device: open.handle,
                    framelock,
                    attribute: attr,
                    value,
                });
            }
            Ok(())
        })
    }

    /// Performs one stage of a mux switch. Requires owner rights.
    pub fn switch_mux(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
        op: MuxOperation,
        target: MuxState,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |device, state| {
            let disp = resolve_disp(self, state, disp)?;
            if !state.has_owner_rights(self.id) {
                return Err(PermissionError::NotOwner.into());
            }
            let dp = state.dpy_mut(disp, dpy)?;
            let Some(mux) = &mut dp.mux else {
                return Err(MuxError::NotSupported.into());
            };
            mux.switch(&*device.hw, disp, dpy, op, target)?;
            Ok(())
        })
    }

    pub fn get_mux_state(
        &self,
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
    ) -> Result<MuxState, ConnectionError> {
        self.with_state(device, |_, state| {
            let disp = resolve_disp(self, state, disp)?;
            match &state.dpy(disp, dpy)?.mux {
                Some(mux) => Ok(mux.state()),
                None => Err(MuxError::NotSupported.into()),
            }
        })
    }
}
