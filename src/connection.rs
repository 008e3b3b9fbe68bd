mod access;
mod display;
mod error;
mod surfaces;
mod swapgroups;
mod topology;
mod vblank;

pub use {
    error::ConnectionError,
    topology::{
        AllocDeviceReply, ConnectorDynamicData, ConnectorStaticData, DispInfo, DpyDynamicData,
        DpyStaticData,
    },
};
use {
    crate::{
        device::{Device, DeviceState, OpenDev},
        events::{Event, EventMask, EventQueue},
        grant::GrantPayload,
        handle::HandleTable,
        server::ServerState,
        utils::errorfmt::ErrorFmt,
    },
    parking_lot::Mutex,
    std::{sync::Arc, time::Duration},
};

linear_ids!(ConnectionIds, ConnectionId);

handle!(DeviceHandle);
handle!(DispHandle);
handle!(ConnectorHandle);
handle!(SurfaceHandle);
handle!(FifoHandle);
handle!(SwapGroupHandle);
handle!(VblankSyncObjectHandle);
handle!(VblankSemControlHandle);

/// One client control channel.
///
/// All handles returned by a connection are only meaningful to that connection.
/// Closing the connection releases everything it holds.
pub struct Connection {
    pub id: ConnectionId,
    server: Arc<ServerState>,
    events: Arc<EventQueue>,
    /// `None` once the connection has been closed.
    devices: Mutex<Option<HandleTable<DeviceHandle, Arc<Device>>>>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, server: Arc<ServerState>) -> Self {
        Self {
            id,
            server,
            events: Default::default(),
            devices: Mutex::new(Some(Default::default())),
        }
    }

    fn device(&self, handle: DeviceHandle) -> Result<Arc<Device>, ConnectionError> {
        match &*self.devices.lock() {
            Some(devices) => Ok(devices.get(handle)?.clone()),
            None => Err(ConnectionError::Closed),
        }
    }

    /// Runs `f` with the state of the device locked.
    fn with_state<T>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&Device, &mut DeviceState) -> Result<T, ConnectionError>,
    ) -> Result<T, ConnectionError> {
        let device = self.device(handle)?;
        let mut state = device.state.lock();
        state.open(self.id)?;
        f(&device, &mut state)
    }

    /// Runs `f` with the state of the device locked and the view of this connection
    /// split off.
    fn with_open<T>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&Device, &mut OpenDev) -> Result<T, ConnectionError>,
    ) -> Result<T, ConnectionError> {
        self.with_state(handle, |device, state| f(device, state.open_mut(self.id)?))
    }

    pub fn declare_event_interest(&self, mask: EventMask) {
        self.events.set_interest(mask);
    }

    pub fn next_event(&self) -> Option<Event> {
        self.events.next()
    }

    pub fn wait_event(&self, timeout: Duration) -> Option<Event> {
        self.events.wait(timeout)
    }

    pub fn is_closed(&self) -> bool {
        self.devices.lock().is_none()
    }

    /// Frees all devices and invalidates all unredeemed grants of this connection.
    pub fn close(&self) {
        let Some(mut devices) = self.devices.lock().take() else {
            return;
        };
        for (_, device) in devices.drain() {
            self.release_device(&device);
        }
        self.server.grants.lock().invalidate_grantor(self.id);
        log::info!("Connection {} closed", self.id);
    }

    fn release_device(&self, device: &Arc<Device>) {
        {
            let mut state = device.state.lock();
            let Some(mut open) = state.opens.shift_remove(&self.id) else {
                return;
            };
            let hw = &*device.hw;
            let mut grants = device.grants.lock();
            for (_, fifo) in open.fifos.drain() {
                state.unregister_fifo(fifo);
            }
            for (_, obj) in open.sync_objects.drain() {
                state.remove_vblank_syncpt(obj.disp, obj.head, obj.syncpt);
            }
            for (_, ctl) in open.sem_controls.drain() {
                state.sem_controls.shift_remove(&ctl);
            }
            for (_, sg) in open.swap_groups.drain() {
                if sg.owned {
                    grants.invalidate_payload(device.id, GrantPayload::SwapGroup(sg.id));
                    state.free_swap_group(sg.id);
                } else {
                    state.release_swap_group(sg.id);
                }
            }
            for (_, s) in open.surfaces.drain() {
                if s.owned {
                    grants.invalidate_payload(device.id, GrantPayload::Surface(s.id));
                    state.unregister_surface(hw, s.id);
                } else {
                    state.release_surface(s.id);
                }
            }
            for (disp, dpy) in open.dpy_interest.drain() {
                state.remove_dpy_interest(disp, dpy);
            }
            for syncpt in open.syncpts.drain() {
                state.syncpts.destroy(syncpt);
            }
            if state.modeset_owner == Some(self.id)
                && let Err(e) = state.release_ownership(hw, &mut grants, device.id, self.id)
            {
                log::error!("Could not release ownership: {}", ErrorFmt(e));
            }
            if state.sub_owner == Some(self.id) {
                log::info!("Sub-owner {} went away", self.id);
                state.sub_owner = None;
            }
            state.shutdown_unbacked_heads(hw);
        }
        log::info!("Connection {} freed device {}", self.id, device.id);
        self.server.collect_device(device);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
