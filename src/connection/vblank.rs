use {
    crate::{
        connection::{
            Connection, ConnectionError, DeviceHandle, SurfaceHandle, VblankSemControlHandle,
            VblankSyncObjectHandle,
        },
        device::VblankSyncObject,
        events::UnicastEvent,
        flip::sync::SyncptId,
        surface::SurfaceError,
        vblank::{VblankSemControl, now_ns},
    },
    std::sync::Arc,
};

impl Connection {
    /// Creates a sync point that advances at every vblank of the head. If `unicast` is
    /// set, it is signaled at every vblank as well.
    pub fn enable_vblank_sync_object(
        &self,
        device: DeviceHandle,
        disp: usize,
        head: usize,
        unicast: Option<Arc<UnicastEvent>>,
    ) -> Result<(VblankSyncObjectHandle, SyncptId), ConnectionError> {
        self.with_state(device, |_, state| {
            let syncpt = state.add_vblank_syncpt(disp, head)?;
            let obj = VblankSyncObject {
                disp,
                head,
                syncpt,
                unicast,
            };
            match state.open_mut(self.id)?.sync_objects.alloc(obj) {
                Ok(handle) => Ok((handle, syncpt)),
                Err(e) => {
                    state.remove_vblank_syncpt(disp, head, syncpt);
                    Err(e.into())
                }
            }
        })
    }

    pub fn disable_vblank_sync_object(
        &self,
        device: DeviceHandle,
        obj: VblankSyncObjectHandle,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let obj = state.open_mut(self.id)?.sync_objects.free(obj)?;
            state.remove_vblank_syncpt(obj.disp, obj.head, obj.syncpt);
            Ok(())
        })
    }

    /// Makes the engine write the frame counter and timestamp of the head into the
    /// surface at every vblank.
    pub fn enable_vblank_sem_control(
        &self,
        device: DeviceHandle,
        disp: usize,
        head: usize,
        surface: SurfaceHandle,
        offset: u64,
    ) -> Result<VblankSemControlHandle, ConnectionError> {
        self.with_state(device, |_, state| {
            state.head(disp, head)?;
            let sref = state.open(self.id)?.surfaces.get(surface)?;
            let Some(s) = state.surfaces.get(&sref.id).filter(|s| !s.is_orphaned()) else {
                return Err(SurfaceError::Orphaned.into());
            };
            let ctl = VblankSemControl::new(
                state.ids.sem_controls.next(),
                disp,
                head,
                s.id,
                s.params.memory.clone(),
                offset,
            )?;
            let id = ctl.id;
            let handle = state.open_mut(self.id)?.sem_controls.alloc(id)?;
            state.sem_controls.insert(id, ctl);
            Ok(handle)
        })
    }

    pub fn disable_vblank_sem_control(
        &self,
        device: DeviceHandle,
        ctl: VblankSemControlHandle,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let id = state.open_mut(self.id)?.sem_controls.free(ctl)?;
            state.sem_controls.shift_remove(&id);
            Ok(())
        })
    }

    /// Writes the current frame counters of the heads without waiting for the next
    /// vblank.
    pub fn accel_vblank_sem_controls(
        &self,
        device: DeviceHandle,
        heads: &[(usize, usize)],
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            for &(disp, head) in heads {
                state.head(disp, head)?;
            }
            state.update_sem_controls(Some(heads), now_ns());
            Ok(())
        })
    }

    /// Creates a sync point that this connection signals, usually as a pre-fence.
    pub fn create_syncpt(&self, device: DeviceHandle) -> Result<SyncptId, ConnectionError> {
        self.with_state(device, |_, state| {
            let syncpt = state.syncpts.create();
            state.open_mut(self.id)?.syncpts.insert(syncpt);
            Ok(syncpt)
        })
    }

    pub fn signal_syncpt(
        &self,
        device: DeviceHandle,
        syncpt: SyncptId,
        value: u64,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            if !state.open(self.id)?.syncpts.contains(&syncpt) {
                return Err(ConnectionError::UnknownSyncpt(syncpt));
            }
            state.syncpts.signal(syncpt, value);
            Ok(())
        })
    }

    pub fn destroy_syncpt(
        &self,
        device: DeviceHandle,
        syncpt: SyncptId,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            if !state.open_mut(self.id)?.syncpts.remove(&syncpt) {
                return Err(ConnectionError::UnknownSyncpt(syncpt));
            }
            state.syncpts.destroy(syncpt);
            Ok(())
        })
    }

    /// The current value of any sync point of the device.
    pub fn syncpt_value(
        &self,
        device: DeviceHandle,
        syncpt: SyncptId,
    ) -> Result<u64, ConnectionError> {
        self.with_state(device, |_, state| {
            state
                .syncpts
                .value(syncpt)
                .ok_or(ConnectionError::UnknownSyncpt(syncpt))
        })
    }

    /// Triggers the frame boundary of the VRR flips waiting on the semaphore.
    pub fn vrr_signal_semaphore(
        &self,
        device: DeviceHandle,
        index: u32,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            if !state.vrr_semaphores.signal(index) {
                return Err(ConnectionError::InvalidVrrSemaphore(index));
            }
            Ok(())
        })
    }
}
