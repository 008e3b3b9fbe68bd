use {
    crate::{
        connection::{Connection, ConnectionError, DeviceHandle, FifoHandle, SurfaceHandle},
        device::{DeviceState, SurfaceRef},
        events::UnicastEvent,
        grant::{GrantPayload, GrantToken},
        surface::{MemoryKind, SurfaceError, SurfaceId, SurfaceParams},
        swapgroup::fifo::{Fifo, FifoError},
    },
    std::sync::Arc,
};

impl Connection {
    fn owned_surface(
        &self,
        state: &DeviceState,
        surface: SurfaceHandle,
    ) -> Result<SurfaceId, ConnectionError> {
        let sref = state.open(self.id)?.surfaces.get(surface)?;
        if !sref.owned {
            return Err(SurfaceError::NotOwner.into());
        }
        Ok(sref.id)
    }

    pub fn register_surface(
        &self,
        device: DeviceHandle,
        params: SurfaceParams,
    ) -> Result<SurfaceHandle, ConnectionError> {
        self.with_state(device, |_, state| {
            let id = state.register_surface(self.id, params)?;
            let sref = SurfaceRef { id, owned: true };
            match state.open_mut(self.id)?.surfaces.alloc(sref) {
                Ok(handle) => Ok(handle),
                Err(e) => {
                    state.surfaces.remove(&id);
                    Err(e.into())
                }
            }
        })
    }

    /// Removes the surface from scanout. Connections that acquired the surface keep a
    /// handle to it until they release it.
    pub fn unregister_surface(
        &self,
        device: DeviceHandle,
        surface: SurfaceHandle,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |device, state| {
            let id = self.owned_surface(state, surface)?;
            state.open_mut(self.id)?.surfaces.free(surface)?;
            device
                .grants
                .lock()
                .invalidate_payload(device.id, GrantPayload::Surface(id));
            state.unregister_surface(&*device.hw, id);
            let (fifos, ctls) = (&state.fifos, &state.sem_controls);
            let open = state.opens.get_mut(&self.id);
            if let Some(open) = open {
                open.fifos.retain(|_, f| fifos.contains_key(f));
                open.sem_controls.retain(|_, c| ctls.contains_key(c));
            }
            Ok(())
        })
    }

    pub fn grant_surface(
        &self,
        device: DeviceHandle,
        surface: SurfaceHandle,
    ) -> Result<GrantToken, ConnectionError> {
        self.with_state(device, |device, state| {
            let id = self.owned_surface(state, surface)?;
            let token = device
                .grants
                .lock()
                .insert(self.id, device.id, GrantPayload::Surface(id));
            Ok(token)
        })
    }

    pub fn acquire_surface(
        &self,
        device: DeviceHandle,
        token: GrantToken,
    ) -> Result<SurfaceHandle, ConnectionError> {
        self.with_state(device, |device, state| {
            let (_, id) = device.grants.lock().redeem(
                token,
                device.id,
                |p| match p {
                    GrantPayload::Surface(id) => Some(*id),
                    _ => None,
                },
                "surface",
            )?;
            let Some(s) = state.surfaces.get_mut(&id).filter(|s| !s.is_orphaned()) else {
                return Err(SurfaceError::Orphaned.into());
            };
            s.acquired += 1;
            let sref = SurfaceRef { id, owned: false };
            match state.open_mut(self.id)?.surfaces.alloc(sref) {
                Ok(handle) => {
                    log::debug!("Connection {} acquired surface {}", self.id, id);
                    Ok(handle)
                }
                Err(e) => {
                    state.release_surface(id);
                    Err(e.into())
                }
            }
        })
    }

    /// Drops a handle obtained through [`Connection::acquire_surface`].
    pub fn release_surface(
        &self,
        device: DeviceHandle,
        surface: SurfaceHandle,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let open = state.open_mut(self.id)?;
            if open.surfaces.get(surface)?.owned {
                return Err(SurfaceError::NotOwner.into());
            }
            let sref = open.surfaces.free(surface)?;
            state.release_surface(sref.id);
            Ok(())
        })
    }

    /// Turns a system memory surface of this connection into a deferred request fifo.
    pub fn register_fifo(
        &self,
        device: DeviceHandle,
        surface: SurfaceHandle,
        unicast: Option<Arc<UnicastEvent>>,
    ) -> Result<FifoHandle, ConnectionError> {
        self.with_state(device, |_, state| {
            let id = self.owned_surface(state, surface)?;
            let Some(s) = state.surfaces.get(&id) else {
                return Err(SurfaceError::Orphaned.into());
            };
            if s.params.memory_kind != MemoryKind::System {
                return Err(FifoError::NotSysmem.into());
            }
            let mut fifo = Fifo::new(
                state.ids.fifos.next(),
                self.id,
                id,
                s.params.memory.clone(),
            )?;
            fifo.unicast = unicast;
            let fifo_id = fifo.id;
            let handle = state.open_mut(self.id)?.fifos.alloc(fifo_id)?;
            state.register_fifo(fifo);
            Ok(handle)
        })
    }

    pub fn unregister_fifo(
        &self,
        device: DeviceHandle,
        fifo: FifoHandle,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let id = state.open_mut(self.id)?.fifos.free(fifo)?;
            state.unregister_fifo(id);
            Ok(())
        })
    }

    /// Binds a unicast event that is signaled whenever the fifo's swap group swaps.
    pub fn set_fifo_unicast(
        &self,
        device: DeviceHandle,
        fifo: FifoHandle,
        unicast: Option<Arc<UnicastEvent>>,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let id = *state.open(self.id)?.fifos.get(fifo)?;
            if let Some(f) = state.fifos.get_mut(&id) {
                f.unicast = unicast;
            }
            Ok(())
        })
    }
}
