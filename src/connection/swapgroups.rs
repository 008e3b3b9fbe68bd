use crate::{
    connection::{Connection, ConnectionError, DeviceHandle, FifoHandle, SwapGroupHandle},
    device::{DeviceState, SwapGroupRef},
    grant::{GrantPayload, GrantToken},
    permissions::{MAX_DISPS, PermissionError},
    rect::Rect,
    swapgroup::{SwapGroupError, SwapGroupId, SwapGroupState},
};

impl Connection {
    fn swap_group<'a>(
        &self,
        state: &'a DeviceState,
        sg: SwapGroupHandle,
    ) -> Result<&'a SwapGroupRef, ConnectionError> {
        Ok(state.open(self.id)?.swap_groups.get(sg)?)
    }

    /// Resolves a swap group that this connection allocated. Requires owner rights.
    fn owned_swap_group(
        &self,
        state: &DeviceState,
        sg: SwapGroupHandle,
    ) -> Result<SwapGroupId, ConnectionError> {
        if !state.has_owner_rights(self.id) {
            return Err(PermissionError::NotOwner.into());
        }
        let sref = self.swap_group(state, sg)?;
        if !sref.owned {
            return Err(PermissionError::NotOwner.into());
        }
        Ok(sref.id)
    }

    /// Creates a swap group spanning the given heads of each disp.
    pub fn alloc_swap_group(
        &self,
        device: DeviceHandle,
        heads: [u32; MAX_DISPS],
    ) -> Result<SwapGroupHandle, ConnectionError> {
        self.with_state(device, |_, state| {
            if !state.has_owner_rights(self.id) {
                return Err(PermissionError::NotOwner.into());
            }
            let id = state.alloc_swap_group(self.id, heads)?;
            let sref = SwapGroupRef { id, owned: true };
            match state.open_mut(self.id)?.swap_groups.alloc(sref) {
                Ok(handle) => Ok(handle),
                Err(e) => {
                    state.free_swap_group(id);
                    Err(e.into())
                }
            }
        })
    }

    pub fn free_swap_group(
        &self,
        device: DeviceHandle,
        sg: SwapGroupHandle,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |device, state| {
            let id = self.owned_swap_group(state, sg)?;
            state.open_mut(self.id)?.swap_groups.free(sg)?;
            device
                .grants
                .lock()
                .invalidate_payload(device.id, GrantPayload::SwapGroup(id));
            state.free_swap_group(id);
            Ok(())
        })
    }

    /// Adds fifos to swap groups. Either all fifos join or none.
    pub fn join_swap_group(
        &self,
        device: DeviceHandle,
        joins: &[(FifoHandle, SwapGroupHandle)],
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let open = state.open(self.id)?;
            let mut resolved = Vec::with_capacity(joins.len());
            for &(fifo, sg) in joins {
                resolved.push((*open.fifos.get(fifo)?, open.swap_groups.get(sg)?.id));
            }
            state.join_swap_groups(&resolved)?;
            Ok(())
        })
    }

    pub fn leave_swap_group(
        &self,
        device: DeviceHandle,
        fifo: FifoHandle,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let id = *state.open(self.id)?.fifos.get(fifo)?;
            state.leave_swap_group(id)?;
            Ok(())
        })
    }

    /// Restricts the flips gated by the group to the given desktop region.
    pub fn set_swap_group_clip_list(
        &self,
        device: DeviceHandle,
        sg: SwapGroupHandle,
        clip_list: &[Rect],
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let id = self.owned_swap_group(state, sg)?;
            state.set_swap_group_clip_list(id, clip_list)?;
            Ok(())
        })
    }

    pub fn swap_group_state(
        &self,
        device: DeviceHandle,
        sg: SwapGroupHandle,
    ) -> Result<SwapGroupState, ConnectionError> {
        self.with_state(device, |_, state| {
            let id = self.swap_group(state, sg)?.id;
            match state.swap_groups.get(&id) {
                Some(g) => Ok(g.state),
                None => Err(SwapGroupError::Freed.into()),
            }
        })
    }

    pub fn grant_swap_group(
        &self,
        device: DeviceHandle,
        sg: SwapGroupHandle,
    ) -> Result<GrantToken, ConnectionError> {
        self.with_state(device, |device, state| {
            let id = self.owned_swap_group(state, sg)?;
            let token = device
                .grants
                .lock()
                .insert(self.id, device.id, GrantPayload::SwapGroup(id));
            Ok(token)
        })
    }

    pub fn acquire_swap_group(
        &self,
        device: DeviceHandle,
        token: GrantToken,
    ) -> Result<SwapGroupHandle, ConnectionError> {
        self.with_state(device, |device, state| {
            let (_, id) = device.grants.lock().redeem(
                token,
                device.id,
                |p| match p {
                    GrantPayload::SwapGroup(id) => Some(*id),
                    _ => None,
                },
                "swap group",
            )?;
            let Some(g) = state.swap_groups.get_mut(&id).filter(|g| !g.freed) else {
                return Err(SwapGroupError::Freed.into());
            };
            g.acquired += 1;
            let sref = SwapGroupRef { id, owned: false };
            match state.open_mut(self.id)?.swap_groups.alloc(sref) {
                Ok(handle) => Ok(handle),
                Err(e) => {
                    state.release_swap_group(id);
                    Err(e.into())
                }
            }
        })
    }

    /// Drops a handle obtained through [`Connection::acquire_swap_group`].
    pub fn release_swap_group(
        &self,
        device: DeviceHandle,
        sg: SwapGroupHandle,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| {
            let open = state.open_mut(self.id)?;
            if open.swap_groups.get(sg)?.owned {
                return Err(PermissionError::NotOwner.into());
            }
            let sref = open.swap_groups.free(sg)?;
            state.release_swap_group(sref.id);
            Ok(())
        })
    }
}
