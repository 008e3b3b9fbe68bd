use crate::{
    connection::ConnectionId,
    device::{DeviceId, DeviceState},
    grant::GrantTable,
    hardware::DisplayHardware,
    permissions::{PERMISSIONS_SUB_OWNER, PermissionError, Permissions, PermissionsTypes},
};

impl DeviceState {
    /// Makes the connection the modeset owner. Fails without side effects if the device
    /// already has an owner.
    pub fn grab_ownership(&mut self, conn: ConnectionId) -> Result<(), PermissionError> {
        if self.modeset_owner.is_some() {
            return Err(PermissionError::AlreadyOwned);
        }
        self.modeset_owner = Some(conn);
        log::info!("Connection {} is now the modeset owner", conn);
        Ok(())
    }

    /// Returns the device to its unowned state. All delegated rights are revoked and
    /// the console is restored.
    pub fn release_ownership(
        &mut self,
        hw: &dyn DisplayHardware,
        grants: &mut GrantTable,
        device: DeviceId,
        conn: ConnectionId,
    ) -> Result<(), PermissionError> {
        if self.modeset_owner != Some(conn) {
            return Err(PermissionError::NotOwner);
        }
        self.modeset_owner = None;
        self.sub_owner = None;
        for open in self.opens.values_mut() {
            open.perms = Default::default();
        }
        grants.revoke_types(device, PermissionsTypes::all());
        let heads = self.active_heads();
        self.shutdown_heads(hw, &heads);
        hw.restore_console();
        log::info!("Connection {} released modeset ownership", conn);
        Ok(())
    }

    /// Checks that the connection may grant `perms`.
    pub fn check_grant(
        &self,
        conn: ConnectionId,
        perms: &Permissions,
    ) -> Result<(), PermissionError> {
        if !self.has_owner_rights(conn) {
            return Err(PermissionError::NotOwner);
        }
        if let Permissions::SubOwner = perms {
            if self.modeset_owner != Some(conn) {
                return Err(PermissionError::NotOwner);
            }
            if self.sub_owner.is_some() {
                return Err(PermissionError::SubOwnerExists);
            }
        }
        perms.validate(&self.layout())
    }

    /// Checks that the connection may receive `perms`.
    pub fn check_acquire(&self, perms: &Permissions) -> Result<(), PermissionError> {
        if let Permissions::SubOwner = perms
            && self.sub_owner.is_some()
        {
            return Err(PermissionError::SubOwnerExists);
        }
        Ok(())
    }

    /// Adds redeemed rights to the connection. Never removes rights.
    pub fn acquire_permissions(&mut self, conn: ConnectionId, perms: &Permissions) {
        if let Permissions::SubOwner = perms {
            self.sub_owner = Some(conn);
            log::info!("Connection {} is now the sub-owner", conn);
            return;
        }
        if let Some(open) = self.opens.get_mut(&conn) {
            open.perms.acquire(perms);
        }
    }

    /// Revokes all rights of the given types from every connection but the caller.
    pub fn revoke_permission_types(
        &mut self,
        hw: &dyn DisplayHardware,
        grants: &mut GrantTable,
        device: DeviceId,
        conn: ConnectionId,
        types: PermissionsTypes,
    ) -> Result<(), PermissionError> {
        if types.is_empty() || !types.is_valid() {
            return Err(PermissionError::InvalidTypeMask(types.0));
        }
        if !self.has_owner_rights(conn) {
            return Err(PermissionError::NotOwner);
        }
        let sub_owner = types.contains(PERMISSIONS_SUB_OWNER);
        if sub_owner && self.modeset_owner != Some(conn) {
            return Err(PermissionError::NotOwner);
        }
        for (c, open) in &mut self.opens {
            if *c != conn {
                open.perms.clear(types);
            }
        }
        grants.revoke_types(device, types);
        log::info!("Connection {} revoked permissions {:?}", conn, types);
        if sub_owner {
            self.sub_owner = None;
            let heads = self.active_heads();
            self.shutdown_heads(hw, &heads);
        } else {
            self.shutdown_unbacked_heads(hw);
        }
        Ok(())
    }

    /// Removes exactly the rights in `perms` from every connection but the caller.
    pub fn revoke_permissions(
        &mut self,
        hw: &dyn DisplayHardware,
        grants: &mut GrantTable,
        device: DeviceId,
        conn: ConnectionId,
        perms: &Permissions,
    ) -> Result<(), PermissionError> {
        if let Permissions::SubOwner = perms {
            return Err(PermissionError::NotRevocable);
        }
        if !self.has_owner_rights(conn) {
            return Err(PermissionError::NotOwner);
        }
        perms.validate(&self.layout())?;
        for (c, open) in &mut self.opens {
            if *c != conn {
                open.perms.remove(perms);
            }
        }
        grants.revoke_exact(device, perms);
        log::info!("Connection {} revoked {:?}", conn, perms);
        self.shutdown_unbacked_heads(hw);
        Ok(())
    }

    /// Shuts down heads that were configured through delegated modeset rights which the
    /// committing connection no longer holds. Their pending flips are discarded.
    pub fn shutdown_unbacked_heads(&mut self, hw: &dyn DisplayHardware) {
        let mut heads = vec![];
        for (disp, head) in self.active_heads() {
            let h = &self.disps[disp].heads[head];
            let (Some(config), Some(conn)) = (&h.active, h.committed_by) else {
                continue;
            };
            if self.has_owner_rights(conn) {
                continue;
            }
            let backed = self
                .opens
                .get(&conn)
                .is_some_and(|o| config.dpys.is_subset_of(o.perms.modeset.dpys(disp, head)));
            if !backed {
                heads.push((disp, head));
            }
        }
        if heads.is_empty() {
            return;
        }
        log::warn!("Shutting down heads {:?}: modeset rights were revoked", heads);
        self.shutdown_heads(hw, &heads);
    }
}
