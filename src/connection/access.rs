use crate::{
    connection::{Connection, ConnectionError, DeviceHandle},
    grant::{GrantPayload, GrantToken},
    permissions::{Permissions, PermissionsTypes},
};

impl Connection {
    pub fn grab_ownership(&self, device: DeviceHandle) -> Result<(), ConnectionError> {
        self.with_state(device, |_, state| Ok(state.grab_ownership(self.id)?))
    }

    pub fn release_ownership(&self, device: DeviceHandle) -> Result<(), ConnectionError> {
        self.with_state(device, |device, state| {
            let mut grants = device.grants.lock();
            state.release_ownership(&*device.hw, &mut grants, device.id, self.id)?;
            Ok(())
        })
    }

    /// Issues a token that transfers `perms` to whichever connection redeems it first.
    pub fn grant_permissions(
        &self,
        device: DeviceHandle,
        perms: Permissions,
    ) -> Result<GrantToken, ConnectionError> {
        self.with_state(device, |device, state| {
            state.check_grant(self.id, &perms)?;
            let token = device
                .grants
                .lock()
                .insert(self.id, device.id, GrantPayload::Permissions(perms));
            Ok(token)
        })
    }

    /// Redeems a permission token. The rights are added to the rights this connection
    /// already holds.
    pub fn acquire_permissions(
        &self,
        device: DeviceHandle,
        token: GrantToken,
    ) -> Result<Permissions, ConnectionError> {
        self.with_state(device, |device, state| {
            let mut grants = device.grants.lock();
            if let Ok(GrantPayload::Permissions(p)) = grants.peek(token) {
                state.check_acquire(p)?;
            }
            let (grantor, perms) = grants.redeem(
                token,
                device.id,
                |p| match p {
                    GrantPayload::Permissions(p) => Some(*p),
                    _ => None,
                },
                "permission set",
            )?;
            state.acquire_permissions(self.id, &perms);
            log::info!(
                "Connection {} acquired {:?} from connection {}",
                self.id,
                perms.ty(),
                grantor
            );
            Ok(perms)
        })
    }

    /// Revokes all rights of the given types from all other connections.
    pub fn revoke_permission_types(
        &self,
        device: DeviceHandle,
        types: PermissionsTypes,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |device, state| {
            let mut grants = device.grants.lock();
            state.revoke_permission_types(&*device.hw, &mut grants, device.id, self.id, types)?;
            Ok(())
        })
    }

    /// Revokes exactly the rights in `perms` from all other connections.
    pub fn revoke_permissions(
        &self,
        device: DeviceHandle,
        perms: &Permissions,
    ) -> Result<(), ConnectionError> {
        self.with_state(device, |device, state| {
            let mut grants = device.grants.lock();
            state.revoke_permissions(&*device.hw, &mut grants, device.id, self.id, perms)?;
            Ok(())
        })
    }
}
