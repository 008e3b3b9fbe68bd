#[cfg(test)]
mod tests;

use {
    crate::{
        connection::ConnectionId,
        device::DeviceId,
        permissions::{Permissions, PermissionsTypes},
        surface::SurfaceId,
        swapgroup::SwapGroupId,
        utils::opaque::{Opaque, opaque},
    },
    ahash::{AHashMap, AHashSet},
    std::fmt::{Debug, Display, Formatter},
    thiserror::Error,
};

/// A one-shot capability. Whoever presents the token to the server first redeems it.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct GrantToken(Opaque);

impl GrantToken {
    pub fn opaque(self) -> Opaque {
        self.0
    }

    pub fn from_opaque(opaque: Opaque) -> Self {
        Self(opaque)
    }
}

impl Display for GrantToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for GrantToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GrantToken({})", self.0)
    }
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum GrantError {
    #[error("The token is not known to the server")]
    UnknownToken,
    #[error("The token has already been redeemed")]
    TokenAlreadyRedeemed,
    #[error("The connection that issued the token has been closed")]
    TokenAndGrantorMismatch,
    #[error("The granted rights have been revoked")]
    Revoked,
    #[error("The token was issued for a different device")]
    WrongDevice,
    #[error("The token does not grant a {}", .0)]
    WrongKind(&'static str),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GrantPayload {
    Permissions(Permissions),
    Surface(SurfaceId),
    SwapGroup(SwapGroupId),
}

impl GrantPayload {
    fn kind(&self) -> &'static str {
        match self {
            GrantPayload::Permissions(_) => "permission set",
            GrantPayload::Surface(_) => "surface",
            GrantPayload::SwapGroup(_) => "swap group",
        }
    }
}

struct PendingGrant {
    grantor: ConnectionId,
    device: DeviceId,
    payload: GrantPayload,
}

#[derive(Debug)]
pub struct Redeemed {
    pub grantor: ConnectionId,
    pub payload: GrantPayload,
}

/// The grants that have been issued but not yet redeemed, plus the fates of the tokens
/// that are no longer pending.
#[derive(Default)]
pub struct GrantTable {
    pending: AHashMap<GrantToken, PendingGrant>,
    redeemed: AHashSet<GrantToken>,
    orphaned: AHashSet<GrantToken>,
    revoked: AHashSet<GrantToken>,
}

impl GrantTable {
    pub fn insert(
        &mut self,
        grantor: ConnectionId,
        device: DeviceId,
        payload: GrantPayload,
    ) -> GrantToken {
        let token = GrantToken(opaque());
        log::debug!(
            "Connection {} granted a {} as {}",
            grantor,
            payload.kind(),
            token
        );
        self.pending.insert(
            token,
            PendingGrant {
                grantor,
                device,
                payload,
            },
        );
        token
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Redeems the token if it was issued for `device` and carries a payload that
    /// `accept` accepts. A rejected token stays pending.
    pub fn redeem<T>(
        &mut self,
        token: GrantToken,
        device: DeviceId,
        accept: impl FnOnce(&GrantPayload) -> Option<T>,
        kind: &'static str,
    ) -> Result<(ConnectionId, T), GrantError> {
        let Some(grant) = self.pending.get(&token) else {
            return Err(self.fate(token));
        };
        if grant.device != device {
            return Err(GrantError::WrongDevice);
        }
        let Some(res) = accept(&grant.payload) else {
            return Err(GrantError::WrongKind(kind));
        };
        let grantor = grant.grantor;
        self.pending.remove(&token);
        self.redeemed.insert(token);
        Ok((grantor, res))
    }

    /// The payload of a pending grant.
    pub fn peek(&self, token: GrantToken) -> Result<&GrantPayload, GrantError> {
        match self.pending.get(&token) {
            Some(grant) => Ok(&grant.payload),
            None => Err(self.fate(token)),
        }
    }

    fn fate(&self, token: GrantToken) -> GrantError {
        if self.redeemed.contains(&token) {
            GrantError::TokenAlreadyRedeemed
        } else if self.orphaned.contains(&token) {
            GrantError::TokenAndGrantorMismatch
        } else if self.revoked.contains(&token) {
            GrantError::Revoked
        } else {
            GrantError::UnknownToken
        }
    }

    /// Invalidates all unredeemed tokens issued by a closed connection.
    pub fn invalidate_grantor(&mut self, grantor: ConnectionId) {
        let orphaned = &mut self.orphaned;
        self.pending.retain(|token, grant| {
            if grant.grantor == grantor {
                orphaned.insert(*token);
                false
            } else {
                true
            }
        });
    }

    /// Drops all unredeemed grants for the device.
    pub fn invalidate_device(&mut self, device: DeviceId) {
        let revoked = &mut self.revoked;
        self.pending.retain(|token, grant| {
            if grant.device == device {
                revoked.insert(*token);
                false
            } else {
                true
            }
        });
    }

    /// Drops unredeemed grants of the given object.
    pub fn invalidate_payload(&mut self, device: DeviceId, payload: GrantPayload) {
        let revoked = &mut self.revoked;
        self.pending.retain(|token, grant| {
            if grant.device == device && grant.payload == payload {
                revoked.insert(*token);
                false
            } else {
                true
            }
        });
    }

    /// Drops unredeemed permission grants of the given types.
    pub fn revoke_types(&mut self, device: DeviceId, types: PermissionsTypes) {
        let revoked = &mut self.revoked;
        self.pending.retain(|token, grant| {
            let GrantPayload::Permissions(p) = &grant.payload else {
                return true;
            };
            if grant.device == device && types.contains(p.ty().mask()) {
                revoked.insert(*token);
                false
            } else {
                true
            }
        });
    }

    /// Removes the rights in `perms` from unredeemed permission grants. Grants that
    /// become empty are dropped.
    pub fn revoke_exact(&mut self, device: DeviceId, perms: &Permissions) {
        let revoked = &mut self.revoked;
        self.pending.retain(|token, grant| {
            let GrantPayload::Permissions(p) = &mut grant.payload else {
                return true;
            };
            if grant.device != device || p.ty() != perms.ty() {
                return true;
            }
            if p.remove(perms) {
                true
            } else {
                revoked.insert(*token);
                false
            }
        });
    }
}
