use crate::{
    connection::ConnectionId,
    device::DeviceId,
    grant::{GrantError, GrantPayload, GrantTable},
    permissions::{
        FlipPermissions, PERMISSIONS_FLIPPING, PERMISSIONS_MODESET, Permissions,
    },
    surface::SurfaceId,
};

fn flip(mask: u8) -> Permissions {
    Permissions::Flipping(FlipPermissions::default().allow(0, 0, mask))
}

fn accept_perms(p: &GrantPayload) -> Option<Permissions> {
    match p {
        GrantPayload::Permissions(p) => Some(*p),
        _ => None,
    }
}

#[test]
fn single_redemption() {
    let mut table = GrantTable::default();
    let dev = DeviceId::from_raw(1);
    let grantor = ConnectionId::from_raw(1);
    let token = table.insert(grantor, dev, GrantPayload::Permissions(flip(1)));
    let (g, p) = table
        .redeem(token, dev, accept_perms, "permission set")
        .unwrap();
    assert_eq!(g, grantor);
    assert_eq!(p, flip(1));
    assert_eq!(
        table.redeem(token, dev, accept_perms, "permission set").err(),
        Some(GrantError::TokenAlreadyRedeemed)
    );
}

#[test]
fn rejected_token_stays_pending() {
    let mut table = GrantTable::default();
    let dev = DeviceId::from_raw(1);
    let token = table.insert(
        ConnectionId::from_raw(1),
        dev,
        GrantPayload::Surface(SurfaceId::from_raw(7)),
    );
    assert_eq!(
        table
            .redeem(token, DeviceId::from_raw(2), |_| Some(()), "surface")
            .err(),
        Some(GrantError::WrongDevice)
    );
    assert_eq!(
        table.redeem(token, dev, accept_perms, "permission set").err(),
        Some(GrantError::WrongKind("permission set"))
    );
    assert_eq!(table.len(), 1);
    assert!(table.redeem(token, dev, |_| Some(()), "surface").is_ok());
}

#[test]
fn grantor_disconnect() {
    let mut table = GrantTable::default();
    let dev = DeviceId::from_raw(1);
    let c1 = ConnectionId::from_raw(1);
    let c2 = ConnectionId::from_raw(2);
    let t1 = table.insert(c1, dev, GrantPayload::Permissions(flip(1)));
    let t2 = table.insert(c2, dev, GrantPayload::Permissions(flip(1)));
    let t3 = table.insert(c1, dev, GrantPayload::Permissions(flip(2)));
    assert!(table.redeem(t3, dev, accept_perms, "permission set").is_ok());
    table.invalidate_grantor(c1);
    assert_eq!(
        table.redeem(t1, dev, accept_perms, "permission set").err(),
        Some(GrantError::TokenAndGrantorMismatch)
    );
    assert_eq!(
        table.redeem(t3, dev, accept_perms, "permission set").err(),
        Some(GrantError::TokenAlreadyRedeemed)
    );
    assert!(table.redeem(t2, dev, accept_perms, "permission set").is_ok());
}

#[test]
fn revoke_by_type_and_exact() {
    let mut table = GrantTable::default();
    let dev = DeviceId::from_raw(1);
    let c = ConnectionId::from_raw(1);
    let t1 = table.insert(c, dev, GrantPayload::Permissions(flip(0b11)));
    let t2 = table.insert(c, dev, GrantPayload::Permissions(flip(0b01)));
    table.revoke_exact(dev, &flip(0b01));
    assert_eq!(
        table.redeem(t2, dev, accept_perms, "permission set").err(),
        Some(GrantError::Revoked)
    );
    let (_, p) = table
        .redeem(t1, dev, accept_perms, "permission set")
        .unwrap();
    assert_eq!(p, flip(0b10));

    let t3 = table.insert(c, dev, GrantPayload::Permissions(flip(1)));
    table.revoke_types(dev, PERMISSIONS_MODESET);
    assert_eq!(table.len(), 1);
    table.revoke_types(dev, PERMISSIONS_FLIPPING);
    assert_eq!(
        table.redeem(t3, dev, accept_perms, "permission set").err(),
        Some(GrantError::Revoked)
    );
}

#[test]
fn unknown_token() {
    let mut table = GrantTable::default();
    let dev = DeviceId::from_raw(1);
    let token = {
        let mut other = GrantTable::default();
        other.insert(ConnectionId::from_raw(1), dev, GrantPayload::Permissions(flip(1)))
    };
    assert_eq!(
        table.redeem(token, dev, accept_perms, "permission set").err(),
        Some(GrantError::UnknownToken)
    );
}
