use crate::{
    dpy::{DpyId, DpyIdList},
    permissions::{
        DispLayout, EffectivePermissions, FlipPermissions, MAX_HEADS_PER_DISP,
        ModesetPermissions, PERMISSIONS_FLIPPING, PermissionError, Permissions,
        PermissionsType,
    },
};

fn layout() -> Vec<DispLayout> {
    let mut layers = [0; MAX_HEADS_PER_DISP];
    layers[0] = 3;
    layers[1] = 2;
    vec![DispLayout {
        num_heads: 2,
        layers,
        valid_dpys: DpyIdList::from_raw(0b111),
    }]
}

fn dpy(n: u32) -> DpyId {
    DpyId::new(n).unwrap()
}

#[test]
fn full_flip_permissions() {
    let full = FlipPermissions::full(&layout());
    assert_eq!(full.layer_mask(0, 0), 0b111);
    assert_eq!(full.layer_mask(0, 1), 0b11);
    assert_eq!(full.layer_mask(0, 2), 0);
    assert_eq!(full.layer_mask(3, 0), 0);
    assert_eq!(full.layer_mask(17, 0), 0);
}

#[test]
fn validate_grants() {
    let layout = layout();
    let ok = Permissions::Flipping(FlipPermissions::default().allow(0, 1, 0b10));
    assert_eq!(ok.validate(&layout), Ok(()));
    let bad_layer = Permissions::Flipping(FlipPermissions::default().allow(0, 1, 0b100));
    assert_eq!(
        bad_layer.validate(&layout),
        Err(PermissionError::InvalidLayerMask(0, 1, 0b100))
    );
    let bad_head = Permissions::Flipping(FlipPermissions::default().allow(0, 5, 1));
    assert_eq!(
        bad_head.validate(&layout),
        Err(PermissionError::InvalidHead(0, 5))
    );
    let bad_disp = Permissions::Flipping(FlipPermissions::default().allow(1, 0, 1));
    assert_eq!(
        bad_disp.validate(&layout),
        Err(PermissionError::InvalidDisp(1))
    );
    let empty = Permissions::Modeset(ModesetPermissions::default());
    assert_eq!(empty.validate(&layout), Err(PermissionError::Empty));
    let bad_dpy = Permissions::Modeset(
        ModesetPermissions::default().allow(0, 0, DpyIdList::single(dpy(5))),
    );
    assert!(matches!(
        bad_dpy.validate(&layout),
        Err(PermissionError::InvalidDpys(0, 0, _))
    ));
    assert_eq!(Permissions::SubOwner.validate(&layout), Ok(()));
    assert_eq!(Permissions::SubOwner.ty(), PermissionsType::SubOwner);
}

#[test]
fn acquire_is_a_union() {
    let mut eff = EffectivePermissions::default();
    let before = eff;
    eff.acquire(&Permissions::Flipping(
        FlipPermissions::default().allow(0, 0, 0b001),
    ));
    assert!(before.is_subset_of(&eff));
    let before = eff;
    eff.acquire(&Permissions::Flipping(
        FlipPermissions::default().allow(0, 0, 0b100),
    ));
    assert!(before.is_subset_of(&eff));
    assert_eq!(eff.flip.layer_mask(0, 0), 0b101);
    let before = eff;
    eff.acquire(&Permissions::Flipping(
        FlipPermissions::default().allow(0, 0, 0b001),
    ));
    assert_eq!(before, eff);
}

#[test]
fn modeset_rights_imply_flip_rights() {
    let mut eff = EffectivePermissions::default();
    eff.acquire(&Permissions::Flipping(
        FlipPermissions::default().allow(0, 0, 0b001),
    ));
    assert_eq!(eff.flippable_layers(0, 0, 0b111), 0b001);
    assert_eq!(eff.flippable_layers(0, 1, 0b11), 0);
    eff.acquire(&Permissions::Modeset(
        ModesetPermissions::default().allow(0, 1, DpyIdList::single(dpy(0))),
    ));
    assert_eq!(eff.flippable_layers(0, 1, 0b11), 0b11);
}

#[test]
fn remove_and_clear() {
    let mut grant = Permissions::Flipping(FlipPermissions::default().allow(0, 0, 0b011));
    let revoke = Permissions::Flipping(FlipPermissions::default().allow(0, 0, 0b001));
    assert!(grant.remove(&revoke));
    assert_eq!(
        grant,
        Permissions::Flipping(FlipPermissions::default().allow(0, 0, 0b010))
    );
    let revoke = Permissions::Flipping(FlipPermissions::default().allow(0, 0, 0b010));
    assert!(!grant.remove(&revoke));
    let mut modeset = Permissions::Modeset(
        ModesetPermissions::default().allow(0, 0, DpyIdList::single(dpy(1))),
    );
    assert!(modeset.remove(&revoke));

    let mut eff = EffectivePermissions::full(&layout());
    eff.clear(PERMISSIONS_FLIPPING);
    assert!(eff.flip.is_empty());
    assert!(!eff.modeset.is_empty());
}

#[test]
fn modeset_heads() {
    let m = ModesetPermissions::default()
        .allow(0, 1, DpyIdList::single(dpy(0)))
        .allow(2, 3, DpyIdList::single(dpy(2)));
    let heads: Vec<_> = m.heads().collect();
    assert_eq!(heads, vec![(0, 1), (2, 3)]);
}
