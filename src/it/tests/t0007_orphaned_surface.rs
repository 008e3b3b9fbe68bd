use crate::{
    connection::ConnectionError,
    device::testing::HDMI,
    flip::{FlipCheckError, FlipHeadStatus, FlipStatus, LayerFlip},
    grant::GrantError,
    it::{test_error::TestResult, testrun::TestRun},
    permissions::{FlipPermissions, Permissions},
    surface::SurfaceError,
};

testcase!();

fn test(run: &TestRun) -> TestResult {
    let a = run.client()?;
    let b = run.client()?;
    a.conn.grab_ownership(a.device())?;
    a.set_heads(&[(1, HDMI)])?;
    let perms = Permissions::Flipping(FlipPermissions::default().allow(0, 1, 0b1));
    let token = a.conn.grant_permissions(a.device(), perms)?;
    b.conn.acquire_permissions(b.device(), token)?;

    let s = a.surface()?;
    let id = a.surface_id(s)?;
    let token = a.conn.grant_surface(a.device(), s)?;
    let unredeemed = a.conn.grant_surface(a.device(), s)?;
    let bs = b.conn.acquire_surface(b.device(), token)?;
    tassert_eq!(b.surface_id(bs)?, id);
    tassert_err!(
        b.conn.grant_surface(b.device(), bs),
        ConnectionError::Surface(e) if *e == SurfaceError::NotOwner
    );

    tassert_eq!(b.flip(1, 0, LayerFlip::show(bs))?.status, FlipStatus::Success);
    run.vblank()?;
    tassert_eq!(run.visible(1, 0)?, Some(id));

    a.conn.unregister_surface(a.device(), s)?;
    tassert_eq!(run.visible(1, 0)?, None);
    tassert!(run.with_state(|st| st.surfaces.contains_key(&id))?);
    tassert_err!(
        b.conn.acquire_surface(b.device(), unredeemed),
        ConnectionError::Grant(e) if *e == GrantError::Revoked
    );

    let reply = b.flip(1, 0, LayerFlip::show(bs))?;
    tassert_eq!(reply.status, FlipStatus::Invalid);
    tassert_eq!(
        reply.heads[0].status,
        FlipHeadStatus::Invalid(FlipCheckError::OrphanedSurface(0))
    );

    b.conn.release_surface(b.device(), bs)?;
    tassert!(!run.with_state(|st| st.surfaces.contains_key(&id))?);
    Ok(())
}
