use crate::{
    connection::ConnectionError,
    grant::{GrantError, GrantToken},
    it::{test_error::TestResult, testrun::TestRun},
    permissions::{FlipPermissions, Permissions},
    utils::opaque::opaque,
};

testcase!();

fn test(run: &TestRun) -> TestResult {
    let a = run.client()?;
    let b = run.client()?;
    let c = run.client()?;
    a.conn.grab_ownership(a.device())?;

    let perms = Permissions::Flipping(FlipPermissions::default().allow(0, 1, 0b1));
    let token = a.conn.grant_permissions(a.device(), perms)?;
    tassert_eq!(run.server.pending_grants(), 1);
    tassert_eq!(b.conn.acquire_permissions(b.device(), token)?, perms);
    tassert_eq!(run.server.pending_grants(), 0);
    tassert_err!(
        c.conn.acquire_permissions(c.device(), token),
        ConnectionError::Grant(e) if *e == GrantError::TokenAlreadyRedeemed
    );
    tassert_err!(
        b.conn.acquire_permissions(b.device(), token),
        ConnectionError::Grant(e) if *e == GrantError::TokenAlreadyRedeemed
    );

    // A token presented for the wrong kind of object stays redeemable.
    let s = a.surface()?;
    let st = a.conn.grant_surface(a.device(), s)?;
    tassert_err!(
        c.conn.acquire_permissions(c.device(), st),
        ConnectionError::Grant(e) if *e == GrantError::WrongKind("permission set")
    );
    let cs = c.conn.acquire_surface(c.device(), st)?;
    tassert_eq!(c.surface_id(cs)?, a.surface_id(s)?);

    tassert_err!(
        c.conn.acquire_permissions(c.device(), GrantToken::from_opaque(opaque())),
        ConnectionError::Grant(e) if *e == GrantError::UnknownToken
    );

    // Unredeemed tokens die with their grantor.
    let late = a.conn.grant_permissions(a.device(), perms)?;
    a.conn.close();
    tassert_eq!(run.server.pending_grants(), 0);
    tassert_err!(
        c.conn.acquire_permissions(c.device(), late),
        ConnectionError::Grant(e)
            if matches!(*e, GrantError::Revoked | GrantError::TokenAndGrantorMismatch)
    );
    Ok(())
}
