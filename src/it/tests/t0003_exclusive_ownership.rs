use {
    crate::{
        connection::ConnectionError,
        device::testing::HDMI,
        flip::{FlipStatus, LayerFlip},
        it::{test_error::TestResult, testrun::TestRun},
        modeset::SetModeStatus,
        permissions::PermissionError,
    },
    std::sync::atomic::Ordering::Relaxed,
};

testcase!();

fn test(run: &TestRun) -> TestResult {
    let a = run.client()?;
    let b = run.client()?;
    a.conn.grab_ownership(a.device())?;
    tassert_err!(
        b.conn.grab_ownership(b.device()),
        ConnectionError::Permission(e) if *e == PermissionError::AlreadyOwned
    );

    tassert_eq!(b.set_heads(&[(1, HDMI)])?.status, SetModeStatus::NotModesetOwner);
    let validate = b.modeset_request(&[(1, HDMI)]).committing(false);
    tassert_eq!(b.conn.set_mode(b.device(), &validate)?.status, SetModeStatus::Success);
    tassert_eq!(run.hw.num_commits(), 0);

    tassert_eq!(a.set_heads(&[(1, HDMI)])?.status, SetModeStatus::Success);
    tassert_eq!(run.hw.num_commits(), 1);
    tassert!(run.head_active(1)?);

    let s = b.surface()?;
    tassert_eq!(b.flip(1, 0, LayerFlip::show(s))?.status, FlipStatus::NotPermitted);
    tassert_err!(
        b.conn.release_ownership(b.device()),
        ConnectionError::Permission(e) if *e == PermissionError::NotOwner
    );

    a.conn.release_ownership(a.device())?;
    tassert!(!run.head_active(1)?);
    tassert_eq!(run.hw.restored.load(Relaxed), 1);
    b.conn.grab_ownership(b.device())?;
    Ok(())
}
