use {
    crate::{
        device::testing::{self, DP, HDMI, MST},
        it::{test_error::TestResult, testrun::TestRun},
        mode::Mode,
        modeset::{
            SetModeDispStatus, SetModeHeadRequest, SetModeHeadStatus, SetModeRequest,
            SetModeStatus,
        },
    },
    std::sync::atomic::Ordering::Relaxed,
};

testcase!();

fn test(run: &TestRun) -> TestResult {
    let a = run.client()?;
    a.conn.grab_ownership(a.device())?;
    let reply = a.set_heads(&[(0, DP), (1, HDMI)])?;
    tassert_eq!(reply.status, SetModeStatus::Success);
    tassert!(reply.head(0, 0).vrr_enabled);
    tassert!(!reply.head(0, 1).vrr_enabled);
    tassert_eq!(run.hw.num_commits(), 1);

    let current_mode = || {
        run.with_state(|s| {
            s.head(0, 0)
                .ok()
                .and_then(|h| h.active.as_ref().map(|c| c.mode))
        })
    };

    // One invalid head fails the whole request.
    let small = Mode::reduced_blanking(1280, 720, 60);
    let req = SetModeRequest::default()
        .committing(true)
        .with_head(0, 0, SetModeHeadRequest::new(testing::dpys(DP), small))
        .with_head(0, 1, SetModeHeadRequest::new(testing::dpys(MST), testing::mode()));
    let reply = a.conn.set_mode(a.device(), &req)?;
    tassert_eq!(reply.status, SetModeStatus::ValidationFailed);
    tassert_eq!(reply.head(0, 1).status, SetModeHeadStatus::InvalidDpy);
    tassert_eq!(run.hw.num_commits(), 1);
    tassert_eq!(current_mode()?, Some(testing::mode()));

    // Heads that are not part of the request still count for conflicts.
    let req = SetModeRequest::default()
        .committing(true)
        .with_head(0, 0, SetModeHeadRequest::new(testing::dpys(HDMI), testing::mode()));
    let reply = a.conn.set_mode(a.device(), &req)?;
    tassert_eq!(reply.disps[0].status, SetModeDispStatus::DuplicateDpys);
    tassert_eq!(run.hw.num_commits(), 1);

    run.hw.fail_commits.store(true, Relaxed);
    let req = SetModeRequest::default()
        .committing(true)
        .with_head(0, 0, SetModeHeadRequest::new(testing::dpys(DP), small));
    let reply = a.conn.set_mode(a.device(), &req)?;
    tassert_eq!(reply.status, SetModeStatus::HardwareCommitFailed);
    tassert_eq!(current_mode()?, Some(testing::mode()));
    run.hw.fail_commits.store(false, Relaxed);

    let reply = a.conn.set_mode(a.device(), &req)?;
    tassert_eq!(reply.status, SetModeStatus::Success);
    tassert_eq!(current_mode()?, Some(small));
    tassert!(run.head_active(1)?);
    Ok(())
}
