use {
    crate::{
        connection::ConnectionError,
        device::testing::{DP, HDMI},
        flip::LayerFlip,
        it::{test_error::TestResult, testrun::TestRun},
    },
    std::sync::atomic::Ordering::Relaxed,
};

testcase!();

fn test(run: &TestRun) -> TestResult {
    let a = run.client()?;
    let b = run.client()?;
    a.conn.grab_ownership(a.device())?;
    a.set_heads(&[(0, DP), (1, HDMI)])?;
    let s = a.surface()?;
    a.flip(1, 0, LayerFlip::show(s))?;
    run.vblank()?;

    b.conn.close();
    tassert!(run.server.device(run.gpu.gpu_id).is_some());
    tassert!(run.head_active(1)?);

    let restored = run.hw.restored.load(Relaxed);
    a.conn.free_device(a.device())?;
    tassert!(run.server.device(run.gpu.gpu_id).is_none());
    tassert!(run.hw.restored.load(Relaxed) > restored);
    let shut_down = run
        .hw
        .commits
        .lock()
        .last()
        .is_some_and(|c| c.len() == 2 && c.iter().all(|h| h.timings.is_none()));
    tassert!(shut_down);
    tassert_err!(
        a.conn.grab_ownership(a.device()),
        ConnectionError::Handle(_)
    );

    // The next allocation starts from scratch.
    let c = run.client()?;
    c.conn.grab_ownership(c.device())?;
    tassert!(!run.head_active(0)?);
    tassert!(!run.head_active(1)?);
    Ok(())
}
