use crate::{
    connection::ConnectionError,
    device::testing::HDMI,
    flip::{FenceSync, LayerFlip, sync::SyncptWait},
    it::{test_error::TestResult, testrun::TestRun},
};

testcase!();

fn test(run: &TestRun) -> TestResult {
    let a = run.client()?;
    let b = run.client()?;
    a.conn.grab_ownership(a.device())?;
    a.set_heads(&[(1, HDMI)])?;
    let dev = a.device();

    let pre = a.conn.create_syncpt(dev)?;
    let s = a.surface()?;
    let mut lf = LayerFlip::show(s);
    lf.fence = Some(FenceSync {
        pre: Some(SyncptWait {
            syncpt: pre,
            value: 2,
        }),
        request_post: true,
    });
    let reply = a.flip(1, 0, lf)?;
    tassert_eq!(reply.post_fences.len(), 1);
    let post = reply.post_fences[0];
    tassert_eq!((post.disp, post.head, post.layer), (0, 1, 0));

    run.vblank()?;
    tassert_eq!(run.visible(1, 0)?, None);
    tassert!(a.conn.syncpt_value(dev, post.fence.syncpt)? < post.fence.value);
    a.conn.signal_syncpt(dev, pre, 1)?;
    run.vblank()?;
    tassert_eq!(run.visible(1, 0)?, None);
    tassert_err!(
        b.conn.signal_syncpt(b.device(), pre, 2),
        ConnectionError::UnknownSyncpt(id) if id == pre
    );
    a.conn.signal_syncpt(dev, pre, 2)?;
    run.vblank()?;
    tassert_eq!(run.visible(1, 0)?, Some(a.surface_id(s)?));
    tassert!(a.conn.syncpt_value(dev, post.fence.syncpt)? >= post.fence.value);

    a.conn.destroy_syncpt(dev, pre)?;
    tassert_err!(
        a.conn.destroy_syncpt(dev, pre),
        ConnectionError::UnknownSyncpt(_)
    );

    // Vblank sync objects and semaphore controls follow the frame counter of the head.
    let (obj, vblanks) = a.conn.enable_vblank_sync_object(dev, 0, 1, None)?;
    let (sem, memory) = a.buffer(64)?;
    let ctl = a.conn.enable_vblank_sem_control(dev, 0, 1, sem, 8)?;
    let before = a.conn.syncpt_value(dev, vblanks)?;
    run.vblank()?;
    run.vblank()?;
    tassert_eq!(a.conn.syncpt_value(dev, vblanks)?, before + 2);
    let frame = run.with_state(|st| st.head(0, 1).map(|h| h.frame_count).unwrap_or(0))?;
    tassert_eq!(memory.read_u32(8), Some(frame as u32));
    a.conn.disable_vblank_sem_control(dev, ctl)?;
    a.conn.disable_vblank_sync_object(dev, obj)?;
    run.vblank()?;
    tassert_eq!(memory.read_u32(8), Some(frame as u32));
    Ok(())
}
