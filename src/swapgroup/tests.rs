use {
    crate::{
        config::ServerConfig,
        device::{
            DeviceState,
            testing::{self, DP, HDMI, TestHardware, commit, conn, open},
        },
        flip::{FlipRequest, HeadFlipParams, LayerFlip, flip},
        permissions::MAX_DISPS,
        rect::Rect,
        surface::{SurfaceId, SurfaceParams},
        swapgroup::{
            SwapGroupError, SwapGroupId, SwapGroupState,
            fifo::{
                FIFO_SIZE, Fifo, FifoError, FifoId, FifoWriter, Request, SWAP_GROUP_READY,
            },
        },
    },
    std::sync::Arc,
};

fn heads(mask: u32) -> [u32; MAX_DISPS] {
    let mut heads = [0; MAX_DISPS];
    heads[0] = mask;
    heads
}

fn setup() -> (Arc<crate::device::Device>, Arc<TestHardware>) {
    let (dev, hw) = testing::device();
    {
        let mut state = dev.state.lock();
        open(&mut state, conn(1));
        state.grab_ownership(conn(1)).unwrap();
        commit(&mut state, &*hw, conn(1), &[(0, DP), (1, HDMI)]);
    }
    (dev, hw)
}

fn fifo(state: &mut DeviceState) -> (FifoId, FifoWriter) {
    let (_, surface) = testing::surface_with(state, conn(1), SurfaceParams::buffer(FIFO_SIZE));
    let memory = state.surfaces[&surface].params.memory.clone();
    let id = state.ids.fifos.next();
    state.register_fifo(Fifo::new(id, conn(1), surface, memory.clone()).unwrap());
    (id, FifoWriter::new(memory))
}

/// Queues a flip of layer 0 of head 1 and returns the surface shown by it.
fn queue_flip(state: &mut DeviceState, hw: &TestHardware) -> SurfaceId {
    let (s, id) = testing::surface(state, conn(1));
    let req = FlipRequest {
        commit: true,
        ..Default::default()
    }
    .head(0, 1, HeadFlipParams::default().layer(0, LayerFlip::show(s)));
    flip(state, hw, &ServerConfig::default(), conn(1), &req).unwrap();
    id
}

fn visible(state: &DeviceState) -> Option<SurfaceId> {
    state.head(0, 1).unwrap().layers[0].visible.surface
}

fn group_state(state: &DeviceState, sg: SwapGroupId) -> SwapGroupState {
    state.swap_groups[&sg].state
}

#[test]
fn members_swap_together() {
    let (dev, hw) = setup();
    let mut state = dev.state.lock();
    let sg = state.alloc_swap_group(conn(1), heads(0b10)).unwrap();
    let (a, wa) = fifo(&mut state);
    let (b, wb) = fifo(&mut state);
    state.join_swap_groups(&[(a, sg), (b, sg)]).unwrap();
    let id = queue_flip(&mut state, &hw);

    wa.push(Request::swap_group_ready(3)).unwrap();
    state.process_vblank(&*hw, 0);
    assert_eq!(group_state(&state, sg), SwapGroupState::AwaitingAllMembers);
    assert_eq!(visible(&state), None);

    wb.push(Request::swap_group_ready(5)).unwrap();
    state.process_vblank(&*hw, 0);
    assert_eq!(group_state(&state, sg), SwapGroupState::Ready);
    assert_eq!(visible(&state), None);
    assert_ne!(wa.semaphore(3), SWAP_GROUP_READY);

    state.process_vblank(&*hw, 0);
    assert_eq!(visible(&state), Some(id));
    assert_eq!(group_state(&state, sg), SwapGroupState::Idle);
    assert_eq!(wa.semaphore(3), SWAP_GROUP_READY);
    assert_eq!(wb.semaphore(5), SWAP_GROUP_READY);
}

#[test]
fn leaving_member_releases_the_group() {
    let (dev, hw) = setup();
    let mut state = dev.state.lock();
    let sg = state.alloc_swap_group(conn(1), heads(0b10)).unwrap();
    let (a, wa) = fifo(&mut state);
    let (b, _) = fifo(&mut state);
    state.join_swap_groups(&[(a, sg), (b, sg)]).unwrap();
    let id = queue_flip(&mut state, &hw);
    wa.push(Request::swap_group_ready(0)).unwrap();
    state.process_vblank(&*hw, 0);
    assert_eq!(group_state(&state, sg), SwapGroupState::AwaitingAllMembers);
    state.leave_swap_group(b).unwrap();
    assert_eq!(group_state(&state, sg), SwapGroupState::Ready);
    assert_eq!(
        state.leave_swap_group(b),
        Err(SwapGroupError::Fifo(FifoError::NotJoined))
    );
    state.process_vblank(&*hw, 0);
    assert_eq!(visible(&state), Some(id));
}

#[test]
fn groups_without_members_do_not_gate() {
    let (dev, hw) = setup();
    let mut state = dev.state.lock();
    state.alloc_swap_group(conn(1), heads(0b10)).unwrap();
    let id = queue_flip(&mut state, &hw);
    state.process_vblank(&*hw, 0);
    assert_eq!(visible(&state), Some(id));
}

#[test]
fn clip_list_limits_gating() {
    let (dev, hw) = setup();
    let mut state = dev.state.lock();
    let sg = state.alloc_swap_group(conn(1), heads(0b10)).unwrap();
    let (a, _) = fifo(&mut state);
    state.join_swap_groups(&[(a, sg)]).unwrap();
    let far = Rect::new_sized(10_000, 10_000, 100, 100).unwrap();
    state.set_swap_group_clip_list(sg, &[far]).unwrap();
    let id = queue_flip(&mut state, &hw);
    state.process_vblank(&*hw, 0);
    assert_eq!(visible(&state), Some(id));

    let near = Rect::new_sized(0, 0, 100, 100).unwrap();
    state.set_swap_group_clip_list(sg, &[far, near]).unwrap();
    let id2 = queue_flip(&mut state, &hw);
    state.process_vblank(&*hw, 0);
    assert_eq!(visible(&state), Some(id));
    assert_ne!(visible(&state), Some(id2));

    let too_many = vec![far; 65];
    assert_eq!(
        state.set_swap_group_clip_list(sg, &too_many),
        Err(SwapGroupError::TooManyClipRects)
    );
}

#[test]
fn allocation_errors() {
    let (dev, _) = setup();
    let mut state = dev.state.lock();
    assert_eq!(
        state.alloc_swap_group(conn(1), heads(0)),
        Err(SwapGroupError::NoHeads)
    );
    assert_eq!(
        state.alloc_swap_group(conn(1), heads(0b100)),
        Err(SwapGroupError::InvalidHead(0, 2))
    );
    state.alloc_swap_group(conn(1), heads(0b01)).unwrap();
    assert_eq!(
        state.alloc_swap_group(conn(1), heads(0b11)),
        Err(SwapGroupError::HeadInUse(0, 0))
    );
    state.alloc_swap_group(conn(1), heads(0b10)).unwrap();
}

#[test]
fn swap_groups_need_support() {
    let mut gpu = testing::gpu();
    gpu.caps.supports_swap_groups = false;
    let dev = testing::device_with(&gpu, Arc::new(TestHardware::default()));
    let mut state = dev.state.lock();
    assert_eq!(
        state.alloc_swap_group(conn(1), heads(1)),
        Err(SwapGroupError::NotSupported)
    );
}

#[test]
fn freed_groups_live_while_acquired() {
    let (dev, _) = setup();
    let mut state = dev.state.lock();
    let sg = state.alloc_swap_group(conn(1), heads(0b10)).unwrap();
    let (a, _) = fifo(&mut state);
    let (b, _) = fifo(&mut state);
    state.join_swap_groups(&[(a, sg)]).unwrap();
    state.swap_groups.get_mut(&sg).unwrap().acquired += 1;
    state.free_swap_group(sg);
    assert!(state.swap_groups.contains_key(&sg));
    assert_eq!(
        state.join_swap_groups(&[(b, sg)]),
        Err(SwapGroupError::Freed)
    );
    state.release_swap_group(sg);
    assert!(!state.swap_groups.contains_key(&sg));
    assert_eq!(state.fifos[&a].swap_group, None);
}

#[test]
fn joins_are_atomic() {
    let (dev, _) = setup();
    let mut state = dev.state.lock();
    let sg = state.alloc_swap_group(conn(1), heads(0b10)).unwrap();
    let (a, _) = fifo(&mut state);
    let (b, _) = fifo(&mut state);
    assert_eq!(
        state.join_swap_groups(&[(a, sg), (a, sg)]),
        Err(SwapGroupError::DuplicateFifo)
    );
    state.join_swap_groups(&[(b, sg)]).unwrap();
    assert_eq!(
        state.join_swap_groups(&[(a, sg), (b, sg)]),
        Err(SwapGroupError::Fifo(FifoError::AlreadyJoined))
    );
    assert_eq!(state.fifos[&a].swap_group, None);
    assert_eq!(state.swap_groups[&sg].members, vec![b]);
}

#[test]
fn unregistering_the_surface_removes_the_fifo() {
    let (dev, hw) = setup();
    let mut state = dev.state.lock();
    let sg = state.alloc_swap_group(conn(1), heads(0b10)).unwrap();
    let (a, _) = fifo(&mut state);
    state.join_swap_groups(&[(a, sg)]).unwrap();
    let surface = state.fifos[&a].surface;
    state.unregister_surface(&*hw, surface);
    assert!(!state.fifos.contains_key(&a));
    assert!(state.swap_groups[&sg].members.is_empty());
}

#[test]
fn fifo_ring() {
    let memory = SurfaceParams::buffer(FIFO_SIZE).memory;
    let small = SurfaceParams::buffer(16).memory;
    assert_eq!(
        Fifo::new(FifoId::from_raw(1), conn(1), SurfaceId::from_raw(1), small).err(),
        Some(FifoError::TooSmall)
    );
    let mut fifo =
        Fifo::new(FifoId::from_raw(1), conn(1), SurfaceId::from_raw(1), memory.clone()).unwrap();
    let writer = FifoWriter::new(memory);
    writer.push(Request::swap_group_ready(1)).unwrap();
    writer.push(Request::nop()).unwrap();
    assert_eq!(fifo.drain(), 2);
    assert_eq!(fifo.ready, None);
    assert_eq!(fifo.drain(), 0);
    writer.set_indices(500, 0);
    assert_eq!(fifo.drain(), 0);
    writer.set_indices(0, 1);
    assert_eq!(writer.push(Request::nop()), Err(FifoError::Full));
}

#[test]
fn ready_requests_need_a_valid_semaphore_slot() {
    let memory = SurfaceParams::buffer(FIFO_SIZE + 4096).memory;
    let mut fifo =
        Fifo::new(FifoId::from_raw(1), conn(1), SurfaceId::from_raw(1), memory.clone()).unwrap();
    fifo.swap_group = Some(SwapGroupId::from_raw(1));
    let writer = FifoWriter::new(memory.clone());
    writer.push(Request::swap_group_ready(200)).unwrap();
    assert_eq!(fifo.drain(), 1);
    assert_eq!(fifo.ready, None);
    writer.push(Request::swap_group_ready(5)).unwrap();
    fifo.drain();
    assert_eq!(fifo.ready, Some(5));
    fifo.release_ready();
    assert_eq!(writer.semaphore(5), SWAP_GROUP_READY);
    let outside = (FIFO_SIZE / 4..memory.len() / 4).filter(|&w| memory.load(w) != Some(0));
    assert_eq!(outside.count(), 0);
}

#[test]
fn requests_survive_encoding() {
    let mut req = Request::swap_group_ready(200);
    req.per_eye_stereo = true;
    assert_eq!(Request::decode(req.encode()), Some(req));
    assert_eq!(Request::decode(0x7f), None);
}
