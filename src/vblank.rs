
use {
    crate::{
        device::{Device, DeviceState},
        events::Event,
        flip::sync::SyncptId,
        hardware::DisplayHardware,
        surface::{SurfaceId, SurfaceMemory},
        swapgroup::{SwapGroupId, SwapGroupState},
    },
    ahash::AHashSet,
    parking_lot::{Condvar, Mutex},
    std::{
        sync::{Arc, LazyLock, Weak},
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
    thiserror::Error,
};

pub const MAX_VBLANK_SYNC_OBJECTS_PER_HEAD: usize = 6;

/// The size of the record written by a vblank semaphore control.
pub const SEM_CONTROL_SIZE: u64 = 16;

linear_ids!(SemControlIds, SemControlId);

#[derive(Debug, Error)]
pub enum VblankError {
    #[error("Head {} of disp {} already has {} vblank sync objects", .1, .0, MAX_VBLANK_SYNC_OBJECTS_PER_HEAD)]
    TooManySyncObjects(usize, usize),
    #[error("Head {} of disp {} does not exist", .1, .0)]
    InvalidHead(usize, usize),
    #[error("Offset {} is not valid for a vblank semaphore", .0)]
    InvalidOffset(u64),
    #[error("Could not spawn the vblank thread")]
    SpawnThread(#[source] std::io::Error),
}

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Monotonic nanoseconds since the first call.
pub fn now_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Writes the frame counter and timestamp of a head into client memory at every vblank.
pub struct VblankSemControl {
    pub id: SemControlId,
    pub disp: usize,
    pub head: usize,
    pub surface: SurfaceId,
    pub memory: Arc<SurfaceMemory>,
    pub offset: u64,
}

impl VblankSemControl {
    pub fn new(
        id: SemControlId,
        disp: usize,
        head: usize,
        surface: SurfaceId,
        memory: Arc<SurfaceMemory>,
        offset: u64,
    ) -> Result<Self, VblankError> {
        let fits = offset
            .checked_add(SEM_CONTROL_SIZE)
            .is_some_and(|end| end <= memory.len() as u64);
        if offset % 8 != 0 || !fits {
            return Err(VblankError::InvalidOffset(offset));
        }
        Ok(Self {
            id,
            disp,
            head,
            surface,
            memory,
            offset,
        })
    }

    pub fn update(&self, frame: u64, timestamp_ns: u64) {
        let base = (self.offset / 4) as usize;
        self.memory.store(base, frame as u32);
        self.memory.store(base + 1, (frame >> 32) as u32);
        self.memory.store(base + 2, timestamp_ns as u32);
        self.memory.store(base + 3, (timestamp_ns >> 32) as u32);
    }
}

struct WorkerShared {
    stop: Mutex<bool>,
    cond: Condvar,
}

/// Generates vblanks for a device at a fixed interval.
pub struct VblankWorker {
    shared: Arc<WorkerShared>,
    thread: JoinHandle<()>,
}

impl VblankWorker {
    pub fn spawn(device: &Arc<Device>, interval: Duration) -> Result<Self, VblankError> {
        let shared = Arc::new(WorkerShared {
            stop: Mutex::new(false),
            cond: Condvar::new(),
        });
        let thread = thread::Builder::new()
            .name(format!("vblank {}", device.id))
            .spawn({
                let shared = shared.clone();
                let device = Arc::downgrade(device);
                move || run(shared, device, interval)
            })
            .map_err(VblankError::SpawnThread)?;
        Ok(Self { shared, thread })
    }

    pub fn stop(self) {
        *self.shared.stop.lock() = true;
        self.shared.cond.notify_all();
        if self.thread.join().is_err() {
            log::error!("The vblank thread panicked");
        }
    }
}

fn run(shared: Arc<WorkerShared>, device: Weak<Device>, interval: Duration) {
    let mut next = Instant::now() + interval;
    loop {
        {
            let mut stop = shared.stop.lock();
            while !*stop && !shared.cond.wait_until(&mut stop, next).timed_out() {}
            if *stop {
                return;
            }
        }
        let Some(device) = device.upgrade() else {
            return;
        };
        device.vblank(now_ns());
        next += interval;
    }
}

impl DeviceState {
    /// Runs one vertical blank on every active head.
    pub fn process_vblank(&mut self, hw: &dyn DisplayHardware, timestamp_ns: u64) {
        self.frame += 1;
        let swapping: AHashSet<SwapGroupId> = self
            .swap_groups
            .values()
            .filter(|sg| sg.state == SwapGroupState::Ready)
            .map(|sg| sg.id)
            .collect();
        for (disp, head) in self.active_heads() {
            let h = &mut self.disps[disp].heads[head];
            h.frame_count += 1;
            let num_layers = h.num_layers();
            let syncpts = h.vblank_syncpts.clone();
            for layer in 0..num_layers {
                self.advance_layer(hw, disp, head, layer, &swapping);
            }
            for syncpt in syncpts {
                self.syncpts.increment(syncpt);
            }
        }
        for open in self.opens.values() {
            for (_, obj) in open.sync_objects.iter() {
                if let Some(unicast) = &obj.unicast
                    && self.head(obj.disp, obj.head).is_ok_and(|h| h.active.is_some())
                {
                    unicast.signal();
                }
            }
        }
        self.update_sem_controls(None, timestamp_ns);
        self.finish_swaps(&swapping);
        self.drain_fifos();
    }

    /// Creates a sync point that advances at every vblank of the head.
    pub fn add_vblank_syncpt(
        &mut self,
        disp: usize,
        head: usize,
    ) -> Result<SyncptId, VblankError> {
        let Ok(h) = self.head(disp, head) else {
            return Err(VblankError::InvalidHead(disp, head));
        };
        if h.vblank_syncpts.is_full() {
            return Err(VblankError::TooManySyncObjects(disp, head));
        }
        let syncpt = self.syncpts.create();
        self.disps[disp].heads[head].vblank_syncpts.push(syncpt);
        Ok(syncpt)
    }

    pub fn remove_vblank_syncpt(&mut self, disp: usize, head: usize, syncpt: SyncptId) {
        if let Ok(h) = self.head_mut(disp, head) {
            h.vblank_syncpts.retain(|s| *s != syncpt);
        }
        self.syncpts.destroy(syncpt);
    }

    /// Writes the current frame counter of the heads into their semaphore controls.
    pub fn update_sem_controls(&self, heads: Option<&[(usize, usize)]>, timestamp_ns: u64) {
        for ctl in self.sem_controls.values() {
            if let Some(heads) = heads
                && !heads.contains(&(ctl.disp, ctl.head))
            {
                continue;
            }
            if let Ok(h) = self.head(ctl.disp, ctl.head)
                && h.active.is_some()
            {
                ctl.update(h.frame_count, timestamp_ns);
            }
        }
    }

    /// Makes the oldest pending flip of the layer visible if all of its conditions are
    /// met.
    pub fn advance_layer(
        &mut self,
        hw: &dyn DisplayHardware,
        disp: usize,
        head: usize,
        layer: usize,
        swapping: &AHashSet<SwapGroupId>,
    ) -> bool {
        let Some(h) = self.disps.get(disp).and_then(|d| d.heads.get(head)) else {
            return false;
        };
        let Some(l) = h.layers.get(layer) else {
            return false;
        };
        let Some(flip) = l.pending.front() else {
            return false;
        };
        if h.frame_count < l.last_flip_frame + flip.min_present_interval as u64 {
            return false;
        }
        if let Some(acquire) = &flip.acquire
            && !acquire.reached()
        {
            return false;
        }
        if let Some(pre) = &flip.pre_fence
            && !self.syncpts.reached(pre)
        {
            return false;
        }
        if let Some(idx) = flip.vrr_semaphore
            && !self.vrr_semaphores.is_signaled(idx)
        {
            return false;
        }
        if let Some(sg) = flip.swap_group
            && !self.swap_gate_open(sg, swapping)
        {
            return false;
        }
        let h = &mut self.disps[disp].heads[head];
        let frame = h.frame_count;
        let l = &mut h.layers[layer];
        let Some(flip) = l.pending.pop_front() else {
            return false;
        };
        if let Some(old) = l.visible_release.take() {
            old.release();
        }
        l.visible = flip.contents;
        l.visible_release = flip.release;
        l.last_flip_frame = frame;
        hw.program_layer(disp, head, layer, &l.visible);
        log::trace!(
            "disp {} head {} layer {}: showing {:?}",
            disp,
            head,
            layer,
            l.visible.surface
        );
        if let Some(fence) = flip.post_fence {
            self.syncpts.signal(fence.syncpt, fence.value);
        }
        if let Some(idx) = flip.vrr_semaphore
            && !self.vrr_semaphore_in_use(idx)
        {
            self.vrr_semaphores.free(idx);
        }
        if let Some(conn) = flip.notify
            && let Some(open) = self.opens.get(&conn)
        {
            open.events.push(Event::FlipOccurred {
                device: open.handle,
                disp: open.disp_handle(disp),
                head,
                layer,
            });
        }
        true
    }

    pub fn vrr_semaphore_in_use(&self, idx: u32) -> bool {
        self.disps
            .iter()
            .flat_map(|d| &d.heads)
            .flat_map(|h| &h.layers)
            .flat_map(|l| &l.pending)
            .any(|p| p.vrr_semaphore == Some(idx))
    }
}
