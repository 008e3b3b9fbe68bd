use {
    crate::surface::SurfaceMemory,
    ahash::AHashMap,
    std::sync::Arc,
};

linear_ids!(SyncptIds, SyncptId);

/// A wait for a sync point to reach a value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SyncptWait {
    pub syncpt: SyncptId,
    pub value: u64,
}

/// Monotonic timeline counters.
#[derive(Default)]
pub struct Syncpts {
    ids: SyncptIds,
    values: AHashMap<SyncptId, u64>,
}

impl Syncpts {
    pub fn create(&mut self) -> SyncptId {
        let id = self.ids.next();
        self.values.insert(id, 0);
        id
    }

    pub fn destroy(&mut self, id: SyncptId) {
        self.values.remove(&id);
    }

    pub fn contains(&self, id: SyncptId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn value(&self, id: SyncptId) -> Option<u64> {
        self.values.get(&id).copied()
    }

    /// Moves the sync point forward. Sync points never move backwards.
    pub fn signal(&mut self, id: SyncptId, value: u64) -> bool {
        match self.values.get_mut(&id) {
            Some(v) => {
                *v = (*v).max(value);
                true
            }
            None => false,
        }
    }

    pub fn increment(&mut self, id: SyncptId) -> Option<u64> {
        let v = self.values.get_mut(&id)?;
        *v += 1;
        Some(*v)
    }

    /// Destroyed sync points count as reached.
    pub fn reached(&self, wait: &SyncptWait) -> bool {
        self.values.get(&wait.syncpt).is_none_or(|v| *v >= wait.value)
    }
}

/// A 32-bit semaphore in surface memory.
#[derive(Clone)]
pub struct Semaphore {
    pub memory: Arc<SurfaceMemory>,
    pub offset: u64,
    pub value: u32,
}

impl Semaphore {
    pub fn reached(&self) -> bool {
        self.memory
            .read_u32(self.offset)
            .is_some_and(|v| v >= self.value)
    }

    pub fn release(&self) {
        self.memory.write_u32(self.offset, self.value);
    }
}

/// The semaphores that trigger the frame boundary of VRR flips.
pub struct VrrSemaphores {
    in_use: Vec<bool>,
    signaled: Vec<bool>,
    next: usize,
}

impl VrrSemaphores {
    pub fn new(num: u32) -> Self {
        Self {
            in_use: vec![false; num as usize],
            signaled: vec![false; num as usize],
            next: 0,
        }
    }

    pub fn alloc(&mut self) -> Option<u32> {
        let len = self.in_use.len();
        for i in 0..len {
            let idx = (self.next + i) % len;
            if !self.in_use[idx] {
                self.in_use[idx] = true;
                self.signaled[idx] = false;
                self.next = (idx + 1) % len;
                return Some(idx as u32);
            }
        }
        None
    }

    pub fn signal(&mut self, idx: u32) -> bool {
        match self.in_use.get(idx as usize) {
            Some(true) => {
                self.signaled[idx as usize] = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_signaled(&self, idx: u32) -> bool {
        self.signaled.get(idx as usize).copied().unwrap_or(true)
    }

    pub fn free(&mut self, idx: u32) {
        if let Some(v) = self.in_use.get_mut(idx as usize) {
            *v = false;
            self.signaled[idx as usize] = false;
        }
    }
}
