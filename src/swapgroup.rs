#[cfg(test)]
mod tests;
pub mod fifo;

use {
    crate::{
        connection::ConnectionId,
        device::DeviceState,
        permissions::{MAX_DISPS, MAX_HEADS_PER_DISP},
        rect::Rect,
        swapgroup::fifo::{Fifo, FifoError, FifoId},
        utils::errorfmt::ErrorFmt,
    },
    ahash::AHashSet,
    smallvec::SmallVec,
    thiserror::Error,
};

linear_ids!(SwapGroupIds, SwapGroupId);

pub const MAX_CLIP_RECTS: usize = 64;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum SwapGroupError {
    #[error("The device does not support swap groups")]
    NotSupported,
    #[error("The swap group does not contain any heads")]
    NoHeads,
    #[error("Head {} of disp {} does not exist", .1, .0)]
    InvalidHead(usize, usize),
    #[error("Head {} of disp {} already belongs to another swap group", .1, .0)]
    HeadInUse(usize, usize),
    #[error("The clip list contains more than {} rectangles", MAX_CLIP_RECTS)]
    TooManyClipRects,
    #[error("The swap group has been freed")]
    Freed,
    #[error("The same fifo appears more than once")]
    DuplicateFifo,
    #[error(transparent)]
    Fifo(FifoError),
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SwapGroupState {
    #[default]
    Idle,
    AwaitingAllMembers,
    /// All members are ready. The group swaps at the next vertical blank.
    Ready,
}

pub struct SwapGroup {
    pub id: SwapGroupId,
    pub creator: ConnectionId,
    /// The heads of each disp that belong to the group.
    pub heads: [u32; MAX_DISPS],
    /// Set once the creator has freed the group.
    pub freed: bool,
    /// The number of handles held by other connections.
    pub acquired: usize,
    pub members: Vec<FifoId>,
    pub state: SwapGroupState,
    /// The desktop region gated by the group. Empty means the whole area of the heads.
    pub clip_list: SmallVec<[Rect; 4]>,
}

impl SwapGroup {
    pub fn contains_head(&self, disp: usize, head: usize) -> bool {
        head < MAX_HEADS_PER_DISP && self.heads.get(disp).is_some_and(|m| m & (1 << head) != 0)
    }

    pub fn heads(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..MAX_DISPS).flat_map(move |d| {
            (0..MAX_HEADS_PER_DISP)
                .filter(move |&h| self.contains_head(d, h))
                .map(move |h| (d, h))
        })
    }

    pub fn is_dead(&self) -> bool {
        self.freed && self.acquired == 0
    }
}

impl DeviceState {
    pub fn alloc_swap_group(
        &mut self,
        creator: ConnectionId,
        heads: [u32; MAX_DISPS],
    ) -> Result<SwapGroupId, SwapGroupError> {
        if !self.caps.supports_swap_groups {
            return Err(SwapGroupError::NotSupported);
        }
        if heads.iter().all(|m| *m == 0) {
            return Err(SwapGroupError::NoHeads);
        }
        for (disp, &mask) in heads.iter().enumerate() {
            for head in 0..32 {
                if mask & (1 << head) == 0 {
                    continue;
                }
                if self.head(disp, head).is_err() {
                    return Err(SwapGroupError::InvalidHead(disp, head));
                }
                if self.head_swap_group(disp, head).is_some() {
                    return Err(SwapGroupError::HeadInUse(disp, head));
                }
            }
        }
        let id = self.ids.swap_groups.next();
        self.swap_groups.insert(
            id,
            SwapGroup {
                id,
                creator,
                heads,
                freed: false,
                acquired: 0,
                members: vec![],
                state: SwapGroupState::Idle,
                clip_list: SmallVec::new(),
            },
        );
        log::info!("Allocated swap group {}", id);
        Ok(id)
    }

    /// Marks the group as freed by its creator and destroys it if nobody else holds it.
    pub fn free_swap_group(&mut self, id: SwapGroupId) {
        if let Some(sg) = self.swap_groups.get_mut(&id) {
            sg.freed = true;
        }
        self.collect_swap_group(id);
    }

    /// Drops one acquired reference.
    pub fn release_swap_group(&mut self, id: SwapGroupId) {
        if let Some(sg) = self.swap_groups.get_mut(&id) {
            sg.acquired = sg.acquired.saturating_sub(1);
        }
        self.collect_swap_group(id);
    }

    fn collect_swap_group(&mut self, id: SwapGroupId) {
        if !self.swap_groups.get(&id).is_some_and(|sg| sg.is_dead()) {
            return;
        }
        if let Some(sg) = self.swap_groups.shift_remove(&id) {
            for fifo in sg.members {
                if let Some(f) = self.fifos.get_mut(&fifo) {
                    f.swap_group = None;
                    f.ready = None;
                }
            }
            log::info!("Destroyed swap group {}", id);
        }
    }

    /// Adds fifos to swap groups. Either all joins succeed or none.
    pub fn join_swap_groups(
        &mut self,
        joins: &[(FifoId, SwapGroupId)],
    ) -> Result<(), SwapGroupError> {
        let mut seen = AHashSet::new();
        for &(fifo, sg) in joins {
            if !seen.insert(fifo) {
                return Err(SwapGroupError::DuplicateFifo);
            }
            match self.swap_groups.get(&sg) {
                Some(g) if !g.freed => {}
                _ => return Err(SwapGroupError::Freed),
            }
            let Some(f) = self.fifos.get(&fifo) else {
                return Err(SwapGroupError::Fifo(FifoError::NotJoined));
            };
            if f.swap_group.is_some() {
                return Err(SwapGroupError::Fifo(FifoError::AlreadyJoined));
            }
        }
        for &(fifo, sg) in joins {
            if let Some(f) = self.fifos.get_mut(&fifo) {
                f.swap_group = Some(sg);
                f.ready = None;
            }
            if let Some(g) = self.swap_groups.get_mut(&sg) {
                g.members.push(fifo);
            }
            log::debug!("fifo {} joined swap group {}", fifo, sg);
            self.recompute_swap_group(sg);
        }
        Ok(())
    }

    /// Removes the fifo from its swap group. The readiness of the group immediately
    /// depends only on the remaining members.
    pub fn leave_swap_group(&mut self, fifo: FifoId) -> Result<(), SwapGroupError> {
        let Some(f) = self.fifos.get_mut(&fifo) else {
            return Err(SwapGroupError::Fifo(FifoError::NotJoined));
        };
        let Some(sg) = f.swap_group.take() else {
            return Err(SwapGroupError::Fifo(FifoError::NotJoined));
        };
        f.ready = None;
        if let Some(g) = self.swap_groups.get_mut(&sg) {
            g.members.retain(|m| *m != fifo);
        }
        log::debug!("fifo {} left swap group {}", fifo, sg);
        self.recompute_swap_group(sg);
        Ok(())
    }

    pub fn set_swap_group_clip_list(
        &mut self,
        id: SwapGroupId,
        clip_list: &[Rect],
    ) -> Result<(), SwapGroupError> {
        if clip_list.len() > MAX_CLIP_RECTS {
            return Err(SwapGroupError::TooManyClipRects);
        }
        let Some(sg) = self.swap_groups.get_mut(&id) else {
            return Err(SwapGroupError::Freed);
        };
        sg.clip_list = SmallVec::from_slice(clip_list);
        Ok(())
    }

    pub fn register_fifo(&mut self, fifo: Fifo) {
        log::debug!("Registered fifo {}", fifo.id);
        self.fifos.insert(fifo.id, fifo);
    }

    pub fn unregister_fifo(&mut self, id: FifoId) {
        let joined = self.fifos.get(&id).is_some_and(|f| f.swap_group.is_some());
        if joined && let Err(e) = self.leave_swap_group(id) {
            log::error!("fifo {} could not leave its swap group: {}", id, ErrorFmt(e));
        }
        if self.fifos.shift_remove(&id).is_some() {
            log::debug!("Unregistered fifo {}", id);
        }
    }

    /// Updates the state of the group after the readiness of its members changed.
    pub fn recompute_swap_group(&mut self, id: SwapGroupId) {
        let Some(sg) = self.swap_groups.get(&id) else {
            return;
        };
        let ready = sg
            .members
            .iter()
            .filter(|m| self.fifos.get(*m).is_some_and(|f| f.ready.is_some()))
            .count();
        let state = if sg.members.is_empty() {
            SwapGroupState::Idle
        } else if ready == sg.members.len() {
            SwapGroupState::Ready
        } else if ready > 0 {
            SwapGroupState::AwaitingAllMembers
        } else {
            SwapGroupState::Idle
        };
        if let Some(sg) = self.swap_groups.get_mut(&id)
            && sg.state != state
        {
            log::trace!("swap group {}: {:?} -> {:?}", id, sg.state, state);
            sg.state = state;
        }
    }

    /// Whether flips gated by the group may become visible during the current vblank.
    pub fn swap_gate_open(&self, id: SwapGroupId, swapping: &AHashSet<SwapGroupId>) -> bool {
        match self.swap_groups.get(&id) {
            Some(sg) => sg.members.is_empty() || swapping.contains(&id),
            None => true,
        }
    }

    /// Releases all members of the groups that swapped.
    pub fn finish_swaps(&mut self, swapping: &AHashSet<SwapGroupId>) {
        for &id in swapping {
            let Some(sg) = self.swap_groups.get_mut(&id) else {
                continue;
            };
            sg.state = SwapGroupState::Idle;
            let members = sg.members.clone();
            for m in members {
                if let Some(f) = self.fifos.get_mut(&m) {
                    f.release_ready();
                }
            }
            log::debug!("swap group {} swapped", id);
        }
    }

    /// Drains all fifos and collects the readiness of the swap groups.
    pub fn drain_fifos(&mut self) {
        let mut touched = AHashSet::new();
        for fifo in self.fifos.values_mut() {
            if fifo.drain() > 0
                && let Some(sg) = fifo.swap_group
            {
                touched.insert(sg);
            }
        }
        for sg in touched {
            self.recompute_swap_group(sg);
        }
    }
}
