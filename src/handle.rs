
use {
    std::{fmt::Debug, marker::PhantomData},
    thiserror::Error,
};

/// An opaque 32 bit handle. The low bits index a slot, the high bits carry the slot's
/// generation at the time the handle was allocated.
pub trait Handle: Copy + Eq + Debug {
    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;
}

const INDEX_BITS: u32 = 20;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << (32 - INDEX_BITS)) - 1;
pub const MAX_HANDLES: usize = 1 << INDEX_BITS;

type Seg = usize;
const SEG_SIZE: usize = Seg::BITS as usize;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum HandleError {
    #[error("Handle 0x{:x} does not refer to a live object", .0)]
    InvalidHandle(u32),
    #[error("The handle table is full")]
    TooManyHandles,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct HandleTable<H, T> {
    slots: Vec<Slot<T>>,
    free: Vec<Seg>,
    len: usize,
    first_generation: u32,
    _phantom: PhantomData<H>,
}

impl<H, T> Default for HandleTable<H, T> {
    fn default() -> Self {
        Self::with_first_generation(rand::random())
    }
}

fn next_generation(generation: u32) -> u32 {
    match (generation + 1) & GENERATION_MASK {
        0 => 1,
        n => n,
    }
}

impl<H, T> HandleTable<H, T> {
    /// Creates a table whose fresh slots start at `generation`.
    ///
    /// Tables of different connections start at different generations so that a
    /// handle that leaks into another connection is unlikely to resolve there.
    pub fn with_first_generation(generation: u32) -> Self {
        let generation = match generation & GENERATION_MASK {
            0 => 1,
            n => n,
        };
        Self {
            slots: vec![],
            free: vec![],
            len: 0,
            first_generation: generation,
            _phantom: Default::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn take_free_index(&mut self) -> usize {
        for (pos, seg) in self.free.iter_mut().enumerate() {
            if *seg != 0 {
                let offset = seg.trailing_zeros() as usize;
                *seg &= !(1 << offset);
                return pos * SEG_SIZE + offset;
            }
        }
        self.slots.len()
    }

    fn release_index(&mut self, index: usize) {
        let pos = index / SEG_SIZE;
        if self.free.len() <= pos {
            self.free.resize(pos + 1, 0);
        }
        self.free[pos] |= 1 << (index % SEG_SIZE);
    }
}

impl<H: Handle, T> HandleTable<H, T> {
    pub fn alloc(&mut self, value: T) -> Result<H, HandleError> {
        if self.len >= MAX_HANDLES {
            return Err(HandleError::TooManyHandles);
        }
        let index = self.take_free_index();
        if index == self.slots.len() {
            self.slots.push(Slot {
                generation: self.first_generation,
                value: None,
            });
        }
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        self.len += 1;
        Ok(H::from_raw((slot.generation << INDEX_BITS) | index as u32))
    }

    fn index(&self, handle: H) -> Result<usize, HandleError> {
        let raw = handle.raw();
        let index = (raw & INDEX_MASK) as usize;
        let generation = raw >> INDEX_BITS;
        match self.slots.get(index) {
            Some(slot) if slot.generation == generation && slot.value.is_some() => Ok(index),
            _ => Err(HandleError::InvalidHandle(raw)),
        }
    }

    pub fn get(&self, handle: H) -> Result<&T, HandleError> {
        let index = self.index(handle)?;
        match &self.slots[index].value {
            Some(v) => Ok(v),
            None => Err(HandleError::InvalidHandle(handle.raw())),
        }
    }

    pub fn get_mut(&mut self, handle: H) -> Result<&mut T, HandleError> {
        let index = self.index(handle)?;
        match &mut self.slots[index].value {
            Some(v) => Ok(v),
            None => Err(HandleError::InvalidHandle(handle.raw())),
        }
    }

    pub fn contains(&self, handle: H) -> bool {
        self.index(handle).is_ok()
    }

    pub fn free(&mut self, handle: H) -> Result<T, HandleError> {
        let index = self.index(handle)?;
        let slot = &mut self.slots[index];
        let value = slot.value.take();
        slot.generation = next_generation(slot.generation);
        self.release_index(index);
        self.len -= 1;
        value.ok_or(HandleError::InvalidHandle(handle.raw()))
    }

    fn handle_of(&self, index: usize) -> H {
        H::from_raw((self.slots[index].generation << INDEX_BITS) | index as u32)
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.value.as_ref().map(|v| (self.handle_of(idx), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }

    pub fn find(&self, mut f: impl FnMut(&T) -> bool) -> Option<H> {
        self.iter().find(|(_, v)| f(v)).map(|(h, _)| h)
    }

    /// Frees every handle for which `f` returns false.
    pub fn retain(&mut self, mut f: impl FnMut(H, &T) -> bool) -> Vec<T> {
        let dead: Vec<_> = self
            .iter()
            .filter(|(h, v)| !f(*h, v))
            .map(|(h, _)| h)
            .collect();
        dead.into_iter().filter_map(|h| self.free(h).ok()).collect()
    }

    pub fn drain(&mut self) -> Vec<(H, T)> {
        let handles: Vec<_> = self.iter().map(|(h, _)| h).collect();
        handles
            .into_iter()
            .filter_map(|h| self.free(h).ok().map(|v| (h, v)))
            .collect()
    }
}
