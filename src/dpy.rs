use std::fmt::{Debug, Display, Formatter};

pub const MAX_DPYS_PER_DISP: u32 = 64;

/// Identifies a display within its disp.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DpyId(u8);

impl DpyId {
    pub fn new(idx: u32) -> Option<Self> {
        (idx < MAX_DPYS_PER_DISP).then_some(Self(idx as u8))
    }

    pub fn idx(self) -> u32 {
        self.0 as u32
    }

    fn bit(self) -> u64 {
        1 << self.0
    }
}

impl Debug for DpyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "dpy-{}", self.0)
    }
}

impl Display for DpyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// A set of displays of a single disp.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct DpyIdList(u64);

impl DpyIdList {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(!0);

    pub fn single(dpy: DpyId) -> Self {
        Self(dpy.bit())
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(self, dpy: DpyId) -> bool {
        self.0 & dpy.bit() != 0
    }

    pub fn insert(&mut self, dpy: DpyId) {
        self.0 |= dpy.bit();
    }

    pub fn remove(&mut self, dpy: DpyId) {
        self.0 &= !dpy.bit();
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = DpyId> {
        (0..MAX_DPYS_PER_DISP)
            .filter(move |&i| self.0 & (1u64 << i) != 0)
            .map(|i| DpyId(i as u8))
    }

    /// The lowest id that is not part of this list.
    pub fn first_free(self) -> Option<DpyId> {
        DpyId::new(self.0.trailing_ones())
    }
}

impl Debug for DpyIdList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<DpyId> for DpyIdList {
    fn from_iter<T: IntoIterator<Item = DpyId>>(iter: T) -> Self {
        let mut list = Self::EMPTY;
        for dpy in iter {
            list.insert(dpy);
        }
        list
    }
}
