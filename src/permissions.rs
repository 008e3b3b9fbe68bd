#[cfg(test)]
mod tests;

use {crate::dpy::DpyIdList, thiserror::Error};

pub const MAX_DISPS: usize = 4;
pub const MAX_HEADS_PER_DISP: usize = 8;
pub const MAX_LAYERS_PER_HEAD: usize = 8;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum PermissionError {
    #[error("The caller is not the modeset owner of the device")]
    NotOwner,
    #[error("The device is owned by another connection")]
    AlreadyOwned,
    #[error("The caller needs sub-owner permissions or better")]
    NotSubOwner,
    #[error("The device already has a sub-owner")]
    SubOwnerExists,
    #[error("Disp {} does not exist", .0)]
    InvalidDisp(usize),
    #[error("Head {} of disp {} does not exist", .1, .0)]
    InvalidHead(usize, usize),
    #[error("Layer mask 0x{:x} of disp {} head {} names layers that do not exist", .2, .0, .1)]
    InvalidLayerMask(usize, usize, u8),
    #[error("Disp {} head {}: {:?} are not displays of this disp", .0, .1, .2)]
    InvalidDpys(usize, usize, DpyIdList),
    #[error("The permission set is empty")]
    Empty,
    #[error("Invalid permission type mask 0x{:x}", .0)]
    InvalidTypeMask(u32),
    #[error("Only flipping and modeset permissions can be revoked individually")]
    NotRevocable,
}

/// The shape of one disp as far as permissions are concerned.
#[derive(Copy, Clone, Debug)]
pub struct DispLayout {
    pub num_heads: usize,
    pub layers: [u8; MAX_HEADS_PER_DISP],
    pub valid_dpys: DpyIdList,
}

impl DispLayout {
    fn all_layers(&self, head: usize) -> u8 {
        match self.layers.get(head) {
            Some(&n) if n as usize >= MAX_LAYERS_PER_HEAD => !0,
            Some(&n) => (1u8 << n) - 1,
            None => 0,
        }
    }
}

/// Per disp and head, the layers that may be flipped.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FlipPermissions {
    layers: [[u8; MAX_HEADS_PER_DISP]; MAX_DISPS],
}

impl FlipPermissions {
    pub fn full(layout: &[DispLayout]) -> Self {
        let mut res = Self::default();
        for (disp, l) in layout.iter().enumerate().take(MAX_DISPS) {
            for head in 0..l.num_heads.min(MAX_HEADS_PER_DISP) {
                res.layers[disp][head] = l.all_layers(head);
            }
        }
        res
    }

    /// Adds the layers in `mask` of the given head.
    pub fn allow(mut self, disp: usize, head: usize, mask: u8) -> Self {
        if disp < MAX_DISPS && head < MAX_HEADS_PER_DISP {
            self.layers[disp][head] |= mask;
        }
        self
    }

    pub fn layer_mask(&self, disp: usize, head: usize) -> u8 {
        self.layers
            .get(disp)
            .and_then(|d| d.get(head))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().flatten().all(|m| *m == 0)
    }

    pub fn union_with(&mut self, other: &Self) {
        for (a, b) in self.layers.iter_mut().flatten().zip(other.layers.iter().flatten()) {
            *a |= *b;
        }
    }

    /// Removes the rights in `other`. Returns whether any rights remain.
    pub fn remove(&mut self, other: &Self) -> bool {
        for (a, b) in self.layers.iter_mut().flatten().zip(other.layers.iter().flatten()) {
            *a &= !*b;
        }
        !self.is_empty()
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.layers
            .iter()
            .flatten()
            .zip(other.layers.iter().flatten())
            .all(|(a, b)| a & !b == 0)
    }

    fn validate(&self, layout: &[DispLayout]) -> Result<(), PermissionError> {
        for (disp, heads) in self.layers.iter().enumerate() {
            for (head, &mask) in heads.iter().enumerate() {
                if mask == 0 {
                    continue;
                }
                let Some(l) = layout.get(disp) else {
                    return Err(PermissionError::InvalidDisp(disp));
                };
                if head >= l.num_heads {
                    return Err(PermissionError::InvalidHead(disp, head));
                }
                if mask & !l.all_layers(head) != 0 {
                    return Err(PermissionError::InvalidLayerMask(disp, head, mask));
                }
            }
        }
        Ok(())
    }
}

/// Per disp and head, the displays that may be driven.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ModesetPermissions {
    dpys: [[DpyIdList; MAX_HEADS_PER_DISP]; MAX_DISPS],
}

impl ModesetPermissions {
    pub fn full() -> Self {
        Self {
            dpys: [[DpyIdList::ALL; MAX_HEADS_PER_DISP]; MAX_DISPS],
        }
    }

    pub fn allow(mut self, disp: usize, head: usize, dpys: DpyIdList) -> Self {
        if disp < MAX_DISPS && head < MAX_HEADS_PER_DISP {
            self.dpys[disp][head] = self.dpys[disp][head].union(dpys);
        }
        self
    }

    pub fn dpys(&self, disp: usize, head: usize) -> DpyIdList {
        self.dpys
            .get(disp)
            .and_then(|d| d.get(head))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.dpys.iter().flatten().all(|d| d.is_empty())
    }

    pub fn union_with(&mut self, other: &Self) {
        for (a, b) in self.dpys.iter_mut().flatten().zip(other.dpys.iter().flatten()) {
            *a = a.union(*b);
        }
    }

    pub fn remove(&mut self, other: &Self) -> bool {
        for (a, b) in self.dpys.iter_mut().flatten().zip(other.dpys.iter().flatten()) {
            *a = a.difference(*b);
        }
        !self.is_empty()
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.dpys
            .iter()
            .flatten()
            .zip(other.dpys.iter().flatten())
            .all(|(a, b)| a.is_subset_of(*b))
    }

    /// The heads for which this set names at least one display.
    pub fn heads(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.dpys.iter().enumerate().flat_map(|(disp, heads)| {
            heads
                .iter()
                .enumerate()
                .filter(|(_, d)| !d.is_empty())
                .map(move |(head, _)| (disp, head))
        })
    }

    fn validate(&self, layout: &[DispLayout]) -> Result<(), PermissionError> {
        for (disp, head) in self.heads() {
            let Some(l) = layout.get(disp) else {
                return Err(PermissionError::InvalidDisp(disp));
            };
            if head >= l.num_heads {
                return Err(PermissionError::InvalidHead(disp, head));
            }
            let dpys = self.dpys[disp][head];
            if !dpys.is_subset_of(l.valid_dpys) {
                return Err(PermissionError::InvalidDpys(disp, head, dpys));
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PermissionsType {
    Flipping = 1,
    Modeset = 2,
    SubOwner = 3,
}

bitflags! {
    PermissionsTypes: u32;
    PERMISSIONS_FLIPPING = 1 << 1,
    PERMISSIONS_MODESET = 1 << 2,
    PERMISSIONS_SUB_OWNER = 1 << 3,
}

impl PermissionsType {
    pub fn mask(self) -> PermissionsTypes {
        PermissionsTypes(1 << self as u32)
    }
}

/// A set of rights that can be granted to another connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Permissions {
    Flipping(FlipPermissions),
    Modeset(ModesetPermissions),
    SubOwner,
}

impl Permissions {
    pub fn ty(&self) -> PermissionsType {
        match self {
            Permissions::Flipping(_) => PermissionsType::Flipping,
            Permissions::Modeset(_) => PermissionsType::Modeset,
            Permissions::SubOwner => PermissionsType::SubOwner,
        }
    }

    pub fn validate(&self, layout: &[DispLayout]) -> Result<(), PermissionError> {
        match self {
            Permissions::Flipping(f) if f.is_empty() => Err(PermissionError::Empty),
            Permissions::Flipping(f) => f.validate(layout),
            Permissions::Modeset(m) if m.is_empty() => Err(PermissionError::Empty),
            Permissions::Modeset(m) => m.validate(layout),
            Permissions::SubOwner => Ok(()),
        }
    }

    /// Removes the rights of `other` that have the same type as `self`. Returns whether
    /// any rights remain.
    pub fn remove(&mut self, other: &Permissions) -> bool {
        match (self, other) {
            (Permissions::Flipping(a), Permissions::Flipping(b)) => a.remove(b),
            (Permissions::Modeset(a), Permissions::Modeset(b)) => a.remove(b),
            (Permissions::Flipping(a), _) => !a.is_empty(),
            (Permissions::Modeset(a), _) => !a.is_empty(),
            (Permissions::SubOwner, _) => true,
        }
    }
}

/// The rights a connection holds on a device in addition to any ownership.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EffectivePermissions {
    pub flip: FlipPermissions,
    pub modeset: ModesetPermissions,
}

impl EffectivePermissions {
    pub fn full(layout: &[DispLayout]) -> Self {
        Self {
            flip: FlipPermissions::full(layout),
            modeset: ModesetPermissions::full(),
        }
    }

    /// Adds the rights in `p`. Never removes rights.
    pub fn acquire(&mut self, p: &Permissions) {
        match p {
            Permissions::Flipping(f) => self.flip.union_with(f),
            Permissions::Modeset(m) => self.modeset.union_with(m),
            Permissions::SubOwner => {}
        }
    }

    pub fn remove(&mut self, p: &Permissions) {
        match p {
            Permissions::Flipping(f) => {
                self.flip.remove(f);
            }
            Permissions::Modeset(m) => {
                self.modeset.remove(m);
            }
            Permissions::SubOwner => {}
        }
    }

    pub fn clear(&mut self, types: PermissionsTypes) {
        if types.contains(PERMISSIONS_FLIPPING) {
            self.flip = Default::default();
        }
        if types.contains(PERMISSIONS_MODESET) {
            self.modeset = Default::default();
        }
    }

    /// The layers of the head that may be flipped. Modeset rights for a head imply
    /// flip rights for all of its layers.
    pub fn flippable_layers(&self, disp: usize, head: usize, all_layers: u8) -> u8 {
        if !self.modeset.dpys(disp, head).is_empty() {
            return all_layers;
        }
        self.flip.layer_mask(disp, head) & all_layers
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.flip.is_subset_of(&other.flip) && self.modeset.is_subset_of(&other.modeset)
    }
}
