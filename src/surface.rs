#[cfg(test)]
mod tests;

use {
    crate::{
        connection::ConnectionId,
        device::{DeviceCaps, DeviceState},
        format::{Format, XRGB8888},
        hardware::DisplayHardware,
        rect::Rect,
    },
    arrayvec::ArrayVec,
    byteorder::{ByteOrder, LittleEndian},
    std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering::{Acquire, Release}},
    },
    thiserror::Error,
};

pub const MAX_PLANES: usize = 3;
const BLOCK_LINEAR_PITCH_ALIGNMENT: u64 = 64;
const PITCH_ALIGNMENT: u64 = 4;

linear_ids!(SurfaceIds, SurfaceId);

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceError {
    #[error("The surface has size 0")]
    Empty,
    #[error("The surface size {}x{} exceeds the device limit {}x{}", .0, .1, .2, .3)]
    TooLarge(u32, u32, u32, u32),
    #[error("Format {} has {} planes but {} were supplied", .0, .1, .2)]
    PlaneCount(&'static str, usize, usize),
    #[error("The pitch of plane {} is too small", .0)]
    PitchTooSmall(usize),
    #[error("The pitch of plane {} is not properly aligned", .0)]
    PitchAlignment(usize),
    #[error("Plane {} does not fit into the surface memory", .0)]
    MemoryTooSmall(usize),
    #[error("The device can only scan out of system memory")]
    RequiresSysmem,
    #[error("The surface has been unregistered by its owner")]
    Orphaned,
    #[error("Offset {} is not valid for this surface", .0)]
    InvalidOffset(u64),
    #[error("The surface has been acquired from another connection")]
    NotOwner,
}

/// Memory shared between the clients' renderers and the display engine.
///
/// Clients and the engine access the memory concurrently without locks. All accesses
/// are word-sized atomics.
pub struct SurfaceMemory {
    words: Box<[AtomicU32]>,
}

impl SurfaceMemory {
    pub fn new(len: usize) -> Arc<Self> {
        let words = len.div_ceil(4);
        Arc::new(Self {
            words: (0..words).map(|_| AtomicU32::new(0)).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.words.len() * 4
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn load(&self, word: usize) -> Option<u32> {
        self.words.get(word).map(|w| w.load(Acquire))
    }

    pub fn store(&self, word: usize, val: u32) -> bool {
        match self.words.get(word) {
            Some(w) => {
                w.store(val, Release);
                true
            }
            None => false,
        }
    }

    /// Reads the word at a byte offset. The offset must be 4-byte aligned.
    pub fn read_u32(&self, offset: u64) -> Option<u32> {
        if offset % 4 != 0 {
            return None;
        }
        self.load((offset / 4) as usize)
    }

    pub fn write_u32(&self, offset: u64, val: u32) -> bool {
        offset % 4 == 0 && self.store((offset / 4) as usize, val)
    }

    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> bool {
        if offset.checked_add(buf.len()).is_none_or(|end| end > self.len()) {
            return false;
        }
        let mut tmp = [0; 4];
        for (i, b) in buf.iter_mut().enumerate() {
            let pos = offset + i;
            LittleEndian::write_u32(&mut tmp, self.words[pos / 4].load(Acquire));
            *b = tmp[pos % 4];
        }
        true
    }

    pub fn write_bytes(&self, offset: usize, buf: &[u8]) -> bool {
        if offset.checked_add(buf.len()).is_none_or(|end| end > self.len()) {
            return false;
        }
        let mut tmp = [0; 4];
        for (i, b) in buf.iter().enumerate() {
            let pos = offset + i;
            let word = &self.words[pos / 4];
            let _ = word.fetch_update(Release, Acquire, |w| {
                LittleEndian::write_u32(&mut tmp, w);
                tmp[pos % 4] = *b;
                Some(LittleEndian::read_u32(&tmp))
            });
        }
        true
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SurfaceLayout {
    Pitch,
    BlockLinear,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryKind {
    Video,
    System,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlaneLayout {
    pub offset: u64,
    pub pitch: u64,
}

#[derive(Clone)]
pub struct SurfaceParams {
    pub format: &'static Format,
    pub width: u32,
    pub height: u32,
    pub layout: SurfaceLayout,
    pub planes: ArrayVec<PlaneLayout, MAX_PLANES>,
    pub memory: Arc<SurfaceMemory>,
    pub memory_kind: MemoryKind,
}

impl SurfaceParams {
    /// A single-plane, tightly packed, pitch-linear surface.
    pub fn packed(format: &'static Format, width: u32, height: u32) -> Self {
        let mut planes = ArrayVec::new();
        let mut size = 0;
        for plane in 0..format.planes.len() {
            let pitch = format
                .min_pitch(plane, width)
                .unwrap_or_default()
                .next_multiple_of(PITCH_ALIGNMENT);
            let height = format.plane_height(plane, height).unwrap_or_default() as u64;
            planes.push(PlaneLayout { offset: size, pitch });
            size += pitch * height;
        }
        Self {
            format,
            width,
            height,
            layout: SurfaceLayout::Pitch,
            planes,
            memory: SurfaceMemory::new(size as usize),
            memory_kind: MemoryKind::Video,
        }
    }

    /// A system memory surface large enough to hold `bytes` bytes. Used for semaphores
    /// and deferred request fifos.
    pub fn buffer(bytes: usize) -> Self {
        Self::packed(XRGB8888, bytes.div_ceil(4).max(1) as u32, 1)
            .with_memory_kind(MemoryKind::System)
    }

    pub fn with_memory_kind(mut self, kind: MemoryKind) -> Self {
        self.memory_kind = kind;
        self
    }

    pub fn validate(&self, caps: &DeviceCaps) -> Result<(), SurfaceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SurfaceError::Empty);
        }
        if self.width > caps.max_surface_width || self.height > caps.max_surface_height {
            return Err(SurfaceError::TooLarge(
                self.width,
                self.height,
                caps.max_surface_width,
                caps.max_surface_height,
            ));
        }
        if self.planes.len() != self.format.planes.len() {
            return Err(SurfaceError::PlaneCount(
                self.format.name,
                self.format.planes.len(),
                self.planes.len(),
            ));
        }
        let alignment = match self.layout {
            SurfaceLayout::Pitch => PITCH_ALIGNMENT,
            SurfaceLayout::BlockLinear => BLOCK_LINEAR_PITCH_ALIGNMENT,
        };
        for (idx, plane) in self.planes.iter().enumerate() {
            let min_pitch = self.format.min_pitch(idx, self.width).unwrap_or(u64::MAX);
            if plane.pitch < min_pitch {
                return Err(SurfaceError::PitchTooSmall(idx));
            }
            if plane.pitch % alignment != 0 {
                return Err(SurfaceError::PitchAlignment(idx));
            }
            let height = self.format.plane_height(idx, self.height).unwrap_or(u32::MAX);
            let end = plane
                .pitch
                .checked_mul(height as u64)
                .and_then(|s| s.checked_add(plane.offset));
            if end.is_none_or(|end| end > self.memory.len() as u64) {
                return Err(SurfaceError::MemoryTooSmall(idx));
            }
        }
        if caps.requires_sysmem_surfaces && self.memory_kind != MemoryKind::System {
            return Err(SurfaceError::RequiresSysmem);
        }
        Ok(())
    }
}

pub struct Surface {
    pub id: SurfaceId,
    pub owner: ConnectionId,
    pub params: SurfaceParams,
    /// Cleared when the owner unregisters the surface.
    pub registered: bool,
    /// The number of handles held by other connections.
    pub acquired: usize,
}

impl Surface {
    pub fn is_orphaned(&self) -> bool {
        !self.registered
    }

    pub fn is_dead(&self) -> bool {
        !self.registered && self.acquired == 0
    }

    pub fn extent(&self) -> Rect {
        Rect::new_sized(0, 0, self.params.width as i32, self.params.height as i32)
            .unwrap_or_default()
    }

    /// Checks that a 32-bit word at `offset` lies within the surface memory.
    pub fn check_word(&self, offset: u64) -> Result<(), SurfaceError> {
        let len = self.params.memory.len() as u64;
        if offset % 4 != 0 || offset.checked_add(4).is_none_or(|end| end > len) {
            return Err(SurfaceError::InvalidOffset(offset));
        }
        Ok(())
    }
}

impl DeviceState {
    pub fn register_surface(
        &mut self,
        owner: ConnectionId,
        params: SurfaceParams,
    ) -> Result<SurfaceId, SurfaceError> {
        params.validate(&self.caps)?;
        let id = self.ids.surfaces.next();
        log::debug!(
            "Connection {} registered surface {} ({}x{} {})",
            owner,
            id,
            params.width,
            params.height,
            params.format.name
        );
        self.surfaces.insert(
            id,
            Surface {
                id,
                owner,
                params,
                registered: true,
                acquired: 0,
            },
        );
        Ok(id)
    }

    /// Removes the surface from the display timeline. Connections that acquired it keep
    /// an inert reference until they release it.
    pub fn unregister_surface(&mut self, hw: &dyn DisplayHardware, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        surface.registered = false;
        let mut freed_vrr = vec![];
        for (d, disp) in self.disps.iter_mut().enumerate() {
            for (h, head) in disp.heads.iter_mut().enumerate() {
                for (l, layer) in head.layers.iter_mut().enumerate() {
                    layer.pending.retain(|p| {
                        let keep = p.contents.surface != Some(id);
                        if !keep {
                            freed_vrr.extend(p.vrr_semaphore);
                        }
                        keep
                    });
                    if layer.visible.surface == Some(id) {
                        layer.visible.surface = None;
                        layer.visible_release = None;
                        hw.program_layer(d, h, l, &layer.visible);
                    }
                }
                if head.cursor.surface == Some(id) {
                    head.cursor.surface = None;
                    hw.program_cursor(d, h, &head.cursor);
                }
            }
        }
        for idx in freed_vrr {
            if !self.vrr_semaphore_in_use(idx) {
                self.vrr_semaphores.free(idx);
            }
        }
        let fifos: Vec<_> = self
            .fifos
            .values()
            .filter(|f| f.surface == id)
            .map(|f| f.id)
            .collect();
        for fifo in fifos {
            self.unregister_fifo(fifo);
        }
        self.sem_controls.retain(|_, c| c.surface != id);
        self.collect_surface(id);
    }

    /// Drops one acquired reference.
    pub fn release_surface(&mut self, id: SurfaceId) {
        if let Some(s) = self.surfaces.get_mut(&id) {
            s.acquired = s.acquired.saturating_sub(1);
        }
        self.collect_surface(id);
    }

    fn collect_surface(&mut self, id: SurfaceId) {
        if self.surfaces.get(&id).is_some_and(|s| s.is_dead()) {
            self.surfaces.remove(&id);
            log::debug!("Destroyed surface {}", id);
        }
    }
}
