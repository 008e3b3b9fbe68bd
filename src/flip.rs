pub mod sync;

use {
    crate::{
        config::{ServerConfig, VrrKind},
        connection::{ConnectionId, SurfaceHandle},
        device::{DeviceState, HeadConfig, OpenDev},
        flip::sync::{Semaphore, SyncptWait},
        format::{ABGR8888, ARGB8888},
        hardware::DisplayHardware,
        modeset::SetModeHeadStatus,
        permissions::MAX_LAYERS_PER_HEAD,
        rect::Rect,
        surface::{Surface, SurfaceId},
        swapgroup::SwapGroupId,
    },
    ahash::AHashSet,
    isnt::std_1::vec::IsntVecExt,
    thiserror::Error,
};

const LUT_SIZES: [usize; 2] = [256, 1024];
const DOWNSCALE_UNIT: u64 = 1024;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Composition {
    #[default]
    Opaque,
    PremultipliedAlpha,
    NonPremultipliedAlpha,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Rotation {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipX,
    FlipY,
}

impl Rotation {
    fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }
}

/// Static HDR metadata of a layer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HdrMetadata {
    pub max_display_luminance: u16,
    pub min_display_luminance: u16,
    pub max_cll: u16,
    pub max_fall: u16,
}

/// What a layer shows.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LayerContents {
    pub surface: Option<SurfaceId>,
    pub composition: Composition,
    /// The part of the surface that is shown.
    pub src: Rect,
    /// Where it is shown, relative to the viewport.
    pub dst: Rect,
    pub rotation: Rotation,
    pub hdr: Option<HdrMetadata>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Lut {
    pub entries: Vec<[u16; 3]>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CursorState {
    pub surface: Option<SurfaceId>,
    pub x: i16,
    pub y: i16,
}

/// A semaphore in a surface of the requesting connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SemaphoreRef {
    pub surface: SurfaceHandle,
    pub offset: u64,
    pub value: u32,
}

/// The flip becomes visible once the acquire semaphore has reached its value. The engine
/// writes the release value once the flip has been replaced by a later flip.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SemaphorePair {
    pub acquire: SemaphoreRef,
    pub release: SemaphoreRef,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FenceSync {
    pub pre: Option<SyncptWait>,
    pub request_post: bool,
}

/// Changes to one layer. Fields that are `None` keep the value of the previous flip.
#[derive(Clone, Debug, Default)]
pub struct LayerFlip {
    pub surface: Option<Option<SurfaceHandle>>,
    pub composition: Option<Composition>,
    pub src: Option<Rect>,
    pub dst: Option<Rect>,
    pub rotation: Option<Rotation>,
    pub hdr: Option<Option<HdrMetadata>>,
    pub semaphores: Option<SemaphorePair>,
    pub fence: Option<FenceSync>,
    /// Apply without waiting for the vertical blank.
    pub tearing: bool,
    /// Drop all flips of this layer that have not yet become visible.
    pub skip_pending: bool,
    pub notify: bool,
    /// The number of frames the previous flip must be visible for.
    pub min_present_interval: u8,
}

impl LayerFlip {
    pub fn show(surface: SurfaceHandle) -> Self {
        Self {
            surface: Some(Some(surface)),
            ..Default::default()
        }
    }

    pub fn hide() -> Self {
        Self {
            surface: Some(None),
            ..Default::default()
        }
    }

    fn has_sync(&self) -> bool {
        self.semaphores.is_some() || self.fence.is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct CursorFlip {
    pub surface: Option<Option<SurfaceHandle>>,
    pub position: Option<(i16, i16)>,
}

/// Changes to one head.
#[derive(Clone, Debug, Default)]
pub struct HeadFlipParams {
    pub layers: [Option<LayerFlip>; MAX_LAYERS_PER_HEAD],
    pub viewport_in: Option<(u16, u16)>,
    pub cursor: Option<CursorFlip>,
    pub lut: Option<Option<Lut>>,
}

impl HeadFlipParams {
    pub fn layer(mut self, layer: usize, flip: LayerFlip) -> Self {
        if let Some(l) = self.layers.get_mut(layer) {
            *l = Some(flip);
        }
        self
    }

    /// The layers whose flip rights are needed to apply these changes.
    pub fn required_layers(&self, all_layers: u8) -> u8 {
        if self.viewport_in.is_some() || self.cursor.is_some() || self.lut.is_some() {
            return all_layers;
        }
        let mut mask = 0;
        for (idx, l) in self.layers.iter().enumerate() {
            if l.is_some() {
                mask |= 1 << idx;
            }
        }
        mask
    }

    pub fn is_empty(&self) -> bool {
        self.required_layers(!0) == 0
    }
}

#[derive(Clone, Debug)]
pub struct FlipHeadRequest {
    pub disp: usize,
    pub head: usize,
    pub params: HeadFlipParams,
}

#[derive(Clone, Debug, Default)]
pub struct FlipRequest {
    pub heads: Vec<FlipHeadRequest>,
    /// If not set, the request is only validated.
    pub commit: bool,
}

impl FlipRequest {
    pub fn head(mut self, disp: usize, head: usize, params: HeadFlipParams) -> Self {
        self.heads.push(FlipHeadRequest { disp, head, params });
        self
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum VrrType {
    #[default]
    NonVrr,
    AdaptiveSync,
    Gsync,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FlipVrrInfo {
    pub ty: VrrType,
    /// The VRR semaphore the client must signal to trigger the frame. `None` means
    /// that the flip free-runs.
    pub semaphore_index: Option<u32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PostFence {
    pub disp: usize,
    pub head: usize,
    pub layer: usize,
    pub fence: SyncptWait,
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum FlipCheckError {
    #[error("The head is not active")]
    HeadInactive,
    #[error("Layer {} does not exist", .0)]
    InvalidLayer(usize),
    #[error("Layer {}: too many pending flips", .0)]
    QueueFull(usize),
    #[error("Layer {}: unknown surface handle", .0)]
    UnknownSurface(usize),
    #[error("Layer {}: the surface has been unregistered by its owner", .0)]
    OrphanedSurface(usize),
    #[error("Layer {}: format {} is not supported", .0, .1)]
    UnsupportedFormat(usize, &'static str),
    #[error("Layer {}: the source rectangle does not fit into the surface", .0)]
    InvalidSource(usize),
    #[error("Layer {}: the destination rectangle does not fit into the viewport", .0)]
    InvalidDestination(usize),
    #[error("Layer {}: the downscaling factor exceeds the usage bounds", .0)]
    Downscale(usize),
    #[error("Layer {}: semaphores and fences cannot be combined", .0)]
    MixedSyncObjects(usize),
    #[error("Layer {}: skip_pending cannot be combined with synchronization or notification", .0)]
    SkipPendingWithSync(usize),
    #[error("Layer {}: the device does not support sync points", .0)]
    SyncptsNotSupported(usize),
    #[error("Layer {}: invalid semaphore", .0)]
    InvalidSemaphore(usize),
    #[error("Layer {}: unknown sync point", .0)]
    UnknownSyncpt(usize),
    #[error("At most one layer per head can carry HDR metadata")]
    MultipleHdrLayers,
    #[error("The viewport is invalid")]
    InvalidViewport,
    #[error("The cursor image is invalid")]
    InvalidCursorImage,
    #[error("The cursor position is invalid")]
    InvalidCursorPosition,
    #[error("LUTs with {} entries are not supported", .0)]
    InvalidLut(usize),
}

impl FlipCheckError {
    pub fn head_status(&self) -> SetModeHeadStatus {
        match self {
            FlipCheckError::InvalidCursorImage => SetModeHeadStatus::InvalidCursorImage,
            FlipCheckError::InvalidCursorPosition => SetModeHeadStatus::InvalidCursorPosition,
            FlipCheckError::InvalidLut(_) => SetModeHeadStatus::InvalidLut,
            _ => SetModeHeadStatus::InvalidFlip,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlipHeadStatus {
    Success,
    NotPermitted,
    Invalid(FlipCheckError),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FlipHeadReply {
    pub disp: usize,
    pub head: usize,
    pub status: FlipHeadStatus,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlipStatus {
    Success,
    /// The connection lacks flip rights for at least one of the heads.
    NotPermitted,
    /// At least one head failed validation.
    Invalid,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlipReply {
    pub status: FlipStatus,
    pub heads: Vec<FlipHeadReply>,
    pub vrr: FlipVrrInfo,
    pub post_fences: Vec<PostFence>,
}

/// Malformed requests.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum FlipError {
    #[error("Head {} of disp {} does not exist", .1, .0)]
    InvalidHead(usize, usize),
    #[error("Head {} of disp {} appears more than once", .1, .0)]
    DuplicateHead(usize, usize),
    #[error("The connection has not allocated this device")]
    NotOpen,
}

/// A flip waiting to become visible.
pub struct PendingFlip {
    pub contents: LayerContents,
    pub acquire: Option<Semaphore>,
    pub release: Option<Semaphore>,
    pub pre_fence: Option<SyncptWait>,
    pub post_fence: Option<SyncptWait>,
    pub vrr_semaphore: Option<u32>,
    /// The swap group that must swap before the flip may become visible.
    pub swap_group: Option<SwapGroupId>,
    pub notify: Option<ConnectionId>,
    pub min_present_interval: u8,
}

pub struct PreparedLayer {
    pub layer: usize,
    pub contents: LayerContents,
    pub acquire: Option<Semaphore>,
    pub release: Option<Semaphore>,
    pub pre_fence: Option<SyncptWait>,
    pub request_post: bool,
    pub tearing: bool,
    pub skip_pending: bool,
    pub notify: bool,
    pub min_present_interval: u8,
}

/// Changes to a head that have passed validation.
pub struct PreparedHead {
    pub disp: usize,
    pub head: usize,
    pub layers: Vec<PreparedLayer>,
    pub viewport_in: Option<(u16, u16)>,
    pub cursor: Option<CursorState>,
    pub lut: Option<Option<Lut>>,
}

fn resolve_surface<'a>(
    state: &'a DeviceState,
    open: &OpenDev,
    handle: SurfaceHandle,
) -> Option<&'a Surface> {
    let sref = open.surfaces.get(handle).ok()?;
    state.surfaces.get(&sref.id)
}

fn resolve_semaphore(
    state: &DeviceState,
    open: &OpenDev,
    sem: &SemaphoreRef,
) -> Option<Semaphore> {
    let surface = resolve_surface(state, open, sem.surface)?;
    surface.check_word(sem.offset).ok()?;
    Some(Semaphore {
        memory: surface.params.memory.clone(),
        offset: sem.offset,
        value: sem.value,
    })
}

/// Validates changes to a head against `config`, the configuration the head will have
/// when the changes are applied.
pub fn check_head(
    state: &DeviceState,
    open: &OpenDev,
    disp: usize,
    head: usize,
    params: &HeadFlipParams,
    config: Option<&HeadConfig>,
    max_pending: usize,
) -> Result<PreparedHead, FlipCheckError> {
    let h = state
        .head(disp, head)
        .map_err(|_| FlipCheckError::HeadInactive)?;
    let Some(config) = config else {
        return Err(FlipCheckError::HeadInactive);
    };
    let mut viewport = config.viewport();
    if let Some((vw, vh)) = params.viewport_in {
        if vw == 0 || vh == 0 || vw > config.mode.h_visible || vh > config.mode.v_visible {
            return Err(FlipCheckError::InvalidViewport);
        }
        viewport = Rect::new_sized(0, 0, vw as i32, vh as i32).unwrap_or_default();
    }
    let mut layers = vec![];
    for (idx, flip) in params.layers.iter().enumerate() {
        let Some(flip) = flip else {
            continue;
        };
        let Some(layer) = h.layers.get(idx) else {
            return Err(FlipCheckError::InvalidLayer(idx));
        };
        if flip.semaphores.is_some() && flip.fence.is_some() {
            return Err(FlipCheckError::MixedSyncObjects(idx));
        }
        if flip.skip_pending && (flip.has_sync() || flip.notify) {
            return Err(FlipCheckError::SkipPendingWithSync(idx));
        }
        if let Some(fence) = &flip.fence {
            if !state.caps.supports_syncpts {
                return Err(FlipCheckError::SyncptsNotSupported(idx));
            }
            if let Some(pre) = &fence.pre
                && !state.syncpts.contains(pre.syncpt)
            {
                return Err(FlipCheckError::UnknownSyncpt(idx));
            }
        }
        if !flip.skip_pending && layer.pending.len() >= max_pending {
            return Err(FlipCheckError::QueueFull(idx));
        }
        let mut contents = layer.latest().clone();
        let mut surface = None;
        match flip.surface {
            Some(None) => contents.surface = None,
            Some(Some(handle)) => {
                let Some(s) = resolve_surface(state, open, handle) else {
                    return Err(FlipCheckError::UnknownSurface(idx));
                };
                contents.surface = Some(s.id);
                contents.src = s.extent();
                contents.dst = viewport;
                surface = Some(s);
            }
            None => {
                surface = contents.surface.and_then(|id| state.surfaces.get(&id));
            }
        }
        if let Some(c) = flip.composition {
            contents.composition = c;
        }
        if let Some(src) = flip.src {
            contents.src = src;
        }
        if let Some(dst) = flip.dst {
            contents.dst = dst;
        }
        if let Some(r) = flip.rotation {
            contents.rotation = r;
        }
        if let Some(hdr) = flip.hdr {
            contents.hdr = hdr;
        }
        if let Some(s) = surface {
            if s.is_orphaned() {
                return Err(FlipCheckError::OrphanedSurface(idx));
            }
            if !state.caps.layer_formats(idx).contains(s.params.format) {
                return Err(FlipCheckError::UnsupportedFormat(idx, s.params.format.name));
            }
            if contents.src.is_empty() || !s.extent().contains_rect(&contents.src) {
                return Err(FlipCheckError::InvalidSource(idx));
            }
            if contents.dst.is_empty() || !viewport.contains_rect(&contents.dst) {
                return Err(FlipCheckError::InvalidDestination(idx));
            }
            let max = config
                .possible
                .layers
                .get(idx)
                .map(|l| l.max_downscale_factor as u64)
                .unwrap_or(DOWNSCALE_UNIT);
            let (mut sw, mut sh) = (contents.src.width() as u64, contents.src.height() as u64);
            if contents.rotation.swaps_axes() {
                (sw, sh) = (sh, sw);
            }
            let (dw, dh) = (contents.dst.width() as u64, contents.dst.height() as u64);
            if sw * DOWNSCALE_UNIT > dw * max || sh * DOWNSCALE_UNIT > dh * max {
                return Err(FlipCheckError::Downscale(idx));
            }
        }
        let (mut acquire, mut release) = (None, None);
        if let Some(sems) = &flip.semaphores {
            acquire = resolve_semaphore(state, open, &sems.acquire);
            release = resolve_semaphore(state, open, &sems.release);
            if acquire.is_none() || release.is_none() {
                return Err(FlipCheckError::InvalidSemaphore(idx));
            }
        }
        layers.push(PreparedLayer {
            layer: idx,
            contents,
            acquire,
            release,
            pre_fence: flip.fence.and_then(|f| f.pre),
            request_post: flip.fence.is_some_and(|f| f.request_post),
            tearing: flip.tearing,
            skip_pending: flip.skip_pending,
            notify: flip.notify,
            min_present_interval: flip.min_present_interval,
        });
    }
    let hdr_layers = h
        .layers
        .iter()
        .enumerate()
        .filter(|(idx, layer)| match layers.iter().find(|p| p.layer == *idx) {
            Some(p) => p.contents.hdr.is_some(),
            None => layer.latest().hdr.is_some(),
        })
        .count();
    if hdr_layers > 1 {
        return Err(FlipCheckError::MultipleHdrLayers);
    }
    let mut cursor = None;
    if let Some(cf) = &params.cursor {
        let mut c = h.cursor.clone();
        match cf.surface {
            Some(None) => c.surface = None,
            Some(Some(handle)) => {
                let Some(s) = resolve_surface(state, open, handle) else {
                    return Err(FlipCheckError::InvalidCursorImage);
                };
                let p = &s.params;
                let format_ok = p.format == ARGB8888 || p.format == ABGR8888;
                if s.is_orphaned()
                    || !format_ok
                    || p.width != p.height
                    || p.width > state.caps.max_cursor_size
                {
                    return Err(FlipCheckError::InvalidCursorImage);
                }
                c.surface = Some(s.id);
            }
            None => {}
        }
        if let Some((x, y)) = cf.position {
            let size = state.caps.max_cursor_size as i32;
            let in_range = |v: i16, max: i32| (-size..max).contains(&(v as i32));
            if !in_range(x, viewport.width()) || !in_range(y, viewport.height()) {
                return Err(FlipCheckError::InvalidCursorPosition);
            }
            c.x = x;
            c.y = y;
        }
        cursor = Some(c);
    }
    if let Some(Some(lut)) = &params.lut
        && !LUT_SIZES.contains(&lut.entries.len())
    {
        return Err(FlipCheckError::InvalidLut(lut.entries.len()));
    }
    Ok(PreparedHead {
        disp,
        head,
        layers,
        viewport_in: params.viewport_in,
        cursor,
        lut: params.lut.clone(),
    })
}

impl DeviceState {
    /// Queues validated changes.
    pub fn apply_head(
        &mut self,
        hw: &dyn DisplayHardware,
        conn: ConnectionId,
        prepared: PreparedHead,
        vrr_semaphore: Option<u32>,
        post_fences: &mut Vec<PostFence>,
    ) {
        let PreparedHead {
            disp,
            head,
            layers,
            viewport_in,
            cursor,
            lut,
        } = prepared;
        let swap_group = self
            .head_swap_group(disp, head)
            .map(|sg| (sg.id, sg.clip_list.clone()));
        let mut created_syncpts = vec![];
        let Some(h) = self.disps.get_mut(disp).and_then(|d| d.heads.get_mut(head)) else {
            return;
        };
        let desktop = h.active.as_ref().map(|c| c.desktop_position).unwrap_or_default();
        if let Some(vp) = viewport_in
            && let Some(config) = &mut h.active
        {
            config.viewport_in = vp;
        }
        if let Some(c) = cursor {
            h.cursor = c;
            hw.program_cursor(disp, head, &h.cursor);
        }
        if let Some(lut) = lut {
            h.lut = lut;
            hw.program_lut(disp, head, h.lut.as_ref());
        }
        let mut discarded_vrr = vec![];
        let mut tearing = vec![];
        for p in layers {
            let layer = &mut h.layers[p.layer];
            if p.skip_pending {
                for flip in layer.pending.drain(..) {
                    discarded_vrr.extend(flip.vrr_semaphore);
                }
            }
            let mut post_fence = None;
            if p.request_post {
                let syncpt = match layer.post_syncpt {
                    Some(s) => s,
                    None => {
                        let s = self.syncpts.create();
                        created_syncpts.push(s);
                        layer.post_syncpt = Some(s);
                        s
                    }
                };
                layer.post_value += 1;
                let fence = SyncptWait {
                    syncpt,
                    value: layer.post_value,
                };
                post_fences.push(PostFence {
                    disp,
                    head,
                    layer: p.layer,
                    fence,
                });
                post_fence = Some(fence);
            }
            let gate = swap_group.as_ref().and_then(|(id, clip)| {
                let rect = p.contents.dst.move_(desktop.0, desktop.1);
                let gated = clip.is_empty() || clip.iter().any(|c| c.intersects(&rect));
                gated.then_some(*id)
            });
            log::trace!(
                "disp {} head {} layer {}: queued {:?}",
                disp,
                head,
                p.layer,
                p.contents.surface
            );
            layer.pending.push_back(PendingFlip {
                contents: p.contents,
                acquire: p.acquire,
                release: p.release,
                pre_fence: p.pre_fence,
                post_fence,
                vrr_semaphore,
                swap_group: gate,
                notify: p.notify.then_some(conn),
                min_present_interval: p.min_present_interval,
            });
            if p.tearing {
                tearing.push(p.layer);
            }
        }
        discarded_vrr.sort_unstable();
        discarded_vrr.dedup();
        for idx in discarded_vrr {
            if !self.vrr_semaphore_in_use(idx) {
                self.vrr_semaphores.free(idx);
            }
        }
        let no_swaps = AHashSet::new();
        for layer in tearing {
            self.advance_layer(hw, disp, head, layer, &no_swaps);
        }
        if created_syncpts.is_not_empty() {
            log::debug!("Created post-fence sync points {:?}", created_syncpts);
        }
    }
}

/// Validates and, if requested, queues a flip.
pub fn flip(
    state: &mut DeviceState,
    hw: &dyn DisplayHardware,
    config: &ServerConfig,
    conn: ConnectionId,
    request: &FlipRequest,
) -> Result<FlipReply, FlipError> {
    let mut seen = AHashSet::new();
    for req in &request.heads {
        if state.head(req.disp, req.head).is_err() {
            return Err(FlipError::InvalidHead(req.disp, req.head));
        }
        if !seen.insert((req.disp, req.head)) {
            return Err(FlipError::DuplicateHead(req.disp, req.head));
        }
    }
    let owner = state.has_owner_rights(conn);
    let mut replies = vec![];
    let mut prepared = vec![];
    let mut status = FlipStatus::Success;
    let mut vrr = FlipVrrInfo::default();
    {
        let open = state.open(conn).map_err(|_| FlipError::NotOpen)?;
        for req in &request.heads {
            let (disp, head) = (req.disp, req.head);
            let Ok(h) = state.head(disp, head) else {
                continue;
            };
            let all = h.all_layers();
            let allowed = match owner {
                true => !0,
                false => open.perms.flippable_layers(disp, head, all),
            };
            let needed = req.params.required_layers(all);
            let head_status = if needed & !allowed != 0 {
                status = FlipStatus::NotPermitted;
                FlipHeadStatus::NotPermitted
            } else {
                match check_head(
                    state,
                    open,
                    disp,
                    head,
                    &req.params,
                    h.active.as_ref(),
                    config.max_pending_flips_per_layer,
                ) {
                    Ok(p) => {
                        if let Some(kind) = h.active.as_ref().and_then(|c| c.vrr) {
                            vrr.ty = match kind {
                                VrrKind::AdaptiveSync => VrrType::AdaptiveSync,
                                VrrKind::Gsync => VrrType::Gsync,
                            };
                        }
                        prepared.push(p);
                        FlipHeadStatus::Success
                    }
                    Err(e) => {
                        log::debug!("disp {} head {}: flip rejected: {}", disp, head, e);
                        if status == FlipStatus::Success {
                            status = FlipStatus::Invalid;
                        }
                        FlipHeadStatus::Invalid(e)
                    }
                }
            };
            replies.push(FlipHeadReply {
                disp,
                head,
                status: head_status,
            });
        }
    }
    let mut reply = FlipReply {
        status,
        heads: replies,
        vrr: FlipVrrInfo::default(),
        post_fences: vec![],
    };
    if status != FlipStatus::Success || !request.commit {
        reply.vrr.ty = vrr.ty;
        return Ok(reply);
    }
    if vrr.ty != VrrType::NonVrr && state.caps.requires_vrr_semaphores {
        vrr.semaphore_index = state.vrr_semaphores.alloc();
        if vrr.semaphore_index.is_none() {
            log::warn!("All VRR semaphores are in use. The flip free-runs.");
        }
    }
    reply.vrr = vrr;
    for p in prepared {
        state.apply_head(hw, conn, p, vrr.semaphore_index, &mut reply.post_fences);
    }
    Ok(reply)
}
