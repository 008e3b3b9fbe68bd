mod ownership;
#[cfg(test)]
pub mod testing;

use {
    crate::{
        attributes::{DispAttributes, DpyAttributes},
        config::{
            CapsDescription, ConnectorKind, DispDescription, DpyDescription, GpuDescription,
            ServerConfig, VrrKind,
        },
        connection::{
            ConnectionId, ConnectorHandle, DeviceHandle, DispHandle, FifoHandle, SurfaceHandle,
            SwapGroupHandle, VblankSemControlHandle, VblankSyncObjectHandle,
        },
        dpy::{DpyId, DpyIdList},
        events::{Event, EventQueue, UnicastEvent},
        flip::{
            CursorState, LayerContents, Lut, PendingFlip,
            sync::{Semaphore, SyncptId, Syncpts, VrrSemaphores},
        },
        format::FormatSet,
        framelock::FrameLock,
        grant::GrantTable,
        handle::{HandleError, HandleTable},
        hardware::{DisplayHardware, HeadCommit, HeadTimings},
        mode::{Mode, ModeLimits},
        modeset::usage::UsageBounds,
        mux::Mux,
        permissions::{DispLayout, EffectivePermissions, MAX_HEADS_PER_DISP},
        rect::Rect,
        surface::{Surface, SurfaceId, SurfaceIds},
        swapgroup::{
            SwapGroup, SwapGroupId, SwapGroupIds,
            fifo::{Fifo, FifoId, FifoIds},
        },
        utils::errorfmt::ErrorFmt,
        vblank::{
            MAX_VBLANK_SYNC_OBJECTS_PER_HEAD, SemControlId, SemControlIds, VblankSemControl,
            VblankWorker,
        },
    },
    ahash::{AHashMap, AHashSet},
    arrayvec::ArrayVec,
    indexmap::IndexMap,
    isnt::std_1::{collections::IsntVecDequeExt, vec::IsntVecExt},
    parking_lot::{Condvar, Mutex},
    std::{
        collections::VecDeque,
        sync::Arc,
        time::{Duration, Instant},
    },
    thiserror::Error,
};

linear_ids!(DeviceIds, DeviceId);

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DeviceError {
    #[error("Disp {} does not exist", .0)]
    InvalidDisp(usize),
    #[error("Head {} of disp {} does not exist", .1, .0)]
    InvalidHead(usize, usize),
    #[error("{} does not exist on disp {}", .1, .0)]
    InvalidDpy(usize, DpyId),
    #[error("{} of disp {} is not a dynamic display", .1, .0)]
    NotDynamic(usize, DpyId),
    #[error("Connector {} of disp {} does not support dynamic displays", .1, .0)]
    NotMst(usize, usize),
    #[error("Disp {} has no free display ids", .0)]
    TooManyDpys(usize),
    #[error("No dynamic display at address {}", .0)]
    UnknownAddress(String),
    #[error("Framelock board {} does not exist", .0)]
    InvalidFrameLock(usize),
    #[error("The connection has not allocated this device")]
    NotOpen,
}

#[derive(Clone, Debug)]
pub struct DeviceCaps {
    pub max_surface_width: u32,
    pub max_surface_height: u32,
    pub max_raster_width: u16,
    pub max_raster_height: u16,
    pub max_cursor_size: u32,
    pub layer_formats: Vec<FormatSet>,
    pub supports_syncpts: bool,
    pub requires_vrr_semaphores: bool,
    pub requires_sysmem_surfaces: bool,
    pub supports_swap_groups: bool,
    pub max_pixel_clock_khz: u32,
    pub memory_bandwidth_kbps: u64,
    pub num_vrr_semaphores: u32,
}

impl DeviceCaps {
    pub fn new(desc: &CapsDescription, max_layers: u8) -> Self {
        Self {
            max_surface_width: desc.max_surface_width,
            max_surface_height: desc.max_surface_height,
            max_raster_width: desc.max_raster_width,
            max_raster_height: desc.max_raster_height,
            max_cursor_size: desc.max_cursor_size,
            layer_formats: desc.layer_formats(max_layers),
            supports_syncpts: desc.supports_syncpts,
            requires_vrr_semaphores: desc.requires_vrr_semaphores,
            requires_sysmem_surfaces: desc.requires_sysmem_surfaces,
            supports_swap_groups: desc.supports_swap_groups,
            max_pixel_clock_khz: desc.max_pixel_clock_khz,
            memory_bandwidth_kbps: desc.memory_bandwidth_kbps,
            num_vrr_semaphores: desc.num_vrr_semaphores,
        }
    }

    pub fn layer_formats(&self, layer: usize) -> FormatSet {
        self.layer_formats.get(layer).copied().unwrap_or_default()
    }
}

pub struct Connector {
    pub name: String,
    pub kind: ConnectorKind,
    /// Connectors that cannot be driven at the same time as this one.
    pub excluded: Vec<usize>,
    pub max_pixel_clock_khz: Option<u32>,
    pub link_bandwidth_kbps: Option<u64>,
    pub mst: bool,
}

pub struct DynamicDpy {
    pub address: String,
    pub interest: usize,
}

pub struct Dpy {
    pub id: DpyId,
    pub connector: usize,
    pub name: String,
    /// `None` while nothing is connected.
    pub desc: Option<DpyDescription>,
    pub dynamic: Option<DynamicDpy>,
    pub attributes: DpyAttributes,
    pub mux: Option<Mux>,
}

impl Dpy {
    fn new(id: DpyId, connector: usize, name: &str, desc: Option<DpyDescription>) -> Self {
        let attributes = match &desc {
            Some(d) => DpyAttributes::new(d.backlight, d.vrr.map(|v| v.min_refresh_hz)),
            None => DpyAttributes::new(false, None),
        };
        let mux = desc.as_ref().filter(|d| d.mux).map(|_| Mux::default());
        Self {
            id,
            connector,
            name: desc.as_ref().map(|d| d.name.clone()).unwrap_or_else(|| name.to_string()),
            desc,
            dynamic: None,
            attributes,
            mux,
        }
    }

    pub fn new_dynamic(id: DpyId, connector: usize, address: &str, desc: DpyDescription) -> Self {
        let mut dpy = Self::new(id, connector, address, Some(desc));
        dpy.dynamic = Some(DynamicDpy {
            address: address.to_string(),
            interest: 0,
        });
        dpy
    }

    pub fn is_connected(&self) -> bool {
        self.desc.is_some()
    }

    pub fn modes(&self) -> &[Mode] {
        self.desc.as_ref().map(|d| &d.modes[..]).unwrap_or_default()
    }

    pub fn mode_limits(&self, caps: &DeviceCaps, connector: &Connector) -> ModeLimits {
        let desc = self.desc.as_ref();
        ModeLimits {
            max_pixel_clock_khz: connector
                .max_pixel_clock_khz
                .map_or(caps.max_pixel_clock_khz, |c| c.min(caps.max_pixel_clock_khz)),
            dpy_max_pixel_clock_khz: desc.and_then(|d| d.max_pixel_clock_khz),
            h_sync_khz: desc.and_then(|d| d.h_sync_khz),
            v_refresh_hz: desc.and_then(|d| d.v_refresh_hz),
            max_visible: (caps.max_raster_width, caps.max_raster_height),
            max_total: (caps.max_raster_width, caps.max_raster_height),
            supports_yuv420: desc.is_some_and(|d| d.supports_yuv420),
            link_bandwidth_kbps: connector.link_bandwidth_kbps,
        }
    }

    pub fn vrr(&self, connector: &Connector) -> Option<VrrKind> {
        if !connector.kind.supports_vrr() {
            return None;
        }
        self.desc.as_ref()?.vrr.map(|v| v.kind)
    }
}

/// The active configuration of a head.
#[derive(Clone, Debug)]
pub struct HeadConfig {
    pub dpys: DpyIdList,
    pub mode: Mode,
    pub yuv420: bool,
    pub viewport_in: (u16, u16),
    pub desktop_position: (i32, i32),
    pub possible: UsageBounds,
    pub guaranteed: UsageBounds,
    pub vrr: Option<VrrKind>,
}

impl HeadConfig {
    pub fn timings(&self) -> HeadTimings {
        HeadTimings {
            dpys: self.dpys,
            mode: self.mode,
            yuv420: self.yuv420,
            viewport_in: self.viewport_in,
            desktop_position: self.desktop_position,
            vrr: self.vrr.is_some(),
        }
    }

    pub fn viewport(&self) -> Rect {
        Rect::new_sized(0, 0, self.viewport_in.0 as i32, self.viewport_in.1 as i32)
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct Layer {
    pub visible: LayerContents,
    /// Written once the visible flip has been replaced.
    pub visible_release: Option<Semaphore>,
    pub pending: VecDeque<PendingFlip>,
    pub last_flip_frame: u64,
    /// Signaled when flips that requested a post fence become visible.
    pub post_syncpt: Option<SyncptId>,
    pub post_value: u64,
}

impl Layer {
    /// The contents the layer will show once all pending flips have been applied.
    pub fn latest(&self) -> &LayerContents {
        match self.pending.back() {
            Some(p) => &p.contents,
            None => &self.visible,
        }
    }
}

pub struct Head {
    pub active: Option<HeadConfig>,
    /// The connection that committed the active configuration if it did so through
    /// delegated modeset permissions.
    pub committed_by: Option<ConnectionId>,
    pub layers: Vec<Layer>,
    pub cursor: CursorState,
    pub lut: Option<Lut>,
    pub frame_count: u64,
    pub vblank_syncpts: ArrayVec<SyncptId, MAX_VBLANK_SYNC_OBJECTS_PER_HEAD>,
}

impl Head {
    fn new(num_layers: u8) -> Self {
        Self {
            active: None,
            committed_by: None,
            layers: (0..num_layers).map(|_| Layer::default()).collect(),
            cursor: Default::default(),
            lut: None,
            frame_count: 0,
            vblank_syncpts: Default::default(),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn all_layers(&self) -> u8 {
        match self.layers.len() {
            n if n >= 8 => !0,
            n => (1u8 << n) - 1,
        }
    }

    pub fn has_pending_flips(&self) -> bool {
        self.layers.iter().any(|l| l.pending.is_not_empty())
    }
}

pub struct Disp {
    pub heads: Vec<Head>,
    pub connectors: Vec<Connector>,
    pub dpys: IndexMap<DpyId, Dpy>,
    pub attributes: DispAttributes,
}

impl Disp {
    fn new(desc: &DispDescription) -> Self {
        let connectors = desc
            .connectors
            .iter()
            .map(|c| Connector {
                name: c.name.clone(),
                kind: c.kind,
                excluded: c
                    .excluded
                    .iter()
                    .filter_map(|e| desc.connectors.iter().position(|o| &o.name == e))
                    .collect(),
                max_pixel_clock_khz: c.max_pixel_clock_khz,
                link_bandwidth_kbps: c.link_bandwidth_kbps,
                mst: c.mst,
            })
            .collect();
        let mut dpys = IndexMap::new();
        for (idx, c) in desc.connectors.iter().enumerate() {
            let Some(id) = DpyId::new(idx as u32) else {
                log::warn!("Ignoring connector {}: too many connectors", c.name);
                continue;
            };
            dpys.insert(id, Dpy::new(id, idx, &c.name, c.dpy.clone()));
        }
        Self {
            heads: (0..desc.num_heads).map(|_| Head::new(desc.layers_per_head)).collect(),
            connectors,
            dpys,
            attributes: Default::default(),
        }
    }

    pub fn valid_dpys(&self) -> DpyIdList {
        self.dpys.keys().copied().collect()
    }

    pub fn connected_dpys(&self) -> DpyIdList {
        self.dpys
            .values()
            .filter(|d| d.is_connected())
            .map(|d| d.id)
            .collect()
    }

    pub fn layout(&self) -> DispLayout {
        let mut layers = [0; MAX_HEADS_PER_DISP];
        for (l, head) in layers.iter_mut().zip(self.heads.iter()) {
            *l = head.num_layers() as u8;
        }
        DispLayout {
            num_heads: self.heads.len(),
            layers,
            valid_dpys: self.valid_dpys(),
        }
    }
}

pub struct SurfaceRef {
    pub id: SurfaceId,
    pub owned: bool,
}

pub struct SwapGroupRef {
    pub id: SwapGroupId,
    pub owned: bool,
}

pub struct VblankSyncObject {
    pub disp: usize,
    pub head: usize,
    pub syncpt: SyncptId,
    pub unicast: Option<Arc<UnicastEvent>>,
}

/// The per-connection view of a device.
pub struct OpenDev {
    pub handle: DeviceHandle,
    pub events: Arc<EventQueue>,
    pub perms: EffectivePermissions,
    pub disps: HandleTable<DispHandle, usize>,
    pub disp_handles: Vec<DispHandle>,
    pub connectors: HandleTable<ConnectorHandle, (usize, usize)>,
    pub connector_handles: Vec<Vec<ConnectorHandle>>,
    pub surfaces: HandleTable<SurfaceHandle, SurfaceRef>,
    pub fifos: HandleTable<FifoHandle, FifoId>,
    pub swap_groups: HandleTable<SwapGroupHandle, SwapGroupRef>,
    pub sync_objects: HandleTable<VblankSyncObjectHandle, VblankSyncObject>,
    pub sem_controls: HandleTable<VblankSemControlHandle, SemControlId>,
    pub syncpts: AHashSet<SyncptId>,
    pub dpy_interest: AHashSet<(usize, DpyId)>,
}

impl OpenDev {
    pub fn new(
        handle: DeviceHandle,
        events: Arc<EventQueue>,
        state: &DeviceState,
    ) -> Result<Self, HandleError> {
        let mut disps = HandleTable::default();
        let mut connectors = HandleTable::default();
        let mut disp_handles = vec![];
        let mut connector_handles = vec![];
        for (idx, disp) in state.disps.iter().enumerate() {
            disp_handles.push(disps.alloc(idx)?);
            let mut handles = vec![];
            for c in 0..disp.connectors.len() {
                handles.push(connectors.alloc((idx, c))?);
            }
            connector_handles.push(handles);
        }
        Ok(Self {
            handle,
            events,
            perms: Default::default(),
            disps,
            disp_handles,
            connectors,
            connector_handles,
            surfaces: Default::default(),
            fifos: Default::default(),
            swap_groups: Default::default(),
            sync_objects: Default::default(),
            sem_controls: Default::default(),
            syncpts: Default::default(),
            dpy_interest: Default::default(),
        })
    }

    pub fn disp_handle(&self, disp: usize) -> DispHandle {
        self.disp_handles.get(disp).copied().unwrap_or(DispHandle::NONE)
    }
}

#[derive(Default)]
pub struct ObjectIds {
    pub surfaces: SurfaceIds,
    pub fifos: FifoIds,
    pub swap_groups: SwapGroupIds,
    pub sem_controls: SemControlIds,
}

pub struct DeviceState {
    pub caps: DeviceCaps,
    pub disps: Vec<Disp>,
    pub framelocks: Vec<FrameLock>,
    pub modeset_owner: Option<ConnectionId>,
    pub sub_owner: Option<ConnectionId>,
    pub opens: IndexMap<ConnectionId, OpenDev>,
    pub surfaces: AHashMap<SurfaceId, Surface>,
    pub fifos: IndexMap<FifoId, Fifo>,
    pub swap_groups: IndexMap<SwapGroupId, SwapGroup>,
    pub syncpts: Syncpts,
    pub vrr_semaphores: VrrSemaphores,
    pub sem_controls: IndexMap<SemControlId, VblankSemControl>,
    pub frame: u64,
    pub ids: ObjectIds,
}

impl DeviceState {
    pub fn layout(&self) -> Vec<DispLayout> {
        self.disps.iter().map(|d| d.layout()).collect()
    }

    /// Whether the connection owns the device or acts on behalf of the owner.
    pub fn has_owner_rights(&self, conn: ConnectionId) -> bool {
        self.modeset_owner == Some(conn) || self.sub_owner == Some(conn)
    }

    pub fn open(&self, conn: ConnectionId) -> Result<&OpenDev, DeviceError> {
        self.opens.get(&conn).ok_or(DeviceError::NotOpen)
    }

    pub fn open_mut(&mut self, conn: ConnectionId) -> Result<&mut OpenDev, DeviceError> {
        self.opens.get_mut(&conn).ok_or(DeviceError::NotOpen)
    }

    pub fn disp(&self, disp: usize) -> Result<&Disp, DeviceError> {
        self.disps.get(disp).ok_or(DeviceError::InvalidDisp(disp))
    }

    pub fn disp_mut(&mut self, disp: usize) -> Result<&mut Disp, DeviceError> {
        self.disps.get_mut(disp).ok_or(DeviceError::InvalidDisp(disp))
    }

    pub fn head(&self, disp: usize, head: usize) -> Result<&Head, DeviceError> {
        self.disp(disp)?
            .heads
            .get(head)
            .ok_or(DeviceError::InvalidHead(disp, head))
    }

    pub fn head_mut(&mut self, disp: usize, head: usize) -> Result<&mut Head, DeviceError> {
        self.disp_mut(disp)?
            .heads
            .get_mut(head)
            .ok_or(DeviceError::InvalidHead(disp, head))
    }

    pub fn dpy(&self, disp: usize, dpy: DpyId) -> Result<&Dpy, DeviceError> {
        self.disp(disp)?
            .dpys
            .get(&dpy)
            .ok_or(DeviceError::InvalidDpy(disp, dpy))
    }

    pub fn dpy_mut(&mut self, disp: usize, dpy: DpyId) -> Result<&mut Dpy, DeviceError> {
        self.disp_mut(disp)?
            .dpys
            .get_mut(&dpy)
            .ok_or(DeviceError::InvalidDpy(disp, dpy))
    }

    /// Sends an event to every connection that has the device open.
    pub fn emit(&self, f: impl Fn(&OpenDev) -> Event) {
        for open in self.opens.values() {
            open.events.push(f(open));
        }
    }

    /// The swap group that contains the head, if any.
    pub fn head_swap_group(&self, disp: usize, head: usize) -> Option<&SwapGroup> {
        self.swap_groups.values().find(|sg| sg.contains_head(disp, head))
    }

    pub fn active_heads(&self) -> Vec<(usize, usize)> {
        let mut res = vec![];
        for (d, disp) in self.disps.iter().enumerate() {
            for (h, head) in disp.heads.iter().enumerate() {
                if head.active.is_some() {
                    res.push((d, h));
                }
            }
        }
        res
    }

    /// Drops all flips that have not yet become visible. Their release semaphores are
    /// not written.
    pub fn discard_pending_flips(&mut self, disp: usize, head: usize) -> usize {
        let Ok(h) = self.head_mut(disp, head) else {
            return 0;
        };
        let mut discarded = vec![];
        for layer in &mut h.layers {
            discarded.extend(layer.pending.drain(..));
        }
        for flip in &discarded {
            if let Some(idx) = flip.vrr_semaphore
                && !self.vrr_semaphore_in_use(idx)
            {
                self.vrr_semaphores.free(idx);
            }
        }
        if discarded.is_not_empty() {
            log::debug!(
                "disp {} head {}: discarded {} pending flips",
                disp,
                head,
                discarded.len()
            );
        }
        discarded.len()
    }

    /// Records one connection's interest in a dynamic display. Displays that nobody is
    /// interested in are forgotten once they disconnect.
    pub fn add_dpy_interest(&mut self, disp: usize, dpy: DpyId) -> Result<(), DeviceError> {
        match &mut self.dpy_mut(disp, dpy)?.dynamic {
            Some(d) => {
                d.interest += 1;
                Ok(())
            }
            None => Err(DeviceError::NotDynamic(disp, dpy)),
        }
    }

    pub fn remove_dpy_interest(&mut self, disp: usize, dpy: DpyId) {
        let Ok(d) = self.dpy_mut(disp, dpy) else {
            return;
        };
        if let Some(dynamic) = &mut d.dynamic {
            dynamic.interest = dynamic.interest.saturating_sub(1);
        }
        self.collect_dynamic_dpy(disp, dpy);
    }

    fn collect_dynamic_dpy(&mut self, disp: usize, dpy: DpyId) {
        let Ok(d) = self.disp_mut(disp) else {
            return;
        };
        let dead = d.dpys.get(&dpy).is_some_and(|d| {
            !d.is_connected() && d.dynamic.as_ref().is_some_and(|d| d.interest == 0)
        });
        if dead {
            d.dpys.shift_remove(&dpy);
            log::info!("Forgot dynamic display {} of disp {}", dpy, disp);
        }
    }

    /// Attaches a display behind an MST connector. A display at an address that some
    /// connection is still interested in keeps its id.
    pub fn connect_dynamic_dpy(
        &mut self,
        disp: usize,
        connector: usize,
        address: &str,
        desc: DpyDescription,
    ) -> Result<DpyId, DeviceError> {
        let d = self.disp_mut(disp)?;
        if !d.connectors.get(connector).is_some_and(|c| c.mst) {
            return Err(DeviceError::NotMst(disp, connector));
        }
        let existing = d.dpys.values().find(|dp| {
            dp.connector == connector
                && dp.dynamic.as_ref().is_some_and(|dy| dy.address == address)
        });
        let id = match existing {
            Some(dp) => {
                let id = dp.id;
                let mut new = Dpy::new_dynamic(id, connector, address, desc);
                if let Some(old) = d.dpys.get_mut(&id) {
                    new.dynamic = old.dynamic.take();
                    *old = new;
                }
                id
            }
            None => {
                let Some(id) = d.valid_dpys().first_free() else {
                    return Err(DeviceError::TooManyDpys(disp));
                };
                d.dpys.insert(id, Dpy::new_dynamic(id, connector, address, desc));
                id
            }
        };
        log::info!("Dynamic display {} connected at {} on disp {}", id, address, disp);
        self.emit(|open| Event::DynamicDpyConnected {
            device: open.handle,
            disp: open.disp_handle(disp),
            dpy: id,
        });
        Ok(id)
    }

    pub fn disconnect_dynamic_dpy(
        &mut self,
        hw: &dyn DisplayHardware,
        disp: usize,
        address: &str,
    ) -> Result<DpyId, DeviceError> {
        let d = self.disp_mut(disp)?;
        let Some(dp) = d
            .dpys
            .values_mut()
            .find(|dp| dp.dynamic.as_ref().is_some_and(|dy| dy.address == address))
        else {
            return Err(DeviceError::UnknownAddress(address.to_string()));
        };
        let id = dp.id;
        dp.desc = None;
        let heads: Vec<_> = d
            .heads
            .iter()
            .enumerate()
            .filter(|(_, h)| h.active.as_ref().is_some_and(|c| c.dpys.contains(id)))
            .map(|(h, _)| (disp, h))
            .collect();
        self.shutdown_heads(hw, &heads);
        log::info!("Dynamic display {} at {} disconnected", id, address);
        self.emit(|open| Event::DynamicDpyDisconnected {
            device: open.handle,
            disp: open.disp_handle(disp),
            dpy: id,
        });
        self.collect_dynamic_dpy(disp, id);
        Ok(id)
    }

    /// Shuts the heads down and drops their pending flips.
    pub fn shutdown_heads(&mut self, hw: &dyn DisplayHardware, heads: &[(usize, usize)]) {
        let heads: Vec<_> = heads
            .iter()
            .copied()
            .filter(|&(d, h)| self.head(d, h).is_ok_and(|h| h.active.is_some()))
            .collect();
        if heads.is_empty() {
            return;
        }
        let commits: Vec<_> = heads
            .iter()
            .map(|&(disp, head)| HeadCommit {
                disp,
                head,
                timings: None,
            })
            .collect();
        if let Err(e) = hw.commit_heads(&commits) {
            log::error!("Could not shut down heads: {}", ErrorFmt(e));
        }
        for &(disp, head) in &heads {
            log::info!("Shutting down disp {} head {}", disp, head);
            self.discard_pending_flips(disp, head);
            let Ok(h) = self.head_mut(disp, head) else {
                continue;
            };
            let dpys = h.active.take().map(|c| c.dpys).unwrap_or_default();
            h.committed_by = None;
            for layer in &mut h.layers {
                layer.visible = Default::default();
                if let Some(release) = layer.visible_release.take() {
                    release.release();
                }
            }
            for dpy in dpys.iter() {
                self.emit(|open| Event::DpyChanged {
                    device: open.handle,
                    disp: open.disp_handle(disp),
                    dpy,
                });
            }
        }
    }
}

pub struct Device {
    pub id: DeviceId,
    pub gpu_id: u32,
    pub name: String,
    pub hw: Arc<dyn DisplayHardware>,
    pub config: ServerConfig,
    pub grants: Arc<Mutex<GrantTable>>,
    pub state: Mutex<DeviceState>,
    pub idle_cond: Condvar,
    worker: Mutex<Option<VblankWorker>>,
}

impl Device {
    pub fn new(
        id: DeviceId,
        gpu: &GpuDescription,
        hw: Arc<dyn DisplayHardware>,
        config: &ServerConfig,
        grants: Arc<Mutex<GrantTable>>,
    ) -> Arc<Self> {
        let max_layers = gpu
            .disps
            .iter()
            .map(|d| d.layers_per_head)
            .max()
            .unwrap_or(0);
        let caps = DeviceCaps::new(&gpu.caps, max_layers);
        let state = DeviceState {
            vrr_semaphores: VrrSemaphores::new(caps.num_vrr_semaphores),
            caps,
            disps: gpu.disps.iter().map(Disp::new).collect(),
            framelocks: gpu.framelocks.iter().map(FrameLock::new).collect(),
            modeset_owner: None,
            sub_owner: None,
            opens: Default::default(),
            surfaces: Default::default(),
            fifos: Default::default(),
            swap_groups: Default::default(),
            syncpts: Default::default(),
            sem_controls: Default::default(),
            frame: 0,
            ids: Default::default(),
        };
        log::info!("Allocated device {} for gpu {} ({})", id, gpu.gpu_id, gpu.name);
        Arc::new(Self {
            id,
            gpu_id: gpu.gpu_id,
            name: gpu.name.clone(),
            hw,
            config: config.clone(),
            grants,
            state: Mutex::new(state),
            idle_cond: Condvar::new(),
            worker: Mutex::new(None),
        })
    }

    /// Runs one vertical blank on every head of the device.
    pub fn vblank(&self, timestamp_ns: u64) {
        self.state.lock().process_vblank(&*self.hw, timestamp_ns);
        self.idle_cond.notify_all();
    }

    pub fn start_vblank_worker(self: &Arc<Self>, interval: Duration) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        match VblankWorker::spawn(self, interval) {
            Ok(w) => *worker = Some(w),
            Err(e) => log::error!("Could not start the vblank worker: {}", ErrorFmt(e)),
        }
    }

    /// Waits until the flip channels of the heads have retired all work. Channels that
    /// are still busy when the timeout expires are stopped. Returns the stopped heads.
    pub fn idle_base_channel(
        &self,
        heads: &[(usize, usize)],
        timeout: Duration,
    ) -> Result<Vec<(usize, usize)>, DeviceError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        for &(disp, head) in heads {
            state.head(disp, head)?;
        }
        let busy = |state: &DeviceState| -> Vec<(usize, usize)> {
            heads
                .iter()
                .copied()
                .filter(|&(d, h)| {
                    state.head(d, h).is_ok_and(|head| head.has_pending_flips())
                        || !self.hw.channel_idle(d, h)
                })
                .collect()
        };
        loop {
            let pending = busy(&*state);
            if pending.is_empty() {
                return Ok(vec![]);
            }
            if self.idle_cond.wait_until(&mut state, deadline).timed_out() {
                let pending = busy(&*state);
                for &(disp, head) in &pending {
                    log::warn!(
                        "disp {} head {}: channel did not idle in time. Stopping it.",
                        disp,
                        head
                    );
                    self.hw.force_stop_channel(disp, head);
                    state.discard_pending_flips(disp, head);
                }
                return Ok(pending);
            }
        }
    }

    /// Releases everything the device holds once the last connection has freed it.
    pub fn teardown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.stop();
        }
        let mut state = self.state.lock();
        for (disp, head) in state.active_heads() {
            state.discard_pending_flips(disp, head);
            if let Ok(h) = state.head_mut(disp, head) {
                h.active = None;
            }
        }
        state.swap_groups.clear();
        state.fifos.clear();
        state.surfaces.clear();
        state.sem_controls.clear();
        state.modeset_owner = None;
        state.sub_owner = None;
        self.grants.lock().invalidate_device(self.id);
        self.hw.restore_console();
        log::info!("Freed device {} of gpu {}", self.id, self.gpu_id);
    }
}
