pub mod usage;

use {
    crate::{
        config::{ServerConfig, VrrKind},
        connection::ConnectionId,
        device::{DeviceError, DeviceState, HeadConfig},
        dpy::{DpyId, DpyIdList},
        events::Event,
        flip::{FlipCheckError, HeadFlipParams, PreparedHead, check_head},
        hardware::{DisplayHardware, HeadCommit},
        mode::{
            CHECK_DISPLAYPORT_BANDWIDTH, CHECK_MAX_SIZE, Mode, ModeChecks, ModeValidation,
            ModeValidationParams, NO_EXTENDED_GPU_CAPABILITIES_CHECK, validate_mode,
        },
        modeset::usage::{UsageBounds, base_fetch, usage_bounds},
        permissions::{MAX_DISPS, MAX_HEADS_PER_DISP},
        utils::errorfmt::ErrorFmt,
    },
    thiserror::Error,
};

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ModesetError {
    #[error("The connection has not allocated this device")]
    NotOpen,
}

#[derive(Clone, Debug, Default)]
pub struct SetModeHeadRequest {
    /// The displays driven by the head. Empty to shut the head down.
    pub dpys: DpyIdList,
    pub mode: Mode,
    pub params: ModeValidationParams,
    /// Defaults to the visible size of the mode.
    pub viewport_in: Option<(u16, u16)>,
    pub desktop_position: (i32, i32),
    pub allow_vrr: bool,
    pub flip: HeadFlipParams,
}

impl SetModeHeadRequest {
    pub fn new(dpys: DpyIdList, mode: Mode) -> Self {
        Self {
            dpys,
            mode,
            ..Default::default()
        }
    }

    pub fn shutdown() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SetModeDispRequest {
    pub requested_heads: u32,
    pub heads: [SetModeHeadRequest; MAX_HEADS_PER_DISP],
}

/// A fixed-layout modeset request. Only heads named in the bitmasks are touched.
#[derive(Clone, Debug, Default)]
pub struct SetModeRequest {
    pub requested_disps: u32,
    pub disps: [SetModeDispRequest; MAX_DISPS],
    /// If not set, the request is only validated.
    pub commit: bool,
}

impl SetModeRequest {
    pub fn with_head(mut self, disp: usize, head: usize, req: SetModeHeadRequest) -> Self {
        if disp < MAX_DISPS && head < MAX_HEADS_PER_DISP {
            self.requested_disps |= 1 << disp;
            self.disps[disp].requested_heads |= 1 << head;
            self.disps[disp].heads[head] = req;
        }
        self
    }

    pub fn committing(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }

    fn requested_heads(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..MAX_DISPS)
            .filter(|d| self.requested_disps & (1 << d) != 0)
            .flat_map(move |d| {
                (0..MAX_HEADS_PER_DISP)
                    .filter(move |h| self.disps[d].requested_heads & (1 << h) != 0)
                    .map(move |h| (d, h))
            })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SetModeStatus {
    #[default]
    Success,
    InvalidRequestedDispsBitmask,
    NotModesetOwner,
    ValidationFailed,
    HardwareCommitFailed,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SetModeDispStatus {
    #[default]
    Success,
    InvalidRequestedHeadsBitmask,
    FailedExtendedGpuCapabilitiesCheck,
    FailedDisplayPortBandwidthCheck,
    IncompatibleDpys,
    DuplicateDpys,
    InvalidHeadConfiguration,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SetModeHeadStatus {
    #[default]
    Success,
    InvalidMode,
    InvalidDpy,
    InvalidCursorImage,
    InvalidCursorPosition,
    InvalidLut,
    InvalidFlip,
    InvalidPermissions,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SetModeHeadReply {
    pub status: SetModeHeadStatus,
    pub mode_failures: ModeChecks,
    pub flip_error: Option<FlipCheckError>,
    pub possible: UsageBounds,
    pub guaranteed: UsageBounds,
    pub vrr_enabled: bool,
    pub yuv420: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SetModeDispReply {
    pub status: SetModeDispStatus,
    pub heads: [SetModeHeadReply; MAX_HEADS_PER_DISP],
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SetModeReply {
    pub status: SetModeStatus,
    pub disps: [SetModeDispReply; MAX_DISPS],
}

impl SetModeReply {
    pub fn head(&self, disp: usize, head: usize) -> &SetModeHeadReply {
        &self.disps[disp].heads[head]
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModeIndexReply {
    pub mode: Option<Mode>,
    pub validation: Option<ModeValidation>,
    /// Set once `index` is past the last mode.
    pub end: bool,
}

/// Validates a mode for a display.
pub fn validate_dpy_mode(
    state: &DeviceState,
    disp: usize,
    dpy: DpyId,
    mode: &Mode,
    params: &ModeValidationParams,
) -> Result<ModeValidation, DeviceError> {
    let d = state.disp(disp)?;
    let dp = state.dpy(disp, dpy)?;
    let connector = &d.connectors[dp.connector];
    Ok(validate_mode(mode, &dp.mode_limits(&state.caps, connector), params))
}

/// Validates the mode at `index` of the display's mode pool.
pub fn validate_mode_index(
    state: &DeviceState,
    disp: usize,
    dpy: DpyId,
    index: usize,
    params: &ModeValidationParams,
) -> Result<ModeIndexReply, DeviceError> {
    let modes = state.dpy(disp, dpy)?.modes();
    let Some(mode) = modes.get(index) else {
        return Ok(ModeIndexReply {
            mode: None,
            validation: None,
            end: true,
        });
    };
    Ok(ModeIndexReply {
        mode: Some(*mode),
        validation: Some(validate_dpy_mode(state, disp, dpy, mode, params)?),
        end: false,
    })
}

/// Validates a head configuration on its own. Fills in the reply.
fn check_head_config(
    state: &DeviceState,
    disp: usize,
    req: &SetModeHeadRequest,
    reply: &mut SetModeHeadReply,
) -> Option<HeadConfig> {
    let d = &state.disps[disp];
    let mut failures = ModeChecks::NONE;
    let mut yuv420 = false;
    let mut vrr: Option<VrrKind> = None;
    let mut all_vrr = true;
    for dpy in req.dpys.iter() {
        let Some(dp) = d.dpys.get(&dpy).filter(|dp| dp.is_connected()) else {
            reply.status = SetModeHeadStatus::InvalidDpy;
            return None;
        };
        let connector = &d.connectors[dp.connector];
        let v = validate_mode(&req.mode, &dp.mode_limits(&state.caps, connector), &req.params);
        failures |= v.failed;
        yuv420 |= v.yuv420;
        match dp.vrr(connector) {
            Some(kind) => vrr = Some(kind),
            None => all_vrr = false,
        }
    }
    let viewport_in = req
        .viewport_in
        .unwrap_or((req.mode.h_visible, req.mode.v_visible));
    let (vw, vh) = viewport_in;
    if vw == 0 || vh == 0 || vw > req.mode.h_visible || vh > req.mode.v_visible {
        failures |= CHECK_MAX_SIZE;
    }
    reply.mode_failures = failures;
    reply.yuv420 = yuv420;
    if !failures.is_empty() {
        reply.status = SetModeHeadStatus::InvalidMode;
        return None;
    }
    let vrr = vrr.filter(|_| all_vrr && req.allow_vrr);
    reply.vrr_enabled = vrr.is_some();
    Some(HeadConfig {
        dpys: req.dpys,
        mode: req.mode,
        yuv420,
        viewport_in,
        desktop_position: req.desktop_position,
        possible: Default::default(),
        guaranteed: Default::default(),
        vrr,
    })
}

/// Checks the proposed configuration of a disp for conflicts between heads.
fn check_disp_conflicts(
    state: &DeviceState,
    disp: usize,
    proposed: &[Option<HeadConfig>],
) -> SetModeDispStatus {
    let d = &state.disps[disp];
    let mut used = DpyIdList::EMPTY;
    let mut connectors = vec![];
    for config in proposed.iter().flatten() {
        if !used.intersection(config.dpys).is_empty() {
            return SetModeDispStatus::DuplicateDpys;
        }
        used = used.union(config.dpys);
        for dpy in config.dpys.iter() {
            if let Some(dp) = d.dpys.get(&dpy) {
                connectors.push(dp.connector);
            }
        }
    }
    for &a in &connectors {
        for &b in &connectors {
            if d.connectors[a].excluded.contains(&b) {
                return SetModeDispStatus::IncompatibleDpys;
            }
        }
    }
    SetModeDispStatus::Success
}

/// Validates a modeset request and, if requested and valid, applies it atomically.
pub fn set_mode(
    state: &mut DeviceState,
    hw: &dyn DisplayHardware,
    config: &ServerConfig,
    conn: ConnectionId,
    req: &SetModeRequest,
) -> Result<SetModeReply, ModesetError> {
    let mut reply = SetModeReply::default();
    let open = state.open(conn).map_err(|_| ModesetError::NotOpen)?;
    let all_disps = (1u32 << state.disps.len()) - 1;
    if req.requested_disps & !all_disps != 0 {
        reply.status = SetModeStatus::InvalidRequestedDispsBitmask;
        return Ok(reply);
    }
    let owner = state.has_owner_rights(conn);
    if req.commit && !owner && open.perms.modeset.is_empty() {
        reply.status = SetModeStatus::NotModesetOwner;
        return Ok(reply);
    }
    let mut proposed: Vec<Vec<Option<HeadConfig>>> = state
        .disps
        .iter()
        .map(|d| d.heads.iter().map(|h| h.active.clone()).collect())
        .collect();
    let mut failed = false;
    let mut requested = vec![];
    for (disp, d) in state.disps.iter().enumerate() {
        if req.requested_disps & (1 << disp) == 0 {
            continue;
        }
        let dreq = &req.disps[disp];
        let drep = &mut reply.disps[disp];
        let all_heads = (1u32 << d.heads.len()) - 1;
        if dreq.requested_heads & !all_heads != 0 {
            drep.status = SetModeDispStatus::InvalidRequestedHeadsBitmask;
            failed = true;
            continue;
        }
        for head in 0..d.heads.len() {
            if dreq.requested_heads & (1 << head) == 0 {
                continue;
            }
            requested.push((disp, head));
            let hreq = &dreq.heads[head];
            let hrep = &mut drep.heads[head];
            if req.commit && !owner {
                let allowed = open.perms.modeset.dpys(disp, head);
                if allowed.is_empty() || !hreq.dpys.is_subset_of(allowed) {
                    hrep.status = SetModeHeadStatus::InvalidPermissions;
                    failed = true;
                    continue;
                }
            }
            if hreq.dpys.is_empty() {
                proposed[disp][head] = None;
                continue;
            }
            match check_head_config(state, disp, hreq, hrep) {
                Some(c) => proposed[disp][head] = Some(c),
                None => {
                    if hrep.mode_failures == CHECK_DISPLAYPORT_BANDWIDTH {
                        drep.status = SetModeDispStatus::FailedDisplayPortBandwidthCheck;
                    }
                    failed = true;
                }
            }
        }
        if drep.status == SetModeDispStatus::Success {
            drep.status = check_disp_conflicts(state, disp, &proposed[disp]);
            if drep.status != SetModeDispStatus::Success {
                failed = true;
            }
        }
    }
    let total_fetch: u64 = proposed
        .iter()
        .flatten()
        .flatten()
        .map(|c| base_fetch(&c.mode))
        .sum();
    let bandwidth = state.caps.memory_bandwidth_kbps;
    let mut prepared: Vec<PreparedHead> = vec![];
    for &(disp, head) in &requested {
        let num_layers = state.disps[disp].heads[head].num_layers();
        let hreq = &req.disps[disp].heads[head];
        let Some(head_config) = &mut proposed[disp][head] else {
            continue;
        };
        let own = base_fetch(&head_config.mode);
        let headroom = bandwidth.saturating_sub(total_fetch - own);
        let (possible, guaranteed) =
            usage_bounds(&state.caps, num_layers, &head_config.mode, headroom);
        head_config.possible = possible;
        head_config.guaranteed = guaranteed;
        let hrep = &mut reply.disps[disp].heads[head];
        hrep.possible = head_config.possible.clone();
        hrep.guaranteed = head_config.guaranteed.clone();
        if total_fetch > bandwidth
            && !hreq.params.overrides.contains(NO_EXTENDED_GPU_CAPABILITIES_CHECK)
        {
            reply.disps[disp].status = SetModeDispStatus::FailedExtendedGpuCapabilitiesCheck;
            failed = true;
            continue;
        }
        if hrep.status != SetModeHeadStatus::Success || hreq.flip.is_empty() {
            continue;
        }
        match check_head(
            state,
            open,
            disp,
            head,
            &hreq.flip,
            Some(&*head_config),
            config.max_pending_flips_per_layer,
        ) {
            Ok(p) => prepared.push(p),
            Err(e) => {
                hrep.status = e.head_status();
                hrep.flip_error = Some(e);
                failed = true;
            }
        }
    }
    for (disp, drep) in reply.disps.iter_mut().enumerate() {
        if drep.status == SetModeDispStatus::Success
            && drep
                .heads
                .iter()
                .any(|h| h.status != SetModeHeadStatus::Success)
        {
            drep.status = SetModeDispStatus::InvalidHeadConfiguration;
        }
        if drep.status != SetModeDispStatus::Success {
            log::debug!("disp {}: modeset validation failed: {:?}", disp, drep.status);
        }
    }
    if failed {
        reply.status = SetModeStatus::ValidationFailed;
        return Ok(reply);
    }
    if !req.commit {
        return Ok(reply);
    }
    let commits: Vec<_> = requested
        .iter()
        .map(|&(disp, head)| HeadCommit {
            disp,
            head,
            timings: proposed[disp][head].as_ref().map(|c| c.timings()),
        })
        .collect();
    if let Err(e) = hw.commit_heads(&commits) {
        log::warn!("The hardware rejected the modeset: {}", ErrorFmt(e));
        reply.status = SetModeStatus::HardwareCommitFailed;
        return Ok(reply);
    }
    for &(disp, head) in &requested {
        state.discard_pending_flips(disp, head);
        let new = proposed[disp][head].take();
        let h = &mut state.disps[disp].heads[head];
        let old_dpys = h.active.as_ref().map(|c| c.dpys).unwrap_or_default();
        let new_dpys = new.as_ref().map(|c| c.dpys).unwrap_or_default();
        match &new {
            Some(c) => log::info!("disp {} head {}: {} on {:?}", disp, head, c.mode, c.dpys),
            None => log::info!("disp {} head {}: off", disp, head),
        }
        if new.is_none() {
            for layer in &mut h.layers {
                layer.visible = Default::default();
                if let Some(release) = layer.visible_release.take() {
                    release.release();
                }
            }
        }
        h.committed_by = (!owner && new.is_some()).then_some(conn);
        h.active = new;
        for dpy in old_dpys.union(new_dpys).iter() {
            state.emit(|open| Event::DpyChanged {
                device: open.handle,
                disp: open.disp_handle(disp),
                dpy,
            });
        }
    }
    let mut post_fences = vec![];
    for p in prepared {
        state.apply_head(hw, conn, p, None, &mut post_fences);
    }
    Ok(reply)
}
