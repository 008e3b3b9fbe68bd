#[cfg(test)]
mod tests;

use {
    serde::{Deserialize, Serialize},
    std::fmt::{Display, Formatter},
};

/// Display timings.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Mode {
    pub pixel_clock_khz: u32,
    pub h_visible: u16,
    pub h_sync_start: u16,
    pub h_sync_end: u16,
    pub h_total: u16,
    pub v_visible: u16,
    pub v_sync_start: u16,
    pub v_sync_end: u16,
    pub v_total: u16,
    #[serde(default)]
    pub interlaced: bool,
    #[serde(default)]
    pub double_scan: bool,
}

impl Mode {
    /// Computes reduced-blanking timings for the given size and refresh rate.
    pub fn reduced_blanking(width: u16, height: u16, refresh_hz: u32) -> Self {
        let h_total = width.saturating_add(160);
        let v_blank = (height / 30).max(23);
        let v_total = height.saturating_add(v_blank);
        let pixel_clock_khz = (h_total as u64 * v_total as u64 * refresh_hz as u64).div_ceil(1000);
        Self {
            pixel_clock_khz: pixel_clock_khz as u32,
            h_visible: width,
            h_sync_start: width.saturating_add(48),
            h_sync_end: width.saturating_add(80),
            h_total,
            v_visible: height,
            v_sync_start: height.saturating_add(3),
            v_sync_end: height.saturating_add(8),
            v_total,
            interlaced: false,
            double_scan: false,
        }
    }

    pub fn refresh_rate_millihz(&self) -> u32 {
        let mut total = self.h_total as u64 * self.v_total as u64;
        if self.double_scan {
            total *= 2;
        }
        if total == 0 {
            return 0;
        }
        let mut rate = self.pixel_clock_khz as u64 * 1_000_000 / total;
        if self.interlaced {
            rate *= 2;
        }
        rate as u32
    }

    pub fn h_sync_hz(&self) -> u32 {
        if self.h_total == 0 {
            return 0;
        }
        (self.pixel_clock_khz as u64 * 1000 / self.h_total as u64) as u32
    }

    fn timings_are_sane(&self) -> bool {
        self.pixel_clock_khz > 0
            && self.h_visible > 0
            && self.v_visible > 0
            && self.h_visible <= self.h_sync_start
            && self.h_sync_start <= self.h_sync_end
            && self.h_sync_end <= self.h_total
            && self.v_visible <= self.v_sync_start
            && self.v_sync_start <= self.v_sync_end
            && self.v_sync_end <= self.v_total
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rate = self.refresh_rate_millihz();
        write!(
            f,
            "{}x{}@{}.{:03}{}",
            self.h_visible,
            self.v_visible,
            rate / 1000,
            rate % 1000,
            if self.interlaced { "i" } else { "" },
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncRange {
    pub min: f64,
    pub max: f64,
}

impl SyncRange {
    pub fn contains(&self, value: f64) -> bool {
        const SLACK: f64 = 0.5;
        value >= self.min - SLACK && value <= self.max + SLACK
    }
}

bitflags! {
    ModeValidationOverrides: u32;
    NO_MAX_PCLK_CHECK = 1 << 0,
    NO_EDID_MAX_PCLK_CHECK = 1 << 1,
    NO_HORIZ_SYNC_CHECK = 1 << 2,
    NO_VERT_REFRESH_CHECK = 1 << 3,
    NO_EXTENDED_GPU_CAPABILITIES_CHECK = 1 << 5,
    NO_TOTAL_SIZE_CHECK = 1 << 7,
    NO_DISPLAYPORT_BANDWIDTH_CHECK = 1 << 9,
    NO_MAX_SIZE_CHECK = 1 << 13,
    NO_INTERLACED_MODES = 1 << 18,
}

bitflags! {
    ModeChecks: u32;
    CHECK_TIMINGS = 1 << 0,
    CHECK_MAX_SIZE = 1 << 1,
    CHECK_TOTAL_SIZE = 1 << 2,
    CHECK_INTERLACED = 1 << 3,
    CHECK_MAX_PCLK = 1 << 4,
    CHECK_EDID_MAX_PCLK = 1 << 5,
    CHECK_HORIZ_SYNC = 1 << 6,
    CHECK_VERT_REFRESH = 1 << 7,
    CHECK_DISPLAYPORT_BANDWIDTH = 1 << 8,
    CHECK_EXTENDED_GPU_CAPABILITIES = 1 << 9,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ModeValidationParams {
    pub overrides: ModeValidationOverrides,
    pub prefer_yuv420: bool,
}

/// The limits a mode is validated against. Assembled from the device, the connector and
/// the display.
#[derive(Clone, Debug)]
pub struct ModeLimits {
    pub max_pixel_clock_khz: u32,
    pub dpy_max_pixel_clock_khz: Option<u32>,
    pub h_sync_khz: Option<SyncRange>,
    pub v_refresh_hz: Option<SyncRange>,
    pub max_visible: (u16, u16),
    pub max_total: (u16, u16),
    pub supports_yuv420: bool,
    pub link_bandwidth_kbps: Option<u64>,
}

/// Bytes per pixel on the wire.
pub const WIRE_BYTES_PER_PIXEL: u64 = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModeValidation {
    pub failed: ModeChecks,
    pub yuv420: bool,
    pub effective_pixel_clock_khz: u32,
}

impl ModeValidation {
    pub fn is_valid(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn validate_mode(
    mode: &Mode,
    limits: &ModeLimits,
    params: &ModeValidationParams,
) -> ModeValidation {
    let ov = params.overrides;
    let mut failed = ModeChecks::NONE;
    if !mode.timings_are_sane() {
        failed |= CHECK_TIMINGS;
    }
    if !ov.contains(NO_MAX_SIZE_CHECK)
        && (mode.h_visible > limits.max_visible.0 || mode.v_visible > limits.max_visible.1)
    {
        failed |= CHECK_MAX_SIZE;
    }
    if !ov.contains(NO_TOTAL_SIZE_CHECK)
        && (mode.h_total > limits.max_total.0 || mode.v_total > limits.max_total.1)
    {
        failed |= CHECK_TOTAL_SIZE;
    }
    if mode.interlaced && ov.contains(NO_INTERLACED_MODES) {
        failed |= CHECK_INTERLACED;
    }
    let needs_yuv420 = mode.pixel_clock_khz > limits.max_pixel_clock_khz;
    let yuv420 = limits.supports_yuv420 && (params.prefer_yuv420 || needs_yuv420);
    let effective_pixel_clock_khz = match yuv420 {
        true => mode.pixel_clock_khz.div_ceil(2),
        false => mode.pixel_clock_khz,
    };
    if !ov.contains(NO_MAX_PCLK_CHECK) && effective_pixel_clock_khz > limits.max_pixel_clock_khz {
        failed |= CHECK_MAX_PCLK;
    }
    if !ov.contains(NO_EDID_MAX_PCLK_CHECK)
        && let Some(max) = limits.dpy_max_pixel_clock_khz
        && effective_pixel_clock_khz > max
    {
        failed |= CHECK_EDID_MAX_PCLK;
    }
    if !ov.contains(NO_HORIZ_SYNC_CHECK)
        && let Some(range) = &limits.h_sync_khz
        && !range.contains(mode.h_sync_hz() as f64 / 1000.0)
    {
        failed |= CHECK_HORIZ_SYNC;
    }
    if !ov.contains(NO_VERT_REFRESH_CHECK)
        && let Some(range) = &limits.v_refresh_hz
        && !range.contains(mode.refresh_rate_millihz() as f64 / 1000.0)
    {
        failed |= CHECK_VERT_REFRESH;
    }
    if !ov.contains(NO_DISPLAYPORT_BANDWIDTH_CHECK)
        && let Some(bw) = limits.link_bandwidth_kbps
        && effective_pixel_clock_khz as u64 * WIRE_BYTES_PER_PIXEL > bw
    {
        failed |= CHECK_DISPLAYPORT_BANDWIDTH;
    }
    ModeValidation {
        failed,
        yuv420,
        effective_pixel_clock_khz,
    }
}
