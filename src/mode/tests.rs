use crate::mode::{
    CHECK_DISPLAYPORT_BANDWIDTH, CHECK_HORIZ_SYNC, CHECK_MAX_PCLK, CHECK_MAX_SIZE,
    CHECK_TIMINGS, CHECK_VERT_REFRESH, Mode, ModeLimits, ModeValidationOverrides,
    ModeValidationParams, NO_HORIZ_SYNC_CHECK, NO_MAX_PCLK_CHECK, SyncRange, validate_mode,
};

fn cea_1080p() -> Mode {
    Mode {
        pixel_clock_khz: 148_500,
        h_visible: 1920,
        h_sync_start: 2008,
        h_sync_end: 2052,
        h_total: 2200,
        v_visible: 1080,
        v_sync_start: 1084,
        v_sync_end: 1089,
        v_total: 1125,
        interlaced: false,
        double_scan: false,
    }
}

fn limits() -> ModeLimits {
    ModeLimits {
        max_pixel_clock_khz: 600_000,
        dpy_max_pixel_clock_khz: None,
        h_sync_khz: None,
        v_refresh_hz: None,
        max_visible: (8192, 8192),
        max_total: (16384, 16384),
        supports_yuv420: false,
        link_bandwidth_kbps: None,
    }
}

#[test]
fn refresh_rate() {
    let mode = cea_1080p();
    assert_eq!(mode.refresh_rate_millihz(), 60_000);
    assert_eq!(mode.h_sync_hz(), 67_500);
    assert_eq!(mode.to_string(), "1920x1080@60.000");
    let rb = Mode::reduced_blanking(2560, 1440, 144);
    let rate = rb.refresh_rate_millihz();
    assert!((143_900..=144_100).contains(&rate), "{}", rate);
}

#[test]
fn valid_mode() {
    let v = validate_mode(&cea_1080p(), &limits(), &Default::default());
    assert!(v.is_valid());
    assert!(!v.yuv420);
    assert_eq!(v.effective_pixel_clock_khz, 148_500);
}

#[test]
fn insane_timings() {
    let mut mode = cea_1080p();
    mode.h_sync_start = 1000;
    let v = validate_mode(&mode, &limits(), &Default::default());
    assert_eq!(v.failed, CHECK_TIMINGS);
}

#[test]
fn pixel_clock_and_override() {
    let mut limits = limits();
    limits.max_pixel_clock_khz = 100_000;
    let v = validate_mode(&cea_1080p(), &limits, &Default::default());
    assert_eq!(v.failed, CHECK_MAX_PCLK);
    let params = ModeValidationParams {
        overrides: NO_MAX_PCLK_CHECK,
        ..Default::default()
    };
    assert!(validate_mode(&cea_1080p(), &limits, &params).is_valid());
}

#[test]
fn yuv420_halves_the_pixel_clock() {
    let mut limits = limits();
    limits.max_pixel_clock_khz = 100_000;
    limits.supports_yuv420 = true;
    let v = validate_mode(&cea_1080p(), &limits, &Default::default());
    assert!(v.is_valid());
    assert!(v.yuv420);
    assert_eq!(v.effective_pixel_clock_khz, 74_250);
}

#[test]
fn sync_ranges() {
    let mut limits = limits();
    limits.h_sync_khz = Some(SyncRange {
        min: 30.0,
        max: 60.0,
    });
    limits.v_refresh_hz = Some(SyncRange {
        min: 70.0,
        max: 75.0,
    });
    let v = validate_mode(&cea_1080p(), &limits, &Default::default());
    assert_eq!(v.failed, CHECK_HORIZ_SYNC | CHECK_VERT_REFRESH);
    let params = ModeValidationParams {
        overrides: NO_HORIZ_SYNC_CHECK,
        ..Default::default()
    };
    let v = validate_mode(&cea_1080p(), &limits, &params);
    assert_eq!(v.failed, CHECK_VERT_REFRESH);
}

#[test]
fn size_and_link_bandwidth() {
    let mut limits = limits();
    limits.max_visible = (1280, 1024);
    limits.link_bandwidth_kbps = Some(148_500 * 3 - 1);
    let v = validate_mode(&cea_1080p(), &limits, &Default::default());
    assert_eq!(v.failed, CHECK_MAX_SIZE | CHECK_DISPLAYPORT_BANDWIDTH);
    let params = ModeValidationParams {
        overrides: ModeValidationOverrides::all(),
        ..Default::default()
    };
    assert!(validate_mode(&cea_1080p(), &limits, &params).is_valid());
}
