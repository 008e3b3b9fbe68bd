use crate::attributes::{
    AttributeError, COLOR_RANGE_LIMITED, DispAttribute, DispAttributes, DpyAttribute,
    DpyAttributes, ValidValues,
};

#[test]
fn dpy_attributes() {
    let mut attrs = DpyAttributes::new(false, Some(48));
    assert_eq!(
        attrs.get(DpyAttribute::Backlight),
        Err(AttributeError::NotSupported("backlight"))
    );
    assert_eq!(attrs.set(DpyAttribute::ColorRange, COLOR_RANGE_LIMITED), Ok(true));
    assert_eq!(attrs.set(DpyAttribute::ColorRange, COLOR_RANGE_LIMITED), Ok(false));
    assert_eq!(
        attrs.set(DpyAttribute::ColorRange, 5),
        Err(AttributeError::InvalidValue("color-range", 5))
    );
    assert_eq!(attrs.get(DpyAttribute::VrrMinRefreshRate), Ok(48));
    assert!(attrs.set(DpyAttribute::VrrMinRefreshRate, 30).is_err());
}

#[test]
fn valid_values() {
    assert!(ValidValues::IntBits(0b101).contains(2));
    assert!(!ValidValues::IntBits(0b101).contains(1));
    assert!(!ValidValues::IntBits(!0).contains(64));
    assert!(!ValidValues::IntBits(!0).contains(-1));
    assert!(ValidValues::Boolean.contains(1));
    assert!(!ValidValues::Boolean.contains(2));
}

#[test]
fn disp_attributes() {
    let mut attrs = DispAttributes::default();
    assert_eq!(attrs.get(DispAttribute::FrameLock), 0);
    attrs.set(DispAttribute::FrameLock, 1).unwrap();
    assert_eq!(attrs.get(DispAttribute::FrameLock), 1);
    assert!(attrs.set(DispAttribute::FrameLockSyncDelay, 4096).is_err());
}
