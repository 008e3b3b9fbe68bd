#[cfg(test)]
mod tests;

use {ahash::AHashMap, thiserror::Error};

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum AttributeError {
    #[error("Attribute {:?} is not supported by this object", .0)]
    NotSupported(&'static str),
    #[error("Value {} is not valid for attribute {}", .1, .0)]
    InvalidValue(&'static str, i64),
}

/// The values an attribute accepts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValidValues {
    Boolean,
    Range { min: i64, max: i64 },
    /// A bitmask of the accepted values in 0..64.
    IntBits(u64),
}

impl ValidValues {
    pub fn contains(&self, value: i64) -> bool {
        match *self {
            ValidValues::Boolean => value == 0 || value == 1,
            ValidValues::Range { min, max } => (min..=max).contains(&value),
            ValidValues::IntBits(bits) => (0..64).contains(&value) && bits & (1u64 << value) != 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DpyAttribute {
    Backlight,
    Dithering,
    ColorRange,
    ColorSpace,
    ImageSharpening,
    VrrMinRefreshRate,
}

pub const DITHERING_AUTO: i64 = 0;
pub const COLOR_RANGE_FULL: i64 = 0;
pub const COLOR_RANGE_LIMITED: i64 = 1;
pub const COLOR_SPACE_RGB: i64 = 0;
pub const COLOR_SPACE_YCBCR422: i64 = 1;
pub const COLOR_SPACE_YCBCR444: i64 = 2;

impl DpyAttribute {
    pub fn name(self) -> &'static str {
        match self {
            DpyAttribute::Backlight => "backlight",
            DpyAttribute::Dithering => "dithering",
            DpyAttribute::ColorRange => "color-range",
            DpyAttribute::ColorSpace => "color-space",
            DpyAttribute::ImageSharpening => "image-sharpening",
            DpyAttribute::VrrMinRefreshRate => "vrr-min-refresh-rate",
        }
    }
}

/// The attribute values of a display.
pub struct DpyAttributes {
    valid: AHashMap<DpyAttribute, ValidValues>,
    values: AHashMap<DpyAttribute, i64>,
}

impl DpyAttributes {
    pub fn new(backlight: bool, vrr_min_refresh_hz: Option<u32>) -> Self {
        let mut slf = Self {
            valid: Default::default(),
            values: Default::default(),
        };
        slf.add(DpyAttribute::Dithering, ValidValues::IntBits(0b111), DITHERING_AUTO);
        slf.add(
            DpyAttribute::ColorRange,
            ValidValues::IntBits(1 << COLOR_RANGE_FULL | 1 << COLOR_RANGE_LIMITED),
            COLOR_RANGE_FULL,
        );
        slf.add(
            DpyAttribute::ColorSpace,
            ValidValues::IntBits(
                1 << COLOR_SPACE_RGB | 1 << COLOR_SPACE_YCBCR422 | 1 << COLOR_SPACE_YCBCR444,
            ),
            COLOR_SPACE_RGB,
        );
        slf.add(
            DpyAttribute::ImageSharpening,
            ValidValues::Range { min: 0, max: 255 },
            0,
        );
        if backlight {
            slf.add(
                DpyAttribute::Backlight,
                ValidValues::Range { min: 0, max: 100 },
                100,
            );
        }
        if let Some(min) = vrr_min_refresh_hz {
            slf.add(
                DpyAttribute::VrrMinRefreshRate,
                ValidValues::Range {
                    min: min as i64,
                    max: 1000,
                },
                min as i64,
            );
        }
        slf
    }

    fn add(&mut self, attr: DpyAttribute, valid: ValidValues, default: i64) {
        self.valid.insert(attr, valid);
        self.values.insert(attr, default);
    }

    pub fn get(&self, attr: DpyAttribute) -> Result<i64, AttributeError> {
        self.values
            .get(&attr)
            .copied()
            .ok_or(AttributeError::NotSupported(attr.name()))
    }

    pub fn valid_values(&self, attr: DpyAttribute) -> Result<ValidValues, AttributeError> {
        self.valid
            .get(&attr)
            .copied()
            .ok_or(AttributeError::NotSupported(attr.name()))
    }

    /// Returns whether the value changed.
    pub fn set(&mut self, attr: DpyAttribute, value: i64) -> Result<bool, AttributeError> {
        if !self.valid_values(attr)?.contains(value) {
            return Err(AttributeError::InvalidValue(attr.name(), value));
        }
        Ok(self.values.insert(attr, value) != Some(value))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DispAttribute {
    FrameLock,
    FrameLockSyncDelay,
    AllowFlipLock,
}

#[derive(Default)]
pub struct DispAttributes {
    framelock: bool,
    framelock_sync_delay: i64,
    allow_flip_lock: bool,
}

impl DispAttributes {
    pub fn get(&self, attr: DispAttribute) -> i64 {
        match attr {
            DispAttribute::FrameLock => self.framelock as i64,
            DispAttribute::FrameLockSyncDelay => self.framelock_sync_delay,
            DispAttribute::AllowFlipLock => self.allow_flip_lock as i64,
        }
    }

    pub fn valid_values(attr: DispAttribute) -> ValidValues {
        match attr {
            DispAttribute::FrameLock | DispAttribute::AllowFlipLock => ValidValues::Boolean,
            DispAttribute::FrameLockSyncDelay => ValidValues::Range { min: 0, max: 2047 },
        }
    }

    pub fn set(&mut self, attr: DispAttribute, value: i64) -> Result<(), AttributeError> {
        if !Self::valid_values(attr).contains(value) {
            return Err(AttributeError::InvalidValue("disp", value));
        }
        match attr {
            DispAttribute::FrameLock => self.framelock = value != 0,
            DispAttribute::FrameLockSyncDelay => self.framelock_sync_delay = value,
            DispAttribute::AllowFlipLock => self.allow_flip_lock = value != 0,
        }
        Ok(())
    }
}
