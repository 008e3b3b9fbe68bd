use crate::{
    attributes::{AttributeError, ValidValues},
    config::FrameLockDescription,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FrameLockAttribute {
    Polarity,
    SyncDelay,
    HouseSync,
}

pub const POLARITY_RISING: i64 = 1;
pub const POLARITY_FALLING: i64 = 2;
pub const POLARITY_BOTH: i64 = 3;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameLockInfo {
    pub index: usize,
    pub name: String,
    pub house_sync_capable: bool,
}

/// A framelock board attached to the device.
pub struct FrameLock {
    name: String,
    house_sync_capable: bool,
    polarity: i64,
    sync_delay: i64,
    house_sync: bool,
}

impl FrameLock {
    pub fn new(desc: &FrameLockDescription) -> Self {
        Self {
            name: desc.name.clone(),
            house_sync_capable: desc.house_sync,
            polarity: POLARITY_RISING,
            sync_delay: 0,
            house_sync: false,
        }
    }

    pub fn info(&self, index: usize) -> FrameLockInfo {
        FrameLockInfo {
            index,
            name: self.name.clone(),
            house_sync_capable: self.house_sync_capable,
        }
    }

    pub fn valid_values(&self, attr: FrameLockAttribute) -> Result<ValidValues, AttributeError> {
        let vv = match attr {
            FrameLockAttribute::Polarity => ValidValues::Range {
                min: POLARITY_RISING,
                max: POLARITY_BOTH,
            },
            FrameLockAttribute::SyncDelay => ValidValues::Range { min: 0, max: 2047 },
            FrameLockAttribute::HouseSync if self.house_sync_capable => ValidValues::Boolean,
            FrameLockAttribute::HouseSync => {
                return Err(AttributeError::NotSupported("house-sync"));
            }
        };
        Ok(vv)
    }

    pub fn get(&self, attr: FrameLockAttribute) -> Result<i64, AttributeError> {
        self.valid_values(attr)?;
        let v = match attr {
            FrameLockAttribute::Polarity => self.polarity,
            FrameLockAttribute::SyncDelay => self.sync_delay,
            FrameLockAttribute::HouseSync => self.house_sync as i64,
        };
        Ok(v)
    }

    pub fn set(&mut self, attr: FrameLockAttribute, value: i64) -> Result<bool, AttributeError> {
        if !self.valid_values(attr)?.contains(value) {
            return Err(AttributeError::InvalidValue("framelock", value));
        }
        let old = self.get(attr)?;
        match attr {
            FrameLockAttribute::Polarity => self.polarity = value,
            FrameLockAttribute::SyncDelay => self.sync_delay = value,
            FrameLockAttribute::HouseSync => self.house_sync = value != 0,
        }
        Ok(old != value)
    }
}
