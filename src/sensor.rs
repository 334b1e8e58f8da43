//! Sensor sampling and validation
//!
//! Reads both analog channels once per tick and classifies each raw value
//! against its [`ValidationRange`].

use crate::config::{analog, OperatingMode, ValidationRange};
use crate::fmt::*;

/// Source of the two raw 12-bit samples
///
/// Implemented over the ADC by the firmware, and by fixed values in tests.
pub trait SensorInputs {
    fn read_pair(&mut self) -> [u16; 2];
}

/// One tick worth of sensor data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorReport {
    pub raw: [u16; 2],
    pub valid: [bool; 2],
}

impl SensorReport {
    pub fn all_valid(&self) -> bool {
        self.valid.iter().all(|v| *v)
    }
}

/// Per-channel classifier
///
/// Band mode keeps the previous verdict so the hysteresis margin only
/// applies to a channel that is currently valid.
pub struct SensorSampler {
    last_valid: [Option<bool>; 2],
}

impl SensorSampler {
    pub const fn new() -> Self {
        Self {
            last_valid: [None, None],
        }
    }

    /// Forget hysteresis history (called when the configuration changes)
    pub fn reset(&mut self) {
        self.last_valid = [None, None];
    }

    /// Read both channels from `inputs` and classify them
    pub fn sample(
        &mut self,
        inputs: &mut impl SensorInputs,
        mode: OperatingMode,
        ranges: &[Option<ValidationRange>; 2],
    ) -> SensorReport {
        let raw = inputs.read_pair().map(|v| v.min(analog::MAX_VALUE));
        self.classify(raw, mode, ranges)
    }

    /// Classify already-sampled values
    pub fn classify(
        &mut self,
        raw: [u16; 2],
        mode: OperatingMode,
        ranges: &[Option<ValidationRange>; 2],
    ) -> SensorReport {
        let mut valid = [true; 2];
        for ch in 0..2 {
            let verdict = match ranges[ch] {
                Some(range) if range.enabled => match mode {
                    OperatingMode::Differential => within_center(raw[ch], &range),
                    OperatingMode::GasPedal => within_band(raw[ch], &range, self.last_valid[ch]),
                    OperatingMode::Unconfigured => true,
                },
                _ => true,
            };

            if self.last_valid[ch] == Some(true) && !verdict {
                debug!("ADC{} out of range: {}", ch, raw[ch]);
            }
            self.last_valid[ch] = Some(verdict);
            valid[ch] = verdict;
        }

        SensorReport { raw, valid }
    }
}

impl Default for SensorSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn within_center(raw: u16, range: &ValidationRange) -> bool {
    raw.abs_diff(range.center_or_max) <= range.tolerance
}

fn within_band(raw: u16, range: &ValidationRange, was_valid: Option<bool>) -> bool {
    let (min, max) = (range.unused_or_min, range.center_or_max);
    if was_valid == Some(true) {
        raw >= min.saturating_sub(range.tolerance) && raw <= max.saturating_add(range.tolerance)
    } else {
        raw >= min && raw <= max
    }
}
