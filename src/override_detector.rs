//! Manual override detection
//!
//! The operator pushing against the actuator shows up as a large
//! difference between the two sensor channels.

use crate::fmt::*;

/// Result of one override evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OverrideReading {
    /// |adc0 - adc1|
    pub magnitude: u16,
    /// Flag as reported in the status frame
    pub active: bool,
}

pub struct OverrideDetector {
    latched: bool,
}

impl OverrideDetector {
    pub const fn new() -> Self {
        Self { latched: false }
    }

    /// Evaluate one pair of samples
    ///
    /// Without `latch` the flag is recomputed every tick. With `latch` it
    /// stays set once asserted until [`OverrideDetector::acknowledge`].
    pub fn evaluate(&mut self, adc0: u16, adc1: u16, threshold: u16, latch: bool) -> OverrideReading {
        let magnitude = adc0.abs_diff(adc1);
        let instantaneous = magnitude > threshold;

        if latch {
            if instantaneous && !self.latched {
                debug!("Override latched (mag={})", magnitude);
            }
            self.latched |= instantaneous;
        } else {
            self.latched = false;
        }

        OverrideReading {
            magnitude,
            active: instantaneous || self.latched,
        }
    }

    /// Clear a latched flag (valid command with `enable=false`)
    pub fn acknowledge(&mut self) {
        self.latched = false;
    }
}

impl Default for OverrideDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_above_threshold() {
        let mut detector = OverrideDetector::new();
        let reading = detector.evaluate(2200, 1800, 336, false);
        assert_eq!(reading.magnitude, 400);
        assert!(reading.active);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut detector = OverrideDetector::new();
        assert!(!detector.evaluate(1336, 1000, 336, false).active);
        assert!(detector.evaluate(1337, 1000, 336, false).active);
    }

    #[test]
    fn test_instantaneous_by_default() {
        let mut detector = OverrideDetector::new();
        assert!(detector.evaluate(1800, 2200, 336, false).active);
        assert!(!detector.evaluate(1538, 1579, 336, false).active);
    }

    #[test]
    fn test_latch_until_acknowledged() {
        let mut detector = OverrideDetector::new();
        assert!(detector.evaluate(2200, 1800, 336, true).active);

        let reading = detector.evaluate(1538, 1579, 336, true);
        assert_eq!(reading.magnitude, 41);
        assert!(reading.active);

        detector.acknowledge();
        assert!(!detector.evaluate(1538, 1579, 336, true).active);
    }
}
