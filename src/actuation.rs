//! Actuation driver
//!
//! Maps command targets onto the two DAC channels and the output relay.
//! Every path that is not an enabled, fault-free command lands on the
//! neutral output for the current mode.

use crate::config::{analog, OperatingMode};

/// Output stage abstraction
///
/// Hides the DAC and relay GPIO so the mapping can be exercised without
/// hardware.
pub trait AnalogOutputs {
    /// Write both DAC channels (12-bit, right aligned)
    fn write_dac(&mut self, dac0: u16, dac1: u16);

    /// Close (`true`) or open the relay routing the DAC to the actuator
    fn set_relay(&mut self, closed: bool);
}

/// Values last written to the output stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActuationOutput {
    pub dac: [u16; 2],
    pub relay: bool,
}

impl ActuationOutput {
    pub const fn centered() -> Self {
        Self {
            dac: [analog::MIDPOINT, analog::MIDPOINT],
            relay: false,
        }
    }

    /// Neutral output for `mode`
    ///
    /// The pedal interceptor passes the sensor values straight through, so
    /// its neutral output is the current sensor pair.
    pub fn neutral(mode: OperatingMode, sensors: [u16; 2]) -> Self {
        match mode {
            OperatingMode::GasPedal => Self {
                dac: sensors.map(|v| clamp_dac(v as i32)),
                relay: false,
            },
            OperatingMode::Differential | OperatingMode::Unconfigured => Self::centered(),
        }
    }

    /// Output for an enabled command
    pub fn driven(mode: OperatingMode, target0: i16, target1: i16, sensors: [u16; 2]) -> Self {
        match mode {
            OperatingMode::Differential => {
                let mid = analog::MIDPOINT as i32;
                Self {
                    dac: [
                        clamp_dac(mid - target0 as i32),
                        clamp_dac(mid + target0 as i32),
                    ],
                    relay: true,
                }
            }
            OperatingMode::GasPedal => Self {
                dac: [clamp_dac(target0 as i32), clamp_dac(target1 as i32)],
                relay: true,
            },
            OperatingMode::Unconfigured => Self::neutral(mode, sensors),
        }
    }
}

impl Default for ActuationOutput {
    fn default() -> Self {
        Self::centered()
    }
}

fn clamp_dac(value: i32) -> u16 {
    value.clamp(0, analog::MAX_VALUE as i32) as u16
}

/// Owner of the output stage
pub struct ActuationDriver {
    output: ActuationOutput,
    enabled: bool,
}

impl ActuationDriver {
    pub const fn new() -> Self {
        Self {
            output: ActuationOutput::centered(),
            enabled: false,
        }
    }

    /// Drive the outputs for this tick
    ///
    /// `enabled` must already reflect the fault state; when it is false the
    /// targets are ignored entirely.
    pub fn drive(
        &mut self,
        hw: &mut impl AnalogOutputs,
        mode: OperatingMode,
        target0: i16,
        target1: i16,
        enabled: bool,
        sensors: [u16; 2],
    ) -> ActuationOutput {
        let output = if enabled && mode != OperatingMode::Unconfigured {
            ActuationOutput::driven(mode, target0, target1, sensors)
        } else {
            ActuationOutput::neutral(mode, sensors)
        };
        self.apply(hw, output);
        self.enabled = output.relay;
        output
    }

    /// Force the neutral output immediately
    pub fn neutral(&mut self, hw: &mut impl AnalogOutputs, mode: OperatingMode, sensors: [u16; 2]) {
        self.apply(hw, ActuationOutput::neutral(mode, sensors));
        self.enabled = false;
    }

    fn apply(&mut self, hw: &mut impl AnalogOutputs, output: ActuationOutput) {
        // Open the relay before moving the DAC, close it after
        if !output.relay {
            hw.set_relay(false);
        }
        hw.write_dac(output.dac[0], output.dac[1]);
        if output.relay {
            hw.set_relay(true);
        }
        self.output = output;
    }

    pub fn output(&self) -> ActuationOutput {
        self.output
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for ActuationDriver {
    fn default() -> Self {
        Self::new()
    }
}
