//! Fault state machine
//!
//! Holds the single authoritative system state. The state is recomputed
//! from scratch every tick from the current fault conditions, so a
//! condition that clears lets the state fall back to `NoFault` on the next
//! tick without an explicit reset.

use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::fmt::*;

/// System state, as carried in the high nibble of status byte 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FaultState {
    NoFault = 0,
    BadChecksum = 1,
    Send = 2,
    Sce = 3,
    Startup = 4,
    Timeout = 5,
    Sensor = 6,
    InvalidChecksum = 7,
    AdcUnconfigured = 8,
    TimeoutVss = 9,
}

impl FaultState {
    /// Wire name used by the monitoring tools
    pub const fn name(self) -> &'static str {
        match self {
            FaultState::NoFault => "NO_FAULT",
            FaultState::BadChecksum => "FAULT_BAD_CHECKSUM",
            FaultState::Send => "FAULT_SEND",
            FaultState::Sce => "FAULT_SCE",
            FaultState::Startup => "FAULT_STARTUP",
            FaultState::Timeout => "FAULT_TIMEOUT",
            FaultState::Sensor => "FAULT_SENSOR",
            FaultState::InvalidChecksum => "FAULT_INVALID_CKSUM",
            FaultState::AdcUnconfigured => "FAULT_ADC_UNCONFIGURED",
            FaultState::TimeoutVss => "FAULT_TIMEOUT_VSS",
        }
    }

    pub const fn is_fault(self) -> bool {
        !matches!(self, FaultState::NoFault)
    }
}

impl Default for FaultState {
    fn default() -> Self {
        FaultState::Startup
    }
}

impl fmt::Display for FaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Last rejected frame on the command ID, until a valid one replaces it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameFault {
    /// Well-formed command, checksum mismatch
    BadChecksum,
    /// Wrong length or unrecognised 8-byte payload
    Malformed,
}

/// Every condition the state machine reconciles in one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultInputs {
    pub adc_unconfigured: bool,
    pub sensor_invalid: bool,
    pub bus_error: bool,
    pub send_failed: bool,
    pub vss_timeout: bool,
    pub frame_fault: Option<FrameFault>,
    /// At least one valid command has been accepted since boot
    pub command_seen: bool,
    /// No valid command within the timeout, counted from boot until the
    /// first one arrives
    pub command_timeout: bool,
}

impl FaultInputs {
    /// Resolve the inputs to one state; the first matching condition wins.
    pub fn resolve(&self) -> FaultState {
        if self.adc_unconfigured {
            FaultState::AdcUnconfigured
        } else if self.sensor_invalid {
            FaultState::Sensor
        } else if self.bus_error {
            FaultState::Sce
        } else if self.send_failed {
            FaultState::Send
        } else if self.vss_timeout {
            FaultState::TimeoutVss
        } else if self.command_timeout {
            FaultState::Timeout
        } else if let Some(frame_fault) = self.frame_fault {
            match frame_fault {
                FrameFault::Malformed => FaultState::InvalidChecksum,
                FrameFault::BadChecksum => FaultState::BadChecksum,
            }
        } else if !self.command_seen {
            FaultState::Startup
        } else {
            FaultState::NoFault
        }
    }
}

/// Owner of the authoritative [`FaultState`]
pub struct FaultStateMachine {
    state: FaultState,
    transitions: u32,
}

impl FaultStateMachine {
    /// Start in `Startup`
    pub const fn new() -> Self {
        Self {
            state: FaultState::Startup,
            transitions: 0,
        }
    }

    /// Re-evaluate the state for this tick
    ///
    /// # Returns
    /// The state in force for the rest of the tick.
    pub fn update(&mut self, inputs: &FaultInputs) -> FaultState {
        let next = inputs.resolve();
        if next != self.state {
            if next.is_fault() {
                warn!("State {} -> {}", self.state.name(), next.name());
            } else {
                info!("State {} -> {}", self.state.name(), next.name());
            }
            self.state = next;
            self.transitions = self.transitions.wrapping_add(1);
        }
        self.state
    }

    pub fn state(&self) -> FaultState {
        self.state
    }

    /// Actuation may only be enabled while no fault holds
    pub fn actuation_allowed(&self) -> bool {
        self.state == FaultState::NoFault
    }

    /// Number of state changes since boot
    pub fn transitions(&self) -> u32 {
        self.transitions
    }
}

impl Default for FaultStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> FaultInputs {
        FaultInputs {
            command_seen: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_initial_state_is_startup() {
        let fsm = FaultStateMachine::new();
        assert_eq!(fsm.state(), FaultState::Startup);
        assert!(!fsm.actuation_allowed());
    }

    #[test]
    fn test_startup_until_first_command() {
        let mut fsm = FaultStateMachine::new();
        assert_eq!(fsm.update(&FaultInputs::default()), FaultState::Startup);
        assert_eq!(fsm.update(&healthy()), FaultState::NoFault);
        assert!(fsm.actuation_allowed());
    }

    #[test]
    fn test_startup_expires_into_timeout() {
        let silent = FaultInputs {
            command_timeout: true,
            ..Default::default()
        };
        assert_eq!(silent.resolve(), FaultState::Timeout);

        let rejected_only = FaultInputs {
            frame_fault: Some(FrameFault::Malformed),
            ..Default::default()
        };
        assert_eq!(rejected_only.resolve(), FaultState::InvalidChecksum);
    }

    #[test]
    fn test_level_triggered_recovery() {
        let mut fsm = FaultStateMachine::new();
        fsm.update(&healthy());

        let sensor = FaultInputs {
            sensor_invalid: true,
            ..healthy()
        };
        assert_eq!(fsm.update(&sensor), FaultState::Sensor);
        assert!(!fsm.actuation_allowed());

        assert_eq!(fsm.update(&healthy()), FaultState::NoFault);
        assert_eq!(fsm.transitions(), 3);
    }

    #[test]
    fn test_precedence() {
        let all = FaultInputs {
            adc_unconfigured: true,
            sensor_invalid: true,
            bus_error: true,
            send_failed: true,
            vss_timeout: true,
            frame_fault: Some(FrameFault::Malformed),
            command_seen: false,
            command_timeout: true,
        };
        assert_eq!(all.resolve(), FaultState::AdcUnconfigured);

        let no_config = FaultInputs {
            adc_unconfigured: false,
            ..all
        };
        assert_eq!(no_config.resolve(), FaultState::Sensor);

        let checksum_only = FaultInputs {
            frame_fault: Some(FrameFault::BadChecksum),
            ..healthy()
        };
        assert_eq!(checksum_only.resolve(), FaultState::BadChecksum);

        let stale_checksum = FaultInputs {
            frame_fault: Some(FrameFault::BadChecksum),
            command_timeout: true,
            ..healthy()
        };
        assert_eq!(stale_checksum.resolve(), FaultState::Timeout);

        let malformed = FaultInputs {
            frame_fault: Some(FrameFault::Malformed),
            ..healthy()
        };
        assert_eq!(malformed.resolve(), FaultState::InvalidChecksum);

        let timeout = FaultInputs {
            command_timeout: true,
            ..healthy()
        };
        assert_eq!(timeout.resolve(), FaultState::Timeout);
    }

    #[test]
    fn test_transport_faults() {
        let sce = FaultInputs {
            bus_error: true,
            send_failed: true,
            ..healthy()
        };
        assert_eq!(sce.resolve(), FaultState::Sce);

        let send = FaultInputs {
            send_failed: true,
            ..healthy()
        };
        assert_eq!(send.resolve(), FaultState::Send);
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(u8::from(FaultState::NoFault), 0);
        assert_eq!(u8::from(FaultState::AdcUnconfigured), 8);
        assert_eq!(u8::from(FaultState::TimeoutVss), 9);
        assert_eq!(FaultState::try_from(7u8).ok(), Some(FaultState::InvalidChecksum));
        assert!(FaultState::try_from(10u8).is_err());
    }
}
