//! Configuration module
//!
//! Device configuration as written by the external configuration tool,
//! its default parameters, and the persisted byte record.

pub mod params;
pub mod storage;

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub use params::*;
pub use storage::{ConfigCrc, ConfigError, StoredConfig};

use crate::can_protocol::can_ids;

/// Operating submode selected by the configuration record
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OperatingMode {
    /// No configuration committed; forces `FAULT_ADC_UNCONFIGURED`
    Unconfigured = 0,
    /// Torque interceptor: two opposed sensors, differential drive
    Differential = 1,
    /// Pedal interceptor: two tracking sensors, direct drive
    GasPedal = 2,
}

/// Per-channel validation window
///
/// In [`OperatingMode::Differential`] the first field is the center and the
/// channel is valid while `|raw - center| <= tolerance`. In
/// [`OperatingMode::GasPedal`] the fields are a max/min band, with
/// `tolerance` used as hysteresis around the band edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ValidationRange {
    pub center_or_max: u16,
    pub unused_or_min: u16,
    pub tolerance: u16,
    /// Validation disabled ⇒ the channel is always valid
    pub enabled: bool,
}

impl ValidationRange {
    /// Center/tolerance window (differential mode)
    pub const fn centered(center: u16, tolerance: u16) -> Self {
        Self {
            center_or_max: center,
            unused_or_min: 0,
            tolerance,
            enabled: true,
        }
    }

    /// Min/max band with hysteresis (gas pedal mode)
    pub const fn band(min: u16, max: u16, hysteresis: u16) -> Self {
        Self {
            center_or_max: max,
            unused_or_min: min,
            tolerance: hysteresis,
            enabled: true,
        }
    }

    /// Committed range with validation switched off
    pub const fn disabled() -> Self {
        Self {
            center_or_max: 0,
            unused_or_min: 0,
            tolerance: 0,
            enabled: false,
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// 0 = no debug line, >0 = debug line on the telemetry UART
    pub debug_level: u8,
    /// Transmit status frames
    pub can_output_enable: bool,
    /// Raise `FAULT_TIMEOUT` on command staleness
    pub watchdog_enable: bool,
    pub mode: OperatingMode,
    pub override_threshold: u16,
    /// Hold the override flag until a disable command acknowledges it
    pub override_latch: bool,
    /// Every channel must have a committed [`ValidationRange`]
    pub validation_required: bool,
    /// CAN ID of the vehicle speed message to supervise (0 = not supervised)
    pub vss_can_id: u16,
    pub ranges: [Option<ValidationRange>; 2],
}

impl DeviceConfig {
    /// Configuration before anything has been committed
    pub const fn unconfigured() -> Self {
        Self {
            debug_level: 0,
            can_output_enable: true,
            watchdog_enable: true,
            mode: OperatingMode::Unconfigured,
            override_threshold: DEFAULT_OVERRIDE_THRESHOLD,
            override_latch: false,
            validation_required: true,
            vss_can_id: 0,
            ranges: [None, None],
        }
    }

    /// Differential mode with the given center/tolerance windows
    pub const fn differential(range0: ValidationRange, range1: ValidationRange) -> Self {
        let mut config = Self::unconfigured();
        config.mode = OperatingMode::Differential;
        config.ranges = [Some(range0), Some(range1)];
        config
    }

    /// Gas pedal mode with the given bands
    pub const fn gas_pedal(range0: ValidationRange, range1: ValidationRange) -> Self {
        let mut config = Self::unconfigured();
        config.mode = OperatingMode::GasPedal;
        config.ranges = [Some(range0), Some(range1)];
        config
    }

    /// True when the record cannot drive the sensors yet
    pub fn adc_unconfigured(&self) -> bool {
        self.mode == OperatingMode::Unconfigured
            || (self.validation_required && self.ranges.iter().any(Option::is_none))
    }

    /// CAN ID for status frames in the current mode
    pub fn status_can_id(&self) -> Option<u16> {
        match self.mode {
            OperatingMode::Differential => Some(can_ids::STATUS_DIFFERENTIAL),
            OperatingMode::GasPedal => Some(can_ids::STATUS_GAS_PEDAL),
            OperatingMode::Unconfigured => None,
        }
    }

    /// Supervised vehicle speed message, if any
    pub fn vss_id(&self) -> Option<u16> {
        (self.vss_can_id != 0).then_some(self.vss_can_id)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::unconfigured()
    }
}
