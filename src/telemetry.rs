//! Debug telemetry line
//!
//! Best-effort serial mirror of the status frame. Nothing reads it back.

use core::fmt::Write;

use heapless::String;

use crate::fault::FaultState;

/// Capacity of one formatted line
pub const LINE_CAPACITY: usize = 128;

pub type DebugLine = String<LINE_CAPACITY>;

/// Values carried by one debug line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DebugFields {
    pub adc: [u16; 2],
    pub dac: [u16; 2],
    pub relay: bool,
    pub state: FaultState,
    pub magnitude: u16,
    pub override_active: bool,
}

impl DebugFields {
    /// Render as `ADC0:%08x ADC1:%08x DAC0:%08x DAC1:%08x Relay:%08x State:%08x Mag:%08x Ovr:%08x\r\n`
    pub fn format(&self) -> Result<DebugLine, core::fmt::Error> {
        let mut line = DebugLine::new();
        write!(
            line,
            "ADC0:{:08x} ADC1:{:08x} DAC0:{:08x} DAC1:{:08x} Relay:{:08x} State:{:08x} Mag:{:08x} Ovr:{:08x}\r\n",
            self.adc[0],
            self.adc[1],
            self.dac[0],
            self.dac[1],
            self.relay as u32,
            u8::from(self.state),
            self.magnitude,
            self.override_active as u32,
        )?;
        Ok(line)
    }
}

/// Emits every `every`-th tick while debug output is enabled
pub struct DebugDecimator {
    every: u32,
    count: u32,
}

impl DebugDecimator {
    pub const fn new(every: u32) -> Self {
        Self {
            every: if every == 0 { 1 } else { every },
            count: 0,
        }
    }

    /// Advance by one tick
    ///
    /// # Returns
    /// `true` when a line is due this tick
    pub fn tick(&mut self, debug_level: u8) -> bool {
        if debug_level == 0 {
            self.count = 0;
            return false;
        }
        self.count += 1;
        if self.count >= self.every {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let fields = DebugFields {
            adc: [1538, 1579],
            dac: [1948, 2148],
            relay: true,
            state: FaultState::NoFault,
            magnitude: 41,
            override_active: false,
        };
        let line = fields.format().unwrap();
        assert_eq!(
            line.as_str(),
            "ADC0:00000602 ADC1:0000062b DAC0:0000079c DAC1:00000864 Relay:00000001 State:00000000 Mag:00000029 Ovr:00000000\r\n"
        );
    }

    #[test]
    fn test_worst_case_fits() {
        let fields = DebugFields {
            adc: [u16::MAX; 2],
            dac: [u16::MAX; 2],
            relay: true,
            state: FaultState::TimeoutVss,
            magnitude: u16::MAX,
            override_active: true,
        };
        assert!(fields.format().is_ok());
    }

    #[test]
    fn test_decimation() {
        let mut decimator = DebugDecimator::new(3);
        let due: [bool; 6] = core::array::from_fn(|_| decimator.tick(1));
        assert_eq!(due, [false, false, true, false, false, true]);
    }

    #[test]
    fn test_disabled_never_due() {
        let mut decimator = DebugDecimator::new(1);
        assert!((0..10).all(|_| !decimator.tick(0)));
        assert!(decimator.tick(2));
    }
}
