//! Command freshness watchdog
//!
//! Counts control ticks since the last accepted frame. The threshold is a
//! tick count, so it has to be rescaled with [`scale_ticks`] whenever the
//! tick rate differs from [`DEFAULT_TICK_HZ`].

use crate::config::{scale_ticks, DEFAULT_COMMAND_TIMEOUT_TICKS, DEFAULT_TICK_HZ};
use crate::fmt::*;

/// 4-bit rolling sequence counter
const COUNTER_MODULO: u8 = 16;

pub struct CommandWatchdog {
    cycles_since_valid: u32,
    timeout_ticks: u32,
    fed: bool,
    last_counter: Option<u8>,
    counter_jumps: u32,
}

impl CommandWatchdog {
    /// Watchdog expiring after `timeout_ticks` ticks without a valid frame
    pub const fn new(timeout_ticks: u32) -> Self {
        Self {
            cycles_since_valid: 0,
            timeout_ticks,
            fed: false,
            last_counter: None,
            counter_jumps: 0,
        }
    }

    /// Default command timeout at `tick_hz`
    pub const fn for_tick_rate(tick_hz: u32) -> Self {
        Self::new(scale_ticks(DEFAULT_COMMAND_TIMEOUT_TICKS, tick_hz))
    }

    /// Advance by one tick
    ///
    /// # Returns
    /// `true` while timed out
    pub fn tick(&mut self) -> bool {
        self.cycles_since_valid = self.cycles_since_valid.saturating_add(1);
        self.is_timed_out()
    }

    /// Record an accepted frame
    ///
    /// `counter` is the frame's sequence counter when it carries one. A
    /// counter that is not the previous one plus one (mod 16) is only
    /// counted, it does not affect the timeout.
    pub fn feed(&mut self, counter: Option<u8>) {
        self.cycles_since_valid = 0;
        self.fed = true;

        if let Some(counter) = counter {
            let counter = counter % COUNTER_MODULO;
            if let Some(last) = self.last_counter {
                let expected = (last + 1) % COUNTER_MODULO;
                if counter != expected {
                    self.counter_jumps = self.counter_jumps.wrapping_add(1);
                    debug!("Counter jump: expected {}, got {}", expected, counter);
                }
            }
            self.last_counter = Some(counter);
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.cycles_since_valid >= self.timeout_ticks
    }

    /// At least one frame has been accepted since construction
    pub fn has_been_fed(&self) -> bool {
        self.fed
    }

    pub fn cycles_since_valid(&self) -> u32 {
        self.cycles_since_valid
    }

    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    pub fn last_counter(&self) -> Option<u8> {
        self.last_counter
    }

    /// Non-sequential counters seen since construction
    pub fn counter_jumps(&self) -> u32 {
        self.counter_jumps
    }
}

impl Default for CommandWatchdog {
    fn default() -> Self {
        Self::for_tick_rate(DEFAULT_TICK_HZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_after_threshold() {
        let mut wd = CommandWatchdog::default();
        assert_eq!(wd.timeout_ticks(), 700);

        for _ in 0..699 {
            assert!(!wd.tick());
        }
        assert!(wd.tick());
        assert!(wd.tick());
        assert_eq!(wd.cycles_since_valid(), 701);
    }

    #[test]
    fn test_feed_resets() {
        let mut wd = CommandWatchdog::new(10);
        for _ in 0..10 {
            wd.tick();
        }
        assert!(wd.is_timed_out());

        wd.feed(Some(0));
        assert!(!wd.is_timed_out());
        assert_eq!(wd.cycles_since_valid(), 0);
        assert!(wd.has_been_fed());
    }

    #[test]
    fn test_scaled_rate() {
        let wd = CommandWatchdog::for_tick_rate(366);
        assert_eq!(wd.timeout_ticks(), 350);
    }

    #[test]
    fn test_sequential_counters_wrap() {
        let mut wd = CommandWatchdog::default();
        for i in 0..40u8 {
            wd.feed(Some(i % 16));
        }
        assert_eq!(wd.counter_jumps(), 0);
        assert_eq!(wd.last_counter(), Some(39 % 16));
    }

    #[test]
    fn test_counter_jump_is_counted_only() {
        let mut wd = CommandWatchdog::new(5);
        wd.feed(Some(3));
        wd.feed(Some(5));
        wd.feed(Some(5));
        assert_eq!(wd.counter_jumps(), 2);
        assert!(!wd.is_timed_out());
    }

    #[test]
    fn test_feed_without_counter() {
        let mut wd = CommandWatchdog::new(5);
        wd.feed(None);
        wd.feed(None);
        assert_eq!(wd.counter_jumps(), 0);
        assert_eq!(wd.last_counter(), None);
    }
}
