//! Tick-level orchestration
//!
//! [`Controller`] owns every component and the authoritative state. The
//! tick scheduler owns the controller; nothing else mutates it.
//!
//! One tick runs sense → decide → actuate:
//! 1. apply a staged configuration
//! 2. sample and validate both sensors, evaluate override
//! 3. advance the command and vehicle speed watchdogs
//! 4. resolve the fault state
//! 5. drive the outputs (neutral unless `NoFault` and the command enables)
//! 6. publish a status snapshot for the transmit path

use embedded_can::Frame;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::actuation::{ActuationDriver, ActuationOutput, AnalogOutputs};
use crate::can_protocol::{
    can_ids, decode_command, encode_status, Command, CommandFrame, DecodeError, RawFrame,
    SpecialCommand, StatusFrame, STATUS_LEN,
};
use crate::config::{
    scale_ticks, DeviceConfig, DEFAULT_DEBUG_DECIMATION, DEFAULT_VSS_TIMEOUT_TICKS,
};
use crate::fault::{FaultInputs, FaultState, FaultStateMachine, FrameFault};
use crate::fmt::*;
use crate::override_detector::{OverrideDetector, OverrideReading};
use crate::sensor::{SensorInputs, SensorReport, SensorSampler};
use crate::state::{FrameMailbox, StatusSnapshot, TransportHealth};
use crate::telemetry::{DebugDecimator, DebugFields};
use crate::watchdog::CommandWatchdog;

/// Events the surrounding firmware has to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerEvent {
    /// Leave the application; outputs are already neutral
    EnterBootloader(SpecialCommand),
}

/// Counters for diagnostics only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    /// Non-sequential command counters
    pub counter_jumps: u32,
    pub frames_accepted: u32,
    pub frames_rejected: u32,
    pub ticks: u32,
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub state: FaultState,
    pub sensors: SensorReport,
    pub override_reading: OverrideReading,
    pub output: ActuationOutput,
    pub snapshot: StatusSnapshot,
    /// Debug line fields when one is due this tick
    pub debug: Option<DebugFields>,
}

pub struct Controller {
    config: DeviceConfig,
    staged: Option<DeviceConfig>,
    tick_hz: u32,
    sampler: SensorSampler,
    override_detector: OverrideDetector,
    actuation: ActuationDriver,
    watchdog: CommandWatchdog,
    vss_watchdog: CommandWatchdog,
    fsm: FaultStateMachine,
    /// Last accepted command (authoritative control input)
    command: CommandFrame,
    frame_fault: Option<FrameFault>,
    bootloader: Option<SpecialCommand>,
    decimator: DebugDecimator,
    diagnostics: Diagnostics,
    last_sensors: [u16; 2],
    /// Supervised ID has to be pushed to the mailbox
    watch_dirty: bool,
}

impl Controller {
    /// Controller running `config` at `tick_hz`
    pub fn new(config: DeviceConfig, tick_hz: u32) -> Self {
        info!(
            "Controller: mode={}, tick={}Hz",
            u8::from(config.mode),
            tick_hz
        );
        Self {
            config,
            staged: None,
            tick_hz,
            sampler: SensorSampler::new(),
            override_detector: OverrideDetector::new(),
            actuation: ActuationDriver::new(),
            watchdog: CommandWatchdog::for_tick_rate(tick_hz),
            vss_watchdog: CommandWatchdog::new(scale_ticks(DEFAULT_VSS_TIMEOUT_TICKS, tick_hz)),
            fsm: FaultStateMachine::new(),
            command: CommandFrame::neutral(),
            frame_fault: None,
            bootloader: None,
            decimator: DebugDecimator::new(scale_ticks(DEFAULT_DEBUG_DECIMATION, tick_hz)),
            diagnostics: Diagnostics::default(),
            last_sensors: [0, 0],
            watch_dirty: true,
        }
    }

    /// Replace the configuration at the start of the next tick
    pub fn stage_config(&mut self, config: DeviceConfig) {
        self.staged = Some(config);
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Route one received frame by its ID
    ///
    /// Frames that are neither commands nor the supervised vehicle speed
    /// message are ignored.
    pub fn on_frame(&mut self, frame: &impl Frame) -> Option<ControllerEvent> {
        let raw = RawFrame::from_frame(frame)?;
        let id = raw.standard_id()?;

        if id == can_ids::COMMAND {
            self.handle_command(raw.data())
        } else {
            if self.config.vss_id() == Some(id) {
                self.vss_watchdog.feed(None);
            }
            None
        }
    }

    /// Drain the receive-side mailbox
    ///
    /// Frames arrive decoded. The last valid command is applied first, then
    /// a rejection received after it.
    pub fn poll_mailbox<M: RawMutex>(&mut self, mailbox: &FrameMailbox<M>) -> Option<ControllerEvent> {
        if self.watch_dirty {
            mailbox.watch(self.config.vss_id());
            self.watch_dirty = false;
        }
        if mailbox.take_watched() {
            self.vss_watchdog.feed(None);
        }

        let pending = mailbox.take_commands();
        if let Some(cmd) = pending.command {
            self.accept(cmd);
        }
        if let Some(e) = pending.rejected {
            self.reject(e);
        }
        self.diagnostics.frames_rejected = self
            .diagnostics
            .frames_rejected
            .wrapping_add(pending.rejections);
        pending.directive.map(|kind| self.request_bootloader(kind))
    }

    fn handle_command(&mut self, data: &[u8]) -> Option<ControllerEvent> {
        match decode_command(data) {
            Ok(Command::Special(kind)) => Some(self.request_bootloader(kind)),
            Ok(Command::Control(cmd)) => {
                self.accept(cmd);
                None
            }
            Err(e) => {
                self.reject(e);
                self.diagnostics.frames_rejected = self.diagnostics.frames_rejected.wrapping_add(1);
                None
            }
        }
    }

    fn request_bootloader(&mut self, kind: SpecialCommand) -> ControllerEvent {
        warn!("Bootloader requested: {}", kind);
        self.bootloader = Some(kind);
        ControllerEvent::EnterBootloader(kind)
    }

    fn accept(&mut self, cmd: CommandFrame) {
        self.watchdog.feed(Some(cmd.counter));
        self.frame_fault = None;
        if !cmd.enable {
            self.override_detector.acknowledge();
        }
        self.command = cmd;
        self.diagnostics.frames_accepted = self.diagnostics.frames_accepted.wrapping_add(1);
    }

    /// Dropped: neither the watchdog nor the command register move
    fn reject(&mut self, e: DecodeError) {
        debug!("Command dropped: {}", e);
        self.frame_fault = Some(if e.is_malformed() {
            FrameFault::Malformed
        } else {
            FrameFault::BadChecksum
        });
    }

    /// Put the outputs into the neutral position right away
    ///
    /// Pass-through neutral uses the values sampled on the last tick.
    pub fn force_neutral(&mut self, outputs: &mut impl AnalogOutputs) {
        self.actuation.neutral(outputs, self.config.mode, self.last_sensors);
    }

    /// Run one control tick
    pub fn tick(
        &mut self,
        inputs: &mut impl SensorInputs,
        health: TransportHealth,
        outputs: &mut impl AnalogOutputs,
    ) -> TickReport {
        if let Some(config) = self.staged.take() {
            self.apply_config(config);
        }

        let config = self.config;
        let sensors = self.sampler.sample(inputs, config.mode, &config.ranges);
        self.last_sensors = sensors.raw;
        let override_reading = self.override_detector.evaluate(
            sensors.raw[0],
            sensors.raw[1],
            config.override_threshold,
            config.override_latch,
        );

        let command_timeout = self.watchdog.tick() && config.watchdog_enable;
        let vss_timeout = match config.vss_id() {
            Some(_) => {
                let stale = self.vss_watchdog.tick();
                stale || !self.vss_watchdog.has_been_fed()
            }
            None => false,
        };

        let state = self.fsm.update(&FaultInputs {
            adc_unconfigured: config.adc_unconfigured(),
            sensor_invalid: !sensors.all_valid(),
            bus_error: health.bus_error,
            send_failed: health.send_failed,
            vss_timeout,
            frame_fault: self.frame_fault,
            command_seen: self.watchdog.has_been_fed(),
            command_timeout,
        });

        let enabled = self.fsm.actuation_allowed() && self.command.enable && self.bootloader.is_none();
        let output = self.actuation.drive(
            outputs,
            config.mode,
            self.command.target0,
            self.command.target1,
            enabled,
            sensors.raw,
        );

        let snapshot = StatusSnapshot {
            adc: sensors.raw,
            override_active: override_reading.active,
            state,
            status_id: if config.can_output_enable {
                config.status_can_id()
            } else {
                None
            },
            output,
            tick: self.diagnostics.ticks,
        };

        let debug = self.decimator.tick(config.debug_level).then_some(DebugFields {
            adc: sensors.raw,
            dac: output.dac,
            relay: output.relay,
            state,
            magnitude: override_reading.magnitude,
            override_active: override_reading.active,
        });

        self.diagnostics.ticks = self.diagnostics.ticks.wrapping_add(1);
        self.diagnostics.counter_jumps = self.watchdog.counter_jumps();

        TickReport {
            state,
            sensors,
            override_reading,
            output,
            snapshot,
            debug,
        }
    }

    fn apply_config(&mut self, config: DeviceConfig) {
        info!(
            "Config applied: mode={}, threshold={}",
            u8::from(config.mode),
            config.override_threshold
        );
        if config.vss_id() != self.config.vss_id() {
            self.vss_watchdog = CommandWatchdog::new(scale_ticks(DEFAULT_VSS_TIMEOUT_TICKS, self.tick_hz));
            self.watch_dirty = true;
        }
        if config.mode != self.config.mode || config.ranges != self.config.ranges {
            self.sampler.reset();
        }
        self.override_detector.acknowledge();
        self.config = config;
    }

    pub fn state(&self) -> FaultState {
        self.fsm.state()
    }

    /// Authoritative command (neutral until the first valid frame)
    pub fn command(&self) -> &CommandFrame {
        &self.command
    }

    pub fn output(&self) -> ActuationOutput {
        self.actuation.output()
    }

    pub fn actuation_enabled(&self) -> bool {
        self.actuation.is_enabled()
    }

    pub fn bootloader_requested(&self) -> Option<SpecialCommand> {
        self.bootloader
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }
}

/// Builds status frames with the rolling 4-bit packet index
///
/// The index advances only when a frame has actually been handed to the
/// bus, independent of the state it carries.
pub struct StatusTransmitter {
    index: u8,
}

impl StatusTransmitter {
    pub const fn new() -> Self {
        Self { index: 0 }
    }

    /// Frame for `snapshot` with the current index
    ///
    /// # Returns
    /// `None` when status output is disabled or the mode has no status ID
    pub fn prepare(&self, snapshot: &StatusSnapshot) -> Option<(u16, [u8; STATUS_LEN])> {
        let id = snapshot.status_id?;
        let frame = StatusFrame::new(
            snapshot.adc[0],
            snapshot.adc[1],
            snapshot.override_active,
            snapshot.state,
            self.index,
        );
        Some((id, encode_status(&frame)))
    }

    /// The prepared frame was transmitted
    pub fn commit(&mut self) {
        self.index = (self.index + 1) & 0x0F;
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}

impl Default for StatusTransmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embedded_can::StandardId;

    use crate::can_protocol::{decode_status, encode_command};
    use crate::config::ValidationRange;

    struct Fixed([u16; 2]);

    impl SensorInputs for Fixed {
        fn read_pair(&mut self) -> [u16; 2] {
            self.0
        }
    }

    #[derive(Default)]
    struct Outputs {
        dac: [u16; 2],
        relay: bool,
    }

    impl AnalogOutputs for Outputs {
        fn write_dac(&mut self, dac0: u16, dac1: u16) {
            self.dac = [dac0, dac1];
        }

        fn set_relay(&mut self, closed: bool) {
            self.relay = closed;
        }
    }

    fn frame(id: u16, data: &[u8]) -> RawFrame {
        RawFrame::new(StandardId::new(id).unwrap(), data).unwrap()
    }

    fn differential() -> DeviceConfig {
        DeviceConfig::differential(
            ValidationRange::centered(1538, 125),
            ValidationRange::centered(1579, 100),
        )
    }

    #[test]
    fn test_bad_checksum_does_not_feed_watchdog() {
        let mut ctrl = Controller::new(differential(), 732);
        let mut out = Outputs::default();
        let mut data = encode_command(100, -100, true, 0);
        data[0] ^= 0xFF;

        assert_eq!(ctrl.on_frame(&frame(0x300, &data)), None);
        let report = ctrl.tick(&mut Fixed([1538, 1579]), TransportHealth::default(), &mut out);

        assert_eq!(report.state, FaultState::BadChecksum);
        assert_eq!(*ctrl.command(), CommandFrame::neutral());
        assert_eq!(ctrl.diagnostics().frames_rejected, 1);
        assert!(!out.relay);
    }

    #[test]
    fn test_corrupt_frame_after_valid_in_same_tick() {
        let mut ctrl = Controller::new(differential(), 732);
        let mailbox = FrameMailbox::<NoopRawMutex>::new();
        let mut out = Outputs::default();
        let mut corrupt = encode_command(0, 0, true, 1);
        corrupt[1] ^= 0x40;

        mailbox.post(&frame(0x300, &encode_command(100, -100, true, 0)));
        mailbox.post(&frame(0x300, &corrupt));
        assert_eq!(ctrl.poll_mailbox(&mailbox), None);
        let report = ctrl.tick(&mut Fixed([1538, 1579]), TransportHealth::default(), &mut out);

        assert_eq!(ctrl.command().target0, 100);
        assert_eq!(ctrl.diagnostics().frames_accepted, 1);
        assert_eq!(ctrl.diagnostics().frames_rejected, 1);
        assert_eq!(report.state, FaultState::BadChecksum);
        assert!(!out.relay);
    }

    #[test]
    fn test_corrupt_frame_then_silence_times_out() {
        let mut ctrl = Controller::new(differential(), 732);
        let mut out = Outputs::default();
        let mut sensors = Fixed([1538, 1579]);

        ctrl.on_frame(&frame(0x300, &encode_command(0, 0, false, 0)));
        ctrl.tick(&mut sensors, TransportHealth::default(), &mut out);

        let mut corrupt = encode_command(0, 0, false, 1);
        corrupt[0] ^= 0xFF;
        ctrl.on_frame(&frame(0x300, &corrupt));

        let states: Vec<_> = (0..2000)
            .map(|_| ctrl.tick(&mut sensors, TransportHealth::default(), &mut out).state)
            .collect();
        assert_eq!(states[0], FaultState::BadChecksum);
        assert_eq!(states[697], FaultState::BadChecksum);
        assert!(states[698..].iter().all(|s| *s == FaultState::Timeout));
    }

    #[test]
    fn test_bootloader_directive_through_mailbox() {
        let mut ctrl = Controller::new(differential(), 732);
        let mailbox = FrameMailbox::<NoopRawMutex>::new();
        mailbox.post(&frame(0x300, &crate::can_protocol::BOOTLOADER_SOFT));

        assert_eq!(
            ctrl.poll_mailbox(&mailbox),
            Some(ControllerEvent::EnterBootloader(SpecialCommand::SoftBootloader))
        );
        assert_eq!(ctrl.diagnostics().frames_rejected, 0);
    }

    #[test]
    fn test_malformed_then_valid_recovers() {
        let mut ctrl = Controller::new(differential(), 732);
        let mut out = Outputs::default();
        let mut sensors = Fixed([1538, 1579]);

        ctrl.on_frame(&frame(0x300, &[1, 2, 3]));
        let report = ctrl.tick(&mut sensors, TransportHealth::default(), &mut out);
        assert_eq!(report.state, FaultState::InvalidChecksum);

        ctrl.on_frame(&frame(0x300, &encode_command(0, 0, false, 0)));
        let report = ctrl.tick(&mut sensors, TransportHealth::default(), &mut out);
        assert_eq!(report.state, FaultState::NoFault);
    }

    #[test]
    fn test_staged_config_applies_on_next_tick() {
        let mut ctrl = Controller::new(DeviceConfig::default(), 732);
        let mut out = Outputs::default();
        let mut sensors = Fixed([1538, 1579]);

        let report = ctrl.tick(&mut sensors, TransportHealth::default(), &mut out);
        assert_eq!(report.state, FaultState::AdcUnconfigured);
        assert_eq!(report.snapshot.status_id, None);

        ctrl.stage_config(differential());
        assert_eq!(ctrl.config().mode, crate::config::OperatingMode::Unconfigured);

        ctrl.on_frame(&frame(0x300, &encode_command(0, 0, false, 0)));
        let report = ctrl.tick(&mut sensors, TransportHealth::default(), &mut out);
        assert_eq!(report.state, FaultState::NoFault);
        assert_eq!(report.snapshot.status_id, Some(0x301));
    }

    #[test]
    fn test_transport_faults_disable_actuation() {
        let mut ctrl = Controller::new(differential(), 732);
        let mut out = Outputs::default();
        let mut sensors = Fixed([1538, 1579]);
        ctrl.on_frame(&frame(0x300, &encode_command(200, -200, true, 0)));

        let report = ctrl.tick(
            &mut sensors,
            TransportHealth {
                bus_error: true,
                send_failed: false,
            },
            &mut out,
        );
        assert_eq!(report.state, FaultState::Sce);
        assert!(!out.relay);

        let report = ctrl.tick(&mut sensors, TransportHealth::default(), &mut out);
        assert_eq!(report.state, FaultState::NoFault);
        assert!(out.relay);
        assert_eq!(out.dac, [1848, 2248]);
    }

    #[test]
    fn test_vss_supervision_through_mailbox() {
        let mut config = differential();
        config.vss_can_id = 0x1D0;
        let mut ctrl = Controller::new(config, 732);
        let mailbox = FrameMailbox::<NoopRawMutex>::new();
        let mut out = Outputs::default();
        let mut sensors = Fixed([1538, 1579]);

        // First poll publishes the supervised ID
        ctrl.poll_mailbox(&mailbox);
        mailbox.post(&frame(0x300, &encode_command(0, 0, false, 0)));
        ctrl.poll_mailbox(&mailbox);
        let report = ctrl.tick(&mut sensors, TransportHealth::default(), &mut out);
        assert_eq!(report.state, FaultState::TimeoutVss);

        mailbox.post(&frame(0x1D0, &[0; 8]));
        ctrl.poll_mailbox(&mailbox);
        let report = ctrl.tick(&mut sensors, TransportHealth::default(), &mut out);
        assert_eq!(report.state, FaultState::NoFault);
    }

    #[test]
    fn test_counter_jumps_reported() {
        let mut ctrl = Controller::new(differential(), 732);
        let mut out = Outputs::default();
        for counter in [0, 1, 2, 5, 6] {
            ctrl.on_frame(&frame(0x300, &encode_command(0, 0, true, counter)));
        }
        let report = ctrl.tick(&mut Fixed([1538, 1579]), TransportHealth::default(), &mut out);

        assert_eq!(report.state, FaultState::NoFault);
        assert_eq!(ctrl.diagnostics().counter_jumps, 1);
        assert_eq!(ctrl.diagnostics().frames_accepted, 5);
    }

    #[test]
    fn test_debug_line_cadence() {
        let mut config = differential();
        config.debug_level = 1;
        let mut ctrl = Controller::new(config, 732);
        let mut out = Outputs::default();
        let mut sensors = Fixed([1538, 1579]);

        let lines = (0..146)
            .filter(|_| {
                ctrl.tick(&mut sensors, TransportHealth::default(), &mut out)
                    .debug
                    .is_some()
            })
            .count();
        assert_eq!(lines, 2);
    }

    #[test]
    fn test_transmitter_index_wraps() {
        let mut tx = StatusTransmitter::new();
        let mut snapshot = StatusSnapshot::new();
        snapshot.status_id = Some(0x301);

        for expected in (0..20u8).map(|i| i % 16) {
            let (id, data) = tx.prepare(&snapshot).unwrap();
            assert_eq!(id, 0x301);
            assert_eq!(decode_status(&data).unwrap().index, expected);
            tx.commit();
        }
    }

    #[test]
    fn test_transmitter_silent_without_id() {
        let tx = StatusTransmitter::new();
        assert_eq!(tx.prepare(&StatusSnapshot::new()), None);
        assert_eq!(tx.index(), 0);
    }
}
