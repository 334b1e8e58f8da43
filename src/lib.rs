//! Interceptor core
//!
//! Control and fault logic for a two-channel sensor interceptor: samples
//! two analog sensors, flags manual override, drives two analog outputs
//! from CAN commands and reports its state in a fixed-format status frame.
//!
//! The crate is `no_std` and hardware agnostic. The firmware supplies the
//! ADC, DAC and CAN transport through [`sensor::SensorInputs`],
//! [`actuation::AnalogOutputs`] and [`embedded_can::Frame`].

#![cfg_attr(not(test), no_std)]

// fmt must come first so its macros are visible in the other modules
mod fmt;

pub mod actuation;
pub mod can_protocol;
pub mod checksum;
pub mod config;
pub mod controller;
pub mod fault;
pub mod override_detector;
pub mod sensor;
pub mod state;
pub mod telemetry;
pub mod watchdog;

pub use controller::{Controller, ControllerEvent, Diagnostics, StatusTransmitter, TickReport};
pub use fault::FaultState;
