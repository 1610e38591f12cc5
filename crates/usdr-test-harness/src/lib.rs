//! usdr-test-harness: Test utilities and mock devices for usdr.
//!
//! This crate provides [`MockLowlevel`] for deterministic unit testing of the
//! burst stream engine without SDR hardware, and [`MockDevice`] /
//! [`MockStream`] for testing code that only sees the [`Device`] and
//! [`Stream`] traits, such as the multi-device aggregator.
//!
//! [`Device`]: usdr_core::Device
//! [`Stream`]: usdr_core::Stream

pub mod mock_device;
pub mod mock_lowlevel;

pub use mock_device::{MockDevice, MockProbe, MockStream, SentPacket};
pub use mock_lowlevel::{CommittedBlock, MockLowlevel, burst_block, ci16_ramp};
