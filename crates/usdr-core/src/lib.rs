//! usdr-core: Core traits, types, and error definitions for usdr.
//!
//! This crate defines the device-agnostic abstractions of the SDR data-plane.
//! Applications depend on these types without pulling in a specific stream
//! engine or device array.
//!
//! # Key types
//!
//! - [`Stream`] -- the uniform RX/TX stream trait
//! - [`Device`] -- stream factory and cross-stream sync
//! - [`LowlevelDevice`] -- DMA-level access to one physical board
//! - [`RingBuffer`] -- bounded byte ring for block-size adaptation
//! - [`Error`] / [`Result`] -- error handling

pub mod channels;
pub mod device;
pub mod error;
pub mod lowlevel;
pub mod ring;
pub mod slot;
pub mod stream;
pub mod types;

// Re-export key types at crate root for ergonomic `use usdr_core::*`.
pub use channels::ChannelInfo;
pub use device::Device;
pub use error::{Error, Result};
pub use lowlevel::{DmaBuffer, DmaMeta, LowlevelDevice, LowlevelStream, LowlevelStreamParams};
pub use ring::RingBuffer;
pub use slot::{SlotGuard, StreamSlots};
pub use stream::Stream;
pub use types::*;
