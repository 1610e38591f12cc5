//! Multi-device aggregation for usdr.
//!
//! Several physical boards sharing one hardware identity are presented as a
//! single virtual [`Device`](usdr_core::Device). It provides:
//!
//! - **MultiDeviceBuilder** ([`builder`]) -- validates the device set
//!   (1 to 32 boards, common UUID) and builds the array.
//! - **MultiDevice** ([`device`]) -- splits each stream request evenly
//!   across the boards and coordinates cross-board sync.
//! - **AggregateStream** ([`stream`]) -- one logical stream whose channels
//!   are spread over per-board sub-streams, with concurrent per-board I/O.

pub mod builder;
pub mod device;
pub mod stream;

pub use builder::{MAX_DEVICES, MultiDeviceBuilder};
pub use device::MultiDevice;
pub use stream::AggregateStream;
