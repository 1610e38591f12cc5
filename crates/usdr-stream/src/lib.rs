//! Burst-framed stream engine for usdr.
//!
//! This crate turns the DMA-level access of a
//! [`LowlevelDevice`](usdr_core::LowlevelDevice) into host-facing sample
//! streams. It provides:
//!
//! - **Wire framing** ([`wire`]) -- the 16-byte burst header and burst
//!   sizing constants.
//! - **Geometry** ([`geometry`]) -- how host packets map onto bursts and DMA
//!   blocks for a given format pair.
//! - **BurstStream** ([`stream`]) -- the [`Stream`](usdr_core::Stream)
//!   implementation: partial block resume, lag zero-fill and TX framing.
//! - **BurstStreamBuilder** ([`builder`]) -- fluent builder that validates
//!   configuration and registers the stream with the lowlevel layer.
//! - **BurstDevice** ([`device`]) -- the [`Device`](usdr_core::Device)
//!   implementation for one physical board.
//!
//! # Example
//!
//! ```
//! use usdr_stream::{BurstHeader, HEADER_SIZE};
//!
//! let mut raw = [0u8; HEADER_SIZE];
//! BurstHeader { ignore_timestamp: false, payload_len: 4080, timestamp: 1000 }.encode(&mut raw);
//! assert_eq!(BurstHeader::decode(&raw).unwrap().timestamp, 1000);
//! ```

pub mod builder;
pub mod device;
pub mod geometry;
pub mod stream;
pub mod wire;

pub use builder::BurstStreamBuilder;
pub use device::BurstDevice;
pub use geometry::BurstGeometry;
pub use stream::BurstStream;
pub use wire::{BURST_PAYLOAD, BURST_SIZE, BurstHeader, HEADER_SIZE};
