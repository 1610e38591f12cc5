//! # usdr -- SDR data-plane
//!
//! `usdr` moves timestamped I/Q samples between application buffers and
//! software-defined radio boards. It frames samples into hardware bursts,
//! keeps the receive stream aligned to hardware time across overruns, and can
//! present several synchronized boards as one wide device.
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate               | Purpose                                              |
//! |---------------------|------------------------------------------------------|
//! | `usdr-core`         | Traits ([`Stream`], [`Device`], [`LowlevelDevice`]), types, errors, [`RingBuffer`] |
//! | `usdr-xdsp`         | Sample format transforms                             |
//! | `usdr-stream`       | Burst-framed stream engine over one board            |
//! | `usdr-mdev`         | Multi-board aggregation                              |
//! | **`usdr`**          | This facade crate -- re-exports plus the [`dms`] API |
//!
//! Single boards and board arrays both implement [`Device`], and every stream
//! they create is a `Box<dyn Stream>`, so application code drives either
//! through the same [`dms::Dms`] handle.
//!
//! ## Feature Flags
//!
//! | Feature | Enables                                   | Default |
//! |---------|-------------------------------------------|---------|
//! | `mdev`  | [`mdev`] module (multi-device aggregation) | yes     |
//!
//! ## Receiving
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use usdr::{ChannelInfo, LowlevelDevice, StreamCommand, StreamFlags, dms};
//! use usdr::burst::BurstDevice;
//!
//! # async fn example(lowlevel: Arc<dyn LowlevelDevice>) -> usdr::Result<()> {
//! let device = BurstDevice::new(lowlevel);
//! let mut rx = dms::create(&device, "rx/0", "cf32@ci12", ChannelInfo::with_count(1), 4080, StreamFlags::NEED_FD).await?;
//! rx.op(StreamCommand::Start, 0).await?;
//!
//! // Caller-sized blocks regardless of the native packet size.
//! let mut block = vec![0u8; 1000 * 8];
//! let info = rx.read(&mut [&mut block[..]], 1000, Duration::from_millis(500)).await?;
//! println!("block at {}, {} packets lost so far", info.first_timestamp, rx.stats().overruns);
//!
//! rx.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub use usdr_core::*;

pub mod dms;

pub use dms::{Dms, SampleSink, WriterSink};

/// Sample format transforms.
///
/// Provides [`get_transform`](xdsp::get_transform) and the
/// [`Transform`](xdsp::Transform) handle used by stream engines.
pub mod xdsp {
    pub use usdr_xdsp::*;
}

/// Burst-framed stream engine.
///
/// Provides [`BurstDevice`](burst::BurstDevice) for a single board and the
/// [`BurstStreamBuilder`](burst::BurstStreamBuilder) for finer control over
/// DMA buffering.
pub mod burst {
    pub use usdr_stream::*;
}

/// Multi-device aggregation.
///
/// Provides [`MultiDeviceBuilder`](mdev::MultiDeviceBuilder), which joins
/// boards sharing one hardware identity into a single
/// [`MultiDevice`](mdev::MultiDevice).
#[cfg(feature = "mdev")]
pub mod mdev {
    pub use usdr_mdev::*;
}
