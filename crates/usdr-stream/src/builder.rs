//! BurstStreamBuilder -- fluent builder for [`BurstStream`] instances.
//!
//! Separates stream configuration (format, packet size, buffering) from the
//! lowlevel registration performed by [`build`](BurstStreamBuilder::build).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usdr_core::{LowlevelDevice, StreamDirection, StreamSlots};
//! use usdr_stream::BurstStreamBuilder;
//!
//! # async fn example(lowlevel: Arc<dyn LowlevelDevice>) -> usdr_core::Result<()> {
//! let slots = StreamSlots::new();
//! let stream = BurstStreamBuilder::new(StreamDirection::Rx)
//!     .format("cf32@ci12")
//!     .packet_symbols(4080)
//!     .need_fd(true)
//!     .build(lowlevel, &slots)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tracing::{debug, info};

use usdr_core::{
    Error, LowlevelDevice, LowlevelStreamParams, Result, StreamDirection, StreamFormat,
    StreamSlots,
};
use usdr_xdsp::get_transform;

use crate::geometry::BurstGeometry;
use crate::stream::BurstStream;

/// DMA blocks in the lowlevel ring unless overridden.
pub const DEFAULT_BUFFER_COUNT: usize = 16;

/// Fluent builder for [`BurstStream`].
#[derive(Debug, Clone)]
pub struct BurstStreamBuilder {
    direction: StreamDirection,
    format: String,
    packet_symbols: usize,
    channels: usize,
    need_fd: bool,
    buffer_count: usize,
}

impl BurstStreamBuilder {
    /// Start a builder for a stream in `direction`. Defaults to `ci16`
    /// samples, one burst per packet and one channel.
    pub fn new(direction: StreamDirection) -> Self {
        BurstStreamBuilder {
            direction,
            format: "ci16".to_string(),
            packet_symbols: 1020,
            channels: 1,
            need_fd: false,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }

    /// Data format, `"host[@wire]"`.
    pub fn format(mut self, format: &str) -> Self {
        self.format = format.to_string();
        self
    }

    /// Samples per host packet.
    pub fn packet_symbols(mut self, n: usize) -> Self {
        self.packet_symbols = n;
        self
    }

    /// Logical channels; burst streams carry exactly one.
    pub fn channels(mut self, n: usize) -> Self {
        self.channels = n;
        self
    }

    /// Require a pollable descriptor from the lowlevel layer.
    pub fn need_fd(mut self, need: bool) -> Self {
        self.need_fd = need;
        self
    }

    /// DMA blocks in the lowlevel ring (default: 16).
    pub fn buffer_count(mut self, n: usize) -> Self {
        self.buffer_count = n;
        self
    }

    /// Register the stream with `lowlevel` and claim its slot in `slots`.
    pub async fn build(
        self,
        lowlevel: Arc<dyn LowlevelDevice>,
        slots: &StreamSlots,
    ) -> Result<BurstStream> {
        if self.channels != 1 {
            return Err(Error::InvalidArgument(format!(
                "burst streams carry one channel, {} requested",
                self.channels
            )));
        }
        if self.buffer_count == 0 {
            return Err(Error::InvalidArgument("buffer count of zero".into()));
        }

        let format = StreamFormat::parse(&self.format)?;
        let transform = match self.direction {
            StreamDirection::Rx => get_transform(format.wire, format.host)?,
            StreamDirection::Tx => get_transform(format.host, format.wire)?,
        };
        if transform.is_passthrough() {
            debug!(format = %format, "no transformation");
        }
        let geometry = BurstGeometry::new(self.direction, &format, &transform, self.packet_symbols)?;

        let slot = slots.claim(self.direction)?;

        let params = LowlevelStreamParams {
            direction: self.direction,
            block_size: geometry.block_size(),
            buffer_count: self.buffer_count,
            need_fd: self.need_fd,
        };
        let ll = lowlevel.stream_initialize(&params).await?;

        if self.need_fd && ll.fd.is_none_or(|fd| fd < 0) {
            lowlevel.stream_deinitialize(ll.id).await?;
            return Err(Error::NotSupported(format!(
                "{} provides no pollable descriptor for the {} stream",
                lowlevel.name(),
                self.direction
            )));
        }

        info!(
            device = lowlevel.name(),
            stream = ll.id,
            direction = %self.direction,
            format = %format,
            block_size = params.block_size,
            burst_count = geometry.burst_count,
            burst_symbols = geometry.burst_symbols,
            "burst stream configured"
        );

        Ok(BurstStream::new(
            lowlevel,
            ll.id,
            ll.fd.filter(|fd| *fd >= 0),
            geometry,
            transform,
            slot,
        ))
    }
}
