//! Lowlevel device interface consumed by the stream engines.
//!
//! The [`LowlevelDevice`] trait abstracts over the physical transport to a
//! radio board (USB bulk, PCIe DMA rings, sockets). Stream engines operate on
//! a `LowlevelDevice` rather than on a concrete transport, which enables both
//! real hardware and deterministic unit testing with `MockLowlevel` from the
//! `usdr-test-harness` crate.
//!
//! DMA buffers are passed by value: [`recv_dma_wait`](LowlevelDevice::recv_dma_wait)
//! hands a buffer out and [`recv_dma_release`](LowlevelDevice::recv_dma_release)
//! consumes it, so a buffer cannot be released twice.

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{StreamDirection, SyncType};

/// Parameters for [`LowlevelDevice::stream_initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowlevelStreamParams {
    pub direction: StreamDirection,
    /// Bytes per DMA block.
    pub block_size: usize,
    /// DMA blocks in the ring.
    pub buffer_count: usize,
    /// The stream must expose a pollable descriptor.
    pub need_fd: bool,
}

/// A stream registered with the lowlevel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowlevelStream {
    pub id: u32,
    /// Pollable descriptor, present when the transport has one.
    pub fd: Option<i32>,
}

/// One DMA block checked out from the lowlevel layer.
#[derive(Debug)]
pub struct DmaBuffer {
    /// Slot index in the lowlevel DMA ring.
    pub index: usize,
    pub data: BytesMut,
}

/// Out-of-band metadata committed with a transmit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMeta {
    /// Base timestamp of the block; negative means "send immediately".
    pub timestamp: i64,
}

/// Asynchronous DMA-level access to one physical device.
///
/// Implementations own the transport; the stream engines only ever hold a
/// shared reference, so every method takes `&self`.
#[async_trait]
pub trait LowlevelDevice: Send + Sync {
    /// Human-readable device name, used in log fields.
    fn name(&self) -> &str;

    /// Hardware identity; all members of a device array must agree.
    fn uuid(&self) -> [u8; 16];

    /// Hardware channels per direction.
    fn channel_count(&self, direction: StreamDirection) -> usize;

    /// Register a DMA stream.
    async fn stream_initialize(&self, params: &LowlevelStreamParams) -> Result<LowlevelStream>;

    /// Tear down a DMA stream registered by `stream_initialize`.
    async fn stream_deinitialize(&self, stream: u32) -> Result<()>;

    /// Wait up to `timeout` for a filled receive block.
    ///
    /// Returns [`Error::Timeout`] if none arrives within the deadline.
    async fn recv_dma_wait(&self, stream: u32, timeout: Duration) -> Result<DmaBuffer>;

    /// Return a fully consumed receive block to the hardware.
    async fn recv_dma_release(&self, stream: u32, buffer: DmaBuffer) -> Result<()>;

    /// Wait up to `timeout` for an empty transmit block.
    async fn send_dma_get(&self, stream: u32, timeout: Duration) -> Result<DmaBuffer>;

    /// Queue `len` bytes of `buffer` for transmission.
    async fn send_dma_commit(
        &self,
        stream: u32,
        buffer: DmaBuffer,
        len: usize,
        meta: DmaMeta,
    ) -> Result<()>;

    /// Arm or fire device timing logic.
    async fn timer_op(&self, sync: &SyncType) -> Result<()> {
        Err(Error::NotSupported(format!(
            "sync '{sync}' on {}",
            self.name()
        )))
    }

    /// Release the device.
    async fn destroy(&self) -> Result<()>;
}
