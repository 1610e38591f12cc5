//! The uniform stream interface.
//!
//! Every stream variant (a burst engine on one physical device, or an
//! aggregate spanning a device array) implements [`Stream`]. Callers hold a
//! `Box<dyn Stream>` and never need to know which variant they are driving.

use async_trait::async_trait;
use std::any::Any;
use std::time::Duration;

use crate::error::Result;
use crate::types::{RecvInfo, SendStat, StreamCommand, StreamDirection, StreamInfo, StreamStats};

/// A live RX or TX sample stream.
///
/// I/O methods take `&mut self`: a stream has one caller at a time, which is
/// what allows at most one DMA buffer to be checked out per stream without a
/// lock.
#[async_trait]
pub trait Stream: Send + Sync + Any {
    fn direction(&self) -> StreamDirection;

    /// Start or stop streaming, optionally at hardware time `time`.
    async fn op(&mut self, command: StreamCommand, time: u64) -> Result<()>;

    /// Fill one buffer per channel with a full host packet.
    ///
    /// Waits up to `timeout` for each DMA block. Partially consumed blocks
    /// survive an error or timeout and are resumed by the next call.
    async fn recv(&mut self, buffers: &mut [&mut [u8]], timeout: Duration) -> Result<RecvInfo>;

    /// Transmit `samples` samples per channel from `buffers`.
    ///
    /// A negative `timestamp` sends immediately, ignoring hardware time.
    async fn send(
        &mut self,
        buffers: &[&[u8]],
        samples: usize,
        timestamp: i64,
        timeout: Duration,
    ) -> Result<SendStat>;

    /// Static packet geometry of the stream.
    fn stat(&self) -> StreamInfo;

    /// Running counters.
    fn stats(&self) -> StreamStats {
        StreamStats::default()
    }

    /// Read a named option (`"fd"` and friends).
    fn option_get(&self, name: &str) -> Result<i64>;

    async fn option_set(&mut self, name: &str, value: i64) -> Result<()>;

    /// Release every hardware resource and unregister from the owning device.
    ///
    /// Destroying an already destroyed stream is a no-op.
    async fn destroy(&mut self) -> Result<()>;

    /// Concrete-type access for devices that need to look inside their own
    /// streams (e.g. the aggregator resolving sub-streams for sync).
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
