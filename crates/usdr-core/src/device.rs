//! The device-level interface.
//!
//! A [`Device`] is a stream factory plus the cross-stream timing operations.
//! Single boards and device arrays both implement it, so the generic stream
//! API can open streams on either without knowing which it has.

use async_trait::async_trait;

use crate::error::Result;
use crate::stream::Stream;
use crate::types::{StreamDirection, StreamRequest, SyncType};

#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    /// Hardware identity shared by every board of an array.
    fn uuid(&self) -> [u8; 16];

    /// Native channels per stream in `direction`.
    fn channel_count(&self, direction: StreamDirection) -> usize;

    /// Build a stream for `request`.
    ///
    /// At most one stream per direction may be live; a second request for a
    /// direction that is already streaming fails with
    /// [`Error::Busy`](crate::error::Error::Busy).
    async fn create_stream(&self, request: &StreamRequest) -> Result<Box<dyn Stream>>;

    /// Synchronize `streams` (zero, one or two streams created by this
    /// device) according to `sync`.
    async fn timer_op(&self, streams: &mut [&mut dyn Stream], sync: &SyncType) -> Result<()>;

    /// Release the device. Destroying twice is not an error.
    async fn destroy(&mut self) -> Result<()>;
}
