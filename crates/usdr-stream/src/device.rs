//! Single physical device exposing burst streams.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use usdr_core::{
    Device, Error, LowlevelDevice, Result, Stream, StreamDirection, StreamFlags, StreamRequest,
    StreamSlots, SyncType,
};

use crate::builder::BurstStreamBuilder;

/// A [`Device`] backed by one [`LowlevelDevice`].
///
/// Accepts `"rx/0"` and `"tx/0"`; each direction carries at most one channel
/// (none when the hardware has none) and at most one live stream.
pub struct BurstDevice {
    name: String,
    lowlevel: Arc<dyn LowlevelDevice>,
    slots: StreamSlots,
    buffer_count: usize,
    destroyed: bool,
}

impl BurstDevice {
    pub fn new(lowlevel: Arc<dyn LowlevelDevice>) -> Self {
        BurstDevice {
            name: lowlevel.name().to_string(),
            lowlevel,
            slots: StreamSlots::new(),
            buffer_count: crate::builder::DEFAULT_BUFFER_COUNT,
            destroyed: false,
        }
    }

    /// DMA blocks per lowlevel ring for streams created later.
    pub fn with_buffer_count(mut self, n: usize) -> Self {
        self.buffer_count = n;
        self
    }

    pub fn lowlevel(&self) -> &Arc<dyn LowlevelDevice> {
        &self.lowlevel
    }

    /// Slot table, shared with every stream this device creates.
    pub fn slots(&self) -> &StreamSlots {
        &self.slots
    }
}

#[async_trait]
impl Device for BurstDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> [u8; 16] {
        self.lowlevel.uuid()
    }

    fn channel_count(&self, direction: StreamDirection) -> usize {
        self.lowlevel.channel_count(direction).min(1)
    }

    async fn create_stream(&self, request: &StreamRequest) -> Result<Box<dyn Stream>> {
        if self.destroyed {
            return Err(Error::NoDevice(format!("{} is destroyed", self.name)));
        }
        let direction = StreamDirection::from_sid(&request.sid)?;
        if self.channel_count(direction) == 0 {
            return Err(Error::NotSupported(format!(
                "{} has no {direction} channels",
                self.name
            )));
        }
        if let Some(params) = &request.parameters {
            debug!(device = %self.name, parameters = %params, "ignoring stream parameters");
        }

        let stream = BurstStreamBuilder::new(direction)
            .format(&request.format)
            .packet_symbols(request.packet_symbols)
            .channels(request.channels.count())
            .need_fd(request.flags.contains(StreamFlags::NEED_FD))
            .buffer_count(self.buffer_count)
            .build(Arc::clone(&self.lowlevel), &self.slots)
            .await?;

        Ok(Box::new(stream))
    }

    async fn timer_op(&self, streams: &mut [&mut dyn Stream], sync: &SyncType) -> Result<()> {
        debug!(device = %self.name, streams = streams.len(), %sync, "timer op");
        match sync {
            SyncType::None => Ok(()),
            other => self.lowlevel.timer_op(other).await,
        }
    }

    async fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            warn!(device = %self.name, "device already destroyed");
            return Ok(());
        }
        self.destroyed = true;
        self.lowlevel.destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usdr_core::ChannelInfo;
    use usdr_test_harness::MockLowlevel;

    fn request(sid: &str) -> StreamRequest {
        StreamRequest::new(sid, "ci16", ChannelInfo::with_count(1), 1020)
    }

    #[tokio::test]
    async fn channel_count_follows_hardware() {
        let dev = BurstDevice::new(Arc::new(MockLowlevel::new("m").with_channels(2, 0)));
        assert_eq!(dev.channel_count(StreamDirection::Rx), 1);
        assert_eq!(dev.channel_count(StreamDirection::Tx), 0);

        assert!(matches!(
            dev.create_stream(&request("tx/0")).await,
            Err(Error::NotSupported(_))
        ));
        let mut rx = dev.create_stream(&request("rx/0")).await.unwrap();
        assert_eq!(rx.stat().channels, 1);
        rx.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn destroyed_device_refuses_streams() {
        let lowlevel = Arc::new(MockLowlevel::new("m"));
        let mut dev = BurstDevice::new(lowlevel.clone());
        dev.destroy().await.unwrap();
        dev.destroy().await.unwrap();
        assert_eq!(lowlevel.destroy_calls(), 1);
        assert!(matches!(
            dev.create_stream(&request("rx/0")).await,
            Err(Error::NoDevice(_))
        ));
    }
}
