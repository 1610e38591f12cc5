//! Mock device and stream for testing code that drives the [`Device`] and
//! [`Stream`] traits (the multi-device aggregator and the generic façade).
//!
//! A [`MockDevice`] hands out [`MockStream`]s that produce deterministic
//! data: every receive fills each channel buffer with the device's fill byte
//! and reports a timestamp that advances by one packet per call. Everything
//! the streams and the device see is recorded in a shared log, readable
//! through a [`MockProbe`] even after the device has been moved into an
//! array.
//!
//! # Example
//!
//! ```
//! use usdr_core::{ChannelInfo, Device, StreamRequest};
//! use usdr_test_harness::MockDevice;
//!
//! # async fn example() -> usdr_core::Result<()> {
//! let dev = MockDevice::new("board0").with_channels(2, 2).with_fill(0xA5);
//! let probe = dev.probe();
//! let mut stream = dev
//!     .create_stream(&StreamRequest::new("rx/0", "ci16", ChannelInfo::with_count(2), 1024))
//!     .await?;
//! assert_eq!(probe.live_streams(), 1);
//! stream.destroy().await?;
//! assert_eq!(probe.live_streams(), 0);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use usdr_core::{
    Device, Error, RecvInfo, Result, SendStat, SlotGuard, Stream, StreamCommand, StreamDirection,
    StreamFlags, StreamFormat, StreamInfo, StreamRequest, StreamSlots, StreamStats, SyncType,
};

/// One `send` seen by a [`MockStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    /// Number of channel buffers passed in.
    pub channels: usize,
    pub samples: usize,
    pub timestamp: i64,
    /// First byte of every channel buffer, in order.
    pub leading_bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct DeviceLog {
    created: Vec<StreamRequest>,
    live_streams: usize,
    stream_destroys: usize,
    ops: Vec<(StreamCommand, u64)>,
    option_sets: Vec<(String, i64)>,
    sent: Vec<SentPacket>,
    /// `(number of streams, sync type)` of every device `timer_op`.
    timer_ops: Vec<(usize, SyncType)>,
    device_destroys: usize,
}

type SharedLog = Arc<Mutex<DeviceLog>>;

fn lock(log: &SharedLog) -> MutexGuard<'_, DeviceLog> {
    log.lock().unwrap_or_else(|e| e.into_inner())
}

/// Read-only view of a [`MockDevice`]'s log.
#[derive(Debug, Clone)]
pub struct MockProbe {
    log: SharedLog,
}

impl MockProbe {
    /// Requests that produced a stream, in order.
    pub fn created(&self) -> Vec<StreamRequest> {
        lock(&self.log).created.clone()
    }

    /// Streams created and not yet destroyed.
    pub fn live_streams(&self) -> usize {
        lock(&self.log).live_streams
    }

    pub fn stream_destroys(&self) -> usize {
        lock(&self.log).stream_destroys
    }

    pub fn ops(&self) -> Vec<(StreamCommand, u64)> {
        lock(&self.log).ops.clone()
    }

    pub fn option_sets(&self) -> Vec<(String, i64)> {
        lock(&self.log).option_sets.clone()
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        lock(&self.log).sent.clone()
    }

    pub fn timer_ops(&self) -> Vec<(usize, SyncType)> {
        lock(&self.log).timer_ops.clone()
    }

    pub fn device_destroys(&self) -> usize {
        lock(&self.log).device_destroys
    }
}

/// Per-stream behaviour copied from the device at creation.
#[derive(Debug, Clone, Copy)]
struct StreamScript {
    fd: Option<i32>,
    fill: u8,
    first_timestamp: u64,
    recv_samples: Option<usize>,
    lost: u64,
    send_stat: SendStat,
    overruns: u64,
}

/// A scripted [`Device`].
#[derive(Debug)]
pub struct MockDevice {
    name: String,
    uuid: [u8; 16],
    channels: [usize; 2],
    fail_create: Option<Error>,
    script: StreamScript,
    slots: StreamSlots,
    log: SharedLog,
    destroyed: bool,
}

impl MockDevice {
    /// A device with one channel per direction, descriptor 7, fill byte
    /// 0x11 and an all-zero UUID.
    pub fn new(name: &str) -> Self {
        MockDevice {
            name: name.to_string(),
            uuid: [0; 16],
            channels: [1, 1],
            fail_create: None,
            script: StreamScript {
                fd: Some(7),
                fill: 0x11,
                first_timestamp: 0,
                recv_samples: None,
                lost: 0,
                send_stat: SendStat::default(),
                overruns: 0,
            },
            slots: StreamSlots::new(),
            log: SharedLog::default(),
            destroyed: false,
        }
    }

    pub fn with_uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_channels(mut self, rx: usize, tx: usize) -> Self {
        self.channels = [rx, tx];
        self
    }

    /// Descriptor reported by `option_get("fd")`.
    pub fn with_fd(mut self, fd: Option<i32>) -> Self {
        self.script.fd = fd;
        self
    }

    /// Byte written into every received sample.
    pub fn with_fill(mut self, fill: u8) -> Self {
        self.script.fill = fill;
        self
    }

    /// Timestamp reported by the first receive.
    pub fn with_first_timestamp(mut self, ts: u64) -> Self {
        self.script.first_timestamp = ts;
        self
    }

    /// Report fewer samples than a full packet on every receive.
    pub fn with_recv_samples(mut self, samples: usize) -> Self {
        self.script.recv_samples = Some(samples);
        self
    }

    pub fn with_lost(mut self, lost: u64) -> Self {
        self.script.lost = lost;
        self
    }

    pub fn with_send_stat(mut self, stat: SendStat) -> Self {
        self.script.send_stat = stat;
        self
    }

    pub fn with_overruns(mut self, overruns: u64) -> Self {
        self.script.overruns = overruns;
        self
    }

    /// Fail every `create_stream` with `err`.
    pub fn failing_create(mut self, err: Error) -> Self {
        self.fail_create = Some(err);
        self
    }

    pub fn probe(&self) -> MockProbe {
        MockProbe {
            log: Arc::clone(&self.log),
        }
    }

    fn clone_error(err: &Error) -> Error {
        match err {
            Error::InvalidArgument(m) => Error::InvalidArgument(m.clone()),
            Error::Busy(m) => Error::Busy(m.clone()),
            Error::NotSupported(m) => Error::NotSupported(m.clone()),
            Error::OutOfRange(m) => Error::OutOfRange(m.clone()),
            Error::NoDevice(m) => Error::NoDevice(m.clone()),
            Error::Timeout => Error::Timeout,
            other => Error::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl Device for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> [u8; 16] {
        self.uuid
    }

    fn channel_count(&self, direction: StreamDirection) -> usize {
        self.channels[direction.index()]
    }

    async fn create_stream(&self, request: &StreamRequest) -> Result<Box<dyn Stream>> {
        if self.destroyed {
            return Err(Error::NoDevice(format!("{} is destroyed", self.name)));
        }
        if let Some(err) = &self.fail_create {
            return Err(Self::clone_error(err));
        }

        let direction = StreamDirection::from_sid(&request.sid)?;
        let channels = request.channels.count();
        if channels == 0 || channels > self.channel_count(direction) {
            return Err(Error::InvalidArgument(format!(
                "{} has {} {direction} channels, {channels} requested",
                self.name,
                self.channel_count(direction)
            )));
        }
        if request.flags.contains(StreamFlags::NEED_FD) && self.script.fd.is_none() {
            return Err(Error::NotSupported(format!("{} has no descriptor", self.name)));
        }
        let format = StreamFormat::parse(&request.format)?;
        let slot = self.slots.claim(direction)?;

        {
            let mut log = lock(&self.log);
            log.created.push(request.clone());
            log.live_streams += 1;
        }

        Ok(Box::new(MockStream {
            direction,
            channels,
            packet_symbols: request.packet_symbols,
            sample_bytes: format.host.sample_bits() / 8,
            script: self.script,
            next_timestamp: self.script.first_timestamp,
            packets: 0,
            slot,
            log: Arc::clone(&self.log),
            destroyed: false,
        }))
    }

    async fn timer_op(&self, streams: &mut [&mut dyn Stream], sync: &SyncType) -> Result<()> {
        lock(&self.log).timer_ops.push((streams.len(), sync.clone()));
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        self.destroyed = true;
        lock(&self.log).device_destroys += 1;
        Ok(())
    }
}

/// A stream created by [`MockDevice`].
#[derive(Debug)]
pub struct MockStream {
    direction: StreamDirection,
    channels: usize,
    packet_symbols: usize,
    sample_bytes: usize,
    script: StreamScript,
    next_timestamp: u64,
    packets: u64,
    slot: SlotGuard,
    log: SharedLog,
    destroyed: bool,
}

impl MockStream {
    fn check(&self, direction: StreamDirection, buffers: usize) -> Result<()> {
        if self.destroyed {
            return Err(Error::NoDevice("mock stream destroyed".into()));
        }
        if self.direction != direction {
            return Err(Error::NotSupported(format!(
                "{direction} on a {} stream",
                self.direction
            )));
        }
        if buffers != self.channels {
            return Err(Error::InvalidArgument(format!(
                "{buffers} buffers for {} channels",
                self.channels
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Stream for MockStream {
    fn direction(&self) -> StreamDirection {
        self.direction
    }

    async fn op(&mut self, command: StreamCommand, time: u64) -> Result<()> {
        lock(&self.log).ops.push((command, time));
        Ok(())
    }

    async fn recv(&mut self, buffers: &mut [&mut [u8]], _timeout: Duration) -> Result<RecvInfo> {
        self.check(StreamDirection::Rx, buffers.len())?;
        let packet_bytes = self.packet_symbols * self.sample_bytes;
        for buf in buffers.iter_mut() {
            let n = packet_bytes.min(buf.len());
            buf[..n].fill(self.script.fill);
        }

        let first_timestamp = self.next_timestamp;
        self.next_timestamp += self.packet_symbols as u64;
        self.packets += 1;
        Ok(RecvInfo {
            samples: self.script.recv_samples.unwrap_or(self.packet_symbols),
            first_timestamp,
            lost: self.script.lost,
        })
    }

    async fn send(
        &mut self,
        buffers: &[&[u8]],
        samples: usize,
        timestamp: i64,
        _timeout: Duration,
    ) -> Result<SendStat> {
        self.check(StreamDirection::Tx, buffers.len())?;
        self.packets += 1;
        lock(&self.log).sent.push(SentPacket {
            channels: buffers.len(),
            samples,
            timestamp,
            leading_bytes: buffers.iter().map(|b| b.first().copied().unwrap_or(0)).collect(),
        });
        Ok(self.script.send_stat)
    }

    fn stat(&self) -> StreamInfo {
        StreamInfo {
            direction: self.direction,
            channels: self.channels,
            packet_bytes: self.packet_symbols * self.sample_bytes,
            packet_symbols: self.packet_symbols,
            burst_count: 1,
        }
    }

    fn stats(&self) -> StreamStats {
        StreamStats {
            buffers: self.packets,
            overruns: self.script.overruns,
            lag_pending: 0,
        }
    }

    fn option_get(&self, name: &str) -> Result<i64> {
        match name {
            "fd" => self
                .script
                .fd
                .map(i64::from)
                .ok_or_else(|| Error::NotSupported("no descriptor".into())),
            other => Err(Error::InvalidArgument(format!("unknown option '{other}'"))),
        }
    }

    async fn option_set(&mut self, name: &str, value: i64) -> Result<()> {
        lock(&self.log).option_sets.push((name.to_string(), value));
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.slot.release();
        let mut log = lock(&self.log);
        log.live_streams -= 1;
        log.stream_destroys += 1;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usdr_core::ChannelInfo;

    fn rx_request(channels: usize) -> StreamRequest {
        StreamRequest::new("rx/0", "cf32", ChannelInfo::with_count(channels), 256)
    }

    #[tokio::test]
    async fn recv_fills_and_advances_timestamp() {
        let dev = MockDevice::new("m")
            .with_channels(2, 2)
            .with_fill(0x5A)
            .with_first_timestamp(100);
        let mut s = dev.create_stream(&rx_request(2)).await.unwrap();
        assert_eq!(s.stat().packet_bytes, 256 * 8);

        let mut a = vec![0u8; 2048];
        let mut b = vec![0u8; 2048];
        let info = s
            .recv(&mut [&mut a[..], &mut b[..]], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(info.first_timestamp, 100);
        assert!(a.iter().chain(b.iter()).all(|x| *x == 0x5A));

        let info = s
            .recv(&mut [&mut a[..], &mut b[..]], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(info.first_timestamp, 356);
        s.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn slot_is_exclusive_until_destroy() {
        let dev = MockDevice::new("m");
        let probe = dev.probe();
        let mut s = dev.create_stream(&rx_request(1)).await.unwrap();
        assert!(matches!(
            dev.create_stream(&rx_request(1)).await,
            Err(Error::Busy(_))
        ));

        s.destroy().await.unwrap();
        s.destroy().await.unwrap();
        assert_eq!(probe.stream_destroys(), 1);
        assert!(dev.create_stream(&rx_request(1)).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_create_failure() {
        let dev = MockDevice::new("m").failing_create(Error::Busy("scripted".into()));
        assert!(matches!(
            dev.create_stream(&rx_request(1)).await,
            Err(Error::Busy(_))
        ));
        assert_eq!(dev.probe().live_streams(), 0);
    }

    #[tokio::test]
    async fn too_many_channels_rejected() {
        let dev = MockDevice::new("m");
        assert!(matches!(
            dev.create_stream(&rx_request(2)).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
