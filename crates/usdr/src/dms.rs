//! Generic stream API.
//!
//! [`Dms`] wraps any `Box<dyn Stream>` (a single-board burst stream or an
//! aggregate over a device array) behind one direction-agnostic handle. On
//! top of plain packet I/O it offers [`Dms::read`], a jitter-buffered receive
//! for callers whose block size differs from the native packet, and an
//! optional [`SampleSink`] that sees every received packet.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use usdr::{ChannelInfo, Device, StreamCommand, StreamFlags, dms};
//!
//! # async fn example(device: &dyn Device) -> usdr::Result<()> {
//! let mut rx = dms::create(device, "rx/0", "cf32@ci12", ChannelInfo::from_mask(0b1), 4080, StreamFlags::NONE).await?;
//! rx.op(StreamCommand::Start, 0).await?;
//!
//! let mut buf = vec![0u8; rx.info().packet_bytes];
//! let info = rx.recv(&mut [&mut buf[..]], Duration::from_millis(500)).await?;
//! println!("{} samples at {}", info.samples, info.first_timestamp);
//!
//! rx.destroy().await?;
//! # Ok(())
//! # }
//! ```

use std::io::Write;
use std::time::Duration;
use tracing::{debug, trace, warn};

use usdr_core::{
    ChannelInfo, Device, Error, RecvInfo, Result, RingBuffer, SendStat, Stream, StreamCommand,
    StreamDirection, StreamFlags, StreamInfo, StreamRequest, StreamStats, SyncType,
};

/// Native packets held by a freshly sized jitter buffer.
const JITTER_PACKETS: usize = 16;

/// Receiver of raw received packets, for dumping to disk and similar.
pub trait SampleSink: Send {
    /// Called once per native packet with the valid bytes of each channel.
    fn consume(&mut self, channels: &[&[u8]], info: &RecvInfo) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A [`SampleSink`] writing the channels of every packet back to back.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    bytes: u64,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink { writer, bytes: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> SampleSink for WriterSink<W> {
    fn consume(&mut self, channels: &[&[u8]], _info: &RecvInfo) -> Result<()> {
        for ch in channels {
            self.writer.write_all(ch)?;
            self.bytes += ch.len() as u64;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Per-channel rings adapting native packets to caller-sized reads.
struct JitterBuffer {
    rings: Vec<RingBuffer>,
    /// Landing area for packets that cannot go straight into the rings.
    scratch: Vec<Vec<u8>>,
    sample_bytes: usize,
    /// Hardware time of the first unread sample.
    timestamp: u64,
    /// Samples lost since the last read, zero-fill and discards included.
    lost: u64,
}

impl JitterBuffer {
    fn new(channels: usize, packet_bytes: usize, sample_bytes: usize, request_bytes: usize) -> Self {
        let mut capacity = packet_bytes * JITTER_PACKETS;
        while capacity < 2 * request_bytes {
            capacity *= 2;
        }
        JitterBuffer {
            rings: (0..channels).map(|_| RingBuffer::new(capacity)).collect(),
            scratch: vec![vec![0; packet_bytes]; channels],
            sample_bytes,
            timestamp: 0,
            lost: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.rings.first().map_or(0, RingBuffer::capacity)
    }

    fn available(&self) -> usize {
        self.rings.first().map_or(0, RingBuffer::read_space)
    }

    /// Whether the next packet can be received in place: the rings are
    /// empty and `packet_bytes` fit before the end of storage.
    fn direct(&mut self, packet_bytes: usize) -> bool {
        self.available() == 0
            && self
                .rings
                .first_mut()
                .is_some_and(|r| r.write_ptr().len() >= packet_bytes)
    }

    /// Append `valid` bytes of each scratch packet starting at hardware time
    /// `first_timestamp`.
    ///
    /// A packet that starts later than the buffered data ends is preceded by
    /// zero-fill. One that starts earlier, or whose gap does not fit, drops
    /// the buffered data and resyncs.
    fn append(&mut self, first_timestamp: u64, valid: usize) {
        let sb = self.sample_bytes as u64;
        let buffered = self.available();
        if buffered == 0 {
            self.timestamp = first_timestamp;
        } else {
            let expected = self.timestamp + buffered as u64 / sb;
            let room = ((self.rings[0].write_space() - valid) as u64) / sb;
            match first_timestamp.checked_sub(expected) {
                Some(0) => {}
                Some(gap) if gap <= room => {
                    warn!(expected, first_timestamp, gap, "jitter buffer gap, zero-filling");
                    let zeros = vec![0u8; (gap * sb) as usize];
                    for ring in self.rings.iter_mut() {
                        ring.write(&zeros);
                    }
                    self.lost += gap;
                }
                _ => {
                    warn!(
                        expected,
                        first_timestamp,
                        dropped = buffered as u64 / sb,
                        "jitter buffer discontinuity, resyncing"
                    );
                    for ring in self.rings.iter_mut() {
                        ring.skip(buffered);
                    }
                    self.lost += buffered as u64 / sb;
                    self.timestamp = first_timestamp;
                }
            }
        }
        for (ring, packet) in self.rings.iter_mut().zip(&self.scratch) {
            ring.write(&packet[..valid]);
        }
    }
}

/// A stream opened through the generic API.
pub struct Dms {
    stream: Box<dyn Stream>,
    info: StreamInfo,
    jitter: Option<JitterBuffer>,
    sink: Option<Box<dyn SampleSink>>,
}

/// Open a stream on `device`.
///
/// `channels` selects the logical channels; `packet_symbols` is the native
/// packet size in samples per channel.
pub async fn create(
    device: &dyn Device,
    sid: &str,
    format: &str,
    channels: ChannelInfo,
    packet_symbols: usize,
    flags: StreamFlags,
) -> Result<Dms> {
    let request = StreamRequest::new(sid, format, channels, packet_symbols).with_flags(flags);
    create_ex(device, &request).await
}

/// Open a stream from a full [`StreamRequest`], including free-form
/// device parameters.
pub async fn create_ex(device: &dyn Device, request: &StreamRequest) -> Result<Dms> {
    if request.channels.count() == 0 {
        return Err(Error::InvalidArgument("no channels requested".into()));
    }
    let stream = device.create_stream(request).await?;
    let info = stream.stat();
    debug!(
        device = device.name(),
        sid = %request.sid,
        format = %request.format,
        channels = info.channels,
        packet_symbols = info.packet_symbols,
        "stream opened"
    );
    Ok(Dms::new(stream))
}

/// Synchronize `streams` through the device that created them.
pub async fn sync(device: &dyn Device, sync_type: &SyncType, streams: &mut [&mut Dms]) -> Result<()> {
    let mut raw: Vec<&mut dyn Stream> = Vec::with_capacity(streams.len());
    for dms in streams.iter_mut() {
        raw.push(dms.stream.as_mut());
    }
    debug!(device = device.name(), streams = raw.len(), sync = %sync_type, "sync");
    device.timer_op(&mut raw, sync_type).await
}

impl Dms {
    /// Wrap an already created stream.
    pub fn new(stream: Box<dyn Stream>) -> Self {
        let info = stream.stat();
        Dms {
            stream,
            info,
            jitter: None,
            sink: None,
        }
    }

    /// Attach a sink that receives every packet from [`recv`](Self::recv)
    /// and [`read`](Self::read).
    pub fn with_sink(mut self, sink: Box<dyn SampleSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Geometry captured when the stream was opened.
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn stat(&self) -> StreamInfo {
        self.stream.stat()
    }

    pub fn stats(&self) -> StreamStats {
        self.stream.stats()
    }

    pub fn direction(&self) -> StreamDirection {
        self.info.direction
    }

    pub fn stream_mut(&mut self) -> &mut dyn Stream {
        self.stream.as_mut()
    }

    /// Pollable descriptor of the stream.
    pub fn get_fd(&self) -> Result<i32> {
        let fd = self.stream.option_get("fd")?;
        i32::try_from(fd).map_err(|_| Error::OutOfRange(format!("descriptor {fd}")))
    }

    /// Tell the stream the caller is ready for data.
    pub async fn set_ready(&mut self) -> Result<()> {
        self.stream.option_set("ready", 1).await
    }

    pub async fn op(&mut self, command: StreamCommand, time: u64) -> Result<()> {
        self.stream.op(command, time).await
    }

    fn sample_bytes(&self) -> usize {
        self.info.packet_bytes / self.info.packet_symbols.max(1)
    }

    /// Receive one native packet per channel.
    ///
    /// Do not mix with [`read`](Self::read) on the same stream: samples
    /// held in the jitter buffer are not returned here.
    pub async fn recv(&mut self, buffers: &mut [&mut [u8]], timeout: Duration) -> Result<RecvInfo> {
        let sample_bytes = self.sample_bytes();
        let info = self.stream.recv(buffers, timeout).await?;
        if let Some(sink) = self.sink.as_mut() {
            let valid = info.samples * sample_bytes;
            let views: Vec<&[u8]> = buffers.iter().map(|b| &b[..valid.min(b.len())]).collect();
            sink.consume(&views, &info)?;
        }
        Ok(info)
    }

    pub async fn send(
        &mut self,
        buffers: &[&[u8]],
        samples: usize,
        timestamp: i64,
        timeout: Duration,
    ) -> Result<SendStat> {
        self.stream.send(buffers, samples, timestamp, timeout).await
    }

    /// Receive exactly `samples` samples per channel, whatever the native
    /// packet size.
    ///
    /// Native packets are buffered in per-channel rings and handed out in
    /// caller-sized pieces; `first_timestamp` of the result is the hardware
    /// time of the first returned sample. Short packets are kept as they
    /// are. A packet that does not continue the buffered data is preceded by
    /// zero-fill, and the filled samples are reported as `lost`.
    pub async fn read(
        &mut self,
        buffers: &mut [&mut [u8]],
        samples: usize,
        timeout: Duration,
    ) -> Result<RecvInfo> {
        if self.info.direction != StreamDirection::Rx {
            return Err(Error::NotSupported("read on a transmit stream".into()));
        }
        let channels = self.info.channels;
        let packet_bytes = self.info.packet_bytes;
        let sample_bytes = self.sample_bytes();
        let want = samples * sample_bytes;
        if buffers.len() != channels || buffers.iter().any(|b| b.len() < want) {
            return Err(Error::InvalidArgument(format!(
                "read of {samples} samples needs {channels} buffers of {want} bytes"
            )));
        }

        let fits = self
            .jitter
            .as_ref()
            .is_some_and(|j| j.capacity() >= 2 * want);
        if !fits {
            if self.jitter.as_ref().is_some_and(|j| j.available() != 0) {
                return Err(Error::InvalidArgument(format!(
                    "read of {samples} samples exceeds the jitter buffer holding unread data"
                )));
            }
            let jitter = JitterBuffer::new(channels, packet_bytes, sample_bytes, want);
            debug!(capacity = jitter.capacity(), channels, "jitter buffer sized");
            self.jitter = Some(jitter);
        }

        let Dms {
            stream,
            jitter,
            sink,
            ..
        } = self;
        let Some(jitter) = jitter.as_mut() else {
            return Err(Error::InvalidArgument("jitter buffer unavailable".into()));
        };

        while jitter.available() < want {
            let info = if jitter.direct(packet_bytes) {
                let mut views: Vec<&mut [u8]> = jitter
                    .rings
                    .iter_mut()
                    .map(|r| &mut r.write_ptr()[..packet_bytes])
                    .collect();
                let info = stream.recv(&mut views, timeout).await?;
                let valid = (info.samples * sample_bytes).min(packet_bytes);
                if let Some(sink) = sink.as_mut() {
                    let shared: Vec<&[u8]> = views.iter().map(|v| &v[..valid]).collect();
                    sink.consume(&shared, &info)?;
                }
                drop(views);

                for ring in jitter.rings.iter_mut() {
                    ring.commit_write(valid);
                }
                jitter.timestamp = info.first_timestamp;
                info
            } else {
                let mut views: Vec<&mut [u8]> =
                    jitter.scratch.iter_mut().map(|p| &mut p[..]).collect();
                let info = stream.recv(&mut views, timeout).await?;
                let valid = (info.samples * sample_bytes).min(packet_bytes);
                if let Some(sink) = sink.as_mut() {
                    let shared: Vec<&[u8]> = views.iter().map(|v| &v[..valid]).collect();
                    sink.consume(&shared, &info)?;
                }
                drop(views);

                jitter.append(info.first_timestamp, valid);
                info
            };
            jitter.lost += info.lost;
            trace!(
                first_timestamp = info.first_timestamp,
                samples = info.samples,
                buffered = jitter.available(),
                "jitter buffer filled"
            );
        }

        for (ring, buf) in jitter.rings.iter_mut().zip(buffers.iter_mut()) {
            ring.read(&mut buf[..want]);
        }
        let first_timestamp = jitter.timestamp;
        jitter.timestamp += samples as u64;
        let lost = std::mem::take(&mut jitter.lost);

        Ok(RecvInfo {
            samples,
            first_timestamp,
            lost,
        })
    }

    /// Flush the sink and destroy the stream. Safe to call twice.
    pub async fn destroy(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }
        self.jitter = None;
        self.stream.destroy().await
    }
}

impl std::fmt::Debug for Dms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dms")
            .field("info", &self.info)
            .field("jitter", &self.jitter.as_ref().map(JitterBuffer::capacity))
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
