//! Core types shared by every stream implementation.
//!
//! These types describe a stream request and its results independently of
//! whether the stream is backed by one physical device or by an aggregate of
//! several.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use crate::channels::ChannelInfo;
use crate::error::{Error, Result};

/// Direction of a sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// Hardware to host.
    Rx,
    /// Host to hardware.
    Tx,
}

impl StreamDirection {
    /// Resolve a stream identifier (`"rx/0"` or `"tx/0"`) to a direction.
    pub fn from_sid(sid: &str) -> Result<Self> {
        match sid {
            "rx/0" => Ok(StreamDirection::Rx),
            "tx/0" => Ok(StreamDirection::Tx),
            other => Err(Error::InvalidArgument(format!("unknown stream id '{other}'"))),
        }
    }

    /// Index into per-direction tables (RX = 0, TX = 1).
    pub fn index(self) -> usize {
        match self {
            StreamDirection::Rx => 0,
            StreamDirection::Tx => 1,
        }
    }

    /// The stream identifier for this direction.
    pub fn sid(self) -> &'static str {
        match self {
            StreamDirection::Rx => "rx/0",
            StreamDirection::Tx => "tx/0",
        }
    }
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Rx => write!(f, "RX"),
            StreamDirection::Tx => write!(f, "TX"),
        }
    }
}

/// Stream control command passed to [`Stream::op`](crate::stream::Stream::op).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    Start,
    Stop,
    /// Start at the given hardware time.
    StartAt,
    /// Stop at the given hardware time.
    StopAt,
}

/// Stream creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFlags(u32);

impl StreamFlags {
    pub const NONE: StreamFlags = StreamFlags(0);
    /// The stream must expose a pollable native descriptor.
    pub const NEED_FD: StreamFlags = StreamFlags(1);
    /// The caller wants transmit status from every `send`.
    pub const NEED_TX_STAT: StreamFlags = StreamFlags(2);

    pub fn from_bits(bits: u32) -> Self {
        StreamFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StreamFlags {
    type Output = StreamFlags;

    fn bitor(self, rhs: StreamFlags) -> StreamFlags {
        StreamFlags(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Sample formats
// ---------------------------------------------------------------------------

/// Layout of one sample, on the wire or in host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 12-bit signed integer, two samples packed in three bytes.
    I12,
    I16,
    F32,
    /// Interleaved I/Q of 12-bit integers.
    CI12,
    CI16,
    CF32,
}

impl SampleFormat {
    pub fn is_complex(self) -> bool {
        matches!(
            self,
            SampleFormat::CI12 | SampleFormat::CI16 | SampleFormat::CF32
        )
    }

    /// Bits of one scalar component.
    pub fn scalar_bits(self) -> usize {
        match self {
            SampleFormat::I12 | SampleFormat::CI12 => 12,
            SampleFormat::I16 | SampleFormat::CI16 => 16,
            SampleFormat::F32 | SampleFormat::CF32 => 32,
        }
    }

    /// Bits of one full sample (both components for complex formats).
    pub fn sample_bits(self) -> usize {
        if self.is_complex() {
            self.scalar_bits() * 2
        } else {
            self.scalar_bits()
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::I12 => "i12",
            SampleFormat::I16 => "i16",
            SampleFormat::F32 => "f32",
            SampleFormat::CI12 => "ci12",
            SampleFormat::CI16 => "ci16",
            SampleFormat::CF32 => "cf32",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i12" => Ok(SampleFormat::I12),
            "i16" => Ok(SampleFormat::I16),
            "f32" => Ok(SampleFormat::F32),
            "ci12" => Ok(SampleFormat::CI12),
            "ci16" => Ok(SampleFormat::CI16),
            "cf32" => Ok(SampleFormat::CF32),
            _ => Err(Error::InvalidArgument(format!("unknown sample format '{s}'"))),
        }
    }
}

/// A parsed `"host[@wire]"` data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Format delivered to or taken from the application.
    pub host: SampleFormat,
    /// Format carried in DMA buffers; always complex 12 or 16 bit.
    pub wire: SampleFormat,
}

impl StreamFormat {
    /// Parse a data format string such as `"cf32"`, `"ci16"` or `"cf32@ci12"`.
    ///
    /// Without an explicit wire part the host name is reused for the wire.
    /// A complex wire name that carries no 12/16 bit width (e.g. `cf32`)
    /// selects `ci16`. Non-complex wire formats are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split('@');
        let host_name = parts.next().unwrap_or_default();
        let wire_name = parts.next();
        if parts.next().is_some() {
            return Err(Error::InvalidArgument(format!("malformed data format '{s}'")));
        }

        let host: SampleFormat = host_name.parse()?;
        let wire_name = wire_name.unwrap_or(host_name);

        let wire = match wire_name.parse::<SampleFormat>() {
            Ok(f @ (SampleFormat::CI12 | SampleFormat::CI16)) => f,
            Ok(SampleFormat::CF32) => SampleFormat::CI16,
            Ok(other) => {
                return Err(Error::InvalidArgument(format!(
                    "wire format '{other}' is not a complex 12/16 bit format"
                )));
            }
            Err(_) if wire_name.starts_with(['c', 'C']) => SampleFormat::CI16,
            Err(e) => return Err(e),
        };

        Ok(StreamFormat { host, wire })
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.host, self.wire)
    }
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Everything a device needs to build a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Stream identifier, `"rx/0"` or `"tx/0"`.
    pub sid: String,
    /// Data format string, `"host[@wire]"`.
    pub format: String,
    pub channels: ChannelInfo,
    /// Samples per host packet.
    pub packet_symbols: usize,
    pub flags: StreamFlags,
    /// Free-form device-specific parameters.
    pub parameters: Option<String>,
}

impl StreamRequest {
    pub fn new(sid: &str, format: &str, channels: ChannelInfo, packet_symbols: usize) -> Self {
        StreamRequest {
            sid: sid.to_string(),
            format: format.to_string(),
            channels,
            packet_symbols,
            flags: StreamFlags::NONE,
            parameters: None,
        }
    }

    pub fn with_flags(mut self, flags: StreamFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_parameters(mut self, parameters: &str) -> Self {
        self.parameters = Some(parameters.to_string());
        self
    }
}

/// Static description of a created stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub direction: StreamDirection,
    pub channels: usize,
    /// Host bytes per channel in one native packet.
    pub packet_bytes: usize,
    /// Samples per channel in one native packet.
    pub packet_symbols: usize,
    /// Bursts per DMA block.
    pub burst_count: usize,
}

/// Per-call result of a receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecvInfo {
    /// Valid samples written per channel, zero-fill included.
    pub samples: usize,
    /// Hardware timestamp of the first returned sample.
    pub first_timestamp: u64,
    /// Samples lost during this call. Loss is reported through
    /// [`StreamStats::overruns`] instead, so single streams leave this zero.
    pub lost: u64,
}

/// Per-call result of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendStat {
    pub underruns: u64,
    /// Bytes queued in the device FIFO, where reported.
    pub fifo_used: usize,
    pub last_hw_time: u64,
}

/// Running counters of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    /// DMA buffers acquired (RX) or committed (TX).
    pub buffers: u64,
    /// Whole host packets lost to hardware overruns.
    pub overruns: u64,
    /// Zero-fill samples still owed to the next receive.
    pub lag_pending: u64,
}

/// Cross-stream synchronization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncType {
    None,
    All,
    ExtAll,
    /// Arm every device on the next reference pulse.
    Sysref,
    /// Generate the reference pulse.
    SysrefGen,
    Other(String),
}

impl SyncType {
    pub fn parse(s: &str) -> Self {
        match s {
            "none" => SyncType::None,
            "all" => SyncType::All,
            "extall" => SyncType::ExtAll,
            "sysref" => SyncType::Sysref,
            "sysref+gen" => SyncType::SysrefGen,
            other => SyncType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SyncType::None => "none",
            SyncType::All => "all",
            SyncType::ExtAll => "extall",
            SyncType::Sysref => "sysref",
            SyncType::SysrefGen => "sysref+gen",
            SyncType::Other(s) => s,
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_sid() {
        assert_eq!(StreamDirection::from_sid("rx/0").unwrap(), StreamDirection::Rx);
        assert_eq!(StreamDirection::from_sid("tx/0").unwrap(), StreamDirection::Tx);
        assert!(matches!(
            StreamDirection::from_sid("rx/1"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn flags_combine() {
        let f = StreamFlags::NEED_FD | StreamFlags::NEED_TX_STAT;
        assert!(f.contains(StreamFlags::NEED_FD));
        assert!(f.contains(StreamFlags::NEED_TX_STAT));
        assert!(!StreamFlags::NONE.contains(StreamFlags::NEED_FD));
        assert_eq!(f.bits(), 3);
    }

    #[test]
    fn sample_format_parse_case_insensitive() {
        assert_eq!("CF32".parse::<SampleFormat>().unwrap(), SampleFormat::CF32);
        assert_eq!("ci12".parse::<SampleFormat>().unwrap(), SampleFormat::CI12);
        assert!("cf64".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn sample_bits() {
        assert_eq!(SampleFormat::CI16.sample_bits(), 32);
        assert_eq!(SampleFormat::CI12.sample_bits(), 24);
        assert_eq!(SampleFormat::F32.sample_bits(), 32);
    }

    #[test]
    fn stream_format_host_only() {
        let f = StreamFormat::parse("cf32").unwrap();
        assert_eq!(f.host, SampleFormat::CF32);
        assert_eq!(f.wire, SampleFormat::CI16);

        let f = StreamFormat::parse("ci12").unwrap();
        assert_eq!(f.wire, SampleFormat::CI12);
    }

    #[test]
    fn stream_format_explicit_wire() {
        let f = StreamFormat::parse("cf32@ci12").unwrap();
        assert_eq!(f.host, SampleFormat::CF32);
        assert_eq!(f.wire, SampleFormat::CI12);
        assert_eq!(f.to_string(), "cf32@ci12");
    }

    #[test]
    fn stream_format_rejects_real_wire() {
        assert!(matches!(
            StreamFormat::parse("i16"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(StreamFormat::parse("cf32@i12").is_err());
        assert!(StreamFormat::parse("cf32@ci16@ci12").is_err());
    }

    #[test]
    fn sync_type_round_trip() {
        for s in ["none", "all", "extall", "sysref", "sysref+gen", "pps"] {
            assert_eq!(SyncType::parse(s).as_str(), s);
        }
        assert_eq!(SyncType::parse("pps"), SyncType::Other("pps".into()));
    }
}
