//! Burst wire format.
//!
//! Every burst in a DMA block starts with a 16-byte header followed by the
//! payload of wire-format samples:
//!
//! ```text
//! offset  size  field
//!      0     1  control: bit 4 = ignore timestamp
//!      1     2  payload length in bytes, little endian
//!      3     5  reserved, zero
//!      8     8  timestamp of the first sample, little endian
//! ```
//!
//! This module is a pure codec with no I/O.

use bytes::{Buf, BufMut};
use usdr_core::{Error, Result};

/// Burst header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Bytes per burst including the header.
pub const BURST_SIZE: usize = 4096;

/// Payload bytes per burst.
pub const BURST_PAYLOAD: usize = BURST_SIZE - HEADER_SIZE;

const IGNORE_TIMESTAMP: u8 = 1 << 4;

/// Parsed burst header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstHeader {
    /// Transmit as soon as possible instead of at `timestamp`.
    pub ignore_timestamp: bool,
    /// Payload bytes that follow the header.
    pub payload_len: u16,
    /// Hardware sample tick of the first payload sample.
    pub timestamp: u64,
}

impl BurstHeader {
    /// Parse a header from the first [`HEADER_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<BurstHeader> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Transport(format!(
                "burst header too short: {} bytes, need {HEADER_SIZE}",
                data.len()
            )));
        }

        let mut buf = &data[..HEADER_SIZE];
        let control = buf.get_u8();
        let payload_len = buf.get_u16_le();
        buf.advance(5);
        let timestamp = buf.get_u64_le();

        Ok(BurstHeader {
            ignore_timestamp: control & IGNORE_TIMESTAMP != 0,
            payload_len,
            timestamp,
        })
    }

    /// Write the header into the first [`HEADER_SIZE`] bytes of `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than [`HEADER_SIZE`].
    pub fn encode(&self, out: &mut [u8]) {
        let mut buf = &mut out[..HEADER_SIZE];
        buf.put_u8(if self.ignore_timestamp { IGNORE_TIMESTAMP } else { 0 });
        buf.put_u16_le(self.payload_len);
        buf.put_bytes(0, 5);
        buf.put_u64_le(self.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout_is_bit_exact() {
        let hdr = BurstHeader {
            ignore_timestamp: true,
            payload_len: 4080,
            timestamp: 0x0102_0304_0506_0708,
        };
        let mut out = [0xAAu8; HEADER_SIZE];
        hdr.encode(&mut out);
        assert_eq!(
            out,
            [
                0x10, 0xF0, 0x0F, 0, 0, 0, 0, 0, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01
            ]
        );
    }

    #[test]
    fn decode_reads_fields() {
        let raw = [
            0x00, 0x10, 0x00, 0, 0, 0, 0, 0, 0xE8, 0x03, 0, 0, 0, 0, 0, 0,
        ];
        let hdr = BurstHeader::decode(&raw).unwrap();
        assert!(!hdr.ignore_timestamp);
        assert_eq!(hdr.payload_len, 16);
        assert_eq!(hdr.timestamp, 1000);
    }

    #[test]
    fn decode_ignores_reserved_bits() {
        let mut raw = [0xFFu8; HEADER_SIZE];
        raw[0] = 0x0F;
        let hdr = BurstHeader::decode(&raw).unwrap();
        assert!(!hdr.ignore_timestamp);
        assert_eq!(hdr.payload_len, 0xFFFF);
    }

    #[test]
    fn decode_too_short() {
        assert!(matches!(
            BurstHeader::decode(&[0u8; 8]),
            Err(Error::Transport(_))
        ));
    }
}
