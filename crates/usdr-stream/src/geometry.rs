//! Burst geometry: how host packets map onto DMA blocks of fixed bursts.

use usdr_core::{Error, Result, StreamDirection, StreamFormat};
use usdr_xdsp::Transform;

use crate::wire::{BURST_PAYLOAD, BURST_SIZE};

/// Immutable sizing of one burst stream, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstGeometry {
    pub direction: StreamDirection,
    /// Samples per host packet.
    pub packet_symbols: usize,
    /// Bursts per DMA block.
    pub burst_count: usize,
    /// Wire samples per burst.
    pub burst_symbols: usize,
    /// Payload bytes per burst.
    pub burst_bytes: usize,
    /// Host bytes equivalent to one burst payload.
    pub burst_host_bytes: usize,
    /// Samples per header-delimited block; the expected timestamp step
    /// between consecutive bursts.
    pub block_samples: usize,
    /// Transmit sample counts must be a multiple of this.
    pub tx_sample_multiple: usize,
}

impl BurstGeometry {
    /// Size a stream carrying `packet_symbols` host samples per packet.
    ///
    /// `transform` converts wire to host for RX and host to wire for TX.
    pub fn new(
        direction: StreamDirection,
        format: &StreamFormat,
        transform: &Transform,
        packet_symbols: usize,
    ) -> Result<Self> {
        if packet_symbols == 0 {
            return Err(Error::InvalidArgument("packet size of zero samples".into()));
        }

        let wire_bits = format.wire.sample_bits();
        let burst_symbols = BURST_PAYLOAD * 8 / wire_bits;

        let (burst_count, tx_sample_multiple) = match direction {
            StreamDirection::Rx => {
                // Packets that don't divide into whole bursts use a block
                // of about 0.4 packet.
                let count = if packet_symbols % burst_symbols != 0 {
                    2 * packet_symbols / burst_symbols / 5
                } else {
                    packet_symbols / burst_symbols
                };
                (count, 1)
            }
            StreamDirection::Tx => {
                let multiple = if format.wire.scalar_bits() == 12 { 16 } else { 4 };
                if packet_symbols % multiple != 0 {
                    return Err(Error::InvalidArgument(format!(
                        "transmit packet must be a multiple of {multiple} samples, requested {packet_symbols}"
                    )));
                }
                (packet_symbols.div_ceil(burst_symbols), multiple)
            }
        };

        let burst_host_bytes = match direction {
            StreamDirection::Rx => transform.size(BURST_PAYLOAD, false),
            StreamDirection::Tx => transform.size(BURST_PAYLOAD, true),
        };

        Ok(BurstGeometry {
            direction,
            packet_symbols,
            burst_count: burst_count.max(1),
            burst_symbols,
            burst_bytes: BURST_PAYLOAD,
            burst_host_bytes,
            block_samples: burst_symbols,
            tx_sample_multiple,
        })
    }

    /// Bytes per DMA block requested from the lowlevel layer.
    pub fn block_size(&self) -> usize {
        BURST_SIZE * self.burst_count
    }

    /// Wire samples carried by one DMA block.
    pub fn block_capacity(&self) -> usize {
        self.burst_count * self.burst_symbols
    }

    pub fn wire_bytes_per_sample(&self) -> usize {
        self.burst_bytes / self.burst_symbols
    }

    pub fn host_bytes_per_sample(&self) -> usize {
        self.burst_host_bytes / self.burst_symbols
    }

    /// Host bytes of one full packet.
    pub fn packet_bytes(&self) -> usize {
        self.packet_symbols * self.host_bytes_per_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usdr_xdsp::get_transform;

    fn geometry(direction: StreamDirection, fmt: &str, pktsyms: usize) -> Result<BurstGeometry> {
        let format = StreamFormat::parse(fmt)?;
        let transform = match direction {
            StreamDirection::Rx => get_transform(format.wire, format.host)?,
            StreamDirection::Tx => get_transform(format.host, format.wire)?,
        };
        BurstGeometry::new(direction, &format, &transform, pktsyms)
    }

    #[test]
    fn ci16_rx_two_bursts() {
        let g = geometry(StreamDirection::Rx, "ci16", 2040).unwrap();
        assert_eq!(g.burst_symbols, 1020);
        assert_eq!(g.burst_count, 2);
        assert_eq!(g.block_size(), 8192);
        assert_eq!(g.wire_bytes_per_sample(), 4);
        assert_eq!(g.host_bytes_per_sample(), 4);
    }

    #[test]
    fn ci12_burst_symbols() {
        let g = geometry(StreamDirection::Rx, "cf32@ci12", 1360).unwrap();
        assert_eq!(g.burst_symbols, 1360);
        assert_eq!(g.burst_count, 1);
        assert_eq!(g.wire_bytes_per_sample(), 3);
        assert_eq!(g.host_bytes_per_sample(), 8);
        assert_eq!(g.packet_bytes(), 1360 * 8);
    }

    #[test]
    fn rx_uneven_packet_uses_partial_block() {
        // 5000 % 1020 != 0 -> 2 * 5000 / 1020 / 5 = 1
        let g = geometry(StreamDirection::Rx, "cf32", 5000).unwrap();
        assert_eq!(g.burst_count, 1);

        // Small packets still get one burst.
        let g = geometry(StreamDirection::Rx, "cf32", 100).unwrap();
        assert_eq!(g.burst_count, 1);
    }

    #[test]
    fn tx_rounds_up_and_checks_multiple() {
        let g = geometry(StreamDirection::Tx, "cf32", 2044).unwrap();
        assert_eq!(g.burst_count, 3);
        assert_eq!(g.tx_sample_multiple, 4);
        assert_eq!(g.host_bytes_per_sample(), 8);

        assert!(matches!(
            geometry(StreamDirection::Tx, "ci16", 1022),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            geometry(StreamDirection::Tx, "ci12", 1020),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(
            geometry(StreamDirection::Tx, "ci12", 1360)
                .unwrap()
                .tx_sample_multiple,
            16
        );
    }

    #[test]
    fn zero_packet_rejected() {
        assert!(geometry(StreamDirection::Rx, "ci16", 0).is_err());
    }
}
