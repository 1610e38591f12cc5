//! Burst-framed stream engine.
//!
//! [`BurstStream`] moves host sample packets to and from DMA blocks made of
//! fixed-size bursts (see [`wire`](crate::wire)). On receive it tracks
//! partially consumed blocks across calls and inserts zero-fill when burst
//! timestamps reveal dropped samples, so the host stream stays aligned to
//! hardware time. On transmit it frames host samples into bursts and commits
//! one DMA block per call.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use usdr_core::{
    DmaBuffer, DmaMeta, Error, LowlevelDevice, RecvInfo, Result, SendStat, SlotGuard, Stream,
    StreamCommand, StreamDirection, StreamInfo, StreamStats,
};
use usdr_xdsp::Transform;

use crate::geometry::BurstGeometry;
use crate::wire::{BurstHeader, HEADER_SIZE};

/// A DMA block checked out from the lowlevel layer and not yet fully
/// consumed. Owned by the stream between `recv` calls.
#[derive(Debug)]
struct OutstandingBurst {
    buffer: DmaBuffer,
    /// Wire samples already delivered from this block.
    consumed_samples: usize,
    /// Wire bytes already parsed, headers included.
    consumed_bytes: usize,
    /// Bursts entered so far.
    bursts_seen: usize,
}

impl OutstandingBurst {
    fn new(buffer: DmaBuffer) -> Self {
        OutstandingBurst {
            buffer,
            consumed_samples: 0,
            consumed_bytes: 0,
            bursts_seen: 0,
        }
    }
}

/// One RX or TX stream on one physical device.
pub struct BurstStream {
    pub(crate) lowlevel: Arc<dyn LowlevelDevice>,
    pub(crate) stream_id: u32,
    pub(crate) fd: Option<i32>,
    pub(crate) geometry: BurstGeometry,
    pub(crate) transform: Transform,
    pub(crate) slot: SlotGuard,

    /// Timestamp of the most recent burst header.
    blk_time_prev: Option<u64>,
    /// Zero-fill samples still owed to the host.
    lag_remaining: u64,
    outstanding: Option<OutstandingBurst>,
    /// DMA blocks acquired (RX) or committed (TX).
    blocks: u64,
    overruns: u64,
    last_command: Option<(StreamCommand, u64)>,
    destroyed: bool,
}

impl BurstStream {
    pub(crate) fn new(
        lowlevel: Arc<dyn LowlevelDevice>,
        stream_id: u32,
        fd: Option<i32>,
        geometry: BurstGeometry,
        transform: Transform,
        slot: SlotGuard,
    ) -> Self {
        BurstStream {
            lowlevel,
            stream_id,
            fd,
            geometry,
            transform,
            slot,
            blk_time_prev: None,
            lag_remaining: 0,
            outstanding: None,
            blocks: 0,
            overruns: 0,
            last_command: None,
            destroyed: false,
        }
    }

    pub fn geometry(&self) -> &BurstGeometry {
        &self.geometry
    }

    /// The last command accepted by [`Stream::op`].
    pub fn last_command(&self) -> Option<(StreamCommand, u64)> {
        self.last_command
    }

    /// `true` while a partially consumed DMA block is held.
    pub fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    fn ensure_live(&self, direction: StreamDirection) -> Result<()> {
        if self.destroyed {
            return Err(Error::NoDevice(format!(
                "stream {} already destroyed",
                self.stream_id
            )));
        }
        if self.geometry.direction != direction {
            return Err(Error::NotSupported(format!(
                "{direction} operation on a {} stream",
                self.geometry.direction
            )));
        }
        Ok(())
    }

    /// Lag implied by a new burst timestamp.
    ///
    /// A timestamp that does not move forward by at least one block resyncs
    /// the stream without zero-fill.
    fn burst_lag(&self, burst_time: u64) -> u64 {
        let Some(prev) = self.blk_time_prev else {
            return 0;
        };
        let expected = prev.wrapping_add(self.geometry.block_samples as u64);
        if burst_time < expected {
            warn!(
                stream = self.stream_id,
                burst_time, expected, "burst timestamp moved backwards, resyncing"
            );
            return 0;
        }
        burst_time - expected
    }

    /// Consume as much of `cur` as the host packet still needs.
    ///
    /// Works purely on memory; the caller decides whether the block goes
    /// back to the lowlevel layer or stays outstanding.
    fn consume_block(
        &mut self,
        cur: &mut OutstandingBurst,
        host: &mut [u8],
        progress: &mut RecvProgress,
    ) -> Result<()> {
        let g = self.geometry;
        let wire_bps = g.wire_bytes_per_sample();
        let host_bps = g.host_bytes_per_sample();
        let pkt = g.packet_symbols as u64;
        let stride = g.burst_bytes + HEADER_SIZE;
        let wire_pkt = g.block_capacity();

        let mut burst_time = self.blk_time_prev.unwrap_or(0);

        loop {
            let mut burst_symbols = g.burst_symbols;

            if cur.consumed_bytes % stride == 0 {
                let header = BurstHeader::decode(&cur.buffer.data[cur.consumed_bytes..])?;
                burst_time = header.timestamp;

                let lag = self.burst_lag(burst_time);
                if lag != 0 {
                    warn!(
                        stream = self.stream_id,
                        block = self.blocks,
                        lag,
                        burst_time,
                        overruns = self.overruns,
                        "burst lag"
                    );
                }
                self.blk_time_prev = Some(burst_time);
                self.lag_remaining = lag;

                cur.consumed_bytes += HEADER_SIZE;
                cur.bursts_seen += 1;
            } else {
                burst_symbols -= cur.consumed_samples % g.burst_symbols;
            }

            let in_burst = (cur.consumed_samples % g.block_samples) as u64;

            if self.lag_remaining != 0 {
                let fill = if progress.host_off == 0 {
                    self.overruns += self.lag_remaining / pkt;
                    self.lag_remaining %= pkt;
                    progress.first_timestamp =
                        (burst_time + in_burst).wrapping_sub(self.lag_remaining);
                    self.lag_remaining as usize
                } else {
                    (self.lag_remaining as usize).min(progress.host_rem)
                };

                let bytes = fill * host_bps;
                host[progress.host_off..progress.host_off + bytes].fill(0);
                progress.host_off += bytes;
                progress.host_rem -= fill;
                self.lag_remaining -= fill as u64;
            }

            let wire_rem = (wire_pkt - cur.consumed_samples).min(burst_symbols);
            let n = progress.host_rem.min(wire_rem);
            if n == 0 {
                break;
            }

            if progress.host_off == 0 {
                progress.first_timestamp = burst_time + in_burst;
            }

            trace!(
                stream = self.stream_id,
                burst = cur.bursts_seen,
                burst_time,
                host_off = progress.host_off,
                wire_off = cur.consumed_bytes,
                consumed = cur.consumed_samples,
                take = n,
                "recv"
            );

            let wire_bytes = n * wire_bps;
            let host_bytes = n * host_bps;
            self.transform.convert(
                &cur.buffer.data[cur.consumed_bytes..cur.consumed_bytes + wire_bytes],
                &mut host[progress.host_off..progress.host_off + host_bytes],
            );

            cur.consumed_bytes += wire_bytes;
            cur.consumed_samples += n;
            progress.host_off += host_bytes;
            progress.host_rem -= n;

            if progress.host_rem == 0 || cur.consumed_samples == wire_pkt {
                break;
            }
        }

        Ok(())
    }
}

/// Host-side cursor of one `recv` call.
#[derive(Debug)]
struct RecvProgress {
    host_off: usize,
    host_rem: usize,
    first_timestamp: u64,
}

#[async_trait]
impl Stream for BurstStream {
    fn direction(&self) -> StreamDirection {
        self.geometry.direction
    }

    async fn op(&mut self, command: StreamCommand, time: u64) -> Result<()> {
        if self.destroyed {
            return Err(Error::NoDevice(format!(
                "stream {} already destroyed",
                self.stream_id
            )));
        }
        debug!(stream = self.stream_id, ?command, time, "stream op");
        self.last_command = Some((command, time));
        Ok(())
    }

    async fn recv(&mut self, buffers: &mut [&mut [u8]], timeout: Duration) -> Result<RecvInfo> {
        self.ensure_live(StreamDirection::Rx)?;

        let g = self.geometry;
        let host: &mut [u8] = buffers
            .first_mut()
            .ok_or_else(|| Error::InvalidArgument("no receive buffer".into()))?;
        if host.len() < g.packet_bytes() {
            return Err(Error::InvalidArgument(format!(
                "receive buffer of {} bytes, packet needs {}",
                host.len(),
                g.packet_bytes()
            )));
        }

        let mut progress = RecvProgress {
            host_off: 0,
            host_rem: g.packet_symbols,
            first_timestamp: u64::MAX,
        };

        while progress.host_rem != 0 {
            let mut cur = match self.outstanding.take() {
                Some(cur) => cur,
                None => {
                    let buffer = match self.lowlevel.recv_dma_wait(self.stream_id, timeout).await
                    {
                        Ok(buffer) => buffer,
                        // Deliver what is already in the host buffer as a
                        // short packet.
                        Err(e) if progress.host_off != 0 => {
                            warn!(
                                stream = self.stream_id,
                                error = %e,
                                samples = g.packet_symbols - progress.host_rem,
                                "DMA wait failed mid-packet, returning short packet"
                            );
                            break;
                        }
                        Err(e) => return Err(e),
                    };
                    self.blocks += 1;
                    if buffer.data.len() < g.block_size() {
                        let len = buffer.data.len();
                        self.lowlevel
                            .recv_dma_release(self.stream_id, buffer)
                            .await?;
                        return Err(Error::Transport(format!(
                            "short DMA block: {len} bytes, expected {}",
                            g.block_size()
                        )));
                    }
                    OutstandingBurst::new(buffer)
                }
            };

            if let Err(e) = self.consume_block(&mut cur, host, &mut progress) {
                self.outstanding = Some(cur);
                return Err(e);
            }

            if cur.consumed_samples == g.block_capacity() {
                self.lowlevel
                    .recv_dma_release(self.stream_id, cur.buffer)
                    .await?;
            } else {
                self.outstanding = Some(cur);
            }
        }

        trace!(
            stream = self.stream_id,
            first_timestamp = progress.first_timestamp,
            samples = g.packet_symbols - progress.host_rem,
            "recv done"
        );

        Ok(RecvInfo {
            samples: g.packet_symbols - progress.host_rem,
            first_timestamp: progress.first_timestamp,
            lost: 0,
        })
    }

    async fn send(
        &mut self,
        buffers: &[&[u8]],
        samples: usize,
        timestamp: i64,
        timeout: Duration,
    ) -> Result<SendStat> {
        self.ensure_live(StreamDirection::Tx)?;

        let g = self.geometry;
        let capacity = g.block_capacity();
        if samples > capacity {
            warn!(
                stream = self.stream_id,
                samples,
                burst_count = g.burst_count,
                burst_symbols = g.burst_symbols,
                "frame is too big"
            );
            return Err(Error::OutOfRange(format!(
                "{samples} samples, max {}x{}",
                g.burst_count, g.burst_symbols
            )));
        }
        if samples % g.tx_sample_multiple != 0 {
            warn!(
                stream = self.stream_id,
                samples,
                multiple = g.tx_sample_multiple,
                "samples not rounded"
            );
            return Err(Error::InvalidArgument(format!(
                "{samples} samples is not a multiple of {}",
                g.tx_sample_multiple
            )));
        }

        let host_bps = g.host_bytes_per_sample();
        let wire_bps = g.wire_bytes_per_sample();
        let host: &[u8] = buffers
            .first()
            .ok_or_else(|| Error::InvalidArgument("no transmit buffer".into()))?;
        if host.len() < samples * host_bps {
            return Err(Error::InvalidArgument(format!(
                "transmit buffer of {} bytes, {samples} samples need {}",
                host.len(),
                samples * host_bps
            )));
        }

        let mut buffer = self.lowlevel.send_dma_get(self.stream_id, timeout).await?;
        let needed = samples.div_ceil(g.block_samples) * HEADER_SIZE + samples * wire_bps;
        if buffer.data.len() < needed {
            let len = buffer.data.len();
            // The slot goes back to the lowlevel ring empty.
            self.lowlevel
                .send_dma_commit(self.stream_id, buffer, 0, DmaMeta { timestamp })
                .await?;
            return Err(Error::Transport(format!(
                "short DMA block: {len} bytes, need {needed}"
            )));
        }

        trace!(stream = self.stream_id, timestamp, samples, "send");

        let ignore_timestamp = timestamp < 0;
        let mut wire_off = 0;
        let mut host_off = 0;
        for s in (0..samples).step_by(g.block_samples) {
            let n = (samples - s).min(g.block_samples);
            let wire_bytes = n * wire_bps;
            let host_bytes = n * host_bps;

            BurstHeader {
                ignore_timestamp,
                payload_len: wire_bytes as u16,
                timestamp: (timestamp as u64).wrapping_add(s as u64),
            }
            .encode(&mut buffer.data[wire_off..]);

            let payload = wire_off + HEADER_SIZE;
            self.transform.convert(
                &host[host_off..host_off + host_bytes],
                &mut buffer.data[payload..payload + wire_bytes],
            );

            wire_off += HEADER_SIZE + wire_bytes;
            host_off += host_bytes;
        }

        self.blocks += 1;
        self.lowlevel
            .send_dma_commit(self.stream_id, buffer, wire_off, DmaMeta { timestamp })
            .await?;

        Ok(SendStat::default())
    }

    fn stat(&self) -> StreamInfo {
        StreamInfo {
            direction: self.geometry.direction,
            channels: 1,
            packet_bytes: self.geometry.packet_bytes(),
            packet_symbols: self.geometry.packet_symbols,
            burst_count: self.geometry.burst_count,
        }
    }

    fn stats(&self) -> StreamStats {
        StreamStats {
            buffers: self.blocks,
            overruns: self.overruns,
            lag_pending: self.lag_remaining,
        }
    }

    fn option_get(&self, name: &str) -> Result<i64> {
        match name {
            "fd" => self.fd.map(i64::from).ok_or_else(|| {
                Error::NotSupported(format!(
                    "stream {} has no pollable descriptor",
                    self.stream_id
                ))
            }),
            "overruns" => Ok(self.overruns as i64),
            other => Err(Error::InvalidArgument(format!("unknown option '{other}'"))),
        }
    }

    async fn option_set(&mut self, name: &str, value: i64) -> Result<()> {
        match name {
            "ready" => {
                debug!(stream = self.stream_id, value, "ready");
                Ok(())
            }
            other => Err(Error::InvalidArgument(format!(
                "option '{other}' is read-only or unknown"
            ))),
        }
    }

    async fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        debug!(stream = self.stream_id, direction = %self.geometry.direction, "destroying stream");

        let mut first_err = None;
        if let Some(cur) = self.outstanding.take() {
            if let Err(e) = self.lowlevel.recv_dma_release(self.stream_id, cur.buffer).await {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.lowlevel.stream_deinitialize(self.stream_id).await {
            first_err.get_or_insert(e);
        }
        self.slot.release();

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for BurstStream {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!(
                stream = self.stream_id,
                outstanding = self.outstanding.is_some(),
                "burst stream dropped without destroy"
            );
        }
    }
}

impl std::fmt::Debug for BurstStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurstStream")
            .field("stream_id", &self.stream_id)
            .field("geometry", &self.geometry)
            .field("outstanding", &self.outstanding.is_some())
            .field("overruns", &self.overruns)
            .finish()
    }
}
