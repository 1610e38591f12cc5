//! AggregateStream -- one logical stream spread over several devices.
//!
//! Channel buffers are handed to the sub-streams in ascending device order,
//! `step` buffers each. I/O on the sub-streams runs concurrently and is
//! joined before the per-device results are folded into one status record:
//!
//! - receive: `samples` is the minimum across devices, `first_timestamp`
//!   comes from the lowest device index, `lost` is the sum;
//! - send: `underruns` are summed, `fifo_used` is the maximum and
//!   `last_hw_time` comes from the lowest device index.

use async_trait::async_trait;
use futures::future::join_all;
use std::any::Any;
use std::time::Duration;
use tracing::{debug, warn};

use usdr_core::{
    Error, RecvInfo, Result, SendStat, SlotGuard, Stream, StreamCommand, StreamDirection,
    StreamInfo, StreamStats,
};

/// A sub-stream and the device it lives on.
pub(crate) struct Member {
    pub(crate) device_index: usize,
    pub(crate) stream: Box<dyn Stream>,
    pub(crate) fd: i32,
}

/// A stream created by [`MultiDevice`](crate::MultiDevice).
pub struct AggregateStream {
    members: Vec<Member>,
    info: StreamInfo,
    slot: SlotGuard,
    destroyed: bool,
}

impl AggregateStream {
    pub(crate) fn new(members: Vec<Member>, info: StreamInfo, slot: SlotGuard) -> Self {
        AggregateStream {
            members,
            info,
            slot,
            destroyed: false,
        }
    }

    /// Indices of the devices carrying this stream, ascending.
    pub fn device_indices(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.device_index).collect()
    }

    /// Pollable descriptor of every sub-stream, in device order.
    pub fn fds(&self) -> Vec<i32> {
        self.members.iter().map(|m| m.fd).collect()
    }

    /// Channel buffers handed to each sub-stream.
    pub fn step(&self) -> usize {
        self.info.channels / self.members.len().max(1)
    }

    /// The sub-stream living on `device_index`, if any.
    pub fn member_mut(&mut self, device_index: usize) -> Option<&mut dyn Stream> {
        let member = self
            .members
            .iter_mut()
            .find(|m| m.device_index == device_index)?;
        Some(member.stream.as_mut())
    }

    fn ensure_io(&self, direction: StreamDirection, buffers: usize) -> Result<()> {
        if self.destroyed {
            return Err(Error::NoDevice("aggregate stream already destroyed".into()));
        }
        if self.info.direction != direction {
            return Err(Error::NotSupported(format!(
                "{direction} operation on a {} stream",
                self.info.direction
            )));
        }
        if buffers != self.info.channels {
            return Err(Error::InvalidArgument(format!(
                "{buffers} channel buffers, stream carries {}",
                self.info.channels
            )));
        }
        Ok(())
    }
}

fn fold_recv(results: &[RecvInfo]) -> RecvInfo {
    let first = results[0];
    if results.iter().any(|r| r.first_timestamp != first.first_timestamp) {
        warn!(
            timestamps = ?results.iter().map(|r| r.first_timestamp).collect::<Vec<_>>(),
            "devices disagree on the first sample timestamp"
        );
    }
    RecvInfo {
        samples: results.iter().map(|r| r.samples).min().unwrap_or(0),
        first_timestamp: first.first_timestamp,
        lost: results.iter().map(|r| r.lost).sum(),
    }
}

fn fold_send(results: &[SendStat]) -> SendStat {
    SendStat {
        underruns: results.iter().map(|r| r.underruns).sum(),
        fifo_used: results.iter().map(|r| r.fifo_used).max().unwrap_or(0),
        last_hw_time: results[0].last_hw_time,
    }
}

#[async_trait]
impl Stream for AggregateStream {
    fn direction(&self) -> StreamDirection {
        self.info.direction
    }

    async fn op(&mut self, command: StreamCommand, time: u64) -> Result<()> {
        if self.destroyed {
            return Err(Error::NoDevice("aggregate stream already destroyed".into()));
        }
        for m in self.members.iter_mut() {
            m.stream.op(command, time).await?;
        }
        Ok(())
    }

    async fn recv(&mut self, buffers: &mut [&mut [u8]], timeout: Duration) -> Result<RecvInfo> {
        self.ensure_io(StreamDirection::Rx, buffers.len())?;
        let step = self.step();

        let calls = self
            .members
            .iter_mut()
            .zip(buffers.chunks_mut(step))
            .map(|(m, chunk)| m.stream.recv(chunk, timeout));
        let results = join_all(calls)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        Ok(fold_recv(&results))
    }

    async fn send(
        &mut self,
        buffers: &[&[u8]],
        samples: usize,
        timestamp: i64,
        timeout: Duration,
    ) -> Result<SendStat> {
        self.ensure_io(StreamDirection::Tx, buffers.len())?;
        let step = self.step();

        let calls = self
            .members
            .iter_mut()
            .zip(buffers.chunks(step))
            .map(|(m, chunk)| m.stream.send(chunk, samples, timestamp, timeout));
        let results = join_all(calls)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        Ok(fold_send(&results))
    }

    fn stat(&self) -> StreamInfo {
        self.info
    }

    fn stats(&self) -> StreamStats {
        self.members
            .iter()
            .map(|m| m.stream.stats())
            .fold(StreamStats::default(), |acc, s| StreamStats {
                buffers: acc.buffers + s.buffers,
                overruns: acc.overruns + s.overruns,
                lag_pending: acc.lag_pending + s.lag_pending,
            })
    }

    fn option_get(&self, name: &str) -> Result<i64> {
        match name {
            "fd" => self
                .members
                .first()
                .map(|m| i64::from(m.fd))
                .ok_or_else(|| Error::NoDevice("aggregate stream has no devices".into())),
            "overruns" => Ok(self.stats().overruns as i64),
            other => Err(Error::InvalidArgument(format!("unknown option '{other}'"))),
        }
    }

    /// Forwarded to every sub-stream in device order.
    async fn option_set(&mut self, name: &str, value: i64) -> Result<()> {
        for m in self.members.iter_mut() {
            m.stream.option_set(name, value).await?;
        }
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let mut first_err = None;
        for mut m in self.members.drain(..) {
            debug!(device = m.device_index, "destroying sub-stream");
            if let Err(e) = m.stream.destroy().await {
                warn!(device = m.device_index, error = %e, "sub-stream destroy failed");
                first_err.get_or_insert(e);
            }
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

impl Drop for AggregateStream {
    fn drop(&mut self) {
        if !self.destroyed && !self.members.is_empty() {
            warn!(
                devices = self.members.len(),
                "aggregate stream dropped without destroy"
            );
        }
    }
}

impl std::fmt::Debug for AggregateStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStream")
            .field("devices", &self.device_indices())
            .field("info", &self.info)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
