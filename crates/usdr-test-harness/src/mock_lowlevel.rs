//! Mock lowlevel device for deterministic testing of stream engines.
//!
//! [`MockLowlevel`] implements [`LowlevelDevice`] with a scripted queue of
//! receive blocks and a log of every transmit commit. Tests push raw DMA
//! blocks (usually built with [`burst_block`]) and then inspect which blocks
//! were released and what was committed.
//!
//! # Example
//!
//! ```
//! use usdr_test_harness::{MockLowlevel, burst_block};
//!
//! let mock = MockLowlevel::new("board0");
//! mock.push_rx_block(burst_block(&[(1000, vec![0u8; 4080])]));
//! assert_eq!(mock.queued_rx_blocks(), 1);
//! ```

use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use usdr_core::error::{Error, Result};
use usdr_core::lowlevel::{DmaBuffer, DmaMeta, LowlevelDevice, LowlevelStream, LowlevelStreamParams};
use usdr_core::types::{StreamDirection, SyncType};

/// One transmit buffer handed to `send_dma_commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBlock {
    pub stream: u32,
    /// The committed bytes, truncated to the committed length.
    pub data: Vec<u8>,
    pub meta: DmaMeta,
}

#[derive(Debug, Default)]
struct MockState {
    next_stream_id: u32,
    streams: HashMap<u32, LowlevelStreamParams>,
    initialized: Vec<LowlevelStreamParams>,
    deinitialized: Vec<u32>,
    rx_queue: VecDeque<BytesMut>,
    next_index: usize,
    checked_out: HashSet<usize>,
    released: Vec<usize>,
    committed: Vec<CommittedBlock>,
    fail_dma: bool,
    timer_ops: Vec<SyncType>,
    destroy_calls: usize,
}

/// A scripted [`LowlevelDevice`].
#[derive(Debug)]
pub struct MockLowlevel {
    name: String,
    uuid: [u8; 16],
    channels: [usize; 2],
    fd: Option<i32>,
    timer_supported: bool,
    send_block_limit: Option<usize>,
    state: Mutex<MockState>,
    rx_ready: Notify,
}

impl MockLowlevel {
    /// A device with one channel per direction, pollable descriptor 3 and
    /// an all-zero UUID.
    pub fn new(name: &str) -> Self {
        MockLowlevel {
            name: name.to_string(),
            uuid: [0; 16],
            channels: [1, 1],
            fd: Some(3),
            timer_supported: false,
            send_block_limit: None,
            state: Mutex::new(MockState::default()),
            rx_ready: Notify::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = uuid;
        self
    }

    /// Descriptor reported by `stream_initialize`; `None` models a transport
    /// without one.
    pub fn with_fd(mut self, fd: Option<i32>) -> Self {
        self.fd = fd;
        self
    }

    pub fn with_channels(mut self, rx: usize, tx: usize) -> Self {
        self.channels = [rx, tx];
        self
    }

    /// Accept every `timer_op` instead of reporting it unsupported.
    pub fn with_timer_support(mut self) -> Self {
        self.timer_supported = true;
        self
    }

    /// Hand out transmit buffers of at most `len` bytes.
    pub fn with_send_block_limit(mut self, len: usize) -> Self {
        self.send_block_limit = Some(len);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a filled receive block.
    pub fn push_rx_block(&self, data: Vec<u8>) {
        self.state().rx_queue.push_back(BytesMut::from(&data[..]));
        self.rx_ready.notify_one();
    }

    /// Make every following DMA call fail with a transport error.
    pub fn fail_dma(&self, fail: bool) {
        self.state().fail_dma = fail;
    }

    pub fn queued_rx_blocks(&self) -> usize {
        self.state().rx_queue.len()
    }

    /// Indices of receive blocks released so far, in release order.
    pub fn released(&self) -> Vec<usize> {
        self.state().released.clone()
    }

    /// Receive blocks handed out but not yet released.
    pub fn checked_out(&self) -> usize {
        self.state().checked_out.len()
    }

    pub fn committed(&self) -> Vec<CommittedBlock> {
        self.state().committed.clone()
    }

    /// Parameters of every `stream_initialize` call.
    pub fn initialized(&self) -> Vec<LowlevelStreamParams> {
        self.state().initialized.clone()
    }

    pub fn deinitialized(&self) -> Vec<u32> {
        self.state().deinitialized.clone()
    }

    pub fn timer_ops(&self) -> Vec<SyncType> {
        self.state().timer_ops.clone()
    }

    pub fn destroy_calls(&self) -> usize {
        self.state().destroy_calls
    }

    fn check_dma(&self, state: &MockState, stream: u32) -> Result<()> {
        if state.fail_dma {
            return Err(Error::Transport(format!("{}: injected DMA failure", self.name)));
        }
        if !state.streams.contains_key(&stream) {
            return Err(Error::InvalidArgument(format!("{}: unknown stream {stream}", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl LowlevelDevice for MockLowlevel {
    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> [u8; 16] {
        self.uuid
    }

    fn channel_count(&self, direction: StreamDirection) -> usize {
        self.channels[direction.index()]
    }

    async fn stream_initialize(&self, params: &LowlevelStreamParams) -> Result<LowlevelStream> {
        let mut state = self.state();
        let id = state.next_stream_id;
        state.next_stream_id += 1;
        state.streams.insert(id, *params);
        state.initialized.push(*params);
        Ok(LowlevelStream { id, fd: self.fd })
    }

    async fn stream_deinitialize(&self, stream: u32) -> Result<()> {
        let mut state = self.state();
        if state.streams.remove(&stream).is_none() {
            return Err(Error::InvalidArgument(format!("stream {stream} not initialized")));
        }
        state.deinitialized.push(stream);
        Ok(())
    }

    async fn recv_dma_wait(&self, stream: u32, timeout: Duration) -> Result<DmaBuffer> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state();
                self.check_dma(&state, stream)?;
                if let Some(data) = state.rx_queue.pop_front() {
                    let index = state.next_index;
                    state.next_index += 1;
                    state.checked_out.insert(index);
                    return Ok(DmaBuffer { index, data });
                }
            }
            if tokio::time::timeout_at(deadline, self.rx_ready.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn recv_dma_release(&self, stream: u32, buffer: DmaBuffer) -> Result<()> {
        let mut state = self.state();
        self.check_dma(&state, stream)?;
        if !state.checked_out.remove(&buffer.index) {
            return Err(Error::Transport(format!(
                "buffer {} released but not checked out",
                buffer.index
            )));
        }
        state.released.push(buffer.index);
        Ok(())
    }

    async fn send_dma_get(&self, stream: u32, _timeout: Duration) -> Result<DmaBuffer> {
        let mut state = self.state();
        self.check_dma(&state, stream)?;
        let mut block_size = state.streams[&stream].block_size;
        if let Some(limit) = self.send_block_limit {
            block_size = block_size.min(limit);
        }
        let index = state.next_index;
        state.next_index += 1;
        Ok(DmaBuffer {
            index,
            data: BytesMut::zeroed(block_size),
        })
    }

    async fn send_dma_commit(
        &self,
        stream: u32,
        buffer: DmaBuffer,
        len: usize,
        meta: DmaMeta,
    ) -> Result<()> {
        let mut state = self.state();
        self.check_dma(&state, stream)?;
        state.committed.push(CommittedBlock {
            stream,
            data: buffer.data[..len].to_vec(),
            meta,
        });
        Ok(())
    }

    async fn timer_op(&self, sync: &SyncType) -> Result<()> {
        if !self.timer_supported {
            return Err(Error::NotSupported(format!("sync '{sync}' on {}", self.name)));
        }
        self.state().timer_ops.push(sync.clone());
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.state().destroy_calls += 1;
        Ok(())
    }
}

/// Build one DMA block from `(timestamp, payload)` bursts.
///
/// Each burst gets a 16-byte header; payloads are padded with zeros to a
/// full 4080-byte burst.
pub fn burst_block(bursts: &[(u64, Vec<u8>)]) -> Vec<u8> {
    const HEADER: usize = 16;
    const PAYLOAD: usize = 4080;
    let mut out = Vec::with_capacity(bursts.len() * (HEADER + PAYLOAD));
    for (timestamp, payload) in bursts {
        let mut header = [0u8; HEADER];
        header[1..3].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        header[8..].copy_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(&header);
        let mut burst = payload.clone();
        burst.resize(PAYLOAD, 0);
        out.extend_from_slice(&burst);
    }
    out
}

/// `count` ci16 samples whose I and Q both encode `first + n`.
pub fn ci16_ramp(first: i16, count: usize) -> Vec<u8> {
    (0..count)
        .flat_map(|n| {
            let v = first.wrapping_add(n as i16).to_le_bytes();
            [v[0], v[1], v[0], v[1]]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rx_params() -> LowlevelStreamParams {
        LowlevelStreamParams {
            direction: StreamDirection::Rx,
            block_size: 4096,
            buffer_count: 16,
            need_fd: true,
        }
    }

    #[tokio::test]
    async fn rx_block_round_trip() {
        let mock = MockLowlevel::new("m");
        let s = mock.stream_initialize(&rx_params()).await.unwrap();
        assert_eq!(s.fd, Some(3));

        mock.push_rx_block(burst_block(&[(7, vec![1, 2, 3, 4])]));
        let buf = mock
            .recv_dma_wait(s.id, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(buf.data.len(), 4096);
        assert_eq!(&buf.data[16..20], &[1, 2, 3, 4]);
        assert_eq!(mock.checked_out(), 1);

        let index = buf.index;
        mock.recv_dma_release(s.id, buf).await.unwrap();
        assert_eq!(mock.released(), vec![index]);
        assert_eq!(mock.checked_out(), 0);
    }

    #[tokio::test]
    async fn empty_queue_times_out() {
        let mock = MockLowlevel::new("m");
        let s = mock.stream_initialize(&rx_params()).await.unwrap();
        let res = mock.recv_dma_wait(s.id, Duration::from_millis(5)).await;
        assert!(matches!(res, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn release_of_unknown_buffer_fails() {
        let mock = MockLowlevel::new("m");
        let s = mock.stream_initialize(&rx_params()).await.unwrap();
        let stray = DmaBuffer {
            index: 99,
            data: BytesMut::new(),
        };
        assert!(mock.recv_dma_release(s.id, stray).await.is_err());
    }

    #[tokio::test]
    async fn injected_failure() {
        let mock = MockLowlevel::new("m");
        let s = mock.stream_initialize(&rx_params()).await.unwrap();
        mock.fail_dma(true);
        assert!(matches!(
            mock.send_dma_get(s.id, Duration::ZERO).await,
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn ramp_layout() {
        assert_eq!(ci16_ramp(1, 2), vec![1, 0, 1, 0, 2, 0, 2, 0]);
    }
}
