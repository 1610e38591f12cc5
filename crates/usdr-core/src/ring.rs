//! Bounded byte ring buffer.
//!
//! [`RingBuffer`] decouples producer and consumer cadence when a caller's
//! block size differs from the hardware packet size. Read and write cursors
//! are monotonically increasing 64-bit counters, reduced modulo the capacity
//! only when indexing storage, so `write_cursor - read_cursor` is always the
//! number of buffered bytes.
//!
//! Neither [`write`](RingBuffer::write) nor [`read`](RingBuffer::read) checks
//! occupancy. The caller keeps `write_cursor - read_cursor <= capacity` by
//! consulting [`write_space`](RingBuffer::write_space) and
//! [`read_space`](RingBuffer::read_space) first.
//!
//! All mutation goes through `&mut self`, so one ring has exactly one user at
//! a time. Sharing it between a producer thread and a consumer thread needs
//! an external lock around the whole buffer.

/// Fixed-capacity byte ring. No allocation happens after [`RingBuffer::new`].
#[derive(Debug)]
pub struct RingBuffer {
    data: Box<[u8]>,
    wpos: u64,
    rpos: u64,
}

impl RingBuffer {
    /// Allocate a ring of `capacity` bytes. Any non-zero capacity works.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        RingBuffer {
            data: vec![0u8; capacity].into_boxed_slice(),
            wpos: 0,
            rpos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn write_cursor(&self) -> u64 {
        self.wpos
    }

    pub fn read_cursor(&self) -> u64 {
        self.rpos
    }

    /// Bytes available to read.
    pub fn read_space(&self) -> usize {
        (self.wpos - self.rpos) as usize
    }

    /// Bytes that can be written without overwriting unread data.
    pub fn write_space(&self) -> usize {
        self.capacity() - self.read_space()
    }

    fn offset(&self, pos: u64) -> usize {
        (pos % self.data.len() as u64) as usize
    }

    /// Copy `src` in at the write cursor, wrapping at the end of storage.
    ///
    /// # Panics
    ///
    /// Panics if `src` is longer than the capacity.
    pub fn write(&mut self, src: &[u8]) {
        let off = self.offset(self.wpos);
        let first = src.len().min(self.data.len() - off);
        let (head, tail) = src.split_at(first);
        self.data[off..off + first].copy_from_slice(head);
        self.data[..tail.len()].copy_from_slice(tail);
        self.wpos += src.len() as u64;
    }

    /// Copy `dst.len()` bytes out from the read cursor, wrapping at the end
    /// of storage.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is longer than the capacity.
    pub fn read(&mut self, dst: &mut [u8]) {
        let off = self.offset(self.rpos);
        let first = dst.len().min(self.data.len() - off);
        let (head, tail) = dst.split_at_mut(first);
        head.copy_from_slice(&self.data[off..off + first]);
        let tail_len = tail.len();
        tail.copy_from_slice(&self.data[..tail_len]);
        self.rpos += dst.len() as u64;
    }

    /// Storage from the write cursor to the end of the backing region, for a
    /// producer that fills the ring in place. Follow with
    /// [`commit_write`](RingBuffer::commit_write).
    pub fn write_ptr(&mut self) -> &mut [u8] {
        let off = self.offset(self.wpos);
        &mut self.data[off..]
    }

    /// Advance the write cursor over `n` bytes filled through
    /// [`write_ptr`](RingBuffer::write_ptr).
    pub fn commit_write(&mut self, n: usize) {
        self.wpos += n as u64;
    }

    /// Drop `n` buffered bytes without copying them.
    pub fn skip(&mut self, n: usize) {
        self.rpos += n as u64;
    }
}
