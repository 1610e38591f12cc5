//! Per-device stream table.
//!
//! A device carries at most one live stream per direction. Creating a stream
//! claims the slot; destroying it (or dropping its guard) unregisters it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::StreamDirection;

/// The RX and TX stream slots of one device.
#[derive(Debug, Clone, Default)]
pub struct StreamSlots {
    inner: Arc<[AtomicBool; 2]>,
}

impl StreamSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `direction`.
    ///
    /// Returns [`Error::Busy`] if a stream in that direction is already live.
    pub fn claim(&self, direction: StreamDirection) -> Result<SlotGuard> {
        let slot = &self.inner[direction.index()];
        if slot
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%direction, "stream slot already claimed");
            return Err(Error::Busy(format!("{direction} stream is already in use")));
        }
        Ok(SlotGuard {
            slots: Arc::clone(&self.inner),
            direction,
            held: true,
        })
    }

    pub fn is_claimed(&self, direction: StreamDirection) -> bool {
        self.inner[direction.index()].load(Ordering::Acquire)
    }
}

/// Registration of one live stream in its device's [`StreamSlots`].
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<[AtomicBool; 2]>,
    direction: StreamDirection,
    held: bool,
}

impl SlotGuard {
    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Unregister the stream. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if self.held {
            self.slots[self.direction.index()].store(false, Ordering::Release);
            self.held = false;
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_busy() {
        let slots = StreamSlots::new();
        let _rx = slots.claim(StreamDirection::Rx).unwrap();
        assert!(matches!(
            slots.claim(StreamDirection::Rx),
            Err(Error::Busy(_))
        ));
        // The other direction is independent.
        let _tx = slots.claim(StreamDirection::Tx).unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let slots = StreamSlots::new();
        let mut guard = slots.claim(StreamDirection::Tx).unwrap();
        guard.release();
        guard.release();
        assert!(!slots.is_claimed(StreamDirection::Tx));

        // A new claim must not be undone by the stale guard.
        let _again = slots.claim(StreamDirection::Tx).unwrap();
        drop(guard);
        assert!(slots.is_claimed(StreamDirection::Tx));
    }

    #[test]
    fn drop_releases() {
        let slots = StreamSlots::new();
        {
            let _g = slots.claim(StreamDirection::Rx).unwrap();
            assert!(slots.is_claimed(StreamDirection::Rx));
        }
        assert!(!slots.is_claimed(StreamDirection::Rx));
    }
}
