//! In-memory [`CanAdapter`] backed by fixed-capacity ring buffers.
//!
//! Models the interrupt driven CAN driver: received frames wait in an rx ring, frames to send wait
//! in a tx ring until the bus side picks them up. Both rings drop instead of blocking when full.
//! Clones share the same buffers, so a test harness can keep one handle as the "bus" while the
//! agent owns another.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::can::{CanAdapter, Frame};
use crate::error::Error;

pub const DEFAULT_RING_CAPACITY: usize = 32;

#[derive(Debug)]
struct Rings {
    capacity: usize,
    rx: VecDeque<Frame>,
    tx: VecDeque<Frame>,
    flush_count: usize,
}

#[derive(Debug, Clone)]
pub struct RingBufferCan {
    rings: Arc<Mutex<Rings>>,
}

impl Default for RingBufferCan {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl RingBufferCan {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: Arc::new(Mutex::new(Rings {
                capacity,
                rx: VecDeque::with_capacity(capacity),
                tx: VecDeque::with_capacity(capacity),
                flush_count: 0,
            })),
        }
    }

    fn rings(&self) -> MutexGuard<'_, Rings> {
        self.rings.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a frame from the bus into the receive ring. Returns false if the ring was full and
    /// the frame was dropped.
    pub fn inject(&self, frame: Frame) -> bool {
        let mut rings = self.rings();
        if rings.rx.len() >= rings.capacity {
            warn!("CAN rx ring full, dropping {:?}", frame);
            return false;
        }
        rings.rx.push_back(frame);
        true
    }

    /// Take the oldest frame waiting for transmission, freeing its buffer.
    pub fn pop_sent(&self) -> Option<Frame> {
        self.rings().tx.pop_front()
    }

    /// Take every frame waiting for transmission.
    pub fn drain_sent(&self) -> Vec<Frame> {
        self.rings().tx.drain(..).collect()
    }

    pub fn pending_rx(&self) -> usize {
        self.rings().rx.len()
    }

    pub fn pending_tx(&self) -> usize {
        self.rings().tx.len()
    }

    /// Number of times the transmit queue was flushed.
    pub fn flush_count(&self) -> usize {
        self.rings().flush_count
    }
}

impl CanAdapter for RingBufferCan {
    fn send(&mut self, frame: &Frame) -> Result<(), Error> {
        let mut rings = self.rings();
        if rings.tx.len() >= rings.capacity {
            return Err(Error::IsoTPError(crate::isotp::Error::BufferFull));
        }
        rings.tx.push_back(*frame);
        Ok(())
    }

    fn recv(&mut self) -> Option<Frame> {
        self.rings().rx.pop_front()
    }

    fn flush(&mut self) {
        // Queued frames are already visible to the reader
        self.rings().flush_count += 1;
    }
}
