use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::models::error::SaveError;

/// Single-producer/single-consumer byte ring on top of `ringbuf::HeapRb`.
///
/// The producer half (`write`) and the consumer half (`consume`, `read`,
/// `flush`) may run on different threads at the same time; occupancy is
/// observed through the shared ring without touching either half. A second
/// caller entering a half that is already in use gets a zero-byte result
/// instead of waiting for the first one.
///
/// The whole capacity is usable. Capacity must be a power of two so the
/// ring's wrap point lines up with the transfer-chunk arithmetic.
pub struct RingBuffer {
    ring: Arc<HeapRb<u8>>,
    producer: Mutex<HeapProd<u8>>,
    consumer: Mutex<HeapCons<u8>>,
}

impl RingBuffer {
    /// Allocate a ring of `capacity` bytes.
    ///
    /// `capacity` must be a non-zero power of two; it is never rounded up.
    pub fn new(capacity: usize) -> Result<Self, SaveError> {
        if !capacity.is_power_of_two() {
            return Err(SaveError::InvalidCapacity(capacity));
        }

        let ring = HeapRb::<u8>::try_new(capacity)
            .map_err(|e| SaveError::AllocationFailure(format!("ring buffer of {} bytes: {}", capacity, e)))?;
        let ring = Arc::new(ring);
        let (producer, consumer) = Arc::clone(&ring).split();

        Ok(Self {
            ring,
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
        })
    }

    /// Total size in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// Bytes written but not yet consumed.
    pub fn available(&self) -> usize {
        self.ring.occupied_len()
    }

    /// Bytes that can be written without overrunning.
    pub fn free(&self) -> usize {
        self.ring.vacant_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Readable bytes that sit in one run before the physical end of the
    /// storage. This is the largest slice `consume` can hand out at once.
    pub fn contiguous_available(&self) -> usize {
        let capacity = self.capacity();
        let start = self.ring.read_index() % capacity;
        self.available().min(capacity - start)
    }

    /// Copy as much of `bytes` as fits. Never blocks and never grows.
    ///
    /// Returns the number of bytes stored; the remainder is the caller's
    /// overrun.
    pub fn write(&self, bytes: &[u8]) -> usize {
        match self.producer.try_lock() {
            Some(mut producer) => producer.push_slice(bytes),
            None => 0,
        }
    }

    /// Hand up to `max` readable bytes to `sink` in contiguous runs.
    ///
    /// `sink` returns how many bytes of the run it accepted. The read
    /// position advances by exactly that amount; a short accept ends the
    /// call. Returns the total accepted.
    pub fn consume<F>(&self, max: usize, mut sink: F) -> usize
    where
        F: FnMut(&[u8]) -> usize,
    {
        let Some(mut consumer) = self.consumer.try_lock() else {
            return 0;
        };

        let mut consumed = 0usize;
        while consumed < max {
            let (head, _) = consumer.as_slices();
            if head.is_empty() {
                break;
            }
            let len = head.len().min(max - consumed);
            let accepted = sink(&head[..len]).min(len);

            consumer.skip(accepted);
            consumed += accepted;
            if accepted < len {
                break;
            }
        }

        consumed
    }

    /// Copy readable bytes into `out`. Returns the number copied.
    pub fn read(&self, out: &mut [u8]) -> usize {
        match self.consumer.try_lock() {
            Some(mut consumer) => consumer.pop_slice(out),
            None => 0,
        }
    }

    /// Discard everything readable. Returns the number of bytes dropped.
    pub fn flush(&self) -> usize {
        match self.consumer.try_lock() {
            Some(mut consumer) => consumer.clear(),
            None => 0,
        }
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.consumer.get_mut().clear();
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}
