/// Sample buffer module for the dual-average detector
///
/// Implements a fixed-capacity, two-phase ring buffer: samples are pushed
/// until the buffer is full, then the whole buffer is drained at once to
/// compute an average. A full buffer rejects new samples instead of
/// overwriting the oldest ones.

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use thiserror::Error;
use tracing::trace;

/// Signed sample as delivered by the sampling hardware
pub type Sample = i16;

/// Absolute value of a sample
pub type Magnitude = u16;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Invalid buffer size: {0}")]
    InvalidSize(usize),
}

/// Fixed-capacity buffer of sample magnitudes
pub struct SampleBuffer {
    rb: HeapRb<Magnitude>,
    rejected: u64,
}

impl SampleBuffer {
    /// Create a buffer holding `capacity` magnitudes
    pub fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::InvalidSize(capacity));
        }

        Ok(Self {
            rb: HeapRb::new(capacity),
            rejected: 0,
        })
    }

    /// Push the magnitude of `sample`.
    ///
    /// Returns `false` if the buffer is full; the sample is then dropped
    /// from this buffer until the next drain.
    pub fn push(&mut self, sample: Sample) -> bool {
        match self.rb.try_push(sample.unsigned_abs()) {
            Ok(()) => true,
            Err(_) => {
                self.rejected += 1;
                false
            }
        }
    }

    /// Remove every stored magnitude and return their integer mean.
    ///
    /// Returns `None` when the buffer is empty.
    pub fn drain_mean(&mut self) -> Option<Magnitude> {
        let mut count: u32 = 0;
        let mut sum: u32 = 0;

        while let Some(magnitude) = self.rb.try_pop() {
            sum += u32::from(magnitude);
            count += 1;
        }

        if count == 0 {
            return None;
        }

        let mean = (sum / count) as Magnitude;
        trace!("Drained {} samples, mean {}", count, mean);
        Some(mean)
    }

    /// Discard all stored magnitudes
    pub fn clear(&mut self) {
        self.rb.clear();
    }

    pub fn len(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rb.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity().get()
    }

    /// Number of samples dropped because the buffer was full
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
