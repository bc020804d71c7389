/// Clap detector main module
///
/// Compares a short-term average of sample magnitudes against a long-term
/// average. The long-term average follows the ambient noise floor while the
/// short-term one reacts to spikes; a divergence above the threshold is a
/// transient.
///
/// Both averages are computed only when both buffers are full at the same
/// time, after which the buffers are drained and start filling again. With a
/// 40/4 split this evaluates every 40 samples.

use crate::config::{ClapConfig, ConfigError};
use crate::sample_buffer::{BufferError, Magnitude, SampleBuffer};
use crate::sampler::SampleSource;
use crate::threshold::ThresholdStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid detector configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Buffer setup failed: {0}")]
    Buffer(#[from] BufferError),
}

/// Averages of the most recent evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Averages {
    pub long_term: Magnitude,
    pub short_term: Magnitude,
    pub divergence: i32,
}

/// Detector statistics
#[derive(Debug, Clone, Default)]
pub struct DetectorStats {
    pub samples_processed: u64,
    pub acquisition_failures: u64,
    pub evaluations: u64,
    pub transients_detected: u64,
}

pub struct DualAverageDetector {
    source: Box<dyn SampleSource>,
    long_term: SampleBuffer,
    short_term: SampleBuffer,
    threshold: Arc<ThresholdStore>,
    cooldown: Duration,
    last_averages: Option<Averages>,
    stats: DetectorStats,
    consecutive_failures: u32,
}

impl DualAverageDetector {
    /// Create a new detector reading from `source`
    pub fn new(
        source: Box<dyn SampleSource>,
        threshold: Arc<ThresholdStore>,
        config: &ClapConfig,
    ) -> Result<Self, DetectorError> {
        config.validate()?;

        debug!(
            "Initializing detector: long window {}, short window {}, cooldown {:?}",
            config.long_window, config.short_window, config.cooldown
        );

        Ok(Self {
            source,
            long_term: SampleBuffer::with_capacity(config.long_window)?,
            short_term: SampleBuffer::with_capacity(config.short_window)?,
            threshold,
            cooldown: config.cooldown,
            last_averages: None,
            stats: DetectorStats::default(),
            consecutive_failures: 0,
        })
    }

    /// Sample once and report whether a transient was detected.
    ///
    /// Acquisition failures are logged and count as "no transient"; the
    /// buffers are left untouched.
    pub async fn check(&mut self) -> bool {
        let sample = match self.source.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.acquisition_failures += 1;
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    warn!("Failed to acquire sample: {}", e);
                } else {
                    debug!("Failed to acquire sample: {}", e);
                }
                return false;
            }
        };
        if self.consecutive_failures > 0 {
            info!(
                "Sampling recovered after {} failed attempts",
                self.consecutive_failures
            );
            self.consecutive_failures = 0;
        }
        self.stats.samples_processed += 1;

        self.long_term.push(sample);
        self.short_term.push(sample);

        if !(self.long_term.is_full() && self.short_term.is_full()) {
            return false;
        }

        let averages = match self.evaluate() {
            Some(averages) => averages,
            None => return false,
        };

        let threshold = self.threshold.get();
        trace!(
            "ST: {}, LT: {}, divergence: {}, threshold: {}",
            averages.short_term,
            averages.long_term,
            averages.divergence,
            threshold
        );

        if averages.divergence > threshold {
            self.stats.transients_detected += 1;
            debug!(
                "Transient detected (divergence {} > threshold {})",
                averages.divergence, threshold
            );

            self.short_term.clear();
            tokio::time::sleep(self.cooldown).await;
            // The tail of this transient was captured during the cooldown
            self.source.discard_pending();
            return true;
        }

        false
    }

    /// Drain both buffers and compute their averages
    fn evaluate(&mut self) -> Option<Averages> {
        let long_term = self.long_term.drain_mean()?;
        let short_term = self.short_term.drain_mean()?;
        self.stats.evaluations += 1;

        let averages = Averages {
            long_term,
            short_term,
            divergence: (i32::from(short_term) - i32::from(long_term)).abs(),
        };
        self.last_averages = Some(averages);
        Some(averages)
    }

    /// Averages of the most recent evaluation, if any
    pub fn last_averages(&self) -> Option<Averages> {
        self.last_averages
    }

    /// Get current statistics
    pub fn stats(&self) -> DetectorStats {
        self.stats.clone()
    }

    /// Acquisition failures since the last successful sample
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Discard buffered samples and statistics
    pub fn reset(&mut self) {
        self.long_term.clear();
        self.short_term.clear();
        self.last_averages = None;
        self.stats = DetectorStats::default();
        self.consecutive_failures = 0;
        debug!("Detector reset");
    }
}
