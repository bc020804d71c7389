/// Main detection loop
///
/// Ties the detector, gesture recognition and broadcaster together. The loop
/// is the only writer of the detector; everything it shares with the
/// callback tasks goes through atomics.

use crate::broadcaster::StateBroadcaster;
use crate::detector::{DetectorStats, DualAverageDetector};
use crate::gesture::{GestureState, GestureStateMachine};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Pause before retrying after a failed acquisition
pub const ACQUISITION_BACKOFF: Duration = Duration::from_millis(100);

pub struct ClapSwitch {
    detector: DualAverageDetector,
    gesture: GestureStateMachine,
    broadcaster: Arc<StateBroadcaster>,
    hold_duration: Duration,
}

impl ClapSwitch {
    pub fn new(
        detector: DualAverageDetector,
        gesture: GestureStateMachine,
        broadcaster: Arc<StateBroadcaster>,
        hold_duration: Duration,
    ) -> Self {
        Self {
            detector,
            gesture,
            broadcaster,
            hold_duration,
        }
    }

    /// Run one loop iteration.
    ///
    /// Returns `true` if a gesture was recognized; the active state has then
    /// been reported for the hold duration and cleared again.
    pub async fn step(&mut self) -> bool {
        if !self.detector.check().await {
            return false;
        }

        info!("Clap!");
        if !self.gesture.on_event() {
            return false;
        }

        self.broadcaster.report(true).await;
        tokio::time::sleep(self.hold_duration).await;
        self.broadcaster.report(false).await;
        true
    }

    /// Listen for claps forever
    pub async fn run(&mut self) {
        info!("Listening for claps");
        loop {
            self.step().await;
            if self.detector.consecutive_failures() > 0 {
                tokio::time::sleep(ACQUISITION_BACKOFF).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Clear a pulse that was cut short by stopping the loop
    pub async fn shutdown(&self) {
        if self.broadcaster.reported_state() {
            debug!("Clearing active state on shutdown");
            self.broadcaster.report(false).await;
        }
    }

    pub fn gesture_state(&self) -> GestureState {
        self.gesture.state()
    }

    pub fn gestures_recognized(&self) -> u64 {
        self.gesture.recognized()
    }

    pub fn detector_stats(&self) -> DetectorStats {
        self.detector.stats()
    }

    pub fn broadcaster(&self) -> &Arc<StateBroadcaster> {
        &self.broadcaster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::LogIndicator;
    use crate::sample_buffer::Sample;
    use crate::sampler::{AcquisitionError, SampleSource};
    use crate::settings::MemorySettingsStore;
    use crate::threshold::ThresholdStore;
    use crate::transport::loopback;
    use crate::config::ClapConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct ListSource {
        samples: VecDeque<Sample>,
    }

    #[async_trait]
    impl SampleSource for ListSource {
        async fn sample(&mut self) -> Result<Sample, AcquisitionError> {
            self.samples.pop_front().ok_or(AcquisitionError::Exhausted)
        }
    }

    /// Baseline cycle followed by two clap cycles
    fn double_clap() -> ListSource {
        let mut samples = VecDeque::new();
        samples.extend(std::iter::repeat(2).take(40));
        for _ in 0..2 {
            samples.extend(std::iter::repeat(20).take(4));
            samples.extend(std::iter::repeat(2).take(36));
        }
        ListSource { samples }
    }

    async fn switch_with(source: ListSource, indicator: Arc<LogIndicator>) -> ClapSwitch {
        let config = ClapConfig::default();
        let threshold =
            ThresholdStore::open(Arc::new(MemorySettingsStore::new()), config.default_threshold)
                .await;
        let (notifier, _events, _peer) = loopback(config.notification_queue);
        let broadcaster = Arc::new(StateBroadcaster::new(Arc::new(notifier), indicator));

        let detector = DualAverageDetector::new(Box::new(source), threshold, &config).unwrap();
        let gesture = GestureStateMachine::new(config.gesture_window);
        ClapSwitch::new(detector, gesture, broadcaster, config.hold_duration)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_when_source_fails() {
        let source = ListSource {
            samples: VecDeque::new(),
        };
        let mut switch = switch_with(source, Arc::new(LogIndicator::new())).await;

        let _ = tokio::time::timeout(Duration::from_secs(1), switch.run()).await;

        let failures = switch.detector_stats().acquisition_failures;
        assert!(failures >= 1);
        assert!(failures <= 11, "retried {} times in one second", failures);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_hold_clears_state() {
        let indicator = Arc::new(LogIndicator::new());
        let mut switch = switch_with(double_clap(), indicator.clone()).await;

        // Stop the loop halfway through the hold
        let stopped = tokio::time::timeout(Duration::from_millis(500), async {
            for _ in 0..120 {
                switch.step().await;
            }
        })
        .await;
        assert!(stopped.is_err());
        assert!(switch.broadcaster().reported_state());
        assert!(indicator.is_lit());

        switch.shutdown().await;
        assert!(!switch.broadcaster().reported_state());
        assert!(!indicator.is_lit());
    }
}
