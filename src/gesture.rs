/// Double-clap gesture recognition
///
/// Counts detected transients and recognizes a gesture when two of them
/// arrive within the window. Every transient restarts the window, so it
/// always measures the time since the most recent clap.

use cache_padded::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Transients that make up one gesture
pub const GESTURE_EVENT_COUNT: u32 = 2;

/// Gesture state derived from the event counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    /// No transient pending
    Idle,

    /// One transient seen, waiting for the second
    Armed,
}

/// Counter shared with the deadline task.
///
/// The low half holds the clap count, the high half the generation of the
/// current window. Every change bumps the generation, so an expiry that
/// belongs to an earlier window can be told apart and ignored.
#[derive(Default)]
struct EventCounter {
    state: CachePadded<AtomicU64>,
}

fn pack(generation: u32, count: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(count)
}

fn count_of(state: u64) -> u32 {
    state as u32
}

fn generation_of(state: u64) -> u32 {
    (state >> 32) as u32
}

impl EventCounter {
    /// Count one transient; returns the new count and the window it opened
    fn increment(&self) -> (u32, u32) {
        let previous = self
            .state
            .fetch_add(pack(1, 1), Ordering::AcqRel);
        let next = previous.wrapping_add(pack(1, 1));
        (count_of(next), generation_of(next))
    }

    fn reset(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                Some(pack(generation_of(state).wrapping_add(1), 0))
            });
    }

    /// Reset if `generation` is still the current window
    fn expire(&self, generation: u32) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (generation_of(state) == generation && count_of(state) != 0)
                    .then(|| pack(generation.wrapping_add(1), 0))
            })
            .is_ok()
    }

    fn get(&self) -> u32 {
        count_of(self.state.load(Ordering::Acquire))
    }

    fn generation(&self) -> u32 {
        generation_of(self.state.load(Ordering::Acquire))
    }
}

pub struct GestureStateMachine {
    counter: Arc<EventCounter>,
    window: Duration,
    deadline: Option<JoinHandle<()>>,
    recognized: u64,
}

impl GestureStateMachine {
    pub fn new(window: Duration) -> Self {
        Self {
            counter: Arc::new(EventCounter::default()),
            window,
            deadline: None,
            recognized: 0,
        }
    }

    /// Register a detected transient.
    ///
    /// Returns `true` exactly when this transient completes a gesture.
    /// Must be called from within a tokio runtime.
    pub fn on_event(&mut self) -> bool {
        let (count, generation) = self.counter.increment();
        debug!("Clap {} of {}", count, GESTURE_EVENT_COUNT);

        if count >= GESTURE_EVENT_COUNT {
            self.counter.reset();
            self.cancel_deadline();
            self.recognized += 1;
            info!("Double clap recognized");
            return true;
        }

        self.restart_deadline(generation);
        false
    }

    /// Drop any pending transient; called when the window runs out
    pub fn on_window_expired(&self) {
        expire_window(&self.counter, self.counter.generation());
    }

    pub fn state(&self) -> GestureState {
        if self.counter.get() == 0 {
            GestureState::Idle
        } else {
            GestureState::Armed
        }
    }

    pub fn event_count(&self) -> u32 {
        self.counter.get()
    }

    /// Gestures recognized since creation
    pub fn recognized(&self) -> u64 {
        self.recognized
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn restart_deadline(&mut self, generation: u32) {
        self.cancel_deadline();

        let counter = Arc::clone(&self.counter);
        let window = self.window;
        self.deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            expire_window(&counter, generation);
        }));
    }

    fn cancel_deadline(&mut self) {
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
    }
}

fn expire_window(counter: &EventCounter, generation: u32) {
    if counter.expire(generation) {
        debug!("Gesture window expired, resetting clap count");
    } else {
        trace!("Ignoring expiry of a superseded gesture window");
    }
}

impl Drop for GestureStateMachine {
    fn drop(&mut self) {
        self.cancel_deadline();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    /// Let the deadline task observe the advanced clock
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_events_within_window() {
        let mut gesture = GestureStateMachine::new(WINDOW);
        assert_eq!(gesture.state(), GestureState::Idle);

        assert!(!gesture.on_event());
        assert_eq!(gesture.state(), GestureState::Armed);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(gesture.on_event());
        assert_eq!(gesture.state(), GestureState::Idle);
        assert_eq!(gesture.event_count(), 0);
        assert_eq!(gesture.recognized(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_outside_window() {
        let mut gesture = GestureStateMachine::new(WINDOW);

        assert!(!gesture.on_event());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(gesture.state(), GestureState::Idle);

        assert!(!gesture.on_event());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;

        assert_eq!(gesture.event_count(), 0);
        assert_eq!(gesture.recognized(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_clap_starts_new_window() {
        let mut gesture = GestureStateMachine::new(WINDOW);

        assert!(!gesture.on_event());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;

        // The second clap arrives 1.1s after the first: a new window starts
        assert!(!gesture.on_event());
        tokio::time::sleep(Duration::from_millis(900)).await;
        settle().await;
        assert_eq!(gesture.state(), GestureState::Armed);

        assert!(gesture.on_event());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expired_callback() {
        let mut gesture = GestureStateMachine::new(WINDOW);

        gesture.on_event();
        gesture.on_window_expired();
        assert_eq!(gesture.state(), GestureState::Idle);

        // Counting starts over
        assert!(!gesture.on_event());
        assert!(gesture.on_event());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_expiry_keeps_new_clap() {
        let mut gesture = GestureStateMachine::new(WINDOW);

        assert!(!gesture.on_event());
        let first_window = gesture.counter.generation();
        gesture.on_window_expired();

        // A clap right at the window boundary opens a new window
        assert!(!gesture.on_event());

        // The expiry of the first window fires late and must not clear it
        assert!(!gesture.counter.expire(first_window));
        assert_eq!(gesture.state(), GestureState::Armed);
        assert!(gesture.on_event());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognition_cancels_deadline() {
        let mut gesture = GestureStateMachine::new(WINDOW);

        gesture.on_event();
        assert!(gesture.on_event());

        // A fresh clap right after recognition is not cut short by the old deadline
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!gesture.on_event());
        tokio::time::sleep(Duration::from_millis(700)).await;
        settle().await;
        assert_eq!(gesture.state(), GestureState::Armed);
    }
}
