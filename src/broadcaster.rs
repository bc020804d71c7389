/// Gesture state broadcasting
///
/// Keeps the last reported state for pull reads and pushes changes to the
/// remote peer only while it is connected and subscribed.

use crate::indicator::Indicator;
use crate::transport::NotificationSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct StateBroadcaster {
    sink: Arc<dyn NotificationSink>,
    indicator: Arc<dyn Indicator>,
    connected: AtomicBool,
    subscribed: AtomicBool,
    reported: AtomicBool,
}

impl StateBroadcaster {
    pub fn new(sink: Arc<dyn NotificationSink>, indicator: Arc<dyn Indicator>) -> Self {
        Self {
            sink,
            indicator,
            connected: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            reported: AtomicBool::new(false),
        }
    }

    /// Record `active`, drive the indicator and notify an active subscriber
    pub async fn report(&self, active: bool) {
        info!("Setting gesture state to {}", active);
        self.reported.store(active, Ordering::Release);
        self.indicator.set(active);

        if !self.connected.load(Ordering::Acquire) {
            debug!("Not connected, state kept for later reads");
            return;
        }

        if !self.subscribed.load(Ordering::Acquire) {
            debug!("Notifications not enabled");
            return;
        }

        match self.sink.notify(active).await {
            Ok(()) => debug!("Sent notification (value: {})", active),
            Err(e) => warn!("Notify error: {}", e),
        }
    }

    pub fn on_subscriber_changed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::Release);
        info!(
            "Notification {}",
            if subscribed { "enabled" } else { "disabled" }
        );
    }

    pub fn on_connection_changed(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);

        // Subscriptions do not outlive the connection
        if !connected {
            self.subscribed.store(false, Ordering::Release);
        }
    }

    /// Last reported state
    pub fn reported_state(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }
}
