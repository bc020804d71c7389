/// Remote transport seam
///
/// The remote side sees two values: the gesture state (1 byte, read and
/// notify) and the threshold (4-byte little-endian signed integer, write).
/// `loopback` wires both ends in-process; the link events it produces are
/// applied by `serve_link_events`, which plays the role of the transport's
/// callback context.

use crate::broadcaster::StateBroadcaster;
use crate::threshold::ThresholdStore;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Length of the gesture state value
pub const STATE_VALUE_LEN: usize = 1;

/// Length of the threshold value
pub const THRESHOLD_VALUE_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Link closed")]
    LinkClosed,

    #[error("Notification queue full")]
    Congested,

    #[error("Invalid payload: expected {expected} bytes, got {actual}")]
    InvalidPayload { expected: usize, actual: usize },
}

/// Pushes the gesture state to the subscribed peer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, active: bool) -> Result<(), TransportError>;
}

pub fn encode_state(active: bool) -> [u8; STATE_VALUE_LEN] {
    [u8::from(active)]
}

pub fn decode_state(value: &[u8]) -> Result<bool, TransportError> {
    match value {
        [byte] => Ok(*byte != 0),
        _ => Err(TransportError::InvalidPayload {
            expected: STATE_VALUE_LEN,
            actual: value.len(),
        }),
    }
}

pub fn encode_threshold(value: i32) -> [u8; THRESHOLD_VALUE_LEN] {
    value.to_le_bytes()
}

pub fn decode_threshold(value: &[u8]) -> Result<i32, TransportError> {
    let bytes: [u8; THRESHOLD_VALUE_LEN] =
        value
            .try_into()
            .map_err(|_| TransportError::InvalidPayload {
                expected: THRESHOLD_VALUE_LEN,
                actual: value.len(),
            })?;
    Ok(i32::from_le_bytes(bytes))
}

/// Lifecycle and attribute events raised by the remote side
#[derive(Debug)]
pub enum LinkEvent {
    Connected,
    Disconnected { reason: u8 },
    SubscriptionChanged(bool),
    ThresholdWritten(Vec<u8>),
    StateRead(oneshot::Sender<[u8; STATE_VALUE_LEN]>),
}

/// Device end of the loopback link: notification sink
pub struct LinkNotifier {
    tx: mpsc::Sender<[u8; STATE_VALUE_LEN]>,
}

#[async_trait]
impl NotificationSink for LinkNotifier {
    async fn notify(&self, active: bool) -> Result<(), TransportError> {
        self.tx
            .try_send(encode_state(active))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Congested,
                mpsc::error::TrySendError::Closed(_) => TransportError::LinkClosed,
            })
    }
}

/// Device end of the loopback link: incoming events
pub struct LinkEvents {
    rx: mpsc::Receiver<LinkEvent>,
}

/// Remote end of the loopback link
pub struct RemotePeer {
    events: mpsc::Sender<LinkEvent>,
    notifications: mpsc::Receiver<[u8; STATE_VALUE_LEN]>,
}

/// Create an in-process link holding at most `capacity` pending messages per direction
pub fn loopback(capacity: usize) -> (LinkNotifier, LinkEvents, RemotePeer) {
    let (notify_tx, notify_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);

    (
        LinkNotifier { tx: notify_tx },
        LinkEvents { rx: event_rx },
        RemotePeer {
            events: event_tx,
            notifications: notify_rx,
        },
    )
}

impl RemotePeer {
    async fn send(&self, event: LinkEvent) -> Result<(), TransportError> {
        self.events
            .send(event)
            .await
            .map_err(|_| TransportError::LinkClosed)
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        self.send(LinkEvent::Connected).await
    }

    pub async fn disconnect(&self, reason: u8) -> Result<(), TransportError> {
        self.send(LinkEvent::Disconnected { reason }).await
    }

    pub async fn subscribe(&self, enabled: bool) -> Result<(), TransportError> {
        self.send(LinkEvent::SubscriptionChanged(enabled)).await
    }

    pub async fn write_threshold(&self, value: i32) -> Result<(), TransportError> {
        self.write_raw_threshold(encode_threshold(value).to_vec())
            .await
    }

    pub async fn write_raw_threshold(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.send(LinkEvent::ThresholdWritten(payload)).await
    }

    /// Pull-read the last reported gesture state.
    ///
    /// Events are applied in order, so this also waits for every earlier
    /// event to be handled.
    pub async fn read_state(&self) -> Result<bool, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(LinkEvent::StateRead(reply_tx)).await?;
        let value = reply_rx.await.map_err(|_| TransportError::LinkClosed)?;
        decode_state(&value)
    }

    /// Wait for the next pushed notification
    pub async fn next_notification(&mut self) -> Option<bool> {
        self.notifications
            .recv()
            .await
            .and_then(|value| decode_state(&value).ok())
    }

    /// Take a pushed notification if one is pending
    pub fn try_next_notification(&mut self) -> Option<bool> {
        self.notifications
            .try_recv()
            .ok()
            .and_then(|value| decode_state(&value).ok())
    }
}

/// Apply link events until the remote end goes away
pub async fn serve_link_events(
    mut events: LinkEvents,
    broadcaster: Arc<StateBroadcaster>,
    threshold: Arc<ThresholdStore>,
) {
    while let Some(event) = events.rx.recv().await {
        match event {
            LinkEvent::Connected => {
                info!("Connected");
                broadcaster.on_connection_changed(true);
            }
            LinkEvent::Disconnected { reason } => {
                info!("Disconnected (reason {})", reason);
                broadcaster.on_connection_changed(false);
            }
            LinkEvent::SubscriptionChanged(enabled) => {
                broadcaster.on_subscriber_changed(enabled);
            }
            LinkEvent::ThresholdWritten(payload) => match decode_threshold(&payload) {
                Ok(value) => {
                    info!("Received new threshold value");
                    threshold.set(value);
                }
                Err(e) => warn!("Ignoring threshold write: {}", e),
            },
            LinkEvent::StateRead(reply) => {
                let _ = reply.send(encode_state(broadcaster.reported_state()));
            }
        }
    }

    debug!("Link event stream closed");
}
