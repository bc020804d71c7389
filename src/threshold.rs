/// Detection threshold shared between the detection loop and remote writes
///
/// The in-memory value is authoritative. Saves run on a background task in
/// the order they were requested; a failed save is logged and never rolls
/// the value back.

use crate::settings::{SettingsStore, StorageError};
use cache_padded::CachePadded;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Settings key of the persisted threshold
pub const THRESHOLD_KEY: &str = "threshold";

/// Threshold used when nothing valid has been persisted
pub const DEFAULT_THRESHOLD: i32 = 10;

enum PersistRequest {
    Save(i32),
    Flush(oneshot::Sender<()>),
}

pub struct ThresholdStore {
    current: CachePadded<AtomicI32>,
    default: i32,
    settings: Arc<dyn SettingsStore>,
    persist_tx: mpsc::UnboundedSender<PersistRequest>,
}

impl ThresholdStore {
    /// Create the store, load the persisted value and start the persister.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(settings: Arc<dyn SettingsStore>, default: i32) -> Arc<Self> {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_loop(Arc::clone(&settings), persist_rx));

        let store = Arc::new(Self {
            current: CachePadded::new(AtomicI32::new(default)),
            default,
            settings,
            persist_tx,
        });

        store.load().await;
        store
    }

    /// Read the persisted threshold without touching the in-memory value
    pub async fn try_load(&self) -> Result<i32, StorageError> {
        self.settings.load(THRESHOLD_KEY).await
    }

    /// Load the persisted threshold, falling back to the default
    pub async fn load(&self) -> i32 {
        let value = match self.try_load().await {
            Ok(value) => {
                info!("Loaded threshold value: {}", value);
                value
            }
            Err(StorageError::NotFound(_)) => {
                info!("No stored threshold, using default {}", self.default);
                self.default
            }
            Err(e) => {
                warn!("Threshold storage unavailable ({}), using default {}", e, self.default);
                self.default
            }
        };

        self.current.store(value, Ordering::Release);
        value
    }

    /// Current threshold
    pub fn get(&self) -> i32 {
        self.current.load(Ordering::Acquire)
    }

    /// Update the threshold and queue a save
    pub fn set(&self, value: i32) {
        info!("Saving new threshold value: {}", value);
        self.current.store(value, Ordering::Release);

        if self.persist_tx.send(PersistRequest::Save(value)).is_err() {
            warn!("Threshold persister stopped, {} kept in memory only", value);
        }
    }

    /// Wait until every save queued so far has been attempted
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.persist_tx.send(PersistRequest::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn default_value(&self) -> i32 {
        self.default
    }
}

async fn persist_loop(
    settings: Arc<dyn SettingsStore>,
    mut requests: mpsc::UnboundedReceiver<PersistRequest>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            PersistRequest::Save(value) => match settings.save(THRESHOLD_KEY, value).await {
                Ok(()) => debug!("Persisted threshold {}", value),
                Err(e) => warn!("Failed to persist threshold {}: {}", value, e),
            },
            PersistRequest::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    debug!("Threshold persister stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;
    use async_trait::async_trait;

    /// Store whose backing medium is never reachable
    struct UnavailableStore;

    #[async_trait]
    impl SettingsStore for UnavailableStore {
        async fn load(&self, _key: &str) -> Result<i32, StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "flash offline",
            )))
        }

        async fn save(&self, _key: &str, _value: i32) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "flash offline",
            )))
        }
    }

    #[tokio::test]
    async fn test_loads_persisted_value() {
        let settings = Arc::new(MemorySettingsStore::with_value(THRESHOLD_KEY, 33));
        let store = ThresholdStore::open(settings, DEFAULT_THRESHOLD).await;
        assert_eq!(store.get(), 33);
    }

    #[tokio::test]
    async fn test_missing_value_uses_default() {
        let store = ThresholdStore::open(Arc::new(MemorySettingsStore::new()), 12).await;
        assert_eq!(store.get(), 12);
        assert_eq!(store.default_value(), 12);
    }

    #[tokio::test]
    async fn test_set_survives_restart() {
        let settings = Arc::new(MemorySettingsStore::new());

        let store = ThresholdStore::open(settings.clone(), DEFAULT_THRESHOLD).await;
        store.set(42);
        assert_eq!(store.get(), 42);
        store.flush().await;
        drop(store);

        let restarted = ThresholdStore::open(settings, DEFAULT_THRESHOLD).await;
        assert_eq!(restarted.get(), 42);
    }

    #[tokio::test]
    async fn test_last_set_wins() {
        let settings = Arc::new(MemorySettingsStore::new());
        let store = ThresholdStore::open(settings.clone(), DEFAULT_THRESHOLD).await;

        for value in [15, 16, 17] {
            store.set(value);
        }
        store.flush().await;

        assert_eq!(settings.load(THRESHOLD_KEY).await.unwrap(), 17);
    }

    #[tokio::test]
    async fn test_unavailable_storage() {
        let store = ThresholdStore::open(Arc::new(UnavailableStore), DEFAULT_THRESHOLD).await;
        assert_eq!(store.get(), DEFAULT_THRESHOLD);
        assert!(store.try_load().await.is_err());

        // Failed save keeps the new value in memory
        store.set(55);
        store.flush().await;
        assert_eq!(store.get(), 55);

        // Reloading falls back to the default again
        assert_eq!(store.load().await, DEFAULT_THRESHOLD);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_readers_see_whole_values() {
        let store = ThresholdStore::open(Arc::new(MemorySettingsStore::new()), 0).await;

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..10_000 {
                    store.set(if i % 2 == 0 { i32::MAX } else { i32::MIN });
                }
            })
        };

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..10_000 {
                    let value = store.get();
                    assert!(value == 0 || value == i32::MAX || value == i32::MIN);
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(store.get(), i32::MIN);
    }
}
