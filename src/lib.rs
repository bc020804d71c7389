/// Clap switch library
///
/// This library detects hand claps in a sampled audio stream, recognizes a
/// double clap within a time window, and reports the resulting state to a
/// remote subscriber. The detection threshold is persisted and can be
/// changed remotely.

pub mod broadcaster;
pub mod config;
pub mod detector;
pub mod gesture;
pub mod indicator;
pub mod sample_buffer;
pub mod sampler;
pub mod settings;
pub mod switch;
pub mod threshold;
pub mod transport;

// Re-export main types
pub use broadcaster::StateBroadcaster;
pub use config::{ClapConfig, ConfigError};
pub use detector::{Averages, DetectorError, DetectorStats, DualAverageDetector};
pub use gesture::{GestureState, GestureStateMachine};
pub use indicator::{play_startup_pattern, Indicator, LogIndicator};
pub use sample_buffer::{BufferError, Sample, SampleBuffer};
pub use sampler::{AcquisitionError, CpalSampleSource, SampleSource, WavSampleSource};
pub use settings::{FileSettingsStore, MemorySettingsStore, SettingsStore, StorageError};
pub use switch::{ClapSwitch, ACQUISITION_BACKOFF};
pub use threshold::{ThresholdStore, DEFAULT_THRESHOLD, THRESHOLD_KEY};
pub use transport::{
    loopback, serve_link_events, LinkEvents, LinkNotifier, NotificationSink, RemotePeer,
    TransportError,
};
