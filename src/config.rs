/// Service configuration
///
/// All tunables of the clap switch live here. The threshold default is only
/// used until a persisted value has been loaded.

use crate::sampler::MAX_RESOLUTION_BITS;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for the clap switch
#[derive(Debug, Clone)]
pub struct ClapConfig {
    /// Samples averaged for the ambient noise floor
    pub long_window: usize,

    /// Samples averaged for the spike detector (must be smaller than `long_window`)
    pub short_window: usize,

    /// Divergence threshold used when nothing has been persisted
    pub default_threshold: i32,

    /// Pause after a detected transient so its tail is not detected again
    pub cooldown: Duration,

    /// Maximum time between two claps of a gesture
    pub gesture_window: Duration,

    /// How long a recognized gesture is reported as active
    pub hold_duration: Duration,

    /// Step of the startup indicator pattern
    pub startup_blink: Duration,

    /// Resolution the sampler reduces captured audio to
    pub sample_resolution_bits: u8,

    /// Longest wait for a captured sample before the cycle fails
    pub read_timeout: Duration,

    /// Pending notifications kept for the remote peer
    pub notification_queue: usize,

    /// Location of the persisted settings file
    pub settings_path: PathBuf,
}

impl Default for ClapConfig {
    fn default() -> Self {
        let settings_path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clap-switch")
            .join("settings.json");

        Self {
            long_window: 40,
            short_window: 4,
            default_threshold: 10,
            cooldown: Duration::from_millis(50),
            gesture_window: Duration::from_secs(1),
            hold_duration: Duration::from_secs(1),
            startup_blink: Duration::from_millis(500),
            sample_resolution_bits: 10, // matches a 10-bit SAADC
            read_timeout: Duration::from_millis(100),
            notification_queue: 16,
            settings_path,
        }
    }
}

impl ClapConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.long_window == 0 || self.short_window == 0 {
            return Err(ConfigError::InvalidConfig(
                "window sizes must be greater than 0".to_string(),
            ));
        }

        if self.short_window >= self.long_window {
            return Err(ConfigError::InvalidConfig(format!(
                "short_window ({}) must be smaller than long_window ({})",
                self.short_window, self.long_window
            )));
        }

        if self.sample_resolution_bits == 0 || self.sample_resolution_bits > MAX_RESOLUTION_BITS {
            return Err(ConfigError::InvalidConfig(format!(
                "sample_resolution_bits must be between 1 and {}",
                MAX_RESOLUTION_BITS
            )));
        }

        if self.gesture_window.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "gesture_window must be greater than 0".to_string(),
            ));
        }

        if self.notification_queue == 0 {
            return Err(ConfigError::InvalidConfig(
                "notification_queue must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
