/// Visual indicator output

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Boolean-driven indicator, fire-and-forget
pub trait Indicator: Send + Sync {
    fn set(&self, on: bool);
}

/// Indicator for hosts without an LED: logs every change of state
#[derive(Default)]
pub struct LogIndicator {
    lit: AtomicBool,
}

impl LogIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_lit(&self) -> bool {
        self.lit.load(Ordering::Acquire)
    }
}

impl Indicator for LogIndicator {
    fn set(&self, on: bool) {
        if self.lit.swap(on, Ordering::AcqRel) != on {
            info!("Indicator {}", if on { "on" } else { "off" });
        }
    }
}

/// Blink on, off, on, off so a restart is recognizable
pub async fn play_startup_pattern(indicator: &dyn Indicator, step: Duration) {
    for on in [true, false, true] {
        indicator.set(on);
        tokio::time::sleep(step).await;
    }
    indicator.set(false);
}
