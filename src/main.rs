/// Clap switch service binary
///
/// Listens on the default input device and reports double claps.

use anyhow::Context;
use clap_switch::{
    loopback, play_startup_pattern, serve_link_events, ClapConfig, ClapSwitch, CpalSampleSource,
    DualAverageDetector, FileSettingsStore, GestureStateMachine, LogIndicator,
    StateBroadcaster, ThresholdStore,
};
use std::sync::Arc;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clap_switch=debug".parse()?),
        )
        .init();

    info!("Starting clap switch service");

    let config = ClapConfig::default();
    config.validate().context("invalid configuration")?;

    let indicator = Arc::new(LogIndicator::new());

    let settings = Arc::new(FileSettingsStore::new(&config.settings_path));
    info!("Settings file: {}", settings.path().display());
    let threshold = ThresholdStore::open(settings, config.default_threshold).await;

    let (source, _stream) =
        CpalSampleSource::open(config.sample_resolution_bits, config.read_timeout)
            .context("failed to open audio input")?;

    let (notifier, link_events, mut peer) = loopback(config.notification_queue);
    let broadcaster = Arc::new(StateBroadcaster::new(
        Arc::new(notifier),
        indicator.clone(),
    ));
    tokio::spawn(serve_link_events(
        link_events,
        broadcaster.clone(),
        threshold.clone(),
    ));

    // No radio on this host: the peer end only logs what would be pushed
    tokio::spawn(async move {
        while let Some(active) = peer.next_notification().await {
            debug!("Peer received state {}", active);
        }
    });

    let detector = DualAverageDetector::new(Box::new(source), threshold.clone(), &config)
        .context("failed to create detector")?;
    let gesture = GestureStateMachine::new(config.gesture_window);
    let mut switch = ClapSwitch::new(detector, gesture, broadcaster, config.hold_duration);

    // Show a recognizable pattern on startup
    play_startup_pattern(indicator.as_ref(), config.startup_blink).await;

    tokio::select! {
        _ = switch.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }

    switch.shutdown().await;
    threshold.flush().await;
    info!("Clap switch service stopped");

    Ok(())
}
