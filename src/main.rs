use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use channel_coord::config::ChannelConfig;
use channel_coord::limits::OWNED_MAP_CHECK_INTERVAL_SECS;
use channel_coord::local::LocalWorld;
use channel_coord::manager::{run_owned_map_checks, ChannelManager};
use channel_coord::model::ChannelKey;
use channel_coord::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("CHANNEL_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    channel_coord::observability::init(metrics_port);

    let world: u16 = std::env::var("CHANNEL_WORLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let count: u16 = std::env::var("CHANNEL_COUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    let config = ChannelConfig::from_env();

    info!("world {world}: starting {count} channels");
    info!("  host: {}", config.host);
    info!(
        "  weddings: delay {}, interval {}m, timeout {}m",
        config.wedding_reservation_delay,
        config.wedding_reservation_interval_minutes,
        config.wedding_reservation_timeout_minutes
    );
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let manager = Arc::new(ChannelManager::new(
        config,
        Scheduler::new(),
        Box::new(|_: ChannelKey| LocalWorld::new().collaborators()),
    ));
    for channel in 1..=count {
        let ch = manager.start(ChannelKey::new(world, channel))?;
        if ch.is_degraded() {
            tracing::warn!("channel {} running without transport", ch.key());
        }
    }

    let owned_map_checks = tokio::spawn(run_owned_map_checks(
        manager.clone(),
        Duration::from_secs(OWNED_MAP_CHECK_INTERVAL_SECS),
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    owned_map_checks.abort();
    manager.shutdown_all().await;
    info!("world {world} stopped");
    Ok(())
}
