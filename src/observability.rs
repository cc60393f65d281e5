use std::net::SocketAddr;

// ── Dojo ────────────────────────────────────────────────────────

/// Gauge: occupied dojo slots across all channels.
pub const DOJO_SLOTS_ACTIVE: &str = "channel_dojo_slots_active";

/// Counter: acquire attempts. Labels: outcome (ok, exhausted, conflict).
pub const DOJO_ACQUIRE_TOTAL: &str = "channel_dojo_acquire_total";

/// Counter: slots freed by their expiry timer.
pub const DOJO_EXPIRIES_TOTAL: &str = "channel_dojo_expiries_total";

// ── Weddings ────────────────────────────────────────────────────

/// Counter: reservation pushes. Labels: outcome (ok, conflict).
pub const WEDDING_RESERVATIONS_TOTAL: &str = "channel_wedding_reservations_total";

/// Counter: ongoing ceremonies closed because nobody accepted in time.
pub const WEDDING_TIMEOUTS_TOTAL: &str = "channel_wedding_timeouts_total";

// ── Registry / lifecycle ────────────────────────────────────────

/// Gauge: open merchants across all channels.
pub const MERCHANTS_ACTIVE: &str = "channel_merchants_active";

/// Gauge: running channels.
pub const CHANNELS_ACTIVE: &str = "channel_channels_active";

/// Counter: scheduler timers whose delay elapsed.
pub const TIMERS_FIRED_TOTAL: &str = "channel_timers_fired_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}
