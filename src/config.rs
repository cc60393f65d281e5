use serde::Deserialize;

/// Per-channel tunables. Every field can be overridden from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub host: String,
    /// Queue length every new reservation is padded up to.
    pub wedding_reservation_delay: usize,
    /// Minutes between two queue positions.
    pub wedding_reservation_interval_minutes: i64,
    /// Minutes an ongoing ceremony may wait to be accepted.
    pub wedding_reservation_timeout_minutes: i64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            wedding_reservation_delay: 3,
            wedding_reservation_interval_minutes: 10,
            wedding_reservation_timeout_minutes: 10,
        }
    }
}

impl ChannelConfig {
    /// Defaults overridden by `CHANNEL_*` variables. Unparsable values keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(host) = lookup("CHANNEL_HOST") {
            cfg.host = host;
        }
        if let Some(v) = lookup("CHANNEL_WEDDING_RESERVATION_DELAY").and_then(|s| s.parse().ok()) {
            cfg.wedding_reservation_delay = v;
        }
        if let Some(v) = lookup("CHANNEL_WEDDING_RESERVATION_INTERVAL").and_then(|s| s.parse().ok()) {
            cfg.wedding_reservation_interval_minutes = v;
        }
        if let Some(v) = lookup("CHANNEL_WEDDING_RESERVATION_TIMEOUT").and_then(|s| s.parse().ok()) {
            cfg.wedding_reservation_timeout_minutes = v;
        }
        cfg
    }

    /// Saturates rather than wrapping for absurd minute counts.
    pub fn reservation_interval_ms(&self) -> i64 {
        self.wedding_reservation_interval_minutes.saturating_mul(60_000)
    }

    pub fn reservation_timeout_ms(&self) -> i64 {
        self.wedding_reservation_timeout_minutes.saturating_mul(60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CHANNEL_WEDDING_RESERVATION_DELAY", "5"),
            ("CHANNEL_WEDDING_RESERVATION_TIMEOUT", "2"),
            ("CHANNEL_WEDDING_RESERVATION_INTERVAL", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let cfg = ChannelConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.wedding_reservation_delay, 5);
        assert_eq!(cfg.reservation_timeout_ms(), 120_000);
        // bad value falls back
        assert_eq!(cfg.wedding_reservation_interval_minutes, 10);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn huge_minute_counts_saturate() {
        let vars: HashMap<&str, String> = [
            ("CHANNEL_WEDDING_RESERVATION_INTERVAL", i64::MAX.to_string()),
            ("CHANNEL_WEDDING_RESERVATION_TIMEOUT", (i64::MIN / 2).to_string()),
        ]
        .into_iter()
        .collect();
        let cfg = ChannelConfig::from_lookup(|k| vars.get(k).cloned());
        assert_eq!(cfg.reservation_interval_ms(), i64::MAX);
        assert_eq!(cfg.reservation_timeout_ms(), i64::MIN);
    }

    #[test]
    fn deserialize_partial_uses_defaults() {
        let cfg: ChannelConfig =
            serde_json::from_str(r#"{"wedding_reservation_delay": 1}"#).unwrap();
        assert_eq!(cfg.wedding_reservation_delay, 1);
        assert_eq!(cfg.wedding_reservation_timeout_minutes, 10);
    }
}
