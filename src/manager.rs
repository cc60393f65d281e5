use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelError};
use crate::collab::Collaborators;
use crate::config::ChannelConfig;
use crate::limits::MAX_CHANNELS_PER_WORLD;
use crate::model::ChannelKey;
use crate::observability::CHANNELS_ACTIVE;
use crate::scheduler::Scheduler;

/// Builds the collaborators a new channel is wired to.
pub type CollabFactory = Box<dyn Fn(ChannelKey) -> Collaborators + Send + Sync>;

/// Running channels by (world, channel). Channels share one scheduler and config.
pub struct ChannelManager {
    channels: DashMap<ChannelKey, Arc<Channel>>,
    config: ChannelConfig,
    scheduler: Arc<Scheduler>,
    collab: CollabFactory,
}

impl ChannelManager {
    pub fn new(config: ChannelConfig, scheduler: Arc<Scheduler>, collab: CollabFactory) -> Self {
        Self {
            channels: DashMap::new(),
            config,
            scheduler,
            collab,
        }
    }

    /// Get the running channel for `key`, starting it first if needed.
    pub fn start(&self, key: ChannelKey) -> Result<Arc<Channel>, ChannelError> {
        if let Some(ch) = self.channels.get(&key) {
            return Ok(ch.value().clone());
        }
        if key.channel == 0 || key.channel > MAX_CHANNELS_PER_WORLD {
            return Err(ChannelError::InvalidState("channel number out of range"));
        }

        let ch = self
            .channels
            .entry(key)
            .or_insert_with(|| {
                Channel::start(
                    key,
                    self.config.clone(),
                    (self.collab)(key),
                    self.scheduler.clone(),
                )
            })
            .value()
            .clone();
        metrics::gauge!(CHANNELS_ACTIVE).set(self.channels.len() as f64);
        Ok(ch)
    }

    pub fn get(&self, key: ChannelKey) -> Option<Arc<Channel>> {
        self.channels.get(&key).map(|c| c.value().clone())
    }

    fn running(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|c| c.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Shut every channel down concurrently, then forget them.
    pub async fn shutdown_all(&self) {
        let running = self.running();
        info!("shutting down {} channels", running.len());
        futures::future::join_all(running.iter().map(|ch| ch.shutdown())).await;
        self.channels.clear();
        metrics::gauge!(CHANNELS_ACTIVE).set(0.0);
    }
}

/// Background task that periodically has every channel's owned maps check on their owners.
pub async fn run_owned_map_checks(manager: Arc<ChannelManager>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let checked: usize = manager
            .running()
            .iter()
            .map(|ch| ch.check_owned_maps())
            .sum();
        if checked > 0 {
            debug!("checked {checked} owned maps");
        }
    }
}
