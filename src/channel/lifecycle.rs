use std::sync::Arc;

use tracing::{debug, info};

use crate::collab::EventSubsystem;
use crate::model::*;

use super::{Channel, ChannelError};

impl Channel {
    pub async fn lifecycle(&self) -> Lifecycle {
        self.state.lock().await.lifecycle
    }

    pub async fn finished_shutdown(&self) -> bool {
        self.lifecycle().await == Lifecycle::Shutdown
    }

    /// Event subsystem present and active, and the channel not shutting down.
    pub async fn is_active(&self) -> bool {
        if self.lifecycle().await != Lifecycle::Active {
            return false;
        }
        let events = self.events.lock().await.clone();
        events.is_some_and(|e| e.is_active())
    }

    /// The player is off in a side service (cash shop and the like).
    pub async fn insert_away(&self, player: PlayerId) {
        self.state.lock().await.away.insert(player);
    }

    pub async fn remove_away(&self, player: PlayerId) {
        self.state.lock().await.away.remove(&player);
    }

    pub async fn can_uninstall(&self) -> bool {
        let nobody_away = self.state.lock().await.away.is_empty();
        nobody_away && self.collab.sessions.count() == 0
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.collab.sessions.is_connected(name)
    }

    /// Swap in a fresh event subsystem, disposing the old one.
    pub async fn reload_events(&self, fresh: Arc<dyn EventSubsystem>) -> Result<(), ChannelError> {
        let _gate = self.lifecycle_gate.lock().await;
        self.state.lock().await.ensure_active()?;
        let old = self.events.lock().await.replace(fresh);
        if let Some(old) = old {
            old.dispose();
        }
        info!("channel {}: event subsystem reloaded", self.key);
        Ok(())
    }

    /// Tear the channel down. Runs once; later calls return immediately.
    pub async fn shutdown(&self) {
        let _gate = self.lifecycle_gate.lock().await;
        {
            let mut guard = self.state.lock().await;
            if guard.lifecycle != Lifecycle::Active {
                return;
            }
            guard.lifecycle = Lifecycle::ShuttingDown;
        }
        info!("shutting down channel {}", self.key);

        self.merchants.drain_and_close_all().await;

        // Away players are not in the session directory's normal set.
        let away: Vec<PlayerId> = self.state.lock().await.away.drain().collect();
        let sessions = &self.collab.sessions;
        for player in away {
            if sessions.is_logged_in(player) {
                sessions.force_disconnect(player);
            }
        }
        let dropped = sessions.disconnect_all();
        debug!("channel {}: disconnected {dropped} sessions", self.key);

        let events = self.events.lock().await.take();
        if let Some(events) = events {
            events.dispose();
        }
        self.collab.instances.dispose();
        self.owned_maps.clear();

        let cancelled = {
            let mut guard = self.state.lock().await;
            let mut n = guard.dojo.cancel_all();
            for venue in Venue::ALL {
                if guard.venue_mut(venue).end().is_some() {
                    n += 1;
                }
            }
            (n, guard.rooms.clear())
        };
        debug!(
            "channel {}: cancelled {} timers, closed {} rooms",
            self.key, cancelled.0, cancelled.1
        );

        self.collab.services.shutdown();
        self.collab.transport.stop();

        self.state.lock().await.lifecycle = Lifecycle::Shutdown;
        info!("channel {} shut down", self.key);
    }
}
