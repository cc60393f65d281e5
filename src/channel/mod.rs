mod dojo;
mod error;
mod lifecycle;
mod merchant;
mod rooms;
mod wedding;

pub use error::{ChannelError, ConflictKind, NotFoundKind};
pub use merchant::{MerchantRegistry, SharedMerchant};
pub use rooms::{CarnivalKind, MiniDungeon, MiniDungeonInfo};
pub use wedding::{format_time_left, ReservationStatus, VenueSnapshot};

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::collab::{Collaborators, EventSubsystem, OwnedMap};
use crate::config::ChannelConfig;
use crate::limits::WEDDING_FIRST_START_OFFSET_MS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::scheduler::Scheduler;

use dojo::SlotAllocator;
use rooms::Rooms;
use wedding::ReservationQueue;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Everything guarded by the general lock. Scheduled callbacks reach it
/// through a `Weak` and take the same lock before touching it.
pub(crate) struct SharedState {
    dojo: SlotAllocator,
    chapel: ReservationQueue,
    cathedral: ReservationQueue,
    /// Start of the most recent ceremony; queue ETAs count from here.
    ceremony_clock: Ms,
    away: HashSet<PlayerId>,
    rooms: Rooms,
    lifecycle: Lifecycle,
}

impl SharedState {
    fn new(started_at: Ms) -> Self {
        Self {
            dojo: SlotAllocator::new(),
            chapel: ReservationQueue::new(Venue::Chapel),
            cathedral: ReservationQueue::new(Venue::Cathedral),
            ceremony_clock: started_at + WEDDING_FIRST_START_OFFSET_MS,
            away: HashSet::new(),
            rooms: Rooms::default(),
            lifecycle: Lifecycle::Active,
        }
    }

    fn venue(&self, venue: Venue) -> &ReservationQueue {
        match venue {
            Venue::Chapel => &self.chapel,
            Venue::Cathedral => &self.cathedral,
        }
    }

    fn venue_mut(&mut self, venue: Venue) -> &mut ReservationQueue {
        match venue {
            Venue::Chapel => &mut self.chapel,
            Venue::Cathedral => &mut self.cathedral,
        }
    }

    fn ensure_active(&self) -> Result<(), ChannelError> {
        match self.lifecycle {
            Lifecycle::Active => Ok(()),
            _ => Err(ChannelError::InvalidState("channel shut down")),
        }
    }
}

/// One server partition: dojo slots, two wedding venues, the merchant
/// registry and the smaller timed rooms, plus the shutdown sequence that
/// tears them down.
pub struct Channel {
    key: ChannelKey,
    config: ChannelConfig,
    address: String,
    started_at: Ms,
    degraded: bool,
    state: Arc<Mutex<SharedState>>,
    merchants: Arc<MerchantRegistry>,
    /// Outside the general lock; checks run against a snapshot.
    owned_maps: DashMap<InstanceId, Weak<dyn OwnedMap>>,
    collab: Collaborators,
    /// Swappable on reload; `None` once disposed.
    events: Mutex<Option<Arc<dyn EventSubsystem>>>,
    /// Serializes shutdown and reload.
    lifecycle_gate: Mutex<()>,
    scheduler: Arc<Scheduler>,
    pub notify: Arc<NotifyHub>,
}

impl Channel {
    /// Build the channel and bring its transport up. A transport that fails
    /// to start leaves the channel running in a degraded state.
    pub fn start(
        key: ChannelKey,
        config: ChannelConfig,
        collab: Collaborators,
        scheduler: Arc<Scheduler>,
    ) -> Arc<Self> {
        let address = format!("{}:{}", config.host, key.port());
        let degraded = match collab.transport.start(&address) {
            Ok(()) => {
                info!("channel {key}: listening on {address}");
                false
            }
            Err(e) => {
                warn!("channel {key}: initialization incomplete: {e}");
                true
            }
        };
        let started_at = now_ms();

        Arc::new(Self {
            key,
            address,
            started_at,
            degraded,
            state: Arc::new(Mutex::new(SharedState::new(started_at))),
            merchants: Arc::new(MerchantRegistry::new()),
            owned_maps: DashMap::new(),
            events: Mutex::new(Some(collab.events.clone())),
            collab,
            config,
            lifecycle_gate: Mutex::new(()),
            scheduler,
            notify: Arc::new(NotifyHub::new()),
        })
    }

    pub fn key(&self) -> ChannelKey {
        self.key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn started_at(&self) -> Ms {
        self.started_at
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn merchants(&self) -> &Arc<MerchantRegistry> {
        &self.merchants
    }
}
