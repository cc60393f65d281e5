//! Narrow contracts the channel consumes from the rest of the server.
//!
//! No channel lock is held while a collaborator runs, so implementations may
//! call back into the channel. Synchronous methods still run on the async
//! runtime and must not block on I/O. `MerchantHandle::force_close` may
//! re-enter the merchant registry.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorError(pub String);

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collaborator error: {}", self.0)
    }
}

impl std::error::Error for CollaboratorError {}

/// Spatial instances (maps) and who stands in them.
pub trait InstanceProvider: Send + Sync {
    fn occupant_count(&self, instance: InstanceId) -> usize;
    fn occupants(&self, instance: InstanceId) -> Vec<SessionRef>;
    fn reset_objects(&self, instance: InstanceId);
    /// Move a player into another instance.
    fn transfer(&self, player: PlayerId, to: InstanceId) -> Result<(), CollaboratorError>;
    /// Seconds a timed instance stays open; 0 when it has no limit.
    fn time_limit_secs(&self, instance: InstanceId) -> u32;
    fn dispose(&self);
}

/// Server-wide relationship/ceremony bookkeeping, shared by all channels of a world.
pub trait RelationshipStore: Send + Sync {
    fn queue_reservation(&self, id: ReservationId, meta: ReservationMeta);
    /// Remove and return the queued meta.
    fn take_queued_meta(&self, id: ReservationId) -> Option<ReservationMeta>;
    fn is_queued(&self, id: ReservationId) -> bool;
    fn lookup_names(&self, players: &[PlayerId]) -> Vec<String>;
    fn couple(&self, id: ReservationId) -> Option<(PlayerId, PlayerId)>;
}

pub trait SessionDirectory: Send + Sync {
    fn count(&self) -> usize;
    fn is_logged_in(&self, player: PlayerId) -> bool;
    fn is_connected(&self, name: &str) -> bool;
    fn force_disconnect(&self, player: PlayerId);
    /// Disconnect everyone; returns how many sessions were dropped.
    fn disconnect_all(&self) -> usize;
}

/// A player-owned stall. The registry only tracks it and can force it shut.
#[async_trait]
pub trait MerchantHandle: Send + Sync {
    fn owner(&self) -> OwnerId;
    async fn force_close(&self);
}

/// A map that belongs to a player for a while and gives it up when the
/// owner goes idle.
pub trait OwnedMap: Send + Sync {
    fn id(&self) -> InstanceId;
    fn check_owner_activity(&self);
}

pub trait EventSubsystem: Send + Sync {
    fn is_active(&self) -> bool;
    fn dispose(&self);
}

pub trait AuxService: Send + Sync {
    fn shutdown(&self);
}

/// The listening socket of the channel.
pub trait Transport: Send + Sync {
    fn start(&self, address: &str) -> Result<(), CollaboratorError>;
    fn stop(&self);
}

#[derive(Clone)]
pub struct Collaborators {
    pub instances: Arc<dyn InstanceProvider>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub sessions: Arc<dyn SessionDirectory>,
    pub events: Arc<dyn EventSubsystem>,
    pub services: Arc<dyn AuxService>,
    pub transport: Arc<dyn Transport>,
}
