//! In-memory collaborators, used by the standalone binary and by tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::collab::*;
use crate::model::*;

// ── Instances ────────────────────────────────────────────────────

#[derive(Default)]
pub struct LocalInstances {
    occupants: DashMap<InstanceId, Vec<SessionRef>>,
    resets: DashMap<InstanceId, u32>,
    time_limits: DashMap<InstanceId, u32>,
    disposed: AtomicBool,
}

impl LocalInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a player into an instance, removing them from wherever they were.
    pub fn place(&self, player: PlayerId, party: Option<PartyKey>, instance: InstanceId) {
        self.remove(player);
        self.occupants.entry(instance).or_default().push(SessionRef {
            player,
            party,
            instance,
        });
    }

    pub fn remove(&self, player: PlayerId) -> Option<SessionRef> {
        // Locate first: mutating while iterating would deadlock on the shard.
        let at = self
            .occupants
            .iter()
            .find(|e| e.value().iter().any(|s| s.player == player))
            .map(|e| *e.key())?;
        let mut list = self.occupants.get_mut(&at)?;
        let pos = list.iter().position(|s| s.player == player)?;
        Some(list.remove(pos))
    }

    pub fn location(&self, player: PlayerId) -> Option<InstanceId> {
        self.occupants
            .iter()
            .find(|e| e.value().iter().any(|s| s.player == player))
            .map(|e| *e.key())
    }

    pub fn set_time_limit(&self, instance: InstanceId, secs: u32) {
        self.time_limits.insert(instance, secs);
    }

    pub fn reset_count(&self, instance: InstanceId) -> u32 {
        self.resets.get(&instance).map(|r| *r).unwrap_or(0)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl InstanceProvider for LocalInstances {
    fn occupant_count(&self, instance: InstanceId) -> usize {
        self.occupants.get(&instance).map_or(0, |l| l.len())
    }

    fn occupants(&self, instance: InstanceId) -> Vec<SessionRef> {
        self.occupants
            .get(&instance)
            .map(|l| l.value().clone())
            .unwrap_or_default()
    }

    fn reset_objects(&self, instance: InstanceId) {
        *self.resets.entry(instance).or_insert(0) += 1;
    }

    fn transfer(&self, player: PlayerId, to: InstanceId) -> Result<(), CollaboratorError> {
        let session = self
            .remove(player)
            .ok_or_else(|| CollaboratorError(format!("player {player} is not in any instance")))?;
        self.place(player, session.party, to);
        Ok(())
    }

    fn time_limit_secs(&self, instance: InstanceId) -> u32 {
        self.time_limits.get(&instance).map_or(0, |t| *t)
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.occupants.clear();
    }
}

// ── Relationships ────────────────────────────────────────────────

#[derive(Default)]
pub struct LocalRelationships {
    queued: DashMap<ReservationId, ReservationMeta>,
    couples: DashMap<ReservationId, (PlayerId, PlayerId)>,
    names: DashMap<PlayerId, String>,
}

impl LocalRelationships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_name(&self, player: PlayerId, name: impl Into<String>) {
        self.names.insert(player, name.into());
    }

    pub fn set_guests(&self, id: ReservationId, guests: Vec<PlayerId>) {
        if let Some(mut meta) = self.queued.get_mut(&id) {
            meta.guests = guests;
        }
    }
}

impl RelationshipStore for LocalRelationships {
    fn queue_reservation(&self, id: ReservationId, meta: ReservationMeta) {
        self.couples.insert(id, (meta.partner_a, meta.partner_b));
        self.queued.insert(id, meta);
    }

    fn take_queued_meta(&self, id: ReservationId) -> Option<ReservationMeta> {
        self.queued.remove(&id).map(|(_, meta)| meta)
    }

    fn is_queued(&self, id: ReservationId) -> bool {
        self.queued.contains_key(&id)
    }

    fn lookup_names(&self, players: &[PlayerId]) -> Vec<String> {
        players
            .iter()
            .map(|p| {
                self.names
                    .get(p)
                    .map(|n| n.value().clone())
                    .unwrap_or_else(|| format!("#{p}"))
            })
            .collect()
    }

    fn couple(&self, id: ReservationId) -> Option<(PlayerId, PlayerId)> {
        self.couples.get(&id).map(|c| *c)
    }
}

// ── Sessions ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct LocalSessions {
    online: DashMap<PlayerId, String>,
    kicked: DashMap<PlayerId, ()>,
}

impl LocalSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, player: PlayerId, name: impl Into<String>) {
        self.online.insert(player, name.into());
    }

    pub fn was_force_disconnected(&self, player: PlayerId) -> bool {
        self.kicked.contains_key(&player)
    }
}

impl SessionDirectory for LocalSessions {
    fn count(&self) -> usize {
        self.online.len()
    }

    fn is_logged_in(&self, player: PlayerId) -> bool {
        self.online.contains_key(&player)
    }

    fn is_connected(&self, name: &str) -> bool {
        self.online.iter().any(|e| e.value() == name)
    }

    fn force_disconnect(&self, player: PlayerId) {
        if self.online.remove(&player).is_some() {
            self.kicked.insert(player, ());
        }
    }

    fn disconnect_all(&self) -> usize {
        let n = self.online.len();
        self.online.clear();
        n
    }
}

// ── Merchants ────────────────────────────────────────────────────

/// A stall that counts how many times it was force-closed.
pub struct LocalMerchant {
    owner: OwnerId,
    closes: AtomicUsize,
}

impl LocalMerchant {
    pub fn new(owner: OwnerId) -> Arc<Self> {
        Arc::new(Self {
            owner,
            closes: AtomicUsize::new(0),
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MerchantHandle for LocalMerchant {
    fn owner(&self) -> OwnerId {
        self.owner
    }

    async fn force_close(&self) {
        self.closes.fetch_add(1, Ordering::AcqRel);
    }
}

// ── Owned maps ───────────────────────────────────────────────────

/// An owned map that counts activity checks.
pub struct LocalOwnedMap {
    id: InstanceId,
    checks: AtomicUsize,
}

impl LocalOwnedMap {
    pub fn new(id: InstanceId) -> Arc<Self> {
        Arc::new(Self {
            id,
            checks: AtomicUsize::new(0),
        })
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::Acquire)
    }
}

impl OwnedMap for LocalOwnedMap {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn check_owner_activity(&self) {
        self.checks.fetch_add(1, Ordering::AcqRel);
    }
}

// ── Lifecycle collaborators ──────────────────────────────────────

#[derive(Default)]
pub struct LocalEvents {
    disposed: AtomicBool,
}

impl LocalEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl EventSubsystem for LocalEvents {
    fn is_active(&self) -> bool {
        !self.is_disposed()
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

#[derive(Default)]
pub struct LocalServices {
    shut_down: AtomicBool,
}

impl LocalServices {
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl AuxService for LocalServices {
    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

#[derive(Default)]
pub struct LocalTransport {
    refuse_bind: bool,
    running: AtomicBool,
}

impl LocalTransport {
    /// A transport whose `start` always fails, for degraded-channel paths.
    pub fn refusing() -> Self {
        Self {
            refuse_bind: true,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Transport for LocalTransport {
    fn start(&self, address: &str) -> Result<(), CollaboratorError> {
        if self.refuse_bind {
            return Err(CollaboratorError(format!("cannot bind {address}")));
        }
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// A full set of in-memory collaborators with typed access to each.
#[derive(Clone)]
pub struct LocalWorld {
    pub instances: Arc<LocalInstances>,
    pub relationships: Arc<LocalRelationships>,
    pub sessions: Arc<LocalSessions>,
    pub events: Arc<LocalEvents>,
    pub services: Arc<LocalServices>,
    pub transport: Arc<LocalTransport>,
}

impl Default for LocalWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalWorld {
    pub fn new() -> Self {
        Self::with_transport(LocalTransport::default())
    }

    pub fn with_transport(transport: LocalTransport) -> Self {
        Self {
            instances: Arc::new(LocalInstances::new()),
            relationships: Arc::new(LocalRelationships::new()),
            sessions: Arc::new(LocalSessions::new()),
            events: Arc::new(LocalEvents::new()),
            services: Arc::new(LocalServices::default()),
            transport: Arc::new(transport),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            instances: self.instances.clone(),
            relationships: self.relationships.clone(),
            sessions: self.sessions.clone(),
            events: self.events.clone(),
            services: self.services.clone(),
            transport: self.transport.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_moves_between_instances() {
        let inst = LocalInstances::new();
        inst.place(1, Some(PartyKey(9)), InstanceId(10));
        inst.place(2, None, InstanceId(10));
        assert_eq!(inst.occupant_count(InstanceId(10)), 2);

        inst.transfer(1, InstanceId(20)).unwrap();
        assert_eq!(inst.occupant_count(InstanceId(10)), 1);
        assert_eq!(inst.location(1), Some(InstanceId(20)));
        assert_eq!(inst.occupants(InstanceId(20))[0].party, Some(PartyKey(9)));
    }

    #[test]
    fn transfer_unknown_player_errors() {
        let inst = LocalInstances::new();
        assert!(inst.transfer(42, InstanceId(1)).is_err());
    }

    #[test]
    fn relationships_take_removes_queue_entry() {
        let rel = LocalRelationships::new();
        rel.queue_reservation(
            5,
            ReservationMeta {
                venue: Venue::Chapel,
                premium: true,
                partner_a: 1,
                partner_b: 2,
                guests: vec![],
            },
        );
        assert!(rel.is_queued(5));
        let meta = rel.take_queued_meta(5).unwrap();
        assert!(meta.premium);
        assert!(!rel.is_queued(5));
        // couple survives the queue
        assert_eq!(rel.couple(5), Some((1, 2)));
    }

    #[test]
    fn unnamed_players_get_placeholder_names() {
        let rel = LocalRelationships::new();
        rel.register_name(1, "Ayla");
        assert_eq!(rel.lookup_names(&[1, 2]), vec!["Ayla".to_string(), "#2".to_string()]);
    }
}
