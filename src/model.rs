use std::fmt;

use serde::{Deserialize, Serialize};

use crate::limits::*;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type PlayerId = u32;
pub type ReservationId = u32;
pub type OwnerId = u32;
pub type DungeonId = u32;

/// Opaque party identity. Comparable and hashable, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyKey(pub u64);

impl fmt::Display for PartyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "party#{}", self.0)
    }
}

/// Id of a spatial instance (a map) owned by the instance provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Dojo ─────────────────────────────────────────────────────────

/// The two address ranges of the dojo bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pool {
    Party,
    Solo,
}

impl Pool {
    pub fn capacity(self) -> u8 {
        match self {
            Pool::Party => DOJO_PARTY_SLOTS,
            Pool::Solo => DOJO_SOLO_SLOTS,
        }
    }

    /// First global bit owned by this pool.
    pub fn bit_offset(self) -> u8 {
        match self {
            Pool::Party => 0,
            Pool::Solo => DOJO_PARTY_SLOTS,
        }
    }

    fn base_instance(self) -> u32 {
        match self {
            Pool::Party => DOJO_PARTY_BASE,
            Pool::Solo => DOJO_SOLO_BASE,
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Party => write!(f, "party"),
            Pool::Solo => write!(f, "solo"),
        }
    }
}

/// A slot seen at a particular stage: pool + stage + slot number within the pool.
///
/// Maps one-to-one onto the instance id `base + 100 * stage + slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotIdentity {
    pub pool: Pool,
    pub stage: i32,
    pub slot: u8,
}

impl SlotIdentity {
    pub fn new(pool: Pool, stage: i32, slot: u8) -> Self {
        debug_assert!(slot < pool.capacity(), "slot out of pool range");
        Self { pool, stage, slot }
    }

    /// Global bit index in the 20-bit occupancy mask.
    pub fn bit(&self) -> u8 {
        self.pool.bit_offset() + self.slot
    }

    pub fn instance(&self) -> InstanceId {
        InstanceId(self.pool.base_instance() + 100 * self.stage.max(0) as u32 + self.slot as u32)
    }

    /// Decode an instance id. `None` for anything outside the dojo ranges.
    pub fn from_instance(id: InstanceId) -> Option<Self> {
        let pool = match id.0 / 10_000 {
            n if n == DOJO_PARTY_BASE / 10_000 => Pool::Party,
            n if n == DOJO_SOLO_BASE / 10_000 => Pool::Solo,
            _ => return None,
        };
        let identity = Self {
            pool,
            stage: ((id.0 / 100) % 100) as i32,
            slot: (id.0 % 100) as u8,
        };
        identity.is_valid().then_some(identity)
    }

    /// Slot inside its pool and stage in `1..=DOJO_LAST_STAGE`. The exit map
    /// shares the solo base but sits at stage 0.
    pub fn is_valid(&self) -> bool {
        self.slot < self.pool.capacity() && (1..=DOJO_LAST_STAGE).contains(&self.stage)
    }

    pub fn at_stage(&self, stage: i32) -> Self {
        Self { stage, ..*self }
    }

    /// Instances a party can be spread across while this stage is live.
    pub fn stage_window(&self) -> impl Iterator<Item = InstanceId> + '_ {
        (0..DOJO_STAGE_WINDOW)
            .map(move |i| self.stage + i)
            .take_while(|s| *s <= DOJO_LAST_STAGE)
            .map(move |s| self.at_stage(s).instance())
    }

    /// How long a party gets to clear this stage.
    pub fn stage_duration_ms(&self) -> Ms {
        let minutes = if self.stage > DOJO_LONG_STAGE_FROM {
            DOJO_MAX_STAGE_MINUTES
        } else {
            (self.stage.max(0) / 6) as Ms + 5
        };
        minutes * 60_000
    }
}

impl fmt::Display for SlotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.pool, self.slot, self.stage)
    }
}

pub fn is_dojo_instance(id: InstanceId) -> bool {
    SlotIdentity::from_instance(id).is_some()
}

// ── Weddings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Chapel,
    Cathedral,
}

impl Venue {
    pub const ALL: [Venue; 2] = [Venue::Cathedral, Venue::Chapel];
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Chapel => write!(f, "Chapel"),
            Venue::Cathedral => write!(f, "Cathedral"),
        }
    }
}

/// One queue position: a real reservation, or a spacer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEntry {
    Placeholder,
    Reservation(ReservationId),
}

impl ReservationEntry {
    pub fn id(&self) -> Option<ReservationId> {
        match self {
            ReservationEntry::Placeholder => None,
            ReservationEntry::Reservation(id) => Some(*id),
        }
    }
}

/// What the relationship store keeps for a queued reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationMeta {
    pub venue: Venue,
    pub premium: bool,
    pub partner_a: PlayerId,
    pub partner_b: PlayerId,
    pub guests: Vec<PlayerId>,
}

/// A reservation that just left the queue and is due to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingCeremony {
    pub id: ReservationId,
    pub premium: bool,
    pub guests: Vec<PlayerId>,
}

// ── Sessions / channels ──────────────────────────────────────────

/// What the instance provider reports about an occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRef {
    pub player: PlayerId,
    pub party: Option<PartyKey>,
    pub instance: InstanceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub world: u16,
    pub channel: u16,
}

impl ChannelKey {
    pub fn new(world: u16, channel: u16) -> Self {
        Self { world, channel }
    }

    pub fn port(&self) -> u16 {
        BASE_PORT + (self.channel.saturating_sub(1)) + self.world * 100
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}c{}", self.world, self.channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    ShuttingDown,
    Shutdown,
}
