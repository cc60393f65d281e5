use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::collab::OwnedMap;
use crate::model::*;

use super::{now_ms, Channel, ChannelError, ConflictKind, NotFoundKind};

/// Static description of a mini-dungeon: the map its entrance stands on
/// and the timed map it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniDungeonInfo {
    pub base: InstanceId,
    pub dungeon: InstanceId,
}

/// An open mini-dungeon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MiniDungeon {
    /// Where players return when it closes.
    pub base: InstanceId,
    pub time_limit_secs: u32,
    pub opened_at: Ms,
}

impl MiniDungeon {
    pub fn closes_at(&self) -> Ms {
        self.opened_at + self.time_limit_secs as Ms * 1_000
    }
}

/// The two carnival variants share one room namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CarnivalKind {
    First,
    Second,
}

impl CarnivalKind {
    pub fn room(self, field: u8) -> u16 {
        match self {
            CarnivalKind::First => field as u16,
            CarnivalKind::Second => 100 + field as u16,
        }
    }
}

/// Mini-dungeons and carnival rooms, kept under the general lock.
#[derive(Debug, Default)]
pub(crate) struct Rooms {
    dungeons: HashMap<DungeonId, MiniDungeon>,
    carnival: HashSet<u16>,
}

impl Rooms {
    pub fn open_dungeon(&mut self, id: DungeonId, dungeon: MiniDungeon) -> Result<(), ChannelError> {
        if self.dungeons.contains_key(&id) {
            return Err(ChannelError::Conflict(ConflictKind::DungeonOpen(id)));
        }
        self.dungeons.insert(id, dungeon);
        Ok(())
    }

    /// Claim a carnival room. False if it is already in use.
    pub fn claim_carnival(&mut self, room: u16) -> bool {
        self.carnival.insert(room)
    }

    pub fn clear(&mut self) -> usize {
        let n = self.dungeons.len() + self.carnival.len();
        self.dungeons.clear();
        self.carnival.clear();
        n
    }
}

impl Channel {
    /// Open a mini-dungeon. Its time limit comes from the dungeon instance.
    pub async fn add_mini_dungeon(
        &self,
        id: DungeonId,
        info: MiniDungeonInfo,
    ) -> Result<MiniDungeon, ChannelError> {
        let time_limit_secs = self.collab.instances.time_limit_secs(info.dungeon);
        let dungeon = MiniDungeon {
            base: info.base,
            time_limit_secs,
            opened_at: now_ms(),
        };

        let mut guard = self.state.lock().await;
        guard.ensure_active()?;
        guard.rooms.open_dungeon(id, dungeon)?;
        debug!("{}: mini-dungeon {id} open for {time_limit_secs}s", self.key);
        Ok(dungeon)
    }

    pub async fn get_mini_dungeon(&self, id: DungeonId) -> Option<MiniDungeon> {
        self.state.lock().await.rooms.dungeons.get(&id).copied()
    }

    pub async fn remove_mini_dungeon(&self, id: DungeonId) -> Result<MiniDungeon, ChannelError> {
        self.state
            .lock()
            .await
            .rooms
            .dungeons
            .remove(&id)
            .ok_or(ChannelError::NotFound(NotFoundKind::Dungeon(id)))
    }

    /// Claim the room for a carnival. Check and claim are one step.
    pub async fn carnival_init(&self, kind: CarnivalKind, field: u8) -> Result<(), ChannelError> {
        let room = kind.room(field);
        let mut guard = self.state.lock().await;
        guard.ensure_active()?;
        if !guard.rooms.claim_carnival(room) {
            return Err(ChannelError::Conflict(ConflictKind::CarnivalRoomTaken(room)));
        }
        Ok(())
    }

    /// Free the room. Idempotent.
    pub async fn carnival_finish(&self, kind: CarnivalKind, field: u8) -> bool {
        self.state.lock().await.rooms.carnival.remove(&kind.room(field))
    }

    pub async fn carnival_can_init(&self, kind: CarnivalKind, field: u8) -> bool {
        !self.state.lock().await.rooms.carnival.contains(&kind.room(field))
    }

    /// Track a map for periodic owner-activity checks. Held weakly: a map
    /// dropped elsewhere leaves the set on the next check.
    pub fn register_owned_map(&self, map: &Arc<dyn OwnedMap>) {
        self.owned_maps.insert(map.id(), Arc::downgrade(map));
    }

    pub fn unregister_owned_map(&self, id: InstanceId) -> bool {
        self.owned_maps.remove(&id).is_some()
    }

    pub fn owned_map_count(&self) -> usize {
        self.owned_maps.len()
    }

    /// Ask every live owned map to check on its owner. Returns how many were
    /// checked. Maps may unregister themselves from inside the check.
    pub fn check_owned_maps(&self) -> usize {
        self.owned_maps.retain(|_, map| map.strong_count() > 0);
        let live: Vec<Arc<dyn OwnedMap>> = self
            .owned_maps
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for map in &live {
            map.check_owner_activity();
        }
        live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carnival_rooms_are_offset_per_kind() {
        assert_eq!(CarnivalKind::First.room(3), 3);
        assert_eq!(CarnivalKind::Second.room(3), 103);
        assert_ne!(CarnivalKind::First.room(0), CarnivalKind::Second.room(0));
    }

    #[test]
    fn a_dungeon_opens_once() {
        let mut rooms = Rooms::default();
        let d = MiniDungeon {
            base: InstanceId(100),
            time_limit_secs: 600,
            opened_at: 1_000,
        };
        assert_eq!(rooms.open_dungeon(7, d), Ok(()));
        assert_eq!(
            rooms.open_dungeon(7, d),
            Err(ChannelError::Conflict(ConflictKind::DungeonOpen(7)))
        );
        assert_eq!(d.closes_at(), 601_000);
        assert!(rooms.claim_carnival(1));
        assert!(!rooms.claim_carnival(1));
        assert_eq!(rooms.clear(), 2);
        assert!(rooms.claim_carnival(1));
    }
}
