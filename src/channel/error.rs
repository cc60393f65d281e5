use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The party already holds a dojo slot.
    PartyBound(PartyKey),
    /// The reservation is already queued or ongoing.
    AlreadyReserved(ReservationId),
    /// That mini-dungeon is already open on this channel.
    DungeonOpen(DungeonId),
    /// A carnival is already running in that room.
    CarnivalRoomTaken(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Slot(SlotIdentity),
    Reservation(ReservationId),
    Dungeon(DungeonId),
}

/// Ordinary outcomes of players racing for the same resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    Exhausted(Pool),
    Conflict(ConflictKind),
    NotFound(NotFoundKind),
    InvalidState(&'static str),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Exhausted(pool) => write!(f, "no {pool} slot available"),
            ChannelError::Conflict(ConflictKind::PartyBound(party)) => {
                write!(f, "{party} already holds a slot")
            }
            ChannelError::Conflict(ConflictKind::AlreadyReserved(id)) => {
                write!(f, "reservation {id} already queued or ongoing")
            }
            ChannelError::Conflict(ConflictKind::DungeonOpen(id)) => {
                write!(f, "mini-dungeon {id} already open")
            }
            ChannelError::Conflict(ConflictKind::CarnivalRoomTaken(room)) => {
                write!(f, "carnival room {room} in use")
            }
            ChannelError::NotFound(NotFoundKind::Slot(identity)) => {
                write!(f, "slot not occupied: {identity}")
            }
            ChannelError::NotFound(NotFoundKind::Reservation(id)) => {
                write!(f, "reservation not found: {id}")
            }
            ChannelError::NotFound(NotFoundKind::Dungeon(id)) => {
                write!(f, "mini-dungeon not open: {id}")
            }
            ChannelError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
        }
    }
}

impl std::error::Error for ChannelError {}
