// ── Dojo pool ────────────────────────────────────────────────────

/// Party pool: bits 0..5 of the occupancy mask.
pub const DOJO_PARTY_SLOTS: u8 = 5;
/// Solo pool: bits 5..20 of the occupancy mask.
pub const DOJO_SOLO_SLOTS: u8 = 15;
pub const DOJO_TOTAL_SLOTS: usize = (DOJO_PARTY_SLOTS + DOJO_SOLO_SLOTS) as usize;

pub const DOJO_PARTY_BASE: u32 = 925_030_000;
pub const DOJO_SOLO_BASE: u32 = 925_020_000;
pub const DOJO_EXIT: u32 = 925_020_002;

/// Contiguous stage instances a slot spans (current stage plus the rest areas after it).
pub const DOJO_STAGE_WINDOW: i32 = 5;
/// Highest stage that has an instance.
pub const DOJO_LAST_STAGE: i32 = 38;
/// Stages above this get the capped duration and a short reset window.
pub const DOJO_LONG_STAGE_FROM: i32 = 36;
pub const DOJO_MAX_STAGE_MINUTES: i64 = 15;
/// Time-up display before occupants are moved out.
pub const DOJO_EXPIRY_GRACE_MS: i64 = 3_000;

// ── Weddings ─────────────────────────────────────────────────────

/// Before the first occupancy, ETAs are measured from channel start plus this.
pub const WEDDING_FIRST_START_OFFSET_MS: i64 = 10_000;

// ── Rooms ────────────────────────────────────────────────────────

/// How often owned maps are asked to check on their owners.
pub const OWNED_MAP_CHECK_INTERVAL_SECS: u64 = 60;

// ── Channel ──────────────────────────────────────────────────────

pub const BASE_PORT: u16 = 7575;
pub const MAX_CHANNELS_PER_WORLD: u16 = 20;
