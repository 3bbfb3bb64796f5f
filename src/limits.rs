//! Hard limits enforced by the engine and scheduler.

pub const MAX_ROOMS: usize = 1_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_MEMO_LEN: usize = 10_000;
pub const MAX_SNAPSHOT_FIELD_LEN: usize = 500;
pub const MAX_OPTION_IDS: usize = 64;
pub const MAX_BATCH_SIZE: usize = 500;

/// Longest reservation the engine will store (one day).
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// Widest date range a single list query may cover.
pub const MAX_QUERY_DAYS: i64 = 366;

pub const MIN_SLOT_MINUTES: u32 = 5;
pub const MAX_SLOT_MINUTES: u32 = 120;
