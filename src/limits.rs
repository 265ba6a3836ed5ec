use crate::model::Ms;

pub const MAX_PROFESSIONALS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_PROFESSIONAL: usize = 50_000;
pub const MAX_REASON_LEN: usize = 512;

pub const MIN_DURATION_HOURS: u8 = 1;
pub const MAX_DURATION_HOURS: u8 = 8;

/// A pending reservation expires this long after its slot start.
pub const PENDING_TTL_MS: Ms = 24 * 3_600_000;

/// Client cancellations closer to the slot than this are "late".
pub const LATE_CANCEL_WINDOW_MS: Ms = 24 * 3_600_000;

pub const MINUTES_PER_DAY: u32 = 1440;
