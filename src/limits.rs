//! Hard bounds guarding engine state growth and input range.

pub const MAX_SLOTS_PER_TUTOR: usize = 4096;
pub const MAX_RESERVATIONS_PER_STUDENT: usize = 1024;

/// 2000-01-01T00:00:00Z — slot starts before this are rejected.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 946_684_800_000;
/// 3000-01-01T00:00:00Z — slot starts after this are rejected.
pub const MAX_VALID_TIMESTAMP_MS: i64 = 32_503_680_000_000;
