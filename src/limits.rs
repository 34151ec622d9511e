/// Furthest a check-in may lie ahead of today.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 730;

/// Longest stay a single request may cover.
pub const MAX_STAY_NIGHTS: u32 = 365;

/// Highest nightly rate a config may carry, so a maximum-length stay still
/// fits in `Minor`.
pub const MAX_PRICE_PER_NIGHT: i64 = i64::MAX / MAX_STAY_NIGHTS as i64;

pub const MAX_MESSAGE_LEN: usize = 2_000;

pub const MAX_PHONE_LEN: usize = 32;

pub const MAX_CURRENCY_LEN: usize = 8;

/// Dates accepted by a single block/unblock call.
pub const MAX_BLOCK_BATCH: usize = 366;

/// Widest window a calendar query may span.
pub const MAX_CALENDAR_WINDOW_DAYS: i64 = 731;

pub const MAX_RESERVATIONS_PER_PROPERTY: usize = 100_000;
