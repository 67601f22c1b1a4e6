//! Hard limits on input sizes and per-key state.

/// Max length of a space id, user id, or user name.
pub const MAX_ID_LEN: usize = 128;

/// Max length of a denormalized space display name.
pub const MAX_NAME_LEN: usize = 256;

/// Max live reservations on one space for one day. A day has 1440 minutes,
/// so this is also the most non-overlapping one-minute bookings possible.
pub const MAX_RESERVATIONS_PER_SPACE_DAY: usize = 1440;

/// Max rows a single INSERT may carry.
pub const MAX_INSERT_ROWS: usize = 1;

/// Max length of a raw SQL statement accepted by the wire front end.
pub const MAX_STATEMENT_LEN: usize = 16 * 1024;
