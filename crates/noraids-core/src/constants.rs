use std::time::Duration;

/// Millisecond units used for timestamps recorded by the tracker.
pub const MILLISECOND: u64 = 1;
pub const SECOND: u64 = 1_000 * MILLISECOND;
pub const MINUTE: u64 = 60 * SECOND;
pub const HOUR: u64 = 60 * MINUTE;

/// Joins that must land inside the timeframe before the gate closes.
pub const DEFAULT_WINDOW_CAPACITY: usize = 30;

/// Largest accepted window. Every tracked key allocates this many slots.
pub const MAX_WINDOW_CAPACITY: usize = 100_000;

/// Width of the sliding window.
pub const DEFAULT_TIMEFRAME: Duration = Duration::from_millis(HOUR);

/// Quiet period after which the remote session is disconnected.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(15 * MINUTE);

/// Longest text, in UTF-16 code units, the bot API accepts in a single
/// message; longer error dumps go out as a file attachment.
pub const INLINE_TEXT_LIMIT: usize = 4096;

/// Longest public handle a space can carry.
pub const MAX_HANDLE_LEN: usize = 32;
