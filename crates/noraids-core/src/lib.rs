//! Raid detection engine.
//!
//! Watches per-space join streams through a fixed-capacity ring buffer of
//! timestamps and reports a burst when the most recent `window_capacity`
//! events all fall inside `timeframe`.
//!
//! Zero I/O: no opinions about transport, gate toggling, or persistence.

pub mod constants;
pub mod event;
pub mod report;
pub mod time;
pub mod tracker;

pub use constants::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_TIMEFRAME, DEFAULT_WINDOW_CAPACITY, HOUR, INLINE_TEXT_LIMIT,
    MAX_HANDLE_LEN, MAX_WINDOW_CAPACITY, MILLISECOND, MINUTE, SECOND,
};
pub use event::{EventKind, MemberStatus, SpaceEvent, is_public_handle};
pub use report::{
    ErrorDump, GateAction, already_text, burst_html, changed_text, display_timestamps,
};
pub use time::{format_clock, now_unix_millis, unix_millis_to_iso8601};
pub use tracker::{ConfigError, DetectorConfig, Outcome, TrackerRegistry, TrackerState};
