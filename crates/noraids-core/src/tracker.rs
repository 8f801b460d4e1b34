//! Sliding-window burst detection.
//!
//! Each key owns a ring buffer of the last `window_capacity` event
//! timestamps. Deciding whether the newest `window_capacity` events span at
//! most `timeframe` is then a single comparison against the oldest timestamp
//! of that window, with no scanning and no growth per key.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::constants::{DEFAULT_TIMEFRAME, DEFAULT_WINDOW_CAPACITY, MAX_WINDOW_CAPACITY};

/// Slot value meaning "never recorded".
const EMPTY: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroCapacity,
    CapacityTooLarge(usize),
    ZeroTimeframe,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroCapacity => write!(f, "window capacity must be at least 1"),
            ConfigError::CapacityTooLarge(n) => write!(
                f,
                "window capacity {n} exceeds the maximum of {MAX_WINDOW_CAPACITY}"
            ),
            ConfigError::ZeroTimeframe => write!(f, "timeframe must be longer than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Burst threshold: `window_capacity` events within `timeframe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    window_capacity: usize,
    timeframe: Duration,
}

impl DetectorConfig {
    pub fn new(window_capacity: usize, timeframe: Duration) -> Result<Self, ConfigError> {
        if window_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if window_capacity > MAX_WINDOW_CAPACITY {
            return Err(ConfigError::CapacityTooLarge(window_capacity));
        }
        if timeframe.is_zero() {
            return Err(ConfigError::ZeroTimeframe);
        }
        Ok(Self {
            window_capacity,
            timeframe,
        })
    }

    pub fn window_capacity(&self) -> usize {
        self.window_capacity
    }

    pub fn timeframe(&self) -> Duration {
        self.timeframe
    }

    fn timeframe_millis(&self) -> u64 {
        u64::try_from(self.timeframe.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            timeframe: DEFAULT_TIMEFRAME,
        }
    }
}

/// Result of recording one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NotTriggered,
    /// The window is saturated. Carries the timestamps of the burst, sorted
    /// ascending.
    Triggered(Vec<u64>),
}

impl Outcome {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Outcome::Triggered(_))
    }
}

/// Ring buffer for a single key.
///
/// `slots[cursor]` is the slot about to be overwritten, i.e. the event
/// `capacity` records back. The slot after it holds the oldest event of the
/// window that ends at the event being recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerState {
    slots: Vec<u64>,
    cursor: usize,
}

impl TrackerState {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            slots: vec![EMPTY; window_capacity.max(1)],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    /// Most recently written timestamp, if any.
    pub fn newest(&self) -> Option<u64> {
        let capacity = self.capacity();
        let slot = self.slots[(self.cursor + capacity - 1) % capacity];
        (slot != EMPTY).then_some(slot)
    }

    /// Record an event at `now` (unix millis).
    ///
    /// A trigger leaves the buffer untouched; the owner is expected to drop
    /// the state once the burst has been handled.
    pub fn record(&mut self, now: u64, timeframe_millis: u64) -> Outcome {
        let capacity = self.capacity();
        let oldest = if capacity == 1 {
            now
        } else {
            self.slots[(self.cursor + 1) % capacity]
        };

        if oldest != EMPTY && now.saturating_sub(oldest) <= timeframe_millis {
            let mut timestamps: Vec<u64> = self
                .slots
                .iter()
                .enumerate()
                .filter(|&(i, &slot)| i != self.cursor && slot != EMPTY)
                .map(|(_, &slot)| slot)
                .collect();
            timestamps.push(now);
            timestamps.sort_unstable();
            return Outcome::Triggered(timestamps);
        }

        self.slots[self.cursor] = now;
        self.cursor = (self.cursor + 1) % capacity;
        Outcome::NotTriggered
    }
}

/// Per-space tracker states, created on first use and deleted on reset.
#[derive(Debug, Default)]
pub struct TrackerRegistry {
    config: DetectorConfig,
    states: HashMap<String, TrackerState>,
}

impl TrackerRegistry {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn record(&mut self, key: &str, now: u64) -> Outcome {
        let capacity = self.config.window_capacity;
        let timeframe = self.config.timeframe_millis();
        self.states
            .entry(normalize(key))
            .or_insert_with(|| TrackerState::new(capacity))
            .record(now, timeframe)
    }

    /// Delete the state for `key`. Returns whether anything was removed.
    pub fn reset(&mut self, key: &str) -> bool {
        self.states.remove(&normalize(key)).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.states.contains_key(&normalize(key))
    }

    pub fn get(&self, key: &str) -> Option<&TrackerState> {
        self.states.get(&normalize(key))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop states whose newest event is already outside the timeframe.
    /// Such a key cannot trigger on its next event, so forgetting it changes
    /// nothing observable. Returns the number of states removed.
    pub fn prune_idle(&mut self, now: u64) -> usize {
        let timeframe = self.config.timeframe_millis();
        let before = self.states.len();
        self.states.retain(|_, state| {
            state
                .newest()
                .is_some_and(|newest| now.saturating_sub(newest) <= timeframe)
        });
        before - self.states.len()
    }
}

fn normalize(key: &str) -> String {
    key.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 1_771_632_000_000;

    fn registry(capacity: usize, timeframe_ms: u64) -> TrackerRegistry {
        TrackerRegistry::new(
            DetectorConfig::new(capacity, Duration::from_millis(timeframe_ms)).unwrap(),
        )
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        assert_eq!(
            DetectorConfig::new(0, Duration::from_secs(1)),
            Err(ConfigError::ZeroCapacity)
        );
    }

    #[test]
    fn test_config_rejects_oversized_capacity() {
        assert_eq!(
            DetectorConfig::new(usize::MAX / 4, Duration::from_secs(60)),
            Err(ConfigError::CapacityTooLarge(usize::MAX / 4))
        );
        assert_eq!(
            DetectorConfig::new(MAX_WINDOW_CAPACITY + 1, Duration::from_secs(60)),
            Err(ConfigError::CapacityTooLarge(MAX_WINDOW_CAPACITY + 1))
        );
        let largest = DetectorConfig::new(MAX_WINDOW_CAPACITY, Duration::from_secs(60)).unwrap();
        let mut registry = TrackerRegistry::new(largest);
        assert_eq!(registry.record("abc", BASE), Outcome::NotTriggered);
    }

    #[test]
    fn test_config_rejects_zero_timeframe() {
        assert_eq!(
            DetectorConfig::new(3, Duration::ZERO),
            Err(ConfigError::ZeroTimeframe)
        );
    }

    #[test]
    fn test_default_config() {
        let config = DetectorConfig::default();
        assert_eq!(config.window_capacity(), 30);
        assert_eq!(config.timeframe(), Duration::from_secs(3600));
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = TrackerState::new(4);
        assert_eq!(state.slots(), &[0, 0, 0, 0]);
        assert_eq!(state.cursor(), 0);
        assert_eq!(state.newest(), None);
    }

    #[test]
    fn test_fewer_than_capacity_never_triggers() {
        let mut reg = registry(5, 1000);
        for i in 0..4 {
            assert_eq!(reg.record("abc", BASE + i), Outcome::NotTriggered);
        }
    }

    #[test]
    fn test_scenario_three_in_one_second() {
        let mut reg = registry(3, 1000);
        assert_eq!(reg.record("abc", BASE), Outcome::NotTriggered);
        assert_eq!(reg.record("abc", BASE + 400), Outcome::NotTriggered);
        assert_eq!(
            reg.record("abc", BASE + 900),
            Outcome::Triggered(vec![BASE, BASE + 400, BASE + 900])
        );

        // Without a reset the window is still saturated
        assert_eq!(
            reg.record("abc", BASE + 950),
            Outcome::Triggered(vec![BASE, BASE + 400, BASE + 950])
        );

        assert!(reg.reset("abc"));
        assert_eq!(reg.record("abc", BASE + 2000), Outcome::NotTriggered);
    }

    #[test]
    fn test_trigger_does_not_mutate_state() {
        let mut reg = registry(3, 1000);
        reg.record("abc", BASE);
        reg.record("abc", BASE + 1);
        let before = reg.get("abc").unwrap().clone();
        assert!(reg.record("abc", BASE + 2).is_triggered());
        assert_eq!(reg.get("abc").unwrap(), &before);
    }

    #[test]
    fn test_slow_events_overwrite_oldest() {
        let mut reg = registry(3, 1000);
        reg.record("abc", BASE);
        reg.record("abc", BASE + 500);
        // Window would span 1500ms, too slow
        assert_eq!(reg.record("abc", BASE + 1500), Outcome::NotTriggered);
        let state = reg.get("abc").unwrap();
        assert_eq!(state.slots(), &[BASE, BASE + 500, BASE + 1500]);
        assert_eq!(state.cursor(), 0);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let mut reg = registry(2, 1000);
        reg.record("abc", BASE);
        assert!(reg.record("abc", BASE + 1000).is_triggered());

        let mut reg = registry(2, 1000);
        reg.record("abc", BASE);
        assert!(!reg.record("abc", BASE + 1001).is_triggered());
    }

    #[test]
    fn test_capacity_one_triggers_every_event() {
        let mut reg = registry(1, 1000);
        assert_eq!(reg.record("abc", BASE), Outcome::Triggered(vec![BASE]));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut reg = registry(2, 1000);
        reg.record("SomeGroup", BASE);
        assert!(reg.contains("somegroup"));
        assert!(reg.record("SOMEGROUP", BASE + 10).is_triggered());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut reg = registry(2, 1000);
        reg.record("a", BASE);
        assert!(!reg.record("b", BASE + 1).is_triggered());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut reg = registry(2, 1000);
        assert!(!reg.reset("abc"));
        reg.record("abc", BASE);
        assert!(reg.reset("abc"));
        assert!(!reg.reset("abc"));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_clock_step_back_counts_as_within() {
        let mut reg = registry(2, 1000);
        reg.record("abc", BASE + 5000);
        assert!(reg.record("abc", BASE).is_triggered());
    }

    #[test]
    fn test_prune_idle_drops_only_stale_states() {
        let mut reg = registry(3, 1000);
        reg.record("stale", BASE);
        reg.record("fresh", BASE + 1500);

        let removed = reg.prune_idle(BASE + 2000);
        assert_eq!(removed, 1);
        assert!(!reg.contains("stale"));
        assert!(reg.contains("fresh"));
    }

    #[test]
    fn test_newest_tracks_last_write_across_wrap() {
        let mut state = TrackerState::new(2);
        state.record(BASE, 10);
        state.record(BASE + 100, 10);
        state.record(BASE + 200, 10);
        assert_eq!(state.newest(), Some(BASE + 200));
        assert_eq!(state.cursor(), 1);
    }
}
