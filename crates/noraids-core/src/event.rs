use serde::{Deserialize, Serialize};

use crate::constants::MAX_HANDLE_LEN;

/// Membership status of a user in a space, as reported by the bot API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    MemberTransition { old: MemberStatus, new: MemberStatus },
    Message { text: String },
}

/// One observed event in a space.
///
/// The detector keys on `handle`, never on `space_id`; events from spaces
/// without a public handle are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceEvent {
    pub space_id: i64,
    #[serde(default)]
    pub handle: Option<String>,
    pub kind: EventKind,
}

impl SpaceEvent {
    pub fn join(space_id: i64, handle: &str) -> Self {
        Self {
            space_id,
            handle: Some(handle.to_string()),
            kind: EventKind::MemberTransition {
                old: MemberStatus::Left,
                new: MemberStatus::Member,
            },
        }
    }

    /// Handle to track this event under, if it has a usable one.
    pub fn key(&self) -> Option<&str> {
        self.handle
            .as_deref()
            .map(str::trim)
            .filter(|h| is_public_handle(h))
    }

    /// A fresh join: someone who had left (or never joined) became a member.
    pub fn is_join(&self) -> bool {
        matches!(
            self.kind,
            EventKind::MemberTransition {
                old: MemberStatus::Left,
                new: MemberStatus::Member,
            }
        )
    }

    /// Whether this event feeds the burst detector.
    pub fn qualifies(&self, count_messages: bool) -> bool {
        match self.kind {
            EventKind::MemberTransition { .. } => self.is_join(),
            EventKind::Message { .. } => count_messages,
        }
    }
}

/// Whether `handle` can name a public space: 1 to 32 ASCII letters, digits
/// or underscores. Anything else is never sent to the gate service.
pub fn is_public_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && handle.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
