//! Human-readable outcome texts sent back to the space and the log chat.

use std::time::Duration;

use crate::constants::INLINE_TEXT_LIMIT;
use crate::time::format_clock;

/// Direction of a gate toggle as worded in reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateAction {
    Enable,
    Disable,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Enable => "enable",
            GateAction::Disable => "disable",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            GateAction::Enable => "enabled",
            GateAction::Disable => "disabled",
        }
    }
}

/// Render burst timestamps one per line as `⦁ HH:MM:SS.mmm`.
pub fn display_timestamps(timestamps: &[u64]) -> String {
    timestamps
        .iter()
        .map(|&ts| format!("\u{2981} {}", format_clock(ts)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Report for a toggle that changed the gate. `handle` is included for
/// reports that go to the log chat rather than the space itself.
pub fn changed_text(action: GateAction, handle: Option<&str>, elapsed: Duration) -> String {
    let ms = elapsed.as_secs_f64() * 1000.0;
    match handle {
        Some(handle) => format!(
            "Join requests {} for {handle} in {ms:.0}ms.",
            action.past_tense()
        ),
        None => format!("Join requests {} in {ms:.0}ms.", action.past_tense()),
    }
}

/// Report for a toggle that found the gate already in place.
pub fn already_text(action: GateAction, handle: Option<&str>) -> String {
    match handle {
        Some(handle) => format!(
            "Join requests are already {} for {handle}.",
            action.past_tense()
        ),
        None => format!("Join requests are already {}.", action.past_tense()),
    }
}

/// HTML block listing the joins that made up a burst.
pub fn burst_html(timestamps: &[u64]) -> String {
    format!("<b>JOIN TIMESTAMPS</b>\n{}", display_timestamps(timestamps))
}

/// How an error dump is delivered to the log chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorDump {
    /// Fits in one message; sent as a code block.
    Inline(String),
    /// Too long for a message; sent as a file attachment.
    Attachment(String),
}

impl ErrorDump {
    /// The limit counts UTF-16 code units, as the bot API does.
    pub fn new(text: String) -> Self {
        if text.encode_utf16().count() <= INLINE_TEXT_LIMIT {
            ErrorDump::Inline(text)
        } else {
            ErrorDump::Attachment(text)
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ErrorDump::Inline(text) | ErrorDump::Attachment(text) => text,
        }
    }
}
