//! Glue between the event stream, the burst detector and the gate.
//!
//! Per qualifying event: record it, and on a burst enable join requests,
//! reset the key (always, even when the toggle fails), journal the attempt
//! and tell the space what happened.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use noraids_core::{
    GateAction, Outcome, SpaceEvent, TrackerRegistry, already_text, burst_html, changed_text,
    now_unix_millis,
};
use noraids_store::{NewGateEvent, Store};

use crate::gate::{GateController, GateError, GateTarget, RemoteGate};
use crate::notify::{Notice, Notifier, error_dump};
use crate::session::{Phase, Transport};

#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    /// Operator chat. Its own events are never tracked; error dumps go here.
    pub log_chat_id: Option<i64>,
    /// Count plain messages as well as joins.
    pub count_messages: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Ignored,
    NotTriggered,
    Enabled {
        elapsed: Duration,
        timestamps: Vec<u64>,
    },
    AlreadyEnabled {
        timestamps: Vec<u64>,
    },
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleOutcome::Ignored => "ignored",
            HandleOutcome::NotTriggered => "not_triggered",
            HandleOutcome::Enabled { .. } => "enabled",
            HandleOutcome::AlreadyEnabled { .. } => "already_enabled",
        }
    }
}

pub struct Dispatcher<C, N> {
    registry: Mutex<TrackerRegistry>,
    gate: GateController<C>,
    notifier: Arc<N>,
    store: Arc<tokio::sync::Mutex<Store>>,
    settings: DispatchSettings,
}

impl<C, N> Dispatcher<C, N>
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    pub fn new(
        registry: TrackerRegistry,
        gate: GateController<C>,
        notifier: Arc<N>,
        store: Arc<tokio::sync::Mutex<Store>>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            gate,
            notifier,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn session_phase(&self) -> Phase {
        self.gate.session().phase()
    }

    pub fn tracked_keys(&self) -> usize {
        self.registry().len()
    }

    pub fn prune_idle(&self, now: u64) -> usize {
        self.registry().prune_idle(now)
    }

    pub async fn handle_event(
        &self,
        event: &SpaceEvent,
        now: u64,
    ) -> Result<HandleOutcome, GateError> {
        if self.settings.log_chat_id == Some(event.space_id)
            || !event.qualifies(self.settings.count_messages)
        {
            return Ok(HandleOutcome::Ignored);
        }
        let Some(handle) = event.key() else {
            return Ok(HandleOutcome::Ignored);
        };

        let outcome = self.registry().record(handle, now);
        let Outcome::Triggered(timestamps) = outcome else {
            return Ok(HandleOutcome::NotTriggered);
        };

        tracing::warn!(
            handle,
            joins = timestamps.len(),
            "burst detected, enabling join requests"
        );
        let started = Instant::now();
        let result = {
            let _reset = ResetOnDrop {
                registry: &self.registry,
                key: handle,
            };
            self.gate.set_gate(handle, GateTarget::Required).await
        };
        let elapsed = started.elapsed();
        self.journal(handle, GateAction::Enable, &result).await;

        match result? {
            true => {
                let text = changed_text(GateAction::Enable, None, elapsed);
                self.send(event.space_id, Notice::Text(text)).await;
                self.send(event.space_id, Notice::Html(burst_html(&timestamps)))
                    .await;
                Ok(HandleOutcome::Enabled {
                    elapsed,
                    timestamps,
                })
            }
            false => {
                let text = already_text(GateAction::Enable, None);
                self.send(event.space_id, Notice::Text(text)).await;
                Ok(HandleOutcome::AlreadyEnabled { timestamps })
            }
        }
    }

    pub async fn force_enable(&self, handle: &str) -> Result<bool, GateError> {
        self.force(handle, GateTarget::Required).await
    }

    pub async fn force_disable(&self, handle: &str) -> Result<bool, GateError> {
        self.force(handle, GateTarget::NotRequired).await
    }

    async fn force(&self, handle: &str, target: GateTarget) -> Result<bool, GateError> {
        let result = self.gate.set_gate(handle, target).await;
        self.journal(handle, target.action(), &result).await;
        result
    }

    /// Send a structural dump of `err` to the log chat, if one is configured.
    pub async fn report_error(&self, err: &(dyn std::fmt::Debug + Sync)) {
        if let Some(chat_id) = self.settings.log_chat_id {
            self.send(chat_id, error_dump(err)).await;
        }
    }

    /// Reply in the log chat, if one is configured.
    pub async fn tell_log_chat(&self, notice: Notice) {
        if let Some(chat_id) = self.settings.log_chat_id {
            self.send(chat_id, notice).await;
        }
    }

    async fn send(&self, chat_id: i64, notice: Notice) {
        if let Err(e) = self.notifier.notify(chat_id, notice).await {
            tracing::error!("failed to notify chat {chat_id}: {e:#}");
        }
    }

    async fn journal(&self, handle: &str, action: GateAction, result: &Result<bool, GateError>) {
        let store = self.store.lock().await;
        journal_toggle(&store, handle, action, result);
    }

    fn registry(&self) -> MutexGuard<'_, TrackerRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Append a toggle attempt to the gate journal. Journal failures are logged,
/// never propagated.
pub fn journal_toggle(
    store: &Store,
    handle: &str,
    action: GateAction,
    result: &Result<bool, GateError>,
) {
    let (outcome, detail) = match result {
        Ok(true) => ("changed", String::new()),
        Ok(false) => ("already", String::new()),
        Err(e) => ("failed", e.to_string()),
    };
    let entry = NewGateEvent {
        handle,
        action: action.as_str(),
        outcome,
        detail: &detail,
        created_at: now_unix_millis(),
    };
    if let Err(e) = store.record_gate_event(&entry) {
        tracing::warn!("failed to journal gate event for {handle}: {e}");
    }
}

/// Deletes the tracker state for `key` when dropped, so a failed or
/// cancelled toggle still leaves a fresh window behind.
struct ResetOnDrop<'a> {
    registry: &'a Mutex<TrackerRegistry>,
    key: &'a str,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reset(self.key);
    }
}
