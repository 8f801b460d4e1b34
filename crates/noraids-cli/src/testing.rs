//! In-process fakes for the remote gate service and the notification sink.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::gate::{GateTarget, RemoteError, RemoteGate, ToggleOutcome};
use crate::notify::{Notice, Notifier};
use crate::session::{Transport, TransportError};

/// Remote client whose gates live in a map. Unknown handles start with
/// join requests disabled. Toggles fail unless a session is open when they
/// complete.
#[derive(Default)]
pub struct FakeRemote {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    toggles: AtomicUsize,
    connect_delay: Duration,
    toggle_delay: Duration,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    gates: Mutex<HashMap<String, bool>>,
    failure: Mutex<Option<RemoteError>>,
}

impl FakeRemote {
    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: delay,
            ..Self::default()
        }
    }

    pub fn with_toggle_delay(delay: Duration) -> Self {
        Self {
            toggle_delay: delay,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn toggles(&self) -> usize {
        self.toggles.load(Ordering::SeqCst)
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_toggles_with(&self, error: Option<RemoteError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn set_required(&self, handle: &str, required: bool) {
        self.gates
            .lock()
            .unwrap()
            .insert(handle.to_lowercase(), required);
    }

    pub fn is_required(&self, handle: &str) -> bool {
        self.gates
            .lock()
            .unwrap()
            .get(&handle.to_lowercase())
            .copied()
            .unwrap_or(false)
    }
}

impl Transport for FakeRemote {
    async fn connect(&self) -> Result<(), TransportError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl RemoteGate for FakeRemote {
    async fn set_join_requests(&self, handle: &str, target: GateTarget) -> ToggleOutcome {
        self.toggles.fetch_add(1, Ordering::SeqCst);
        if !self.toggle_delay.is_zero() {
            tokio::time::sleep(self.toggle_delay).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return ToggleOutcome::Failed(RemoteError {
                status: None,
                code: None,
                message: "session closed".to_string(),
            });
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return ToggleOutcome::Failed(error);
        }
        let desired = target == GateTarget::Required;
        let mut gates = self.gates.lock().unwrap();
        let current = gates.entry(handle.to_lowercase()).or_insert(false);
        if *current == desired {
            ToggleOutcome::AlreadyInState
        } else {
            *current = desired;
            ToggleOutcome::Changed
        }
    }
}

/// Notifier that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, Notice)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(i64, Notice)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, chat_id: i64, notice: Notice) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((chat_id, notice));
        Ok(())
    }
}
