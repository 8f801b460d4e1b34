//! Lazy-connect, idle-disconnect lifecycle for the remote gate session.
//!
//! The session is expensive to hold open, so it is only established when a
//! toggle needs it and is dropped again after a quiet period. Every
//! confirmed-ready signal re-arms the idle timer; the timer is a single owned
//! cancellation token, so re-arming never leaks or duplicates a timer.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// Connection half of the remote client.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::Disconnecting => "disconnecting",
        }
    }
}

struct SessionState {
    phase: Phase,
    /// Bumped on every arm and on shutdown; a timer only fires for the
    /// generation it was armed with.
    generation: u64,
    idle_timer: Option<CancellationToken>,
}

struct Inner<T> {
    transport: Arc<T>,
    idle_timeout: Duration,
    state: Mutex<SessionState>,
    /// Serializes connect, idle disconnect and shutdown.
    transition: tokio::sync::Mutex<()>,
}

/// A connected session, pinned open while this value lives.
pub struct ActiveSession<'a, T> {
    transport: &'a T,
    _transition: tokio::sync::MutexGuard<'a, ()>,
}

impl<T> ActiveSession<'_, T> {
    pub fn transport(&self) -> &T {
        self.transport
    }
}

pub struct SessionManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: Arc<T>, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                idle_timeout,
                state: Mutex::new(SessionState {
                    phase: Phase::Disconnected,
                    generation: 0,
                    idle_timer: None,
                }),
                transition: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Connected
    }

    /// Connect unless already connected. Concurrent callers queue behind a
    /// single in-flight connect and share its result.
    pub async fn ensure_connected(&self) -> Result<(), TransportError> {
        self.acquire().await.map(drop)
    }

    /// Connect if needed and hold the session open until the returned guard
    /// is dropped. Idle expiry and shutdown wait for the guard.
    pub async fn acquire(&self) -> Result<ActiveSession<'_, T>, TransportError> {
        let transition = self.inner.transition.lock().await;
        if self.phase() != Phase::Connected {
            self.set_phase(Phase::Connecting);
            tracing::info!("connecting gate session");
            match self.inner.transport.connect().await {
                Ok(()) => {
                    self.set_phase(Phase::Connected);
                    tracing::info!("gate session ready");
                    self.notify_ready();
                }
                Err(e) => {
                    self.set_phase(Phase::Disconnected);
                    tracing::warn!("gate session connect failed: {e}");
                    return Err(e);
                }
            }
        }
        Ok(ActiveSession {
            transport: self.inner.transport.as_ref(),
            _transition: transition,
        })
    }

    /// Handle a confirmed-ready signal: cancel the armed idle timer (if any)
    /// and arm a fresh one.
    pub fn notify_ready(&self) {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.state();
            if let Some(previous) = state.idle_timer.replace(token.clone()) {
                previous.cancel();
            }
            state.generation += 1;
            state.generation
        };

        let idle = self.inner.idle_timeout;
        tracing::info!("stopping the gate session in {}s", idle.as_secs());
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(idle) => manager.expire(generation).await,
            }
        });
    }

    /// Cancel the idle timer and disconnect if connected.
    pub async fn shutdown(&self) {
        let _transition = self.inner.transition.lock().await;
        let was_connected = {
            let mut state = self.state();
            if let Some(timer) = state.idle_timer.take() {
                timer.cancel();
            }
            state.generation += 1;
            if state.phase == Phase::Connected {
                state.phase = Phase::Disconnecting;
                true
            } else {
                false
            }
        };
        if was_connected {
            self.inner.transport.disconnect().await;
            self.set_phase(Phase::Disconnected);
            tracing::info!("gate session closed");
        }
    }

    async fn expire(&self, generation: u64) {
        let _transition = self.inner.transition.lock().await;
        {
            let mut state = self.state();
            if state.generation != generation || state.phase != Phase::Connected {
                return;
            }
            state.phase = Phase::Disconnecting;
            state.idle_timer = None;
        }
        self.inner.transport.disconnect().await;
        self.set_phase(Phase::Disconnected);
        tracing::info!("stopped the gate session after idling");
    }

    fn set_phase(&self, phase: Phase) {
        self.state().phase = phase;
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
