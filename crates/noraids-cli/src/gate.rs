//! Idempotent join-request gate.
//!
//! The remote service reports "already in that state" as a failure. The
//! controller folds it into a plain `false` so callers only ever see
//! changed / not changed / error.

use std::fmt;
use std::future::Future;

use noraids_core::{GateAction, is_public_handle};

use crate::session::{SessionManager, Transport, TransportError};

/// Error code the remote service uses for a toggle that changed nothing.
pub const NOT_MODIFIED: &str = "CHAT_NOT_MODIFIED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTarget {
    /// Join requests enabled: new members need approval.
    Required,
    NotRequired,
}

impl GateTarget {
    pub fn action(&self) -> GateAction {
        match self {
            GateTarget::Required => GateAction::Enable,
            GateTarget::NotRequired => GateAction::Disable,
        }
    }
}

/// Failure reported by the remote gate service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "{code} (HTTP {status}): {}", self.message),
            (Some(status), None) => write!(f, "HTTP {status}: {}", self.message),
            (None, Some(code)) => write!(f, "{code}: {}", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Result of one remote toggle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Changed,
    AlreadyInState,
    Failed(RemoteError),
}

/// Toggle half of the remote client.
pub trait RemoteGate: Send + Sync + 'static {
    fn set_join_requests(
        &self,
        handle: &str,
        target: GateTarget,
    ) -> impl Future<Output = ToggleOutcome> + Send;
}

#[derive(Debug)]
pub enum GateError {
    /// Not a public handle; nothing was sent.
    InvalidHandle(String),
    Transport(TransportError),
    Unexpected {
        handle: String,
        target: GateTarget,
        cause: RemoteError,
    },
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::InvalidHandle(handle) => write!(f, "invalid space handle: {handle:?}"),
            GateError::Transport(e) => write!(f, "gate session unavailable: {e}"),
            GateError::Unexpected {
                handle,
                target,
                cause,
            } => write!(
                f,
                "failed to {} join requests in {handle}: {cause}",
                target.action().as_str()
            ),
        }
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GateError::InvalidHandle(_) => None,
            GateError::Transport(e) => Some(e),
            GateError::Unexpected { cause, .. } => Some(cause),
        }
    }
}

impl From<TransportError> for GateError {
    fn from(e: TransportError) -> Self {
        GateError::Transport(e)
    }
}

pub struct GateController<C> {
    session: SessionManager<C>,
}

impl<C: Transport + RemoteGate> GateController<C> {
    pub fn new(session: SessionManager<C>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager<C> {
        &self.session
    }

    /// Move the gate for `handle` to `desired`. `Ok(true)` when it changed,
    /// `Ok(false)` when it was already there. Not retried. The session stays
    /// pinned open until the remote call returns.
    pub async fn set_gate(&self, handle: &str, desired: GateTarget) -> Result<bool, GateError> {
        if !is_public_handle(handle) {
            return Err(GateError::InvalidHandle(handle.to_string()));
        }
        let active = self.session.acquire().await?;

        let verb = desired.action().as_str();
        match active.transport().set_join_requests(handle, desired).await {
            ToggleOutcome::Changed => {
                tracing::info!("{verb}d join requests in {handle}");
                Ok(true)
            }
            ToggleOutcome::AlreadyInState => {
                tracing::info!("join requests were already {verb}d in {handle}");
                Ok(false)
            }
            ToggleOutcome::Failed(cause) => {
                tracing::warn!("failed to {verb} join requests in {handle}: {cause}");
                Err(GateError::Unexpected {
                    handle: handle.to_string(),
                    target: desired,
                    cause,
                })
            }
        }
    }
}
