//! HTTP client for the remote gate service.
//!
//! The service keeps a user session on our behalf. The session token is
//! persisted in the store so a restart resumes the same session instead of
//! logging in again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use noraids_store::Store;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::gate::{GateTarget, NOT_MODIFIED, RemoteError, RemoteGate, ToggleOutcome};
use crate::session::{Transport, TransportError};

pub const SESSION_NAMESPACE: &str = "client";
pub const SESSION_KEY: &str = "session";
const SESSION_HEADER: &str = "x-gate-session";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpGateClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    app_version: String,
    store: Arc<tokio::sync::Mutex<Store>>,
    session: Mutex<Option<String>>,
}

impl HttpGateClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        app_version: String,
        store: Arc<tokio::sync::Mutex<Store>>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            app_version,
            store,
            session: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .request(method, self.url(path))
            .timeout(REQUEST_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(token) = self.current_session() {
            request = request.header(SESSION_HEADER, token);
        }
        request
    }

    fn current_session(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_session(&self, token: Option<String>) {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    async fn stored_session(&self) -> Option<String> {
        let store = self.store.lock().await;
        match store.kv_get(SESSION_NAMESPACE, SESSION_KEY) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("failed to read the stored gate session: {e}");
                None
            }
        }
    }

    async fn persist_session(&self, token: &str) {
        let store = self.store.lock().await;
        if let Err(e) = store.kv_set(SESSION_NAMESPACE, SESSION_KEY, token) {
            tracing::warn!("failed to persist the gate session: {e}");
        }
    }

    async fn forget_session(&self) {
        let store = self.store.lock().await;
        match store.kv_delete(SESSION_NAMESPACE, SESSION_KEY) {
            Ok(true) => tracing::info!("dropped the rejected gate session"),
            Ok(false) => {}
            Err(e) => tracing::warn!("failed to drop the stored gate session: {e}"),
        }
    }

    async fn open_session(&self, resume: Option<&str>) -> Result<String, SessionFailure> {
        let body = json!({ "resume": resume, "app_version": self.app_version });
        let response = self
            .request(reqwest::Method::POST, "/v1/session")
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionFailure::Transport(TransportError(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = TransportError(classify_error(status, &text).to_string());
            return Err(if rejects_resume(status) {
                SessionFailure::Rejected(error)
            } else {
                SessionFailure::Transport(error)
            });
        }
        let session: SessionResponse = response.json().await.map_err(|e| {
            SessionFailure::Transport(TransportError(format!("malformed session response: {e}")))
        })?;
        Ok(session.session)
    }
}

enum SessionFailure {
    /// The service no longer knows the session we tried to resume.
    Rejected(TransportError),
    Transport(TransportError),
}

impl SessionFailure {
    fn into_inner(self) -> TransportError {
        match self {
            SessionFailure::Rejected(e) | SessionFailure::Transport(e) => e,
        }
    }
}

/// Statuses that mean a resume token is dead and a fresh session is needed.
fn rejects_resume(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND | StatusCode::GONE
    )
}

impl Transport for HttpGateClient {
    async fn connect(&self) -> Result<(), TransportError> {
        let resume = self.stored_session().await;
        let token = match self.open_session(resume.as_deref()).await {
            Ok(token) => token,
            Err(SessionFailure::Rejected(e)) if resume.is_some() => {
                tracing::warn!("stored gate session rejected, starting a new one: {e}");
                self.forget_session().await;
                self.open_session(None)
                    .await
                    .map_err(SessionFailure::into_inner)?
            }
            Err(failure) => return Err(failure.into_inner()),
        };

        if resume.as_deref() != Some(token.as_str()) {
            self.persist_session(&token).await;
        }
        self.set_session(Some(token));
        Ok(())
    }

    async fn disconnect(&self) {
        if self.current_session().is_none() {
            return;
        }
        let result = self
            .request(reqwest::Method::DELETE, "/v1/session")
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!("gate session close returned HTTP {}", response.status());
            }
            Err(e) => tracing::warn!("gate session close failed: {e}"),
        }
        self.set_session(None);
    }
}

impl RemoteGate for HttpGateClient {
    async fn set_join_requests(&self, handle: &str, target: GateTarget) -> ToggleOutcome {
        let path = format!("/v1/chats/{handle}/join-requests");
        let enabled = target == GateTarget::Required;
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "enabled": enabled }))
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                classify(status, &text)
            }
            Err(e) => ToggleOutcome::Failed(RemoteError {
                status: None,
                code: None,
                message: e.to_string(),
            }),
        }
    }
}

/// Map a toggle response to an outcome. A not-modified error code means the
/// gate was already where we wanted it.
pub fn classify(status: StatusCode, body: &str) -> ToggleOutcome {
    if status.is_success() {
        return ToggleOutcome::Changed;
    }
    let error = classify_error(status, body);
    if error.code.as_deref() == Some(NOT_MODIFIED) {
        ToggleOutcome::AlreadyInState
    } else {
        ToggleOutcome::Failed(error)
    }
}

fn classify_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            trimmed.to_string()
        }
    });
    RemoteError {
        status: Some(status.as_u16()),
        code: parsed.code,
        message,
    }
}
