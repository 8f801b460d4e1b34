//! Minimal Bot API client: long-polled updates in, messages and documents out.

use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use noraids_core::{ErrorDump, EventKind, MemberStatus, SpaceEvent};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::notify::{Notice, Notifier};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Extra time on top of the long-poll timeout before giving up on a request.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl Chat {
    fn is_supergroup(&self) -> bool {
        self.kind == "supergroup"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: MemberStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub old_chat_member: ChatMember,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

/// Operator commands accepted in the log chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Status,
    Enable(String),
    Disable(String),
}

/// What an update means to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Event(SpaceEvent),
    Command(AdminCommand),
    Skip,
}

/// Classify an update. Only supergroups feed the detector; only the log
/// chat can issue commands.
pub fn route(update: &Update, log_chat_id: Option<i64>) -> Routed {
    if let Some(member) = &update.chat_member {
        if !member.chat.is_supergroup() {
            return Routed::Skip;
        }
        return Routed::Event(SpaceEvent {
            space_id: member.chat.id,
            handle: member.chat.username.clone(),
            kind: EventKind::MemberTransition {
                old: member.old_chat_member.status,
                new: member.new_chat_member.status,
            },
        });
    }

    if let Some(message) = &update.message {
        if log_chat_id == Some(message.chat.id) {
            return message
                .text
                .as_deref()
                .and_then(parse_command)
                .map_or(Routed::Skip, Routed::Command);
        }
        if message.chat.is_supergroup() {
            return Routed::Event(SpaceEvent {
                space_id: message.chat.id,
                handle: message.chat.username.clone(),
                kind: EventKind::Message {
                    text: message.text.clone().unwrap_or_default(),
                },
            });
        }
    }

    Routed::Skip
}

/// Parse `/status`, `/enable <handle>` or `/disable <handle>`, tolerating a
/// `@botname` suffix on the command and a leading `@` on the handle.
pub fn parse_command(text: &str) -> Option<AdminCommand> {
    let mut parts = text.split_whitespace();
    let name = parts.next()?.strip_prefix('/')?.split('@').next()?;
    let handle = parts
        .next()
        .map(|h| h.trim_start_matches('@'))
        .filter(|h| !h.is_empty())
        .map(str::to_string);

    match (name, handle) {
        ("status", _) => Some(AdminCommand::Status),
        ("enable", Some(handle)) => Some(AdminCommand::Enable(handle)),
        ("disable", Some(handle)) => Some(AdminCommand::Disable(handle)),
        _ => None,
    }
}

pub struct BotApi {
    http: reqwest::Client,
    base: String,
}

impl BotApi {
    pub fn new(token: &str) -> Self {
        Self::with_api_url(DEFAULT_API_URL, token)
    }

    pub fn with_api_url(api_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> anyhow::Result<T> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?;
        let decoded = response
            .json::<ApiResponse<T>>()
            .await
            .with_context(|| format!("{method} returned an unreadable response"))?;
        unwrap_response(method, decoded)
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> anyhow::Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["chat_member", "message"],
        });
        self.call(
            "getUpdates",
            &body,
            Duration::from_secs(timeout_secs) + REQUEST_SLACK,
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = json!(mode);
        }
        self.call::<serde_json::Value>("sendMessage", &body, REQUEST_SLACK)
            .await
            .map(drop)
    }

    /// Send `text` formatted as a single code block.
    pub async fn send_code(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "entities": [code_entity(text)],
        });
        self.call::<serde_json::Value>("sendMessage", &body, REQUEST_SLACK)
            .await
            .map(drop)
    }

    pub async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        contents: String,
    ) -> anyhow::Result<()> {
        let form = Form::new().text("chat_id", chat_id.to_string()).part(
            "document",
            Part::bytes(contents.into_bytes()).file_name(file_name.to_string()),
        );
        let response = self
            .http
            .post(format!("{}/sendDocument", self.base))
            .multipart(form)
            .timeout(REQUEST_SLACK * 3)
            .send()
            .await
            .context("sendDocument request failed")?;
        let decoded = response
            .json::<ApiResponse<serde_json::Value>>()
            .await
            .context("sendDocument returned an unreadable response")?;
        unwrap_response("sendDocument", decoded).map(drop)
    }
}

impl Notifier for BotApi {
    async fn notify(&self, chat_id: i64, notice: Notice) -> anyhow::Result<()> {
        match notice {
            Notice::Text(text) => self.send_message(chat_id, &text, None).await,
            Notice::Html(html) => self.send_message(chat_id, &html, Some("HTML")).await,
            Notice::Dump(ErrorDump::Inline(text)) => self.send_code(chat_id, &text).await,
            Notice::Dump(ErrorDump::Attachment(text)) => {
                self.send_document(chat_id, "error", text).await
            }
        }
    }
}

fn unwrap_response<T>(method: &str, response: ApiResponse<T>) -> anyhow::Result<T> {
    if !response.ok {
        bail!(
            "{method} failed ({}): {}",
            response.error_code.unwrap_or_default(),
            response.description.unwrap_or_default()
        );
    }
    response
        .result
        .ok_or_else(|| anyhow!("{method} succeeded without a result"))
}

/// A `code` entity spanning all of `text`. Offsets are in UTF-16 units.
fn code_entity(text: &str) -> serde_json::Value {
    json!({
        "type": "code",
        "offset": 0,
        "length": text.encode_utf16().count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG_CHAT: i64 = -42;

    fn update(json: serde_json::Value) -> Update {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_route_join_in_supergroup() {
        let u = update(json!({
            "update_id": 1,
            "chat_member": {
                "chat": {"id": -1001, "type": "supergroup", "username": "rustaceans"},
                "from": {"id": 7, "is_bot": false, "first_name": "A"},
                "date": 0,
                "old_chat_member": {"status": "left", "user": {"id": 7}},
                "new_chat_member": {"status": "member", "user": {"id": 7}}
            }
        }));
        assert_eq!(
            route(&u, Some(LOG_CHAT)),
            Routed::Event(SpaceEvent::join(-1001, "rustaceans"))
        );
    }

    #[test]
    fn test_route_skips_plain_groups() {
        let u = update(json!({
            "update_id": 1,
            "chat_member": {
                "chat": {"id": -5, "type": "group"},
                "old_chat_member": {"status": "left"},
                "new_chat_member": {"status": "member"}
            }
        }));
        assert_eq!(route(&u, None), Routed::Skip);
    }

    #[test]
    fn test_route_supergroup_without_username_keeps_no_handle() {
        let u = update(json!({
            "update_id": 1,
            "chat_member": {
                "chat": {"id": -1001, "type": "supergroup"},
                "old_chat_member": {"status": "left"},
                "new_chat_member": {"status": "member"}
            }
        }));
        let Routed::Event(event) = route(&u, None) else {
            panic!("supergroup updates become events");
        };
        assert_eq!(event.key(), None);
    }

    #[test]
    fn test_route_log_chat_command() {
        let u = update(json!({
            "update_id": 2,
            "message": {
                "message_id": 10,
                "chat": {"id": LOG_CHAT, "type": "supergroup"},
                "text": "/disable@noraids_bot @rustaceans"
            }
        }));
        assert_eq!(
            route(&u, Some(LOG_CHAT)),
            Routed::Command(AdminCommand::Disable("rustaceans".into()))
        );
    }

    #[test]
    fn test_route_log_chat_chatter_is_skipped() {
        let u = update(json!({
            "update_id": 2,
            "message": {
                "message_id": 10,
                "chat": {"id": LOG_CHAT, "type": "supergroup"},
                "text": "hello"
            }
        }));
        assert_eq!(route(&u, Some(LOG_CHAT)), Routed::Skip);
    }

    #[test]
    fn test_route_supergroup_message() {
        let u = update(json!({
            "update_id": 3,
            "message": {
                "message_id": 11,
                "chat": {"id": -1001, "type": "supergroup", "username": "rustaceans"},
                "text": "/disable rustaceans"
            }
        }));
        let Routed::Event(event) = route(&u, Some(LOG_CHAT)) else {
            panic!("commands outside the log chat are plain messages");
        };
        assert!(matches!(event.kind, EventKind::Message { .. }));
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/status"), Some(AdminCommand::Status));
        assert_eq!(parse_command("/status@bot extra"), Some(AdminCommand::Status));
        assert_eq!(
            parse_command("/enable somegroup"),
            Some(AdminCommand::Enable("somegroup".into()))
        );
        assert_eq!(parse_command("/disable"), None);
        assert_eq!(parse_command("/disable @"), None);
        assert_eq!(parse_command("status"), None);
        assert_eq!(parse_command("/unknown x"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_unwrap_response_error() {
        let resp: ApiResponse<serde_json::Value> = serde_json::from_value(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found"
        }))
        .unwrap();
        let err = unwrap_response("sendMessage", resp).unwrap_err();
        assert_eq!(
            err.to_string(),
            "sendMessage failed (400): Bad Request: chat not found"
        );
    }

    #[test]
    fn test_unwrap_response_ok() {
        let resp: ApiResponse<Vec<Update>> =
            serde_json::from_value(json!({"ok": true, "result": []})).unwrap();
        assert!(unwrap_response("getUpdates", resp).unwrap().is_empty());
    }

    #[test]
    fn test_code_entity_counts_utf16() {
        // U+1F600 is two UTF-16 units
        let entity = code_entity("a\u{1F600}");
        assert_eq!(entity["length"], 3);
        assert_eq!(entity["type"], "code");
    }

    #[test]
    fn test_base_url_trims_slash() {
        let api = BotApi::with_api_url("http://localhost:8081/", "123:abc");
        assert_eq!(api.base, "http://localhost:8081/bot123:abc");
    }
}
