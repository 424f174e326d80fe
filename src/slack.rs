//! Slack transport: Web API client, Socket Mode listener, and event parsing.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use serde_json::Value;
use tracing::{debug, warn};
use tungstenite::{connect, Message};

use crate::{split_text_chunks, Attachment, BotError, InboundMessage, Result, SlackSection};

const DEFAULT_HTTP_TIMEOUT_MS: u64 = 120_000;
const SLACK_API_BASE: &str = "https://slack.com/api";
const MAX_TEXT_CHUNK_CHARS: usize = 3900;
const SEEN_EVENT_CAPACITY: usize = 512;
pub(crate) const UNKNOWN_USER: &str = "unknown user";

/// Outbound chat operations used by handlers.
pub(crate) trait ChatApi: Send + Sync {
    /// Post to a channel (or a user id, for a direct message); returns the
    /// timestamp of the last message posted.
    fn post_message(&self, channel: &str, text: &str, attachments: &[Attachment]) -> Result<String>;
    fn delete_message(&self, channel: &str, ts: &str) -> Result<()>;
    fn upload_file(&self, channel: &str, path: &Path, title: &str, comment: &str) -> Result<()>;
    /// User id to user name for every member of the workspace.
    fn list_users(&self) -> Result<HashMap<String, String>>;
}

pub(crate) struct SlackClient {
    agent: ureq::Agent,
    upload_client: Client,
    bot_token: String,
    app_token: String,
}

fn check_ok(method: &str, response: Value) -> Result<Value> {
    if response.get("ok").and_then(|v| v.as_bool()) != Some(true) {
        let err = response
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        return Err(BotError::Slack {
            method: method.to_string(),
            error: err.to_string(),
        });
    }
    Ok(response)
}

impl SlackClient {
    pub(crate) fn new(section: &SlackSection) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS))
            .timeout_write(Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS))
            .timeout_read(Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS))
            .build();
        let upload_client = Client::builder()
            .user_agent("catbot")
            .timeout(Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS))
            .build()
            .map_err(|e| BotError::http("files.upload", e))?;
        Ok(Self {
            agent,
            upload_client,
            bot_token: section.bot_token.clone(),
            app_token: section.app_token.clone(),
        })
    }

    fn api_post_json(&self, token: &str, method: &str, payload: &Value) -> Result<Value> {
        let response = self
            .agent
            .post(&format!("{SLACK_API_BASE}/{method}"))
            .set("Authorization", &format!("Bearer {token}"))
            .set("Content-Type", "application/json")
            .send_json(payload)
            .map_err(|e| BotError::http(method, e))?
            .into_json::<Value>()
            .map_err(|e| BotError::http(method, e))?;
        check_ok(method, response)
    }

    fn api_get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value> {
        let mut request = self
            .agent
            .get(&format!("{SLACK_API_BASE}/{method}"))
            .set("Authorization", &format!("Bearer {}", self.bot_token));
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request
            .call()
            .map_err(|e| BotError::http(method, e))?
            .into_json::<Value>()
            .map_err(|e| BotError::http(method, e))?;
        check_ok(method, response)
    }

    /// The bot's own user id.
    pub(crate) fn auth_test(&self) -> Result<String> {
        let response = self.api_post_json(&self.bot_token, "auth.test", &serde_json::json!({}))?;
        response
            .get("user_id")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| BotError::Slack {
                method: "auth.test".into(),
                error: "missing user_id".into(),
            })
    }

    pub(crate) fn open_socket_url(&self) -> Result<String> {
        let response =
            self.api_post_json(&self.app_token, "apps.connections.open", &serde_json::json!({}))?;
        response
            .get("url")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| BotError::Slack {
                method: "apps.connections.open".into(),
                error: "missing websocket url".into(),
            })
    }
}

impl ChatApi for SlackClient {
    fn post_message(&self, channel: &str, text: &str, attachments: &[Attachment]) -> Result<String> {
        let message = text.trim();
        if message.is_empty() && attachments.is_empty() {
            return Ok(String::new());
        }

        let chunks = split_text_chunks(message, MAX_TEXT_CHUNK_CHARS);
        let last = chunks.len().saturating_sub(1);
        let mut ts = String::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut payload = serde_json::json!({
                "channel": channel,
                "text": chunk,
                "as_user": true,
            });
            if i == last && !attachments.is_empty() {
                payload["attachments"] = serde_json::to_value(attachments)?;
            }
            let response = self.api_post_json(&self.bot_token, "chat.postMessage", &payload)?;
            ts = response
                .get("ts")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
        }
        Ok(ts)
    }

    fn delete_message(&self, channel: &str, ts: &str) -> Result<()> {
        let payload = serde_json::json!({ "channel": channel, "ts": ts });
        self.api_post_json(&self.bot_token, "chat.delete", &payload)?;
        Ok(())
    }

    fn upload_file(&self, channel: &str, path: &Path, title: &str, comment: &str) -> Result<()> {
        let mut form = multipart::Form::new()
            .text("channels", channel.to_string())
            .text("title", title.to_string())
            .file("file", path)?;
        if !comment.trim().is_empty() {
            form = form.text("initial_comment", comment.to_string());
        }

        let result: Value = self
            .upload_client
            .post(format!("{SLACK_API_BASE}/files.upload"))
            .bearer_auth(&self.bot_token)
            .multipart(form)
            .send()
            .map_err(|e| BotError::http("files.upload", e))?
            .json()
            .map_err(|e| BotError::http("files.upload", e))?;
        check_ok("files.upload", result)?;
        Ok(())
    }

    fn list_users(&self) -> Result<HashMap<String, String>> {
        let mut users = HashMap::new();
        let mut cursor = String::new();
        loop {
            let response = {
                let mut query = vec![("limit", "200")];
                if !cursor.is_empty() {
                    query.push(("cursor", cursor.as_str()));
                }
                self.api_get("users.list", &query)?
            };
            for member in response
                .get("members")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
            {
                if let (Some(id), Some(name)) = (
                    member.get("id").and_then(|v| v.as_str()),
                    member.get("name").and_then(|v| v.as_str()),
                ) {
                    users.insert(id.to_string(), name.to_string());
                }
            }
            cursor = response
                .get("response_metadata")
                .and_then(|m| m.get("next_cursor"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if cursor.is_empty() {
                break;
            }
        }
        Ok(users)
    }
}

// ── Inbound ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum SocketFrame {
    Event(Value),
    Disconnected(String),
}

fn decode_frame(message: Message) -> Option<Value> {
    let text = match message {
        Message::Text(text) => text.as_str().to_string(),
        Message::Binary(binary) => String::from_utf8(binary.into()).ok()?,
        _ => return None,
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "slack socket payload parse error");
            None
        }
    }
}

/// Read the Socket Mode WebSocket on its own thread, acknowledging every
/// envelope and forwarding the payloads.
pub(crate) fn spawn_socket_listener(
    ws_url: String,
    tx: mpsc::Sender<SocketFrame>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut socket = match connect(&ws_url) {
            Ok((socket, _)) => socket,
            Err(err) => {
                let _ = tx.send(SocketFrame::Disconnected(format!("connect error: {err}")));
                return;
            }
        };

        loop {
            let message = match socket.read() {
                Ok(message) => message,
                Err(err) => {
                    let _ = tx.send(SocketFrame::Disconnected(format!("read error: {err}")));
                    break;
                }
            };

            match message {
                Message::Ping(payload) => {
                    let _ = socket.send(Message::Pong(payload));
                }
                Message::Close(frame) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .unwrap_or_else(|| "socket closed".to_string());
                    let _ = tx.send(SocketFrame::Disconnected(format!("close: {reason}")));
                    break;
                }
                other => {
                    let Some(payload) = decode_frame(other) else {
                        continue;
                    };
                    if let Some(eid) = payload.get("envelope_id").and_then(|v| v.as_str()) {
                        let ack = serde_json::json!({ "envelope_id": eid });
                        let _ = socket.send(Message::Text(ack.to_string().into()));
                    }
                    if payload.get("type").and_then(|v| v.as_str()) == Some("disconnect") {
                        let _ = tx.send(SocketFrame::Disconnected("server requested refresh".into()));
                        break;
                    }
                    if tx.send(SocketFrame::Event(payload)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Normalise a Socket Mode envelope into a user message.
///
/// Messages from bots, edits, and deletions are dropped.
pub(crate) fn parse_socket_event(envelope: &Value) -> Option<InboundMessage> {
    let payload = envelope.get("payload").unwrap_or(envelope);
    let event = payload.get("event")?;
    match event.get("type").and_then(|v| v.as_str())? {
        "message" | "app_mention" => {}
        _ => return None,
    }
    if event.get("bot_id").is_some() {
        return None;
    }
    if let Some(subtype) = event.get("subtype").and_then(|v| v.as_str()) {
        match subtype {
            "bot_message" | "message_changed" | "message_deleted" => return None,
            _ => {}
        }
    }

    Some(InboundMessage {
        user: event.get("user").and_then(|v| v.as_str())?.to_string(),
        channel: event.get("channel").and_then(|v| v.as_str())?.to_string(),
        text: event
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        ts: event
            .get("ts")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

/// Slack delivers a mention both as `message` and `app_mention`; keep one.
#[derive(Debug, Default)]
pub(crate) struct EventDeduper {
    seen: VecDeque<String>,
}

impl EventDeduper {
    pub(crate) fn is_duplicate(&mut self, message: &InboundMessage) -> bool {
        let key = format!("{}:{}", message.channel, message.ts);
        if self.seen.iter().any(|item| *item == key) {
            return true;
        }
        self.seen.push_back(key);
        while self.seen.len() > SEEN_EVENT_CAPACITY {
            let _ = self.seen.pop_front();
        }
        false
    }
}

// ── Users ────────────────────────────────────────────────────────────────

/// Id to name cache, refreshed from the workspace on a miss.
pub(crate) struct UserDirectory {
    chat: Arc<dyn ChatApi>,
    names: Mutex<HashMap<String, String>>,
}

impl UserDirectory {
    pub(crate) fn new(chat: Arc<dyn ChatApi>) -> Self {
        Self {
            chat,
            names: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn name(&self, user_id: &str) -> String {
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        if !names.contains_key(user_id) {
            match self.chat.list_users() {
                Ok(users) => {
                    debug!(count = users.len(), "refreshed user directory");
                    *names = users;
                }
                Err(err) => warn!(error = %err, "users.list failed"),
            }
        }
        names
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_USER.to_string())
    }
}
