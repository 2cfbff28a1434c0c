//! Chat manager: chat list, message history, sending and media uploads.
//!
//! Same rules as the feed: token first, server values only, notices instead of
//! errors. A 401 from any chat endpoint means the session expired.

use std::sync::{Arc, RwLock};

use adhders_shared::{placeholder_id, ApiError, ChatMessage, ChatSummary, FRAME_POLLING_UPDATE};
use base64::Engine;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::notice::{Notice, NoticeLevel, Notifier};
use crate::stores::ChatCache;
use crate::token_store::TokenStore;
use crate::ws::LiveEvent;

const CHATS_PATH: &str = "/api/chats";
const DEFAULT_MIME: &str = "application/octet-stream";

/// Live event types that carry a single chat message.
const MESSAGE_EVENTS: &[&str] = &["newMessage", "new_message", "chatMessage", "chat_message"];

/// A recorded voice note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceClip {
    pub audio: Vec<u8>,
    pub duration_ms: u64,
    pub filename: Option<String>,
}

/// A file picked for upload. Missing name and type get defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

impl UploadFile {
    /// Filename and mime type with the `upload_<millis>` / octet-stream fallbacks.
    pub fn normalized(&self) -> (String, String) {
        let filename = self
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| placeholder_id("upload"));
        let mime = self
            .mime_type
            .as_deref()
            .map(str::trim)
            .filter(|mime| !mime.is_empty())
            .unwrap_or(DEFAULT_MIME)
            .to_string();
        (filename, mime)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChatsResponse {
    #[serde(default)]
    chats: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    text: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct GroupChatRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct JoinChatRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct ReactionRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct VoiceMessageRequest<'a> {
    chat_id: &'a str,
    audio_data: String,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
}

/// Some endpoints wrap the record (`{"message": {...}}`), some return it bare.
fn unwrap_record<'a>(value: &'a Value, key: &str) -> &'a Value {
    match value.get(key) {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    }
}

/// Messages carried by a live event, if any.
fn event_messages(event: &LiveEvent) -> Vec<ChatMessage> {
    let payload = &event.payload;
    match event.event_type() {
        Some(FRAME_POLLING_UPDATE) => payload
            .get("data")
            .and_then(|data| data.get("messages"))
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .filter_map(|value| ChatMessage::decode(value, "").ok())
                    .collect()
            })
            .unwrap_or_default(),
        Some(kind) if MESSAGE_EVENTS.contains(&kind) => {
            let record = payload
                .get("message")
                .or_else(|| payload.get("data"))
                .filter(|inner| inner.is_object())
                .unwrap_or(payload);
            ChatMessage::decode(record, "").into_iter().collect()
        }
        _ => Vec::new(),
    }
}

#[derive(Clone)]
pub struct ChatManager {
    tokens: TokenStore,
    notifier: Notifier,
    cache: Arc<RwLock<ChatCache>>,
}

impl ChatManager {
    pub fn new(tokens: TokenStore, notifier: Notifier) -> Self {
        Self {
            tokens,
            notifier,
            cache: Arc::new(RwLock::new(ChatCache::default())),
        }
    }

    pub fn chats(&self) -> Vec<ChatSummary> {
        self.cache.read().map(|c| c.chats.clone()).unwrap_or_default()
    }

    /// Cached messages of a chat, oldest first.
    pub fn messages(&self, chat_id: &str) -> Vec<ChatMessage> {
        self.cache
            .read()
            .ok()
            .and_then(|c| c.chat(chat_id).map(|m| m.messages.clone()))
            .unwrap_or_default()
    }

    pub async fn list_chats(&self) -> Vec<ChatSummary> {
        if self.ensure_token("Please login to view your chats.").is_none() {
            return self.chats();
        }

        match self.tokens.api().get_json::<Option<ChatsResponse>>(CHATS_PATH).await {
            Ok(response) => {
                let chats: Vec<ChatSummary> = response
                    .unwrap_or_default()
                    .chats
                    .iter()
                    .filter_map(|value| match ChatSummary::decode(value) {
                        Ok(chat) => Some(chat),
                        Err(e) => {
                            tracing::warn!("chat: skipping chat: {}", e);
                            None
                        }
                    })
                    .collect();
                tracing::debug!("chat: loaded {} chats", chats.len());
                self.with_cache(|cache| cache.set_chats(chats.clone()));
                chats
            }
            Err(e) => {
                self.report("load chats", &e);
                self.chats()
            }
        }
    }

    pub async fn load_messages(&self, chat_id: &str) -> Vec<ChatMessage> {
        if self.ensure_token("Please login to view messages.").is_none() {
            return self.messages(chat_id);
        }

        let path = format!("{CHATS_PATH}/{chat_id}/messages");
        match self.tokens.api().get_json::<Option<MessagesResponse>>(&path).await {
            Ok(response) => {
                let messages: Vec<ChatMessage> = response
                    .unwrap_or_default()
                    .messages
                    .iter()
                    .filter_map(|value| ChatMessage::decode(value, chat_id).ok())
                    .collect();
                self.with_cache(|cache| cache.chat_mut(chat_id).set_history(messages));
                self.messages(chat_id)
            }
            Err(e) => {
                self.report("load messages", &e);
                self.messages(chat_id)
            }
        }
    }

    /// Send a text message. A pending placeholder is shown until the server
    /// answers; it is replaced by the server's message or removed on failure.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Option<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.ensure_token("Please login to send messages.")?;

        let placeholder = ChatMessage {
            id: format!("pending-{}", Uuid::new_v4()),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            kind: "text".to_string(),
            sender_id: String::new(),
            sender_name: "You".to_string(),
            created_at: Utc::now(),
            pending: true,
        };
        self.with_cache(|cache| {
            cache.chat_mut(chat_id).add_message(placeholder.clone());
        });

        let path = format!("{CHATS_PATH}/{chat_id}/messages");
        let request = SendMessageRequest { text, kind: "text" };
        let result = match self.tokens.api().post_json::<_, Value>(&path, &request).await {
            Ok(value) => ChatMessage::decode(unwrap_record(&value, "message"), chat_id)
                .map_err(|e| ApiError::Deserialize(e.to_string())),
            Err(e) => Err(e),
        };

        match result {
            Ok(message) => {
                self.with_cache(|cache| {
                    cache
                        .chat_mut(chat_id)
                        .replace_message(&placeholder.id, message.clone());
                });
                Some(message)
            }
            Err(e) => {
                self.with_cache(|cache| {
                    cache.chat_mut(chat_id).remove_message(&placeholder.id);
                });
                self.report("send message", &e);
                None
            }
        }
    }

    pub async fn create_group_chat(&self, title: &str) -> Option<ChatSummary> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        self.ensure_token("Please login to create a group chat.")?;

        let path = format!("{CHATS_PATH}/group");
        let result = self.tokens.api().post_json(&path, &GroupChatRequest { title }).await;
        self.accept_chat("create group chat", result)
    }

    pub async fn open_direct_chat(&self, friend_id: &str) -> Option<ChatSummary> {
        self.ensure_token("Please login to start a chat.")?;

        let path = format!("{CHATS_PATH}/direct/{friend_id}");
        let result = self.tokens.api().post_empty(&path).await;
        self.accept_chat("open chat", result)
    }

    pub async fn join_group_chat(&self, code: &str) -> Option<ChatSummary> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        self.ensure_token("Please login to join a group chat.")?;

        let path = format!("{CHATS_PATH}/join");
        let result = self.tokens.api().post_json(&path, &JoinChatRequest { code }).await;
        self.accept_chat("join group chat", result)
    }

    /// React to a message. If the server returns the updated message it
    /// replaces the cached copy.
    pub async fn react_to_message(&self, chat_id: &str, message_id: &str, reaction: &str) -> bool {
        if self.ensure_token("Please login to react to messages.").is_none() {
            return false;
        }

        let path = format!("{CHATS_PATH}/{chat_id}/messages/{message_id}/react");
        match self
            .tokens
            .api()
            .post_json::<_, Value>(&path, &ReactionRequest { kind: reaction })
            .await
        {
            Ok(value) => {
                if let Some(record) = value.get("message").filter(|m| m.is_object()) {
                    if let Ok(message) = ChatMessage::decode(record, chat_id) {
                        self.with_cache(|cache| cache.chat_mut(chat_id).replace_message(message_id, message));
                    }
                }
                true
            }
            Err(e) => {
                self.report("react to message", &e);
                false
            }
        }
    }

    pub async fn send_voice_message(&self, chat_id: &str, clip: VoiceClip) -> Option<ChatMessage> {
        self.ensure_token("Please login to send voice messages.")?;

        let request = VoiceMessageRequest {
            chat_id,
            audio_data: base64::engine::general_purpose::STANDARD.encode(&clip.audio),
            duration_ms: clip.duration_ms,
            filename: clip.filename.as_deref(),
        };
        let path = format!("{CHATS_PATH}/{chat_id}/voice");
        let result = self.tokens.api().post_json::<_, Value>(&path, &request).await;
        self.accept_message(chat_id, "send voice message", result)
    }

    /// Upload a media file as multipart field `file`.
    pub async fn upload_media(&self, chat_id: &str, file: UploadFile) -> Option<ChatMessage> {
        self.ensure_token("Please login to upload media.")?;

        if file.bytes.is_empty() {
            self.notifier.notify(Notice::new(
                NoticeLevel::Error,
                "Upload Error",
                "No media selected for upload.",
            ));
            return None;
        }

        let (filename, mime) = file.normalized();
        let part = match Part::bytes(file.bytes).file_name(filename).mime_str(&mime) {
            Ok(part) => part,
            Err(e) => {
                tracing::warn!("chat: rejecting upload with mime `{}`: {}", mime, e);
                self.notifier.notify(Notice::new(
                    NoticeLevel::Error,
                    "Upload Error",
                    "Unsupported media type.",
                ));
                return None;
            }
        };

        tracing::debug!("chat: uploading media to chat {}", chat_id);
        let path = format!("{CHATS_PATH}/{chat_id}/upload");
        let result = self
            .tokens
            .api()
            .post_multipart::<Value>(&path, Form::new().part("file", part))
            .await;
        self.accept_message(chat_id, "upload media", result)
    }

    /// Insert messages pushed over the live channel. Returns how many were new.
    pub fn apply_live_event(&self, event: &LiveEvent) -> usize {
        let messages = event_messages(event);
        if messages.is_empty() {
            return 0;
        }

        let mut added = 0;
        self.with_cache(|cache| {
            for message in messages {
                if message.chat_id.is_empty() {
                    tracing::debug!("chat: live message without chat id dropped");
                    continue;
                }
                let chat_id = message.chat_id.clone();
                if cache.chat_mut(&chat_id).add_message(message) {
                    added += 1;
                }
            }
        });
        added
    }

    fn accept_chat(&self, action: &str, result: Result<Value, ApiError>) -> Option<ChatSummary> {
        let chat = result.and_then(|value| {
            ChatSummary::decode(unwrap_record(&value, "chat")).map_err(|e| ApiError::Deserialize(e.to_string()))
        });
        match chat {
            Ok(chat) => {
                self.with_cache(|cache| cache.upsert_chat(chat.clone()));
                Some(chat)
            }
            Err(e) => {
                self.report(action, &e);
                None
            }
        }
    }

    fn accept_message(&self, chat_id: &str, action: &str, result: Result<Value, ApiError>) -> Option<ChatMessage> {
        let message = result.and_then(|value| {
            ChatMessage::decode(unwrap_record(&value, "message"), chat_id)
                .map_err(|e| ApiError::Deserialize(e.to_string()))
        });
        match message {
            Ok(message) => {
                self.with_cache(|cache| {
                    cache.chat_mut(chat_id).add_message(message.clone());
                });
                Some(message)
            }
            Err(e) => {
                self.report(action, &e);
                None
            }
        }
    }

    fn ensure_token(&self, message: &str) -> Option<String> {
        let token = self.tokens.resolve();
        if token.is_none() {
            tracing::warn!("chat: no token available");
            self.notifier.notify(Notice::auth_required(message));
        }
        token
    }

    fn report(&self, action: &str, err: &ApiError) {
        tracing::error!("chat: failed to {}: {}", action, err);
        if err.status() == Some(401) {
            self.notifier.notify(Notice::session_expired());
        } else {
            let message = err
                .server_message()
                .unwrap_or_else(|| format!("Failed to {action}."));
            self.notifier.notify(Notice::error(message));
        }
    }

    fn with_cache(&self, f: impl FnOnce(&mut ChatCache)) {
        match self.cache.write() {
            Ok(mut cache) => f(&mut cache),
            Err(_) => tracing::error!("chat: cache lock poisoned"),
        }
    }
}
