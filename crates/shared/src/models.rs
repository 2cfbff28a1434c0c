//! Shared data models for the adhders backend API.
//!
//! Server payloads are not uniform: the same field can arrive under several
//! names depending on which endpoint produced it. Every record therefore has an
//! explicit `decode` function with a fixed precedence order per field instead
//! of a derived `Deserialize`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

// --- Decoding helpers ---

fn object<'a>(value: &'a Value, record: &'static str) -> Result<&'a Map<String, Value>, DecodeError> {
    value.as_object().ok_or(DecodeError::NotAnObject(record))
}

/// First non-empty string (numbers are stringified) among `keys`, in order.
fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// First numeric field among `keys`. Non-numeric values are skipped.
fn first_u64(obj: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| obj.get(*key).and_then(Value::as_u64))
}

/// First non-null field among `keys`, interpreted with JavaScript-like truthiness.
fn first_bool(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| match obj.get(*key) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Number(n)) => Some(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Some(Value::String(s)) => Some(!s.is_empty()),
        Some(_) => Some(true),
    })
}

fn first_timestamp(obj: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|key| {
        obj.get(*key)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Client-side placeholder id, used only until the server assigns one.
pub fn placeholder_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Utc::now().timestamp_millis())
}

// --- Identity ---

/// The locally cached user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl User {
    /// Decode a profile payload (`/api/me`, `/api/auth/me`, login `user` objects).
    ///
    /// Precedence: `id` > `_id` > `user_id`; `name` > `display_name` > `fallback_name`;
    /// `email`; `photo_base64` > `photo`.
    pub fn decode(value: &Value, fallback_name: &str) -> Result<Self, DecodeError> {
        let obj = object(value, "user")?;
        Ok(Self {
            id: first_str(obj, &["id", "_id", "user_id"]),
            name: first_str(obj, &["name", "display_name"]).unwrap_or_else(|| fallback_name.to_string()),
            email: first_str(obj, &["email"]),
            photo: first_str(obj, &["photo_base64", "photo"]),
            token: None,
        })
    }
}

/// Colour preference persisted alongside the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Palette {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            primary: "#A3C9FF".to_string(),
            secondary: "#FFCFE1".to_string(),
            accent: "#B8F1D9".to_string(),
        }
    }
}

// --- Auth requests/responses ---

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub email_sent: bool,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Response of every endpoint that can mint a session token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

/// Exchange request for a platform identity-provider token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLoginRequest {
    pub id_token: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_auth_code: Option<String>,
}

// --- Community feed ---

/// A community post mirrored from the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: String,
    pub content: String,
    pub author: String,
    pub author_id: String,
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub likes: u64,
    pub replies: u64,
    pub shares: u64,
    pub user_liked: bool,
}

impl FeedPost {
    /// Decode a post payload.
    ///
    /// Precedence per field:
    /// - `id`: `id` > `_id` > placeholder `post_<millis>`
    /// - `content`: `content` > `text` > `""`
    /// - `author`: `author` > `author_name` > `"Anonymous"`
    /// - `author_id`: `author_id` > `authorId` > `""`
    /// - `category`: `category` > `"general"`
    /// - `timestamp`: `timestamp` > `created_at` > now
    /// - `likes`, `shares`: numeric value > 0
    /// - `replies`: `replies` > `comments_count` > 0
    /// - `user_liked`: `user_liked` > `userLiked` > false
    pub fn decode(value: &Value) -> Result<Self, DecodeError> {
        let obj = object(value, "post")?;
        Ok(Self {
            id: first_str(obj, &["id", "_id"]).unwrap_or_else(|| placeholder_id("post")),
            content: first_str(obj, &["content", "text"]).unwrap_or_default(),
            author: first_str(obj, &["author", "author_name"]).unwrap_or_else(|| "Anonymous".to_string()),
            author_id: first_str(obj, &["author_id", "authorId"]).unwrap_or_default(),
            category: first_str(obj, &["category"]).unwrap_or_else(|| "general".to_string()),
            timestamp: first_timestamp(obj, &["timestamp", "created_at"]).unwrap_or_else(Utc::now),
            likes: first_u64(obj, &["likes"]).unwrap_or(0),
            replies: first_u64(obj, &["replies", "comments_count"]).unwrap_or(0),
            shares: first_u64(obj, &["shares"]).unwrap_or(0),
            user_liked: first_bool(obj, &["user_liked", "userLiked"]).unwrap_or(false),
        })
    }
}

/// A reply to a community post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostReply {
    pub id: String,
    pub content: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

impl PostReply {
    pub fn decode(value: &Value) -> Result<Self, DecodeError> {
        let obj = object(value, "reply")?;
        Ok(Self {
            id: first_str(obj, &["id", "_id"]).unwrap_or_else(|| placeholder_id("reply")),
            content: first_str(obj, &["content", "text"]).unwrap_or_default(),
            author: first_str(obj, &["author", "author_name"]).unwrap_or_else(|| "Anonymous".to_string()),
            timestamp: first_timestamp(obj, &["timestamp", "created_at"]).unwrap_or_else(Utc::now),
        })
    }
}

// --- Chat ---

/// A chat conversation as listed by `/api/chats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub last_message: Option<String>,
    pub unread: u64,
}

impl ChatSummary {
    /// Precedence: `id` > `_id` > `chat_id` (required); `title` > `name` > `"Chat"`;
    /// `type` > `"direct"`; `last_message` as string or `last_message.text`;
    /// `unread_count` > `unread` > 0.
    pub fn decode(value: &Value) -> Result<Self, DecodeError> {
        let obj = object(value, "chat")?;
        let id = first_str(obj, &["id", "_id", "chat_id"]).ok_or(DecodeError::MissingField {
            record: "chat",
            field: "id",
        })?;
        let last_message = match obj.get("last_message") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(m)) => first_str(m, &["text", "content"]),
            _ => None,
        };
        Ok(Self {
            id,
            title: first_str(obj, &["title", "name"]).unwrap_or_else(|| "Chat".to_string()),
            kind: first_str(obj, &["type"]).unwrap_or_else(|| "direct".to_string()),
            last_message,
            unread: first_u64(obj, &["unread_count", "unread"]).unwrap_or(0),
        })
    }
}

/// A single chat message mirrored from the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub text: String,
    pub kind: String,
    pub sender_id: String,
    pub sender_name: String,
    pub created_at: DateTime<Utc>,
    /// True while the message only exists locally under a placeholder id.
    #[serde(default)]
    pub pending: bool,
}

impl ChatMessage {
    /// Precedence: `id` > `_id` > `message_id` > placeholder; `chat_id` > `chatId` > `chat_id`
    /// argument; `text` > `content`; `type` > `"text"`; `sender_id` > `senderId` > `user_id`;
    /// `sender_name` > `senderName` > `author` > `"Unknown"`; `created_at` > `timestamp` > now.
    pub fn decode(value: &Value, chat_id: &str) -> Result<Self, DecodeError> {
        let obj = object(value, "message")?;
        Ok(Self {
            id: first_str(obj, &["id", "_id", "message_id"]).unwrap_or_else(|| placeholder_id("msg")),
            chat_id: first_str(obj, &["chat_id", "chatId"]).unwrap_or_else(|| chat_id.to_string()),
            text: first_str(obj, &["text", "content"]).unwrap_or_default(),
            kind: first_str(obj, &["type"]).unwrap_or_else(|| "text".to_string()),
            sender_id: first_str(obj, &["sender_id", "senderId", "user_id"]).unwrap_or_default(),
            sender_name: first_str(obj, &["sender_name", "senderName", "author"])
                .unwrap_or_else(|| "Unknown".to_string()),
            created_at: first_timestamp(obj, &["created_at", "timestamp"]).unwrap_or_else(Utc::now),
            pending: false,
        })
    }
}
