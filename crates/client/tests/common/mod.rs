//! In-process fake of the adhders backend for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use adhders_client::storage::{MemoryStore, SharedStore};
use adhders_client::{ApiClient, Notice, Notifier, TokenStore};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Multipart, Path, Query, Request, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const TOKEN: &str = "t0k3n";
pub const PASSWORD: &str = "correct-horse";

type Rejection = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, Rejection>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub len: usize,
}

#[derive(Default)]
pub struct BackendState {
    requests: Mutex<Vec<Recorded>>,
    posts: Mutex<Vec<Value>>,
    liked: Mutex<HashMap<String, bool>>,
    counter: AtomicU64,
    last_voice: Mutex<Option<Value>>,
    last_upload: Mutex<Option<RecordedUpload>>,
    ws_tokens: Mutex<Vec<String>>,
}

type Shared = Arc<BackendState>;

fn reject(status: StatusCode, detail: &str) -> Rejection {
    (status, Json(json!({ "detail": detail })))
}

fn authorized(headers: &HeaderMap) -> Result<(), Rejection> {
    let expected = format!("Bearer {TOKEN}");
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(reject(StatusCode::UNAUTHORIZED, "Not authenticated")),
    }
}

fn str_field<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or_default()
}

async fn record(State(state): State<Shared>, req: Request, next: Next) -> Response {
    let recorded = Recorded {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        authorization: req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    state.requests.lock().unwrap().push(recorded);
    next.run(req).await
}

// --- Auth ---

async fn register(Json(body): Json<Value>) -> ApiResult {
    if str_field(&body, "email") == "taken@example.com" {
        return Err(reject(StatusCode::BAD_REQUEST, "Email already registered"));
    }
    Ok(Json(json!({
        "message": "Registration successful! Please check your email.",
        "email_sent": true,
        "user_id": "u-new"
    })))
}

async fn login(Json(body): Json<Value>) -> ApiResult {
    match str_field(&body, "email") {
        "unverified@example.com" => Err(reject(StatusCode::FORBIDDEN, "Email not verified")),
        "no-token@example.com" => Ok(Json(json!({ "token_type": "bearer" }))),
        "broken@example.com" => Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "boom")),
        _ if str_field(&body, "password") == PASSWORD => {
            Ok(Json(json!({ "access_token": TOKEN, "token_type": "bearer" })))
        }
        _ => Err(reject(StatusCode::UNAUTHORIZED, "Invalid credentials")),
    }
}

async fn me(headers: HeaderMap) -> ApiResult {
    authorized(&headers)?;
    Ok(Json(json!({ "id": "u-1", "name": "Ada", "email": "ada@example.com" })))
}

async fn google(Json(body): Json<Value>) -> ApiResult {
    if str_field(&body, "idToken") == "forged" {
        return Err(reject(StatusCode::UNAUTHORIZED, "Invalid Google token"));
    }
    Ok(Json(json!({
        "access_token": TOKEN,
        "user": { "id": "u-g", "name": "Server Gee" }
    })))
}

async fn forgot_password(Json(body): Json<Value>) -> ApiResult {
    match str_field(&body, "email") {
        "nobody@example.com" => Err(reject(StatusCode::NOT_FOUND, "User not found")),
        "spam@example.com" => Err(reject(StatusCode::TOO_MANY_REQUESTS, "Slow down")),
        _ => Ok(Json(json!({ "message": "Password reset email sent" }))),
    }
}

async fn reset_password(Json(body): Json<Value>) -> ApiResult {
    if str_field(&body, "token") == "expired" {
        return Err(reject(StatusCode::BAD_REQUEST, "Invalid token"));
    }
    if str_field(&body, "password").len() < 8 {
        return Err(reject(StatusCode::UNPROCESSABLE_ENTITY, "Too short"));
    }
    Ok(Json(json!({ "message": "Password has been reset" })))
}

// --- Community ---

async fn list_posts(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> ApiResult {
    let posts: Vec<Value> = state
        .posts
        .lock()
        .unwrap()
        .iter()
        .filter(|post| match query.get("category") {
            Some(category) => post.get("category").and_then(Value::as_str) == Some(category.as_str()),
            None => true,
        })
        .cloned()
        .collect();
    Ok(Json(json!({ "success": true, "posts": posts })))
}

async fn create_post(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult {
    authorized(&headers)?;
    let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
    let post = json!({
        "id": format!("srv-{n}"),
        "content": str_field(&body, "content"),
        "category": str_field(&body, "category"),
        "author": "Ada",
        "author_id": "u-1",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "likes": 0,
        "replies": 0,
        "shares": 0,
        "user_liked": false
    });
    state.posts.lock().unwrap().insert(0, post.clone());
    Ok(Json(json!({ "success": true, "post": post })))
}

/// Increment a numeric field of a stored post, returning the new value.
fn bump(state: &BackendState, id: &str, field: &str, delta: i64) -> Result<i64, Rejection> {
    let mut posts = state.posts.lock().unwrap();
    let post = posts
        .iter_mut()
        .find(|p| p.get("id").and_then(Value::as_str) == Some(id))
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "Post not found"))?;
    let value = post.get(field).and_then(Value::as_i64).unwrap_or(0) + delta;
    post[field] = json!(value);
    Ok(value)
}

async fn like_post(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult {
    authorized(&headers)?;
    let liked = {
        let mut liked = state.liked.lock().unwrap();
        let entry = liked.entry(id.clone()).or_insert(false);
        *entry = !*entry;
        *entry
    };
    let likes = bump(&state, &id, "likes", if liked { 1 } else { -1 })?;
    Ok(Json(json!({ "success": true, "liked": liked, "likes": likes })))
}

async fn reply_post(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(_body): Json<Value>,
) -> ApiResult {
    authorized(&headers)?;
    if id == "locked" {
        return Err(reject(StatusCode::FORBIDDEN, "Replies are closed"));
    }
    let replies = bump(&state, &id, "replies", 1)?;
    Ok(Json(json!({ "success": true, "replies": replies })))
}

async fn share_post(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult {
    authorized(&headers)?;
    let shares = bump(&state, &id, "shares", 1)?;
    Ok(Json(json!({ "success": true, "shares": shares })))
}

async fn list_replies(headers: HeaderMap, Path(_id): Path<String>) -> ApiResult {
    authorized(&headers)?;
    Ok(Json(json!({
        "success": true,
        "replies": [
            { "id": "r1", "content": "same here", "author": "Bo", "timestamp": "2024-05-01T10:00:00Z" },
            { "_id": "r2", "text": "pomodoro helps", "author_name": "Cy" }
        ]
    })))
}

async fn delete_post(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult {
    authorized(&headers)?;
    state
        .posts
        .lock()
        .unwrap()
        .retain(|p| p.get("id").and_then(Value::as_str) != Some(id.as_str()));
    Ok(Json(json!({ "success": true })))
}

// --- Chats ---

async fn list_chats(headers: HeaderMap) -> ApiResult {
    authorized(&headers)?;
    Ok(Json(json!({
        "chats": [
            { "id": "c1", "title": "Focus buddies", "type": "group", "unread_count": 2 },
            { "title": "missing id is skipped" },
            { "_id": "c2", "name": "Sam", "last_message": { "text": "see you" } }
        ]
    })))
}

async fn list_messages(headers: HeaderMap, Path(chat): Path<String>) -> ApiResult {
    authorized(&headers)?;
    Ok(Json(json!({
        "messages": [
            { "id": "m2", "chat_id": chat, "text": "second", "created_at": "2024-05-01T09:00:00Z" },
            { "id": "m1", "chat_id": chat, "text": "first", "created_at": "2024-05-01T08:00:00Z" }
        ]
    })))
}

async fn send_message(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(chat): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    authorized(&headers)?;
    let text = str_field(&body, "text");
    if text == "fail" {
        return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "Message store unavailable"));
    }
    let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(Json(json!({
        "id": format!("m-{n}"),
        "chat_id": chat,
        "text": text,
        "type": str_field(&body, "type"),
        "sender_id": "u-1",
        "sender_name": "Ada",
        "created_at": chrono::Utc::now().to_rfc3339()
    })))
}

async fn create_group(headers: HeaderMap, Json(body): Json<Value>) -> ApiResult {
    authorized(&headers)?;
    Ok(Json(json!({ "chat": { "id": "g-1", "title": str_field(&body, "title"), "type": "group" } })))
}

async fn open_direct(headers: HeaderMap, Path(friend): Path<String>) -> ApiResult {
    authorized(&headers)?;
    Ok(Json(json!({ "id": format!("d-{friend}"), "title": "Direct", "type": "direct" })))
}

async fn join_group(headers: HeaderMap, Json(body): Json<Value>) -> ApiResult {
    authorized(&headers)?;
    if str_field(&body, "code") == "nope" {
        return Err(reject(StatusCode::NOT_FOUND, "Invalid invite code"));
    }
    Ok(Json(json!({ "chat": { "id": "g-joined", "title": "Hyperfocus club", "type": "group" } })))
}

async fn react(headers: HeaderMap, Path((chat, message)): Path<(String, String)>, Json(body): Json<Value>) -> ApiResult {
    authorized(&headers)?;
    let mut reactions = serde_json::Map::new();
    reactions.insert(str_field(&body, "type").to_string(), json!(1));
    Ok(Json(json!({
        "success": true,
        "message": {
            "id": message,
            "chat_id": chat,
            "text": "first",
            "created_at": "2024-05-01T08:00:00Z",
            "reactions": reactions
        }
    })))
}

async fn voice(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(chat): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    authorized(&headers)?;
    *state.last_voice.lock().unwrap() = Some(body);
    Ok(Json(json!({ "message": { "id": "v-1", "chat_id": chat, "type": "voice", "text": "" } })))
}

async fn upload(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(chat): Path<String>,
    mut multipart: Multipart,
) -> ApiResult {
    authorized(&headers)?;
    let field = multipart
        .next_field()
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, &e.to_string()))?
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "no file"))?;
    let name = field.name().unwrap_or_default().to_string();
    let file_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);
    let bytes = field
        .bytes()
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, &e.to_string()))?;
    *state.last_upload.lock().unwrap() = Some(RecordedUpload {
        field: name,
        file_name: file_name.clone(),
        content_type,
        len: bytes.len(),
    });
    Ok(Json(json!({ "id": "up-1", "chat_id": chat, "type": "image", "text": file_name })))
}

// --- Live updates ---

async fn poll_updates(headers: HeaderMap) -> ApiResult {
    authorized(&headers)?;
    Ok(Json(json!({ "updates": { "notifications": [{ "id": "n1" }] } })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let token = query.get("token").cloned().unwrap_or_default();
    state.ws_tokens.lock().unwrap().push(token.clone());
    if token != TOKEN {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(live_session)
}

async fn live_session(mut socket: WebSocket) {
    let frames = [
        json!({ "type": "connectionEstablished", "user_id": "u-1" }),
        json!({ "type": "pong" }),
        json!({ "type": "newMessage", "message": { "id": "live-1", "chat_id": "c1", "text": "pushed" } }),
    ];
    for frame in frames {
        if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Close(_) = msg {
            break;
        }
    }
}

/// A running fake backend.
pub struct Backend {
    pub url: String,
    state: Shared,
}

impl Backend {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(BackendState::default());

        let app = Router::new()
            .route("/api/auth/register", post(register))
            .route("/api/auth/login", post(login))
            .route("/api/auth/me", get(me))
            .route("/api/me", get(me))
            .route("/api/auth/google", post(google))
            .route("/api/auth/forgot-password", post(forgot_password))
            .route("/api/auth/reset-password", post(reset_password))
            .route("/api/community/posts", get(list_posts).post(create_post))
            .route("/api/community/posts/{id}", axum::routing::delete(delete_post))
            .route("/api/community/posts/{id}/like", post(like_post))
            .route("/api/community/posts/{id}/reply", post(reply_post))
            .route("/api/community/posts/{id}/share", post(share_post))
            .route("/api/community/posts/{id}/replies", get(list_replies))
            .route("/api/chats", get(list_chats))
            .route("/api/chats/group", post(create_group))
            .route("/api/chats/join", post(join_group))
            .route("/api/chats/direct/{friend}", post(open_direct))
            .route("/api/chats/{chat}/messages", get(list_messages).post(send_message))
            .route("/api/chats/{chat}/messages/{message}/react", post(react))
            .route("/api/chats/{chat}/voice", post(voice))
            .route("/api/chats/{chat}/upload", post(upload))
            .route("/api/poll-updates", get(poll_updates))
            .route("/api/ws", get(ws_handler))
            .layer(middleware::from_fn_with_state(state.clone(), record))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Number of requests received for `method path`.
    pub fn hits(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn seed_post(&self, id: &str, content: &str, category: &str) {
        self.state.posts.lock().unwrap().push(json!({
            "id": id,
            "content": content,
            "category": category,
            "author": "Bo",
            "author_id": "u-2",
            "timestamp": "2024-05-01T10:00:00Z",
            "likes": 0,
            "replies": 0,
            "shares": 0
        }));
    }

    pub fn last_voice(&self) -> Option<Value> {
        self.state.last_voice.lock().unwrap().clone()
    }

    pub fn last_upload(&self) -> Option<RecordedUpload> {
        self.state.last_upload.lock().unwrap().clone()
    }

    pub fn ws_tokens(&self) -> Vec<String> {
        self.state.ws_tokens.lock().unwrap().clone()
    }

    pub fn api(&self) -> ApiClient {
        ApiClient::new(self.url.clone(), std::time::Duration::from_secs(5)).unwrap()
    }

    /// A token store against this backend with fresh in-memory storage.
    pub fn tokens(&self) -> (TokenStore, SharedStore) {
        let storage: SharedStore = Arc::new(MemoryStore::new());
        (TokenStore::new(self.api(), storage.clone()), storage)
    }
}

/// Every notice received so far, without waiting.
pub fn drain_notices(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

pub fn notifier() -> (Notifier, broadcast::Receiver<Notice>) {
    let notifier = Notifier::new();
    let rx = notifier.subscribe();
    (notifier, rx)
}
