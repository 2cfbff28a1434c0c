//! Community feed manager.
//!
//! Every mutation resolves a token first; without one it emits an
//! "Authentication Required" notice and makes no request. The cache only ever
//! takes values the server returned, and failures become notices.

use std::sync::{Arc, RwLock};

use adhders_shared::{ApiError, FeedPost, PostReply};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notice::{Notice, NoticeLevel, Notifier};
use crate::storage::{self, SharedStore, KEY_COMMUNITY_POSTS};
use crate::stores::FeedCache;
use crate::token_store::TokenStore;
use crate::ws::LiveEvent;

const POSTS_PATH: &str = "/api/community/posts";

/// Live event types that mean the feed changed server-side.
const FEED_EVENTS: &[&str] = &[
    "newPost",
    "new_post",
    "postCreated",
    "postUpdated",
    "postDeleted",
    "postLiked",
    "postReply",
    "communityUpdate",
    "community_update",
];

#[derive(Debug, Default, Deserialize)]
struct PostsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    posts: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct PostResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    post: Option<Value>,
}

/// Like/reply/share responses: only the fields the endpoint sends are present.
#[derive(Debug, Default, Deserialize)]
struct CounterResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    liked: Option<Value>,
    #[serde(default)]
    likes: Option<u64>,
    #[serde(default)]
    replies: Option<u64>,
    #[serde(default)]
    shares: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    replies: Option<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    content: &'a str,
    category: &'a str,
}

#[derive(Debug, Serialize)]
struct ReplyRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CategoryQuery<'a> {
    category: &'a str,
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Whether a live event should trigger a feed refresh.
fn is_feed_event(event: &LiveEvent) -> bool {
    match event.event_type() {
        Some(adhders_shared::FRAME_POLLING_UPDATE) => event
            .payload
            .get("data")
            .map(|data| data.get("posts").is_some() || data.get("community").is_some())
            .unwrap_or(false),
        Some(kind) => FEED_EVENTS.contains(&kind),
        None => false,
    }
}

#[derive(Clone)]
pub struct FeedManager {
    tokens: TokenStore,
    storage: SharedStore,
    notifier: Notifier,
    cache: Arc<RwLock<FeedCache>>,
}

impl FeedManager {
    pub fn new(tokens: TokenStore, storage: SharedStore, notifier: Notifier) -> Self {
        Self {
            tokens,
            storage,
            notifier,
            cache: Arc::new(RwLock::new(FeedCache::default())),
        }
    }

    /// Load the durable post cache. Returns the number of posts restored.
    pub fn hydrate(&self) -> usize {
        let Some(posts) = storage::load::<Vec<FeedPost>>(self.storage.as_ref(), KEY_COMMUNITY_POSTS) else {
            return 0;
        };
        let count = posts.len();
        if let Ok(mut cache) = self.cache.write() {
            cache.set_posts(posts);
        }
        tracing::debug!("feed: restored {} cached posts", count);
        count
    }

    pub fn posts(&self) -> Vec<FeedPost> {
        self.cache.read().map(|c| c.posts.clone()).unwrap_or_default()
    }

    pub fn post(&self, id: &str) -> Option<FeedPost> {
        self.cache.read().ok().and_then(|c| c.get(id).cloned())
    }

    pub fn replies(&self, post_id: &str) -> Option<Vec<PostReply>> {
        self.cache
            .read()
            .ok()
            .and_then(|c| c.replies(post_id).map(<[PostReply]>::to_vec))
    }

    /// Reload the feed, optionally filtered by category.
    pub async fn refresh(&self, category: Option<&str>) -> bool {
        let api = self.tokens.api();
        let result: Result<PostsResponse, ApiError> = match category {
            Some(category) => api.get_json_with_query(POSTS_PATH, &CategoryQuery { category }).await,
            None => api.get_json(POSTS_PATH).await,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("feed: failed to load community posts: {}", e);
                self.notifier.notify(Notice::error("Failed to load community posts"));
                return false;
            }
        };

        let posts = match (response.success, response.posts) {
            (true, Some(raw)) => raw
                .iter()
                .filter_map(|value| match FeedPost::decode(value) {
                    Ok(mut post) => {
                        if let (Some(category), None) = (category, value.get("category")) {
                            post.category = category.to_string();
                        }
                        Some(post)
                    }
                    Err(e) => {
                        tracing::warn!("feed: skipping post: {}", e);
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        tracing::debug!("feed: loaded {} posts", posts.len());
        self.with_cache(|cache| cache.set_posts(posts));
        true
    }

    /// Publish a post. Blank content is ignored.
    pub async fn create_post(&self, content: &str, category: &str) -> Option<FeedPost> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        self.ensure_token("Please sign in to create posts.")?;

        let request = CreatePostRequest { content, category };
        let result: Result<PostResponse, ApiError> = self.tokens.api().post_json(POSTS_PATH, &request).await;

        let post = match result {
            Ok(PostResponse {
                success: true,
                post: Some(raw),
            }) => FeedPost::decode(&raw).map_err(|e| e.to_string()),
            Ok(_) => Err("invalid response from server".to_string()),
            Err(e) => Err(e.to_string()),
        };

        match post {
            Ok(post) => {
                tracing::info!("feed: created post {}", post.id);
                self.with_cache(|cache| cache.prepend(post.clone()));
                Some(post)
            }
            Err(e) => {
                tracing::error!("feed: failed to create post: {}", e);
                self.notifier.notify(Notice::error("Failed to create post."));
                None
            }
        }
    }

    /// Toggle the caller's like. The cache takes `liked`/`likes` from the response.
    pub async fn toggle_like(&self, post_id: &str) -> bool {
        if self.ensure_token("Please sign in to react to posts.").is_none() {
            return false;
        }

        let path = format!("{POSTS_PATH}/{post_id}/like");
        match self.tokens.api().post_empty::<Option<CounterResponse>>(&path).await {
            Ok(Some(response)) if response.success => {
                let liked = response.liked.as_ref().map(truthy).unwrap_or(false);
                self.with_cache(|cache| {
                    cache.update(post_id, |post| {
                        post.user_liked = liked;
                        if let Some(likes) = response.likes {
                            post.likes = likes;
                        }
                    });
                });
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::error!("feed: failed to react to post {}: {}", post_id, e);
                self.notifier.notify(Notice::error("Failed to react to post."));
                false
            }
        }
    }

    pub async fn reply(&self, post_id: &str, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if self
            .ensure_token("Please sign in to reply to posts.")
            .is_none()
        {
            return false;
        }

        let path = format!("{POSTS_PATH}/{post_id}/reply");
        let result: Result<Option<CounterResponse>, ApiError> = self
            .tokens
            .api()
            .post_json(&path, &ReplyRequest { content: text })
            .await;

        match result {
            Ok(Some(response)) if response.success => {
                self.with_cache(|cache| {
                    cache.update(post_id, |post| {
                        if let Some(replies) = response.replies {
                            post.replies = replies;
                        }
                    });
                });
                true
            }
            Ok(_) => {
                self.notifier
                    .notify(Notice::error("Failed to add reply. Please try again."));
                false
            }
            Err(e) => {
                tracing::error!("feed: failed to reply to post {}: {}", post_id, e);
                self.notifier.notify(reply_failure_notice(&e));
                false
            }
        }
    }

    /// Share a cached post. The cache takes `shares` from the response.
    pub async fn share(&self, post_id: &str) -> bool {
        if self.post(post_id).is_none() {
            return false;
        }
        if self
            .ensure_token("Authentication required to share posts")
            .is_none()
        {
            return false;
        }

        let path = format!("{POSTS_PATH}/{post_id}/share");
        match self.tokens.api().post_empty::<Option<CounterResponse>>(&path).await {
            Ok(Some(response)) if response.success => {
                self.with_cache(|cache| {
                    cache.update(post_id, |post| {
                        if let Some(shares) = response.shares {
                            post.shares = shares;
                        }
                    });
                });
                self.notifier.notify(Notice::success("Post shared!"));
                true
            }
            Ok(_) => {
                self.notifier
                    .notify(Notice::new(NoticeLevel::Warning, "Share", "Failed to share post"));
                false
            }
            Err(e) => {
                tracing::error!("feed: failed to share post {}: {}", post_id, e);
                self.notifier
                    .notify(Notice::new(NoticeLevel::Warning, "Share", "Failed to share post"));
                false
            }
        }
    }

    /// Fetch the replies of a post and cache them.
    pub async fn load_replies(&self, post_id: &str) -> Option<Vec<PostReply>> {
        self.ensure_token("Authentication required to view replies")?;

        let path = format!("{POSTS_PATH}/{post_id}/replies");
        match self.tokens.api().get_json::<Option<RepliesResponse>>(&path).await {
            Ok(Some(RepliesResponse {
                success: true,
                replies: Some(raw),
            })) => {
                let replies: Vec<PostReply> = raw
                    .iter()
                    .filter_map(|value| PostReply::decode(value).ok())
                    .collect();
                tracing::debug!("feed: loaded {} replies for post {}", replies.len(), post_id);
                if let Ok(mut cache) = self.cache.write() {
                    cache.set_replies(post_id, replies.clone());
                }
                Some(replies)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::error!("feed: failed to load replies for {}: {}", post_id, e);
                self.notifier.notify(Notice::new(
                    NoticeLevel::Warning,
                    "Replies",
                    "Failed to load replies",
                ));
                None
            }
        }
    }

    /// Delete a post; the cached copy goes only after the server confirms.
    pub async fn delete_post(&self, post_id: &str) -> bool {
        if self
            .ensure_token("Please sign in to delete posts.")
            .is_none()
        {
            return false;
        }

        let path = format!("{POSTS_PATH}/{post_id}");
        match self.tokens.api().delete(&path).await {
            Ok(()) => {
                self.with_cache(|cache| {
                    cache.remove(post_id);
                });
                true
            }
            Err(e) => {
                tracing::error!("feed: failed to delete post {}: {}", post_id, e);
                self.notifier.notify(Notice::error("Failed to delete post."));
                false
            }
        }
    }

    /// Refresh the feed when a live event says it changed.
    pub async fn apply_live_event(&self, event: &LiveEvent) -> bool {
        if !is_feed_event(event) {
            return false;
        }
        self.refresh(None).await
    }

    fn ensure_token(&self, message: &str) -> Option<String> {
        let token = self.tokens.resolve();
        if token.is_none() {
            tracing::warn!("feed: no token available");
            self.notifier.notify(Notice::auth_required(message));
        }
        token
    }

    /// Mutate the cache and persist the resulting post list.
    fn with_cache(&self, f: impl FnOnce(&mut FeedCache)) {
        let posts = match self.cache.write() {
            Ok(mut cache) => {
                f(&mut cache);
                cache.posts.clone()
            }
            Err(_) => {
                tracing::error!("feed: cache lock poisoned");
                return;
            }
        };
        storage::save(self.storage.as_ref(), KEY_COMMUNITY_POSTS, &posts);
    }
}

fn reply_failure_notice(err: &ApiError) -> Notice {
    match err.status() {
        Some(401) => Notice::auth_required("Your session has expired. Please sign in again."),
        Some(403) => Notice::new(
            NoticeLevel::Error,
            "Access Denied",
            "You do not have permission to reply to this post.",
        ),
        Some(404) => Notice::new(
            NoticeLevel::Error,
            "Post Not Found",
            "This post may have been deleted.",
        ),
        _ => Notice::error(format!("Failed to add reply: {err}")),
    }
}
