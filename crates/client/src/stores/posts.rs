//! Community feed cache: posts newest-first plus replies loaded per post.

use std::collections::HashMap;

use adhders_shared::{FeedPost, PostReply};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeedCache {
    /// Posts in server order; newly created posts go to the front.
    pub posts: Vec<FeedPost>,
    replies: HashMap<String, Vec<PostReply>>,
}

impl FeedCache {
    pub fn with_posts(posts: Vec<FeedPost>) -> Self {
        Self {
            posts,
            replies: HashMap::new(),
        }
    }

    /// Replace the post list with a fresh server listing.
    pub fn set_posts(&mut self, posts: Vec<FeedPost>) {
        self.replies.retain(|id, _| posts.iter().any(|p| &p.id == id));
        self.posts = posts;
    }

    /// Insert a post at the front, replacing any older copy with the same id.
    pub fn prepend(&mut self, post: FeedPost) {
        self.posts.retain(|p| p.id != post.id);
        self.posts.insert(0, post);
    }

    pub fn get(&self, id: &str) -> Option<&FeedPost> {
        self.posts.iter().find(|p| p.id == id)
    }

    /// Apply `f` to the cached post. Returns false if it is not cached.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut FeedPost)) -> bool {
        match self.posts.iter_mut().find(|p| p.id == id) {
            Some(post) => {
                f(post);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<FeedPost> {
        self.replies.remove(id);
        let pos = self.posts.iter().position(|p| p.id == id)?;
        Some(self.posts.remove(pos))
    }

    pub fn set_replies(&mut self, post_id: &str, replies: Vec<PostReply>) {
        self.replies.insert(post_id.to_string(), replies);
    }

    pub fn replies(&self, post_id: &str) -> Option<&[PostReply]> {
        self.replies.get(post_id).map(Vec::as_slice)
    }
}
