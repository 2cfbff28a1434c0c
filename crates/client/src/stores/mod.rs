//! Local caches mirrored from the server.

pub mod messages;
pub mod posts;

pub use messages::{ChatCache, ChatMessages};
pub use posts::FeedCache;
