//! Chat message cache.
//!
//! Messages are organized by chat id, and each chat tracks whether its
//! history has been loaded from the REST API.

use std::collections::HashMap;

use adhders_shared::{ChatMessage, ChatSummary};

/// Messages for a single chat.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChatMessages {
    /// All messages in this chat, sorted by created_at ascending.
    pub messages: Vec<ChatMessage>,
    /// Whether the chat history has been fetched from the REST API.
    pub is_loaded: bool,
}

impl ChatMessages {
    /// Add a message to the chat, maintaining sort order by created_at.
    /// Returns false if a message with the same ID already exists (deduplication).
    pub fn add_message(&mut self, msg: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }

        let pos = self
            .messages
            .binary_search_by(|m| m.created_at.cmp(&msg.created_at))
            .unwrap_or_else(|pos| pos);

        self.messages.insert(pos, msg);
        true
    }

    /// Set the full message history (from REST API fetch).
    /// Marks the chat as loaded. Pending local messages survive the reload.
    pub fn set_history(&mut self, mut messages: Vec<ChatMessage>) {
        let pending: Vec<ChatMessage> = self.messages.drain(..).filter(|m| m.pending).collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.messages = messages;
        for msg in pending {
            self.add_message(msg);
        }
        self.is_loaded = true;
    }

    /// Swap a placeholder for the server's version of the message.
    pub fn replace_message(&mut self, placeholder_id: &str, msg: ChatMessage) {
        self.remove_message(placeholder_id);
        self.add_message(msg);
    }

    pub fn remove_message(&mut self, id: &str) -> Option<ChatMessage> {
        let pos = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }
}

/// Chat list plus per-chat message history.
#[derive(Debug, Default, Clone)]
pub struct ChatCache {
    pub chats: Vec<ChatSummary>,
    channels: HashMap<String, ChatMessages>,
}

impl ChatCache {
    pub fn set_chats(&mut self, chats: Vec<ChatSummary>) {
        self.chats = chats;
    }

    /// Insert or replace a chat summary by id.
    pub fn upsert_chat(&mut self, chat: ChatSummary) {
        match self.chats.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => *existing = chat,
            None => self.chats.push(chat),
        }
    }

    pub fn chat(&self, chat_id: &str) -> Option<&ChatMessages> {
        self.channels.get(chat_id)
    }

    pub fn chat_mut(&mut self, chat_id: &str) -> &mut ChatMessages {
        self.channels.entry(chat_id.to_string()).or_default()
    }
}
