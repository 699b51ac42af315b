//! Bounded in-memory chat history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::ChatPosted;

/// Default number of retained chat messages.
pub const DEFAULT_CHAT_CAPACITY: usize = 100;

/// A chat line received from the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Stamp an inbound chat payload with the local receive time.
    pub fn received(posted: &ChatPosted) -> Self {
        Self {
            user_id: posted.user_id.clone(),
            user_name: posted.user_name.clone(),
            user_color: posted.user_color.clone(),
            text: posted.message.clone(),
            received_at: Utc::now(),
        }
    }
}

/// Fixed-size ring of the most recent chat messages. Oldest entries are
/// evicted first.
#[derive(Debug, Clone)]
pub struct ChatLog {
    entries: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message, returning the evicted one if the ring was full.
    pub fn push(&mut self, msg: ChatMessage) -> Option<ChatMessage> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(msg);
        evicted
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(DEFAULT_CHAT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> ChatMessage {
        ChatMessage::received(&ChatPosted {
            message: format!("message {n}"),
            user_id: "bob".into(),
            user_name: "Bob".into(),
            user_color: "#BB8FCE".into(),
        })
    }

    #[test]
    fn test_chat_log_default_capacity() {
        let log = ChatLog::default();
        assert_eq!(log.capacity(), 100);
        assert!(log.is_empty());
    }

    #[test]
    fn test_chat_log_evicts_oldest_at_101() {
        let mut log = ChatLog::default();
        for n in 0..100 {
            assert!(log.push(line(n)).is_none());
        }
        assert_eq!(log.len(), 100);

        let evicted = log.push(line(100)).unwrap();
        assert_eq!(evicted.text, "message 0");
        assert_eq!(log.len(), 100);
        assert_eq!(log.iter().next().unwrap().text, "message 1");
        assert_eq!(log.iter().last().unwrap().text, "message 100");
    }

    #[test]
    fn test_chat_log_never_exceeds_capacity() {
        let mut log = ChatLog::new(5);
        for n in 0..37 {
            log.push(line(n));
            assert!(log.len() <= 5);
        }
        let texts: Vec<String> = log.iter().map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["message 32", "message 33", "message 34", "message 35", "message 36"]);
    }

    #[test]
    fn test_chat_log_zero_capacity_clamped() {
        let mut log = ChatLog::new(0);
        log.push(line(1));
        log.push(line(2));
        assert_eq!(log.len(), 1);
        assert_eq!(log.to_vec()[0].text, "message 2");
    }

    #[test]
    fn test_received_copies_payload() {
        let msg = line(7);
        assert_eq!(msg.user_id, "bob");
        assert_eq!(msg.user_color, "#BB8FCE");
        assert_eq!(msg.text, "message 7");
    }
}
