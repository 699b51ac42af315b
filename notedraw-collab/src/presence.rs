//! Presence registry: who is in the drawing and where their cursors are.
//!
//! The registry is a pure reducer over server messages. It never infers
//! membership on its own and never evicts idle peers; the server's last
//! word wins unconditionally.
//!
//! ```text
//! connected / user_joined ──► collaborators := server list
//! user_left               ──► cursors -= user_id; collaborators := residual list
//! cursor_move             ──► cursors[user_id] := position
//! reconnect gap           ──► clear()
//! ```

use std::collections::HashMap;

use crate::protocol::{Collaborator, CursorPosition, ServerMessage};

/// Client-local cache of session membership and cursor positions.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    /// Server-provided member list, in server order.
    collaborators: Vec<Collaborator>,
    /// Last cursor per user_id.
    cursors: HashMap<String, CursorPosition>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one inbound message.
    ///
    /// Returns `true` if presence changed. Messages unrelated to presence
    /// are ignored.
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::Connected { collaborators, .. }
            | ServerMessage::UserJoined { collaborators, .. } => {
                self.collaborators = collaborators.clone();
                true
            }

            ServerMessage::UserLeft { data, collaborators } => {
                self.cursors.remove(&data.user_id);
                self.collaborators = collaborators.clone();
                true
            }

            ServerMessage::CursorMove { data } => {
                self.cursors.insert(data.user_id.clone(), data.clone());
                true
            }

            _ => false,
        }
    }

    /// Drop all collaborators and cursors.
    pub fn clear(&mut self) {
        self.collaborators.clear();
        self.cursors.clear();
    }

    /// The member list exactly as the server last asserted it.
    pub fn collaborators(&self) -> &[Collaborator] {
        &self.collaborators
    }

    /// Members other than `self_id`.
    pub fn peers<'a>(&'a self, self_id: &'a str) -> impl Iterator<Item = &'a Collaborator> + 'a {
        self.collaborators.iter().filter(move |c| c.user_id != self_id)
    }

    pub fn collaborator(&self, user_id: &str) -> Option<&Collaborator> {
        self.collaborators.iter().find(|c| c.user_id == user_id)
    }

    pub fn cursors(&self) -> &HashMap<String, CursorPosition> {
        &self.cursors
    }

    pub fn cursor(&self, user_id: &str) -> Option<&CursorPosition> {
        self.cursors.get(user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.collaborators.is_empty() && self.cursors.is_empty()
    }
}
