//! JSON wire protocol for drawing collaboration.
//!
//! Every frame is a JSON text message discriminated by a `type` field:
//! ```text
//! client → server   {"type": "shape_update", "shape_id": "s1", "changes": {...}}
//! server → client   {"type": "shape_update", "data": {"shape_id": "s1", "changes": {...}, "user_id": "..."}}
//! server → client   {"type": "user_left", "data": {"user_id": "..."}, "collaborators": [...]}
//! ```
//!
//! Shape payloads are opaque [`serde_json::Value`]s; this layer never looks
//! inside them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CollabError;

/// A participant in a drawing session, as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collaborator {
    pub user_id: String,
    /// Display name.
    #[serde(default)]
    pub user_name: String,
    /// Color tag used to tint the participant's cursor (e.g. `#FF6B6B`).
    #[serde(default)]
    pub user_color: String,
    #[serde(default)]
    pub cursor_x: Option<f64>,
    #[serde(default)]
    pub cursor_y: Option<f64>,
}

impl Collaborator {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        user_color: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_color: user_color.into(),
            cursor_x: None,
            cursor_y: None,
        }
    }
}

/// Latest known cursor of a remote participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_color: String,
    pub x: f64,
    pub y: f64,
}

/// Identity the server assigned to this client, sent in `connected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawing_id: Option<String>,
}

/// Member named by a `user_joined` / `user_left` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberNotice {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeAdded {
    pub shape: Value,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeUpdated {
    pub shape_id: String,
    pub changes: Value,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapesDeleted {
    pub shape_ids: Vec<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapesSynced {
    pub shapes: Vec<Value>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionChanged {
    pub selected_ids: Vec<String>,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPosted {
    #[serde(alias = "text")]
    pub message: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_color: String,
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply: our own identity plus the full member list.
    Connected {
        data: CurrentUser,
        collaborators: Vec<Collaborator>,
    },
    UserJoined {
        data: MemberNotice,
        collaborators: Vec<Collaborator>,
    },
    UserLeft {
        data: MemberNotice,
        collaborators: Vec<Collaborator>,
    },
    CursorMove { data: CursorPosition },
    ShapeAdd { data: ShapeAdded },
    ShapeUpdate { data: ShapeUpdated },
    ShapeDelete { data: ShapesDeleted },
    ShapesSync { data: ShapesSynced },
    SelectionChange { data: SelectionChanged },
    Chat { data: ChatPosted },
    Pong {},
}

impl ServerMessage {
    /// Parse one inbound text frame.
    pub fn decode(frame: &str) -> Result<Self, CollabError> {
        serde_json::from_str(frame).map_err(CollabError::Decode)
    }

    /// Serialize to a text frame (used by the relay server).
    pub fn encode(&self) -> Result<String, CollabError> {
        serde_json::to_string(self).map_err(CollabError::Encode)
    }

    /// Wire name of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::CursorMove { .. } => "cursor_move",
            Self::ShapeAdd { .. } => "shape_add",
            Self::ShapeUpdate { .. } => "shape_update",
            Self::ShapeDelete { .. } => "shape_delete",
            Self::ShapesSync { .. } => "shapes_sync",
            Self::SelectionChange { .. } => "selection_change",
            Self::Chat { .. } => "chat",
            Self::Pong {} => "pong",
        }
    }
}

/// Frames sent by a client. The server stamps the sender identity on relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CursorMove {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    ShapeAdd {
        #[serde(default)]
        shape: Value,
    },
    ShapeUpdate {
        #[serde(default)]
        shape_id: String,
        #[serde(default)]
        changes: Value,
    },
    ShapeDelete {
        #[serde(default)]
        shape_ids: Vec<String>,
    },
    ShapesSync {
        #[serde(default)]
        shapes: Vec<Value>,
    },
    SelectionChange {
        #[serde(default)]
        selected_ids: Vec<String>,
    },
    Chat {
        #[serde(default, alias = "text")]
        message: String,
    },
    Ping {},
}

impl ClientMessage {
    pub fn ping() -> Self {
        Self::Ping {}
    }

    pub fn encode(&self) -> Result<String, CollabError> {
        serde_json::to_string(self).map_err(CollabError::Encode)
    }

    pub fn decode(frame: &str) -> Result<Self, CollabError> {
        serde_json::from_str(frame).map_err(CollabError::Decode)
    }
}
