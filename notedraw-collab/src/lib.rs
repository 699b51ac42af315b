//! # notedraw-collab: real-time collaboration layer for shared drawings
//!
//! Lets several participants edit one drawing at the same time: presence,
//! cursor broadcast, shape operation relay, chat, heartbeat and automatic
//! reconnection. Shapes are opaque JSON; the canvas owns their meaning.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON over WebSocket   ┌──────────────┐
//! │ CollabSession│ ◄─────────────────────► │ RelayServer  │
//! │ (per user)   │  /collab/drawing/{id}   │ (fan-out)    │
//! └──────┬───────┘                         └──────┬───────┘
//!        │                                        │
//!        ▼                                        ▼
//! ┌──────────────┐                         ┌──────────────┐
//! │ Controller   │ reconnect + heartbeat   │ Room         │
//! │ (driver task)│                         │ (per drawing)│
//! └──────┬───────┘                         └──────────────┘
//!        │ ServerMessage
//!        ▼
//! ┌──────────────┐     ┌──────────────┐
//! │ InboundRelay │ ──► │ ShapeHandler │ (canvas / document layer)
//! └──────┬───────┘     └──────────────┘
//!        ▼
//!  PresenceRegistry, ChatLog, SessionEvent
//! ```
//!
//! ## Delivery model
//!
//! Sends are fire-and-forget and dropped while disconnected. There is no
//! acknowledgement, retry or cross-sender ordering: the last message
//! processed locally wins. The authoritative document is reconciled from
//! storage outside this crate.
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages (`ServerMessage`, `ClientMessage`)
//! - [`transport`]: connectors and the fire-and-forget outbound stream
//! - [`presence`]: collaborator and cursor registry
//! - [`chat`]: bounded chat history
//! - [`liveness`]: heartbeat pings
//! - [`reconnect`]: connection state machine and session driver
//! - [`relay`]: inbound routing, shape hooks, session events
//! - [`session`]: the `CollabSession` handle
//! - [`broadcast`] / [`server`]: minimal relay server

pub mod broadcast;
pub mod chat;
pub mod config;
pub mod error;
pub mod liveness;
pub mod presence;
pub mod protocol;
pub mod reconnect;
pub mod relay;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use broadcast::{Joined, Room, RoomManager, RoomStats};
pub use chat::{ChatLog, ChatMessage};
pub use config::{EndpointConfig, SessionConfig};
pub use error::CollabError;
pub use presence::PresenceRegistry;
pub use protocol::{ClientMessage, Collaborator, CurrentUser, CursorPosition, ServerMessage};
pub use reconnect::{ConnectionState, LinkPhase};
pub use relay::{SessionEvent, ShapeHandler};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use session::CollabSession;
pub use transport::{Connector, Link, TransportConnection, WebSocketConnector};
