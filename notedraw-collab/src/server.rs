//! Relay server: room-based fan-out of collaboration frames.
//!
//! Architecture:
//! ```text
//! Client A ──┐                                   ┌──► Client A
//!             ├── /collab/drawing/{id} ── Room ──┼──► Client B
//! Client B ──┘        (per drawing)              └──► Client C
//! ```
//!
//! The server is relay-only. It stamps the sender's identity on each frame
//! and forwards it; it keeps no drawing state beyond the member list and
//! their last cursor positions.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use uuid::Uuid;

use crate::broadcast::{Joined, Room, RoomManager};
use crate::config::COLLAB_PATH;
use crate::error::CollabError;
use crate::protocol::{
    ChatPosted, ClientMessage, Collaborator, CurrentUser, CursorPosition,
    SelectionChanged, ServerMessage, ShapeAdded, ShapeUpdated, ShapesDeleted, ShapesSynced,
};

/// Colors handed out to joining members.
pub const USER_COLORS: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7",
    "#DDA0DD", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E9",
];

/// Display name used when the handshake carries none.
pub const ANONYMOUS: &str = "Anonymous";

const ENV_ADDR: &str = "NOTEDRAW_RELAY_ADDR";
const ENV_MAX_PEERS: &str = "NOTEDRAW_RELAY_MAX_PEERS";
const ENV_BROADCAST_CAPACITY: &str = "NOTEDRAW_RELAY_BROADCAST_CAPACITY";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum members per drawing
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `NOTEDRAW_RELAY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(ENV_ADDR).filter(|a| !a.trim().is_empty()) {
            config.bind_addr = addr.trim().to_string();
        }
        if let Some(max) = parse_count(&lookup, ENV_MAX_PEERS) {
            config.max_peers_per_room = max;
        }
        if let Some(capacity) = parse_count(&lookup, ENV_BROADCAST_CAPACITY) {
            config.broadcast_capacity = capacity;
        }
        config
    }

    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    #[must_use]
    pub fn with_max_peers_per_room(mut self, max: usize) -> Self {
        self.max_peers_per_room = max.max(1);
        self
    }

    #[must_use]
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }
}

fn parse_count(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            log::warn!("Ignoring {key}={raw:?}: expected a positive integer");
            None
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// Drawing and display name requested by a connecting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTarget {
    /// Drawing id as it appears in the path (percent-encoded form).
    pub drawing_id: String,
    pub user_name: String,
}

/// Parse `/collab/drawing/{id}?user_name=...` from a request URI.
pub fn parse_join_target(uri: &str) -> Option<JoinTarget> {
    let base = Url::parse("ws://relay.invalid/").ok()?;
    let url = base.join(uri).ok()?;

    let mut segments = url.path_segments()?;
    for expected in COLLAB_PATH {
        if segments.next()? != expected {
            return None;
        }
    }
    let drawing_id = segments.next().filter(|s| !s.is_empty())?.to_string();
    if segments.any(|s| !s.is_empty()) {
        return None;
    }

    let user_name = url
        .query_pairs()
        .find(|(key, _)| key == "user_name")
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    Some(JoinTarget { drawing_id, user_name })
}

/// Fresh identity for a joining member: 16 hex chars and a palette color.
fn assign_identity(user_name: &str) -> Collaborator {
    let mut user_id = Uuid::new_v4().simple().to_string();
    user_id.truncate(16);
    let color = USER_COLORS[fastrand::usize(..USER_COLORS.len())];
    Collaborator::new(user_id, user_name, color)
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Unknown collaboration endpoint".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Stamp the sender's identity on a client frame and fan it out.
///
/// Returns a reply meant only for the sender (currently just `pong`).
pub async fn relay_client_frame(
    room: &Room,
    sender: &Collaborator,
    msg: ClientMessage,
) -> Result<Option<ServerMessage>, CollabError> {
    let me = Some(sender.user_id.as_str());
    let user_id = sender.user_id.clone();
    let user_name = sender.user_name.clone();

    let (out, exclude) = match msg {
        ClientMessage::CursorMove { x, y } => {
            room.update_cursor(&sender.user_id, x, y).await;
            let data = CursorPosition {
                user_id,
                user_name,
                user_color: sender.user_color.clone(),
                x,
                y,
            };
            (ServerMessage::CursorMove { data }, me)
        }
        ClientMessage::ShapeAdd { shape } => {
            let data = ShapeAdded { shape, user_id, user_name: Some(user_name) };
            (ServerMessage::ShapeAdd { data }, me)
        }
        ClientMessage::ShapeUpdate { shape_id, changes } => {
            let data = ShapeUpdated { shape_id, changes, user_id, user_name: Some(user_name) };
            (ServerMessage::ShapeUpdate { data }, me)
        }
        ClientMessage::ShapeDelete { shape_ids } => {
            let data = ShapesDeleted { shape_ids, user_id, user_name: Some(user_name) };
            (ServerMessage::ShapeDelete { data }, me)
        }
        ClientMessage::ShapesSync { shapes } => {
            let data = ShapesSynced { shapes, user_id, user_name: Some(user_name) };
            (ServerMessage::ShapesSync { data }, me)
        }
        ClientMessage::SelectionChange { selected_ids } => {
            let data = SelectionChanged {
                selected_ids,
                user_id,
                user_name,
                user_color: sender.user_color.clone(),
            };
            (ServerMessage::SelectionChange { data }, me)
        }
        // Chat is echoed to the sender too.
        ClientMessage::Chat { message } => {
            let data = ChatPosted {
                message,
                user_id,
                user_name,
                user_color: sender.user_color.clone(),
            };
            (ServerMessage::Chat { data }, None)
        }
        ClientMessage::Ping {} => return Ok(Some(ServerMessage::Pong {})),
    };

    room.broadcast(&out, exclude)?;
    Ok(None)
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    /// Rooms keyed by drawing id
    room_manager: Arc<RoomManager>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    /// Create a new relay server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let room_manager = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            room_manager,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), CollabError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let stats = self.stats.clone();
            let config = self.config.clone();
            let room_manager = self.room_manager.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, stats, config, room_manager).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection from handshake to departure.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
        room_manager: Arc<RoomManager>,
    ) -> Result<(), CollabError> {
        let mut target = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            match parse_join_target(&req.uri().to_string()) {
                Some(t) => {
                    target = Some(t);
                    Ok(resp)
                }
                None => {
                    log::debug!("Rejecting {addr}: unknown path {}", req.uri());
                    Err(not_found())
                }
            }
        })
        .await?;
        let Some(JoinTarget { drawing_id, user_name }) = target else {
            return Ok(());
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let me = assign_identity(&user_name);
        let Some(Joined { room, mut rx, members }) =
            room_manager.join(&drawing_id, me.clone(), config.max_peers_per_room).await
        else {
            log::warn!("Drawing {drawing_id} is full; rejecting {addr}");
            stats.write().await.rejected_connections += 1;
            let _ = ws_sender.send(Message::Close(None)).await;
            return Ok(());
        };

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
            s.active_rooms = room_manager.room_count().await;
        }
        log::info!("{} ({}) joined drawing {drawing_id} from {addr}", me.user_name, me.user_id);

        let welcome = ServerMessage::Connected {
            data: CurrentUser {
                user_id: me.user_id.clone(),
                user_name: me.user_name.clone(),
                user_color: me.user_color.clone(),
                drawing_id: Some(drawing_id.clone()),
            },
            collaborators: members,
        };
        let served = async {
            ws_sender.send(Message::Text(welcome.encode()?.into())).await?;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }
                            match ClientMessage::decode(text.as_str()) {
                                Ok(client_msg) => {
                                    if let Some(reply) = relay_client_frame(&room, &me, client_msg).await? {
                                        log::trace!("-> {} {}", me.user_id, reply.kind());
                                        ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Discarding malformed frame from {addr}: {e}");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection closed from {addr}");
                            break;
                        }
                        Some(Err(e)) => {
                            log::debug!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                    envelope = rx.recv() => match envelope {
                        Ok(envelope) => {
                            if envelope.is_for(&me.user_id) {
                                ws_sender.send(Message::Text(envelope.frame.to_string().into())).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Member {} lagged by {n} frames", me.user_id);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            Ok::<(), CollabError>(())
        }
        .await;

        // Cleanup runs whether the connection ended cleanly or not.
        if room_manager.leave(&drawing_id, &me.user_id).await {
            log::info!("Drawing {drawing_id} removed (empty)");
        }
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = room_manager.room_count().await;
        }
        log::info!("{} ({}) left drawing {drawing_id}", me.user_name, me.user_id);

        served
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get room manager reference.
    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.room_manager
    }
}
