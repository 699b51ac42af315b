//! Collaboration session handle.
//!
//! Provides:
//! - Session lifecycle (enable for a drawing, disable)
//! - Outbound operations (cursor, shapes, selection, chat)
//! - Read access to presence, chat history and connection state
//!
//! Outbound calls go straight into the current transport. While the session
//! is not connected they are dropped: nothing is queued or replayed.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::chat::{ChatLog, ChatMessage};
use crate::config::SessionConfig;
use crate::error::CollabError;
use crate::presence::PresenceRegistry;
use crate::protocol::{ClientMessage, Collaborator, CurrentUser, CursorPosition};
use crate::reconnect::{ConnectionState, Controller, LinkPhase, Timing};
use crate::relay::{EventSink, InboundRelay, SessionEvent, ShapeHandler};
use crate::transport::{Connector, TransportConnection, WebSocketConnector};

/// State shared between the handle and its driver task.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub phase: LinkPhase,
    pub presence: PresenceRegistry,
    pub chat: ChatLog,
    pub current_user: Option<CurrentUser>,
    pub transport: TransportConnection,
}

impl SessionState {
    pub(crate) fn new(chat_capacity: usize) -> Self {
        Self {
            phase: LinkPhase::Idle,
            presence: PresenceRegistry::new(),
            chat: ChatLog::new(chat_capacity),
            current_user: None,
            transport: TransportConnection::closed(),
        }
    }
}

/// A running driver for one drawing.
struct ActiveSession {
    drawing_id: String,
    participant_name: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// One participant's collaboration context.
///
/// Created idle; [`enable`](Self::enable) starts connecting to a drawing and
/// keeps reconnecting until [`disable`](Self::disable) is called or the
/// session is dropped.
pub struct CollabSession {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: Arc<RwLock<SessionState>>,
    shape_handler: Option<Arc<dyn ShapeHandler>>,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    active: Option<ActiveSession>,
}

impl CollabSession {
    /// Create a session that connects over WebSocket.
    pub fn new(config: SessionConfig) -> Self {
        let connector = WebSocketConnector::new(config.connect_timeout);
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a session with a custom transport.
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let state = Arc::new(RwLock::new(SessionState::new(config.chat_capacity)));
        Self {
            config,
            connector,
            state,
            shape_handler: None,
            event_tx,
            event_rx: Some(event_rx),
            active: None,
        }
    }

    /// Register the canvas hooks for remote shape operations.
    ///
    /// Applies from the next [`enable`](Self::enable).
    #[must_use]
    pub fn with_shape_handler(mut self, handler: Arc<dyn ShapeHandler>) -> Self {
        self.shape_handler = Some(handler);
        self
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Start collaborating on `drawing_id` as `participant_name`.
    ///
    /// Any previous drawing is disabled first. An empty `drawing_id` only
    /// disables.
    pub async fn enable(&mut self, drawing_id: &str, participant_name: &str) -> Result<(), CollabError> {
        self.disable().await;
        if drawing_id.is_empty() {
            return Ok(());
        }

        let endpoint = self.config.endpoint.endpoint_for(drawing_id, participant_name)?;
        let relay = InboundRelay::new(self.shape_handler.clone(), EventSink::new(self.event_tx.clone()));
        let controller = Controller::new(
            self.connector.clone(),
            endpoint,
            Timing {
                heartbeat_interval: self.config.heartbeat_interval,
                reconnect_delay: self.config.reconnect_delay,
            },
            self.state.clone(),
            relay,
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(controller.run(shutdown_rx));

        self.active = Some(ActiveSession {
            drawing_id: drawing_id.to_string(),
            participant_name: participant_name.to_string(),
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Stop collaborating: cancel timers, close the stream, clear presence.
    ///
    /// Returns once the driver has finished tearing down. No-op when idle.
    pub async fn disable(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.shutdown.send(());
        if let Err(e) = active.task.await {
            log::error!("Session driver for drawing {} failed: {e}", active.drawing_id);
            // The driver died mid-flight; make sure nothing stale survives.
            let mut st = self.state.write().await;
            st.transport.close();
            st.phase = LinkPhase::Idle;
            st.presence.clear();
            st.current_user = None;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    pub fn drawing_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.drawing_id.as_str())
    }

    pub fn participant_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.participant_name.as_str())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ─── State ───────────────────────────────────────────────────────

    pub async fn phase(&self) -> LinkPhase {
        self.state.read().await.phase
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.phase().await.connection_state()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_state().await.is_connected()
    }

    pub async fn is_connecting(&self) -> bool {
        self.connection_state().await.is_connecting()
    }

    /// Member list exactly as last asserted by the server.
    pub async fn collaborators(&self) -> Vec<Collaborator> {
        self.state.read().await.presence.collaborators().to_vec()
    }

    /// Members other than ourselves.
    pub async fn peers(&self) -> Vec<Collaborator> {
        let st = self.state.read().await;
        match &st.current_user {
            Some(me) => st.presence.peers(&me.user_id).cloned().collect(),
            None => st.presence.collaborators().to_vec(),
        }
    }

    pub async fn cursors(&self) -> HashMap<String, CursorPosition> {
        self.state.read().await.presence.cursors().clone()
    }

    pub async fn current_user(&self) -> Option<CurrentUser> {
        self.state.read().await.current_user.clone()
    }

    /// Oldest first, at most `chat_capacity` entries.
    pub async fn chat_history(&self) -> Vec<ChatMessage> {
        self.state.read().await.chat.to_vec()
    }

    // ─── Outbound operations ─────────────────────────────────────────

    pub async fn send_cursor_move(&self, x: f64, y: f64) {
        self.send(ClientMessage::CursorMove { x, y }).await;
    }

    pub async fn send_shape_add(&self, shape: Value) {
        self.send(ClientMessage::ShapeAdd { shape }).await;
    }

    pub async fn send_shape_update(&self, shape_id: impl Into<String>, changes: Value) {
        self.send(ClientMessage::ShapeUpdate {
            shape_id: shape_id.into(),
            changes,
        })
        .await;
    }

    pub async fn send_shape_delete(&self, shape_ids: Vec<String>) {
        self.send(ClientMessage::ShapeDelete { shape_ids }).await;
    }

    pub async fn send_shapes_sync(&self, shapes: Vec<Value>) {
        self.send(ClientMessage::ShapesSync { shapes }).await;
    }

    pub async fn send_selection_change(&self, selected_ids: Vec<String>) {
        self.send(ClientMessage::SelectionChange { selected_ids }).await;
    }

    /// The server echoes chat back to the sender, so the line shows up in
    /// [`chat_history`](Self::chat_history) only once it round-trips.
    pub async fn send_chat_message(&self, text: impl Into<String>) {
        self.send(ClientMessage::Chat { message: text.into() }).await;
    }

    async fn send(&self, msg: ClientMessage) {
        self.state.read().await.transport.send(&msg);
    }
}

impl Drop for CollabSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            // The driver tears itself down; nothing to await here.
            let _ = active.shutdown.send(());
        }
    }
}
