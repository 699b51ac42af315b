//! Operation relay: routes decoded inbound messages to local state and to
//! the application.
//!
//! ```text
//! ServerMessage ──► absorb()   presence / chat / current user (under the state lock)
//!               └─► dispatch() ShapeHandler hook for shape operations (lock released)
//! ```
//!
//! Each message reaches at most one hook. Nothing is merged, reordered or
//! acknowledged: if two peers update the same shape, whichever update is
//! processed last here is the one the canvas ends up with.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::chat::ChatMessage;
use crate::protocol::{CurrentUser, SelectionChanged, ServerMessage};
use crate::session::SessionState;

/// Hooks the canvas/document layer implements to apply remote edits.
///
/// All methods default to no-ops. They run on the session driver task, so
/// they should hand work off quickly rather than block.
pub trait ShapeHandler: Send + Sync + 'static {
    fn on_shape_add(&self, _shape: &Value, _user_id: &str) {}

    fn on_shape_update(&self, _shape_id: &str, _changes: &Value, _user_id: &str) {}

    fn on_shape_delete(&self, _shape_ids: &[String], _user_id: &str) {}

    /// Full replace of the shape set, typically after a reconnect.
    fn on_shapes_sync(&self, _shapes: &[Value], _user_id: &str) {}
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Stream opened.
    Connected,
    /// Server assigned our identity.
    Welcome(CurrentUser),
    /// Stream closed or session disabled.
    Disconnected,
    /// Collaborators or cursors changed.
    PresenceChanged,
    ChatReceived(ChatMessage),
    SelectionChanged(SelectionChanged),
}

/// Non-blocking event sender. Events are dropped when the consumer lags.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!("Event channel full, dropping {event:?}");
            }
            // Nobody is listening; that is allowed.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Inbound half of the relay.
pub struct InboundRelay {
    handler: Option<Arc<dyn ShapeHandler>>,
    events: EventSink,
}

impl InboundRelay {
    pub fn new(handler: Option<Arc<dyn ShapeHandler>>, events: EventSink) -> Self {
        Self { handler, events }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Fully process one message: local state first, then the external hook.
    pub(crate) async fn route(&self, msg: ServerMessage, state: &RwLock<SessionState>) {
        let notifications = {
            let mut st = state.write().await;
            absorb(&mut st, &msg)
        };
        for event in notifications {
            self.events.emit(event);
        }
        self.dispatch(&msg);
    }

    /// Invoke the shape hook for `msg`, if it is a shape operation.
    ///
    /// Returns `true` if a hook was called.
    pub fn dispatch(&self, msg: &ServerMessage) -> bool {
        let Some(handler) = self.handler.as_deref() else {
            return false;
        };
        match msg {
            ServerMessage::ShapeAdd { data } => {
                handler.on_shape_add(&data.shape, &data.user_id);
            }
            ServerMessage::ShapeUpdate { data } => {
                handler.on_shape_update(&data.shape_id, &data.changes, &data.user_id);
            }
            ServerMessage::ShapeDelete { data } => {
                handler.on_shape_delete(&data.shape_ids, &data.user_id);
            }
            ServerMessage::ShapesSync { data } => {
                log::debug!("Shape snapshot of {} shapes from {}", data.shapes.len(), data.user_id);
                handler.on_shapes_sync(&data.shapes, &data.user_id);
            }
            _ => return false,
        }
        true
    }
}

/// Apply a message to session-local state and collect UI notifications.
pub(crate) fn absorb(state: &mut SessionState, msg: &ServerMessage) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    match msg {
        ServerMessage::Connected { data, .. } => {
            log::info!("Joined drawing as {} ({})", data.user_name, data.user_id);
            state.current_user = Some(data.clone());
            events.push(SessionEvent::Welcome(data.clone()));
        }
        ServerMessage::UserJoined { data, .. } => {
            log::debug!("{} joined", data.user_id);
        }
        ServerMessage::UserLeft { data, .. } => {
            log::debug!("{} left", data.user_id);
        }
        ServerMessage::Chat { data } => {
            let line = ChatMessage::received(data);
            state.chat.push(line.clone());
            events.push(SessionEvent::ChatReceived(line));
        }
        ServerMessage::SelectionChange { data } => {
            events.push(SessionEvent::SelectionChanged(data.clone()));
        }
        ServerMessage::Pong {} => crate::liveness::observe_pong(),
        _ => {}
    }

    if state.presence.apply(msg) {
        events.push(SessionEvent::PresenceChanged);
    }

    events
}
