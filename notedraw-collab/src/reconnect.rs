//! Reconnection controller: drives one session's connection lifecycle.
//!
//! ```text
//!        enable()
//!   Idle ───────► Connecting ──ok──► Connected ──stream closed──┐
//!                   ▲   │                                       │
//!                   │   └──connect failed──────────────┐        │
//!                   │                                  ▼        ▼
//!                   └────────── reconnect_delay ───── Waiting ◄─┘
//!
//!   disable() / drop, from any phase ──► Idle (terminal until re-enabled)
//! ```
//!
//! The controller runs as a single tokio task. It owns the heartbeat and the
//! reconnect timer, so tearing the task down cancels both. Entering
//! `Waiting` clears presence; the next `connected` frame rebuilds it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tokio::time;
use url::Url;

use crate::liveness::Heartbeat;
use crate::protocol::ServerMessage;
use crate::relay::{InboundRelay, SessionEvent};
use crate::session::SessionState;
use crate::transport::{Connector, Link, TransportConnection};

/// Phase of the reconnection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// Not enabled.
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Stream closed; waiting out the reconnect delay.
    Waiting,
}

impl LinkPhase {
    pub fn connection_state(self) -> ConnectionState {
        match self {
            LinkPhase::Idle | LinkPhase::Waiting => ConnectionState::Disconnected,
            LinkPhase::Connecting => ConnectionState::Connecting,
            LinkPhase::Connected => ConnectionState::Connected,
        }
    }
}

/// Connection status as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn is_connecting(self) -> bool {
        self == ConnectionState::Connecting
    }
}

/// How a served stream ended.
enum StreamEnd {
    Closed,
    Shutdown,
}

/// Timer settings for one controller.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

/// Session driver task.
pub(crate) struct Controller {
    connector: Arc<dyn Connector>,
    endpoint: Url,
    timing: Timing,
    state: Arc<RwLock<SessionState>>,
    relay: InboundRelay,
}

impl Controller {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        endpoint: Url,
        timing: Timing,
        state: Arc<RwLock<SessionState>>,
        relay: InboundRelay,
    ) -> Self {
        Self {
            connector,
            endpoint,
            timing,
            state,
            relay,
        }
    }

    /// Loop until `shutdown` fires (or its sender is dropped).
    pub(crate) async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        log::info!("Collaboration enabled for {}", self.endpoint);

        loop {
            self.set_phase(LinkPhase::Connecting).await;

            let attempt = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = self.connector.connect(&self.endpoint) => result,
            };

            match attempt {
                Ok(link) => {
                    if let StreamEnd::Shutdown = self.serve(link, &mut shutdown).await {
                        break;
                    }
                    log::info!("Connection to {} closed", self.endpoint);
                }
                Err(e) => {
                    log::warn!("Connecting to {} failed: {e}", self.endpoint);
                }
            }

            self.enter_waiting().await;

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = time::sleep(self.timing.reconnect_delay) => {}
            }
            log::debug!("Reconnecting to {}", self.endpoint);
        }

        self.teardown().await;
        log::info!("Collaboration disabled for {}", self.endpoint);
    }

    /// Pump one open stream until it closes or the session shuts down.
    async fn serve(&self, link: Link, shutdown: &mut oneshot::Receiver<()>) -> StreamEnd {
        let (outbound, mut inbound) = link.into_parts();
        {
            let mut st = self.state.write().await;
            st.transport = TransportConnection::open(outbound);
            st.phase = LinkPhase::Connected;
        }
        log::info!("Connected to {}", self.endpoint);
        self.relay.events().emit(SessionEvent::Connected);

        let mut heartbeat = Heartbeat::start(self.timing.heartbeat_interval);

        let end = loop {
            tokio::select! {
                biased;
                _ = &mut *shutdown => break StreamEnd::Shutdown,
                // Ahead of inbound so a busy room cannot hold pings back.
                ping = heartbeat.tick() => {
                    self.state.read().await.transport.send(&ping);
                }
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame).await,
                    None => break StreamEnd::Closed,
                },
            }
        };

        self.state.write().await.transport.close();
        log::debug!("Sent {} pings on this connection", heartbeat.pings_sent());
        end
    }

    async fn handle_frame(&self, frame: &str) {
        match ServerMessage::decode(frame) {
            Ok(msg) => {
                log::trace!("<- {}", msg.kind());
                self.relay.route(msg, &self.state).await;
            }
            Err(e) => {
                log::warn!("Discarding malformed frame: {e}");
            }
        }
    }

    async fn set_phase(&self, phase: LinkPhase) {
        self.state.write().await.phase = phase;
    }

    /// Stream gone: forget everyone until the server tells us again.
    async fn enter_waiting(&self) {
        let (was_connected, had_presence) = {
            let mut st = self.state.write().await;
            let was_connected = st.phase == LinkPhase::Connected;
            let had_presence = !st.presence.is_empty();
            st.phase = LinkPhase::Waiting;
            st.presence.clear();
            st.current_user = None;
            (was_connected, had_presence)
        };
        if had_presence {
            self.relay.events().emit(SessionEvent::PresenceChanged);
        }
        if was_connected {
            self.relay.events().emit(SessionEvent::Disconnected);
        }
    }

    async fn teardown(&self) {
        let was_connected = {
            let mut st = self.state.write().await;
            let was_connected = st.phase == LinkPhase::Connected;
            st.transport.close();
            st.phase = LinkPhase::Idle;
            st.presence.clear();
            st.current_user = None;
            st.chat.clear();
            was_connected
        };
        if was_connected {
            self.relay.events().emit(SessionEvent::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_maps_to_exactly_one_state() {
        assert_eq!(LinkPhase::Idle.connection_state(), ConnectionState::Disconnected);
        assert_eq!(LinkPhase::Waiting.connection_state(), ConnectionState::Disconnected);
        assert_eq!(LinkPhase::Connecting.connection_state(), ConnectionState::Connecting);
        assert_eq!(LinkPhase::Connected.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_connection_state_flags() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ] {
            assert!(!(state.is_connected() && state.is_connecting()));
        }
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Disconnected.is_connecting());
    }

    #[test]
    fn test_default_phase_is_idle() {
        assert_eq!(LinkPhase::default(), LinkPhase::Idle);
    }
}
