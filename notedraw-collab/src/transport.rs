//! Transport connection: one bidirectional text stream per session.
//!
//! ```text
//!   CollabSession::send_*()            reader task ──► inbound rx ──► session driver
//!          │                                ▲
//!          ▼                                │
//!   TransportConnection ──► outbound tx ──► writer task ──► WebSocket
//! ```
//!
//! A [`Connector`] opens a [`Link`]: a pair of channels bridged to the
//! network by background tasks. The session only ever sees the channels,
//! so tests can plug in an in-memory connector.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::CollabError;
use crate::protocol::ClientMessage;

/// An open stream, seen from the client side.
///
/// Dropping `outbound` closes the stream locally; `inbound` yielding `None`
/// means the stream closed (locally or remotely).
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self { outbound, inbound }
    }

    pub fn into_parts(self) -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        (self.outbound, self.inbound)
    }
}

/// Opens streams to a collaboration endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Result<Link, CollabError>>;
}

/// Connector backed by tokio-tungstenite.
///
/// An attempt that has not finished its handshake within `connect_timeout`
/// fails with [`CollabError::Connect`].
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Result<Link, CollabError>> {
        Box::pin(async move {
            let attempt = tokio_tungstenite::connect_async(endpoint.as_str());
            let (ws_stream, _) = match time::timeout(self.connect_timeout, attempt).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(CollabError::Connect(format!(
                        "{endpoint}: timed out after {:?}",
                        self.connect_timeout
                    )));
                }
            };
            let (mut ws_writer, mut ws_reader) = ws_stream.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

            // Writer task: ends when the session drops its sender.
            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                        log::debug!("WebSocket write failed: {e}");
                        break;
                    }
                }
                let _ = ws_writer.close().await;
            });

            // Reader task: ends on close, error, or when the session stops listening.
            let url = endpoint.to_string();
            tokio::spawn(async move {
                while let Some(msg) = ws_reader.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if in_tx.send(text.as_str().to_owned()).is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Err(e) => {
                            log::debug!("WebSocket read from {url} failed: {e}");
                            break;
                        }
                        _ => {}
                    }
                }
                log::debug!("WebSocket stream to {url} ended");
            });

            Ok(Link::new(out_tx, in_rx))
        })
    }
}

/// Outbound half of the current stream.
///
/// `send` is fire-and-forget: it silently drops the message unless the
/// stream is open, and never reports delivery.
#[derive(Debug, Default)]
pub struct TransportConnection {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl TransportConnection {
    /// A connection with no stream behind it.
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn open(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Returns `true` if the frame was handed to the stream.
    pub fn send(&self, msg: &ClientMessage) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            log::trace!("Dropping {msg:?}: not connected");
            return false;
        };
        match msg.encode() {
            Ok(frame) => tx.send(frame).is_ok(),
            Err(e) => {
                log::warn!("Dropping outbound message: {e}");
                false
            }
        }
    }

    /// Tear down the stream. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            log::debug!("Transport closed");
        }
    }
}
