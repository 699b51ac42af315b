//! Session and endpoint configuration.

use std::time::Duration;

use url::Url;

use crate::chat::DEFAULT_CHAT_CAPACITY;
use crate::error::CollabError;

/// Path prefix of the collaboration endpoint.
pub const COLLAB_PATH: [&str; 2] = ["collab", "drawing"];

/// How long a connect attempt may take before it counts as failed.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the collaboration server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// `wss` when true, `ws` otherwise.
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            secure: false,
            host: host.into(),
            port,
        }
    }

    /// Derive the endpoint from the origin of the hosting page, so that an
    /// `https` page talks `wss` and an `http` page talks `ws`.
    pub fn from_origin(origin: &str) -> Result<Self, CollabError> {
        let url = Url::parse(origin).map_err(|_| CollabError::InvalidOrigin(origin.to_string()))?;
        let secure = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            _ => return Err(CollabError::InvalidOrigin(origin.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| CollabError::InvalidOrigin(origin.to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| CollabError::InvalidOrigin(origin.to_string()))?;
        Ok(Self { secure, host, port })
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// `{scheme}://{host}:{port}/collab/drawing/{drawing_id}?user_name={name}`
    pub fn endpoint_for(&self, drawing_id: &str, participant_name: &str) -> Result<Url, CollabError> {
        let mut url = Url::parse(&format!("{}://{}:{}/", self.scheme(), self.host, self.port))?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .clear()
            .extend(COLLAB_PATH)
            .push(drawing_id);
        url.query_pairs_mut().append_pair("user_name", participant_name);
        Ok(url)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 8000)
    }
}

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: EndpointConfig,
    /// Interval between `ping` frames while connected.
    pub heartbeat_interval: Duration,
    /// Fixed wait between a closed stream and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on one connect attempt, handshake included.
    pub connect_timeout: Duration,
    /// Number of chat messages retained locally.
    pub chat_capacity: usize,
    /// Capacity of the session event channel. Events beyond it are dropped.
    pub event_capacity: usize,
}

impl SessionConfig {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_chat_capacity(mut self, capacity: usize) -> Self {
        self.chat_capacity = capacity;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            chat_capacity: DEFAULT_CHAT_CAPACITY,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.chat_capacity, 100);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_session_config_builders() {
        let config = SessionConfig::new(EndpointConfig::new("collab.local", 9000))
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_reconnect_delay(Duration::from_millis(250))
            .with_connect_timeout(Duration::from_secs(2))
            .with_event_capacity(0);
        assert_eq!(config.endpoint.host, "collab.local");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn test_endpoint_for_plain() {
        let endpoint = EndpointConfig::new("localhost", 8000);
        let url = endpoint.endpoint_for("d1", "Alice").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/collab/drawing/d1?user_name=Alice");
    }

    #[test]
    fn test_endpoint_for_encodes_name() {
        let endpoint = EndpointConfig::new("localhost", 8000).with_secure(true);
        let url = endpoint.endpoint_for("d1", "Zoë & Bob").unwrap();
        assert_eq!(url.scheme(), "wss");
        let name = url
            .query_pairs()
            .find(|(k, _)| k == "user_name")
            .map(|(_, v)| v.into_owned());
        assert_eq!(name.as_deref(), Some("Zoë & Bob"));
        let query = url.query().unwrap();
        assert!(!query.contains(' '));
        assert!(!query.contains('&'));
    }

    #[test]
    fn test_endpoint_for_encodes_drawing_id() {
        let endpoint = EndpointConfig::new("localhost", 8000);
        let url = endpoint.endpoint_for("a/b", "x").unwrap();
        assert_eq!(url.path(), "/collab/drawing/a%2Fb");
    }

    #[test]
    fn test_from_origin_follows_page_scheme() {
        let secure = EndpointConfig::from_origin("https://notes.example.com").unwrap();
        assert!(secure.secure);
        assert_eq!(secure.host, "notes.example.com");
        assert_eq!(secure.port, 443);

        let plain = EndpointConfig::from_origin("http://localhost:5173").unwrap();
        assert!(!plain.secure);
        assert_eq!(plain.port, 5173);
    }

    #[test]
    fn test_from_origin_rejects_other_schemes() {
        assert!(EndpointConfig::from_origin("ftp://example.com").is_err());
        assert!(EndpointConfig::from_origin("not a url").is_err());
    }
}
