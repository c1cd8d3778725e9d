//! Client configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for an [`AgentClient`](crate::AgentClient).
///
/// `node_url` and `api_key` are required.  An empty `agent_did` asks the
/// node to mint an ephemeral DID at join time.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket URL of the Plexus node.  `http`/`https` schemes are
    /// normalized to `ws`/`wss`.
    pub node_url: String,

    /// Authentication key for the node.
    pub api_key: String,

    /// DID identity of this agent; empty for node-assigned.
    pub agent_did: String,

    /// Interval between channel heartbeats.
    pub heartbeat_interval: Duration,

    /// How long to wait for the node's join reply during connect.
    pub join_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_url: String::new(),
            api_key: String::new(),
            agent_did: String::new(),
            heartbeat_interval: Duration::from_secs(30),
            join_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn new(node_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            node_url: node_url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Set the agent's DID identity.
    pub fn with_agent_did(mut self, did: impl Into<String>) -> Self {
        self.agent_did = did.into();
        self
    }

    /// Override the heartbeat interval (default 30s).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Override the join reply timeout (default 10s).
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Build a config from `PLEXUS_NODE_URL`, `PLEXUS_API_KEY`, and
    /// `PLEXUS_AGENT_DID`.  Unset variables leave the field empty;
    /// validation happens when the client is created.
    pub fn from_env() -> Self {
        fn env(key: &str) -> String {
            std::env::var(key).unwrap_or_default()
        }
        Self {
            node_url: env("PLEXUS_NODE_URL"),
            api_key: env("PLEXUS_API_KEY"),
            agent_did: env("PLEXUS_AGENT_DID"),
            ..Self::default()
        }
    }

    /// Validate required fields and normalize HTTP(S) URLs to the
    /// WebSocket scheme.
    pub(crate) fn resolve(mut self) -> Result<Self> {
        if self.node_url.is_empty() {
            return Err(Error::Config(
                "node_url is required (set in Config or PLEXUS_NODE_URL)".into(),
            ));
        }
        if let Some(rest) = self.node_url.strip_prefix("https://") {
            self.node_url = format!("wss://{rest}");
        } else if let Some(rest) = self.node_url.strip_prefix("http://") {
            self.node_url = format!("ws://{rest}");
        }
        if self.api_key.is_empty() {
            return Err(Error::Config(
                "api_key is required (set in Config or PLEXUS_API_KEY)".into(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_accepts_ws_url() {
        let cfg = Config::new("ws://localhost:4000/plugin_socket/websocket", "key")
            .resolve()
            .unwrap();
        assert_eq!(cfg.node_url, "ws://localhost:4000/plugin_socket/websocket");
    }

    #[test]
    fn resolve_normalizes_http() {
        let cfg = Config::new("http://node.example/plugin_socket", "key")
            .resolve()
            .unwrap();
        assert_eq!(cfg.node_url, "ws://node.example/plugin_socket");
    }

    #[test]
    fn resolve_normalizes_https() {
        let cfg = Config::new("https://node.example/plugin_socket", "key")
            .resolve()
            .unwrap();
        assert_eq!(cfg.node_url, "wss://node.example/plugin_socket");
    }

    #[test]
    fn resolve_requires_node_url() {
        let err = Config::new("", "key").resolve().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("node_url"));
    }

    #[test]
    fn resolve_requires_api_key() {
        let err = Config::new("ws://localhost:4000", "").resolve().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn default_intervals() {
        let cfg = Config::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.join_timeout, Duration::from_secs(10));
    }
}
