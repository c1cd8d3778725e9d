//! Internal seam between the session core and the channel transport.
//!
//! The current implementation is the WebSocket/Phoenix channel
//! (`channel.rs`); the trait keeps the session core testable against a
//! scripted transport and leaves room for other carriers.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub(crate) trait Transport: Send + Sync {
    /// Write a fire-and-forget frame on the agent channel.  `payload` is
    /// already-encoded JSON.
    async fn send(&self, event: &str, payload: String) -> Result<()>;

    /// Write a frame and wait for the node's reply to it; a rejection
    /// surfaces as a connection error.
    async fn send_with_reply(&self, event: &str, payload: String, timeout: Duration)
        -> Result<()>;

    /// Acknowledge message ids to the node.
    async fn send_ack(&self, ids: &[String]) -> Result<()>;

    /// Tear down the connection.  Idempotent.
    async fn close(&self);

    /// DID assigned by the node on join, for agents that connected without
    /// a configured identity.
    fn assigned_did(&self) -> Option<String>;
}
