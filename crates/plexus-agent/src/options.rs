//! Per-call options for handler registration, send, and request.

use std::time::Duration;

/// Whether the SDK acknowledges an inbound message on receipt or leaves
/// acknowledgement under handler control.  Unacked messages may be
/// redelivered by the node after its own timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    #[default]
    Auto,
    Manual,
}

/// Options for [`AgentClient::handle_with`](crate::AgentClient::handle_with).
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerOptions {
    pub ack_mode: AckMode,
}

impl HandlerOptions {
    /// Disable auto-acknowledgement; the handler must call
    /// [`Message::ack`](crate::Message::ack) when it has processed the
    /// message.
    pub fn manual_ack() -> Self {
        Self {
            ack_mode: AckMode::Manual,
        }
    }
}

/// Options for [`AgentClient::send_with`](crate::AgentClient::send_with).
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Wait for the node's reply to the frame and surface a rejection as a
    /// connection error.  The default send is fire-and-forget.
    pub await_server_reply: bool,

    /// How long to wait for that reply.
    pub reply_timeout: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            await_server_reply: false,
            reply_timeout: Duration::from_secs(10),
        }
    }
}

impl SendOptions {
    pub fn await_server_reply() -> Self {
        Self {
            await_server_reply: true,
            ..Self::default()
        }
    }
}

/// Options for [`AgentClient::request_with`](crate::AgentClient::request_with).
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Deadline for the correlated response.
    pub timeout: Duration,

    /// Parent thread id (`pthid`) for nested thread correlation.
    pub parent_thread: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            parent_thread: None,
        }
    }
}

impl RequestOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn parent_thread(mut self, pthid: impl Into<String>) -> Self {
        self.parent_thread = Some(pthid.into());
        self
    }
}
