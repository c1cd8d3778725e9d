//! `plexus-agent` — SDK for building agents on the Plexus DIDComm mesh.
//!
//! An "agent" is any process that joins a persistent session with a
//! cloud-hosted Plexus node and exchanges DIDComm v2 messages with other
//! agents reachable through it.  This crate provides the session core so
//! agent authors don't re-implement connection management, the channel
//! join/heartbeat protocol, request/response correlation, or inbound
//! dispatch.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your agent                                               │
//! │                                                           │
//! │   let client = AgentClient::new(cfg, log_errors())?;      │
//! │   client.handle("https://…/echo/1.0/request", Echo)?;     │
//! │   client.connect().await?;                                │
//! │                                                           │
//! │   let mut msg = Message::new("https://…/echo/1.0/request")│
//! │       .with_to(["did:web:bob"])                           │
//! │       .with_body(json!({"message": "ping"}));             │
//! │   let resp = client.request(&mut msg).await?;             │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow (hard-coded by the SDK)
//!
//! 1. Dial the node's WebSocket with `api_key=<key>&vsn=2.0.0`
//! 2. Join channel `plugins:<did>`, advertising the protocol base URIs
//!    derived from registered handlers (and requesting an ephemeral DID
//!    when none is configured)
//! 3. Main loop:
//!    - correlated responses are delivered to their waiting `request`
//!    - other inbound messages dispatch to the handler for their type,
//!      each on its own task, with auto- or manual acknowledgement
//!    - a heartbeat frame keeps the socket alive every 30s
//! 4. On close: best-effort leave frame, then teardown
//!
//! The client does not reconnect by itself; pair
//! [`AgentClient::on_disconnect`] with [`Backoff`] to drive reconnection.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod options;

mod channel;
mod correlation;
mod transport;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use backoff::Backoff;
pub use client::AgentClient;
pub use config::Config;
pub use error::{log_errors, Error, ErrorKind, ErrorSink, Result, SdkError};
pub use handler::{HandlerResult, MessageHandler};
pub use message::{Credential, Message, MessageContext};
pub use options::{AckMode, HandlerOptions, RequestOptions, SendOptions};

// Re-export the protocol crate so downstream agents never need a direct
// plexus-protocol dependency.
pub use plexus_protocol as protocol;
