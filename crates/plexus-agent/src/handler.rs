//! Handler registration and protocol derivation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::options::AckMode;

/// Result of a message handler.
///
/// `Ok(Some(reply))` sends the reply with missing fields auto-filled,
/// `Ok(None)` sends nothing, and `Err(e)` sends a problem report to the
/// originator with the error string as its comment.
pub type HandlerResult = anyhow::Result<Option<Message>>;

/// Implement this trait to handle inbound messages of a registered type.
///
/// Handlers run on dedicated tasks and may perform async I/O; they never
/// block the transport reader.
///
/// # Example
///
/// ```rust,no_run
/// use plexus_agent::{HandlerResult, Message, MessageHandler};
/// use serde_json::json;
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl MessageHandler for Echo {
///     async fn handle(&self, msg: Message) -> HandlerResult {
///         let text: serde_json::Value = msg.body_as()?;
///         Ok(Some(
///             Message::new("https://example.org/protocols/echo/1.0/response")
///                 .with_body(json!({ "echo": text })),
///         ))
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, msg: Message) -> HandlerResult;
}

#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub handler: Arc<dyn MessageHandler>,
    pub ack_mode: AckMode,
}

/// Mapping from exact message-type URI to handler entry.  Mutated during
/// setup, read-only after connect.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn register(
        &mut self,
        msg_type: String,
        handler: Arc<dyn MessageHandler>,
        ack_mode: AckMode,
    ) -> Result<()> {
        if self.handlers.contains_key(&msg_type) {
            return Err(Error::DuplicateHandler(msg_type));
        }
        self.handlers.insert(msg_type, HandlerEntry { handler, ack_mode });
        Ok(())
    }

    pub fn lookup(&self, msg_type: &str) -> Option<HandlerEntry> {
        self.handlers.get(msg_type).cloned()
    }

    /// Unique protocol base URIs derived from the registered message
    /// types; advertised to the node at join time.  Order is unspecified.
    pub fn protocols(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.handlers
            .keys()
            .map(|msg_type| derive_protocol(msg_type))
            .filter(|proto| seen.insert(proto.to_owned()))
            .map(str::to_owned)
            .collect()
    }
}

/// Protocol base URI of a message type: everything before the final
/// `/`-delimited segment.  A type with no `/` derives itself.
///
/// `https://example.org/protocols/echo/1.0/request` derives
/// `https://example.org/protocols/echo/1.0`.
pub(crate) fn derive_protocol(msg_type: &str) -> &str {
    msg_type.rsplit_once('/').map_or(msg_type, |(prefix, _)| prefix)
}
