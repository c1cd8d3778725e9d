//! The caller-visible DIDComm message and its wire codec.

use std::sync::Weak;

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use serde_json::Value;
use uuid::Uuid;

use plexus_protocol::{InboundEnvelope, PlaintextEnvelope, WireContext};

use crate::error::{Error, ErrorSink, Result, SdkError};
use crate::transport::Transport;

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A DIDComm v2 message.
///
/// Empty strings mean "unset" for `id`, `from`, `thread_id`, and
/// `parent_thread_id`; the SDK fills `id` and `from` on send and mints a
/// thread id for requests.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Unique message id; minted when left empty.
    pub id: String,
    /// Message type URI.
    pub msg_type: String,
    /// Originator DID; filled with the session identity when left empty.
    pub from: String,
    /// Recipient DIDs.
    pub to: Vec<String>,
    /// Thread id correlating a conversation.
    pub thread_id: String,
    /// Parent thread id for nested threads.
    pub parent_thread_id: String,
    /// Generic decoded body.  On inbound messages this is the untyped
    /// view; use [`Message::body_as`] for a typed decode.
    pub body: Option<Value>,
    /// Node-populated delivery metadata, present on inbound messages only.
    pub context: Option<MessageContext>,

    // Raw body bytes, kept for lazy typed decoding and single encoding.
    pub(crate) body_raw: Option<Box<RawValue>>,
    // Armed by the client for manual-ack handlers.
    pub(crate) ack: Option<AckHandle>,
}

/// Delivery metadata attached by the node to inbound messages.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    /// The recipient DID this copy was delivered to.
    pub recipient: String,
    /// Whether the node authorized the sender under its policy.
    pub authorized: bool,
    /// Verified sender credentials.
    pub sender_credentials: Vec<Credential>,
}

#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub id: String,
    pub name: String,
}

impl Message {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_to<I, S>(mut self, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to = to.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_parent_thread(mut self, pthid: impl Into<String>) -> Self {
        self.parent_thread_id = pthid.into();
        self
    }

    /// Decode the body into a concrete shape.  Inbound messages decode
    /// lazily from the raw wire bytes.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        if let Some(raw) = &self.body_raw {
            return Ok(serde_json::from_str(raw.get())?);
        }
        if let Some(value) = &self.body {
            return Ok(serde_json::from_value(value.clone())?);
        }
        Err(Error::Json(<serde_json::Error as serde::de::Error>::custom(
            "message has no body",
        )))
    }

    /// Acknowledge this message to the node.
    ///
    /// Meaningful only inside a handler registered with manual ack; a
    /// silent no-op otherwise, and after the session has closed.
    pub async fn ack(&self) {
        if let Some(handle) = &self.ack {
            handle.fire().await;
        }
    }
}

/// One-shot ack closure armed on manual-ack messages.  Holds the transport
/// weakly so it cannot outlive the session.
#[derive(Clone)]
pub(crate) struct AckHandle {
    message_id: String,
    transport: Weak<dyn Transport>,
    sink: ErrorSink,
}

impl AckHandle {
    pub(crate) fn new(message_id: String, transport: Weak<dyn Transport>, sink: ErrorSink) -> Self {
        Self {
            message_id,
            transport,
            sink,
        }
    }

    async fn fire(&self) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        match transport
            .send_ack(std::slice::from_ref(&self.message_id))
            .await
        {
            Ok(()) | Err(Error::Closed | Error::NotConnected) => {}
            Err(e) => (self.sink)(SdkError::transport_write(self.message_id.clone(), e)),
        }
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

// ── Wire codec ───────────────────────────────────────────────────────

/// Serialize an outbound message as the bare DIDComm envelope.  The body
/// is encoded exactly once; an absent body encodes as an empty object.
pub(crate) fn encode_outbound(msg: &Message) -> Result<String> {
    let body = match (&msg.body, &msg.body_raw) {
        (Some(value), _) => serde_json::value::to_raw_value(value)?,
        (None, Some(raw)) => raw.clone(),
        (None, None) => RawValue::from_string("{}".to_owned())?,
    };
    let envelope = PlaintextEnvelope {
        id: msg.id.clone(),
        msg_type: msg.msg_type.clone(),
        from: msg.from.clone(),
        to: msg.to.clone(),
        thread_id: none_if_empty(&msg.thread_id),
        parent_thread_id: none_if_empty(&msg.parent_thread_id),
        body: Some(body),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Parse an inbound node payload (context + plaintext) into a [`Message`].
pub(crate) fn parse_inbound(payload: &str) -> Result<Message> {
    let envelope: InboundEnvelope = serde_json::from_str(payload)?;
    let plaintext: PlaintextEnvelope = serde_json::from_str(envelope.plaintext.get())?;

    // The generic view is best-effort; the raw bytes stay authoritative.
    let body = plaintext
        .body
        .as_ref()
        .and_then(|raw| serde_json::from_str(raw.get()).ok());

    Ok(Message {
        id: plaintext.id,
        msg_type: plaintext.msg_type,
        from: plaintext.from,
        to: plaintext.to,
        thread_id: plaintext.thread_id.unwrap_or_default(),
        parent_thread_id: plaintext.parent_thread_id.unwrap_or_default(),
        body,
        context: envelope.context.map(flatten_context),
        body_raw: plaintext.body,
        ack: None,
    })
}

fn flatten_context(ctx: WireContext) -> MessageContext {
    MessageContext {
        recipient: ctx.recipient,
        authorized: ctx.authorized,
        sender_credentials: ctx
            .sender_credentials
            .into_iter()
            .map(|c| Credential {
                id: c.credential_subject.id,
                name: c.credential_subject.name,
            })
            .collect(),
    }
}

fn none_if_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_owned())
}
