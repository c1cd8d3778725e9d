//! Error taxonomy: caller-returnable errors and asynchronous SDK errors.
//!
//! Errors with a caller to return to are returned.  Errors that surface on
//! the inbound pipeline — where no caller is waiting — are wrapped in
//! [`SdkError`] and routed to the [`ErrorSink`] supplied at client
//! construction.  The inbound pipeline itself never dies from a malformed
//! message or a misbehaving handler.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, Error>;

/// Caller-facing errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("client is not connected")]
    NotConnected,

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("client is closed")]
    Closed,

    /// Failure to connect, a fatal join rejection, or a server-side
    /// rejection of a frame sent with a reply wait.
    #[error("connection error [{url}]: {reason}")]
    Connection { url: String, reason: String },

    /// A `request` was answered with a problem-report envelope.
    #[error("problem report [{code}]: {comment}")]
    RemoteProblem { code: String, comment: String },

    /// The caller's deadline elapsed before the operation completed.
    #[error("deadline elapsed")]
    Timeout,

    #[error("handler already registered for message type {0:?}")]
    DuplicateHandler(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classifies SDK errors that have no caller to return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inbound payload couldn't be decoded.
    ParseFailure,
    /// Inbound message for which no handler is registered.
    NoHandler,
    /// A handler panicked.
    HandlerPanic,
    /// The node refused a fire-and-forget frame (authz, routing, etc.).
    ServerReject,
    /// A best-effort write (ack, problem report, response) failed after the
    /// handler had already returned.
    TransportWrite,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ParseFailure => "parse_failure",
            Self::NoHandler => "no_handler",
            Self::HandlerPanic => "handler_panic",
            Self::ServerReject => "server_reject",
            Self::TransportWrite => "transport_write",
        };
        f.write_str(s)
    }
}

/// An error the SDK could not deliver to a direct caller.
///
/// Routed to the [`ErrorSink`] provided when the client is created.  The
/// message fields are populated where known; `raw` carries the undecodable
/// payload for parse failures.
#[derive(Debug)]
pub struct SdkError {
    pub kind: ErrorKind,
    pub message_id: String,
    pub msg_type: String,
    pub from: String,
    pub cause: Option<anyhow::Error>,
    pub raw: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
}

impl SdkError {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message_id: String::new(),
            msg_type: String::new(),
            from: String::new(),
            cause: None,
            raw: None,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn parse_failure(raw: Vec<u8>, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            raw: Some(raw),
            cause: Some(cause.into()),
            ..Self::new(ErrorKind::ParseFailure)
        }
    }

    pub(crate) fn no_handler(message_id: String, msg_type: String, from: String) -> Self {
        Self {
            message_id,
            msg_type,
            from,
            ..Self::new(ErrorKind::NoHandler)
        }
    }

    pub(crate) fn handler_panic(
        message_id: String,
        msg_type: String,
        from: String,
        cause: anyhow::Error,
    ) -> Self {
        Self {
            message_id,
            msg_type,
            from,
            cause: Some(cause),
            ..Self::new(ErrorKind::HandlerPanic)
        }
    }

    pub(crate) fn server_reject(reason: String) -> Self {
        Self {
            cause: Some(anyhow::anyhow!(reason)),
            ..Self::new(ErrorKind::ServerReject)
        }
    }

    pub(crate) fn transport_write(message_id: String, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            message_id,
            cause: Some(cause.into()),
            ..Self::new(ErrorKind::TransportWrite)
        }
    }
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(
                f,
                "{}: {} (msg={} type={} from={})",
                self.kind, cause, self.message_id, self.msg_type, self.from
            ),
            None => write!(
                f,
                "{} (msg={} type={} from={})",
                self.kind, self.message_id, self.msg_type, self.from
            ),
        }
    }
}

/// Sink for every [`SdkError`].  Must be provided at client creation.
pub type ErrorSink = Arc<dyn Fn(SdkError) + Send + Sync>;

/// An [`ErrorSink`] that logs each record through `tracing`.
pub fn log_errors() -> ErrorSink {
    Arc::new(|e: SdkError| {
        tracing::error!(
            kind = %e.kind,
            message_id = %e.message_id,
            msg_type = %e.msg_type,
            from = %e.from,
            "sdk error: {e}"
        );
    })
}
