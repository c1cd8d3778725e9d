//! `plexus-protocol` — wire format for the Plexus node ↔ agent channel.
//!
//! Agents talk to a cloud-hosted Plexus node over a single WebSocket
//! connection carrying Phoenix Channel V2 frames.  Inside those frames,
//! agent-to-agent traffic is exchanged as DIDComm v2 plaintext envelopes;
//! inbound copies arrive wrapped in a node-populated context object.
//!
//! This crate is the **single source of truth** for that wire format.  The
//! agent SDK (and any server-side code) depends on it and never builds wire
//! JSON by hand — it only serializes/deserializes these types.
//!
//! Layers, outermost first:
//!
//! ```text
//! [join_ref, ref, topic, event, payload]      Phoenix channel frame
//!   payload for event "message" (inbound):
//!     { context: {..}, plaintext: {..} }      node context wrapper
//!       plaintext:
//!         { id, type, from, to, thid?,        DIDComm plaintext envelope
//!           pthid?, body }
//! ```

pub mod didcomm;
pub mod frame;
pub mod join;

pub use didcomm::{
    AckPayload, InboundEnvelope, PlaintextEnvelope, ProblemReportBody, WireContext,
    WireCredential, CANT_PROCESS_CODE, PROBLEM_REPORT_TYPE,
};
pub use frame::{agent_topic, event, Frame, CONTROL_TOPIC, SOCKET_VSN};
pub use join::{DidSpec, JoinParams, Reply, ReplyResponse, VerificationMethod, STATUS_OK};
