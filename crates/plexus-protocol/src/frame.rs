//! Phoenix Channel V2 framing.
//!
//! Every frame on the socket is a five-element JSON array
//! `[join_ref, ref, topic, event, payload]`.  The two refs are nullable
//! short strings used as correlation tokens: `ref` identifies a message for
//! reply matching, `join_ref` identifies the join session and stays constant
//! for the lifetime of the channel.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::value::RawValue;

/// Socket protocol version sent as the `vsn` query parameter.
pub const SOCKET_VSN: &str = "2.0.0";

/// Control topic for heartbeat frames.
pub const CONTROL_TOPIC: &str = "phoenix";

/// Topic of an agent's own channel on the node.
pub fn agent_topic(agent_did: &str) -> String {
    format!("plugins:{agent_did}")
}

/// Channel event discriminators.
pub mod event {
    /// Agent → node: channel join handshake.
    pub const JOIN: &str = "phx_join";
    /// Node → agent: reply to a ref-carrying frame.
    pub const REPLY: &str = "phx_reply";
    /// Agent → node: leave the channel (sent on close).
    pub const LEAVE: &str = "phx_leave";
    /// Node → agent: the channel errored.
    pub const ERROR: &str = "phx_error";
    /// Node → agent: the channel was closed server-side.
    pub const CLOSE: &str = "phx_close";
    /// Both directions: a DIDComm message carrier.
    pub const MESSAGE: &str = "message";
    /// Agent → node: acknowledge delivered message ids.
    pub const ACK: &str = "ack";
    /// Agent → node: keepalive on [`CONTROL_TOPIC`].
    pub const HEARTBEAT: &str = "heartbeat";
}

/// A single channel frame.
///
/// Serializes to the V2 array form; the payload is kept as raw JSON so the
/// upper layers decide when (and into what) to decode it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Box<RawValue>,
}

impl Frame {
    /// Frame with neither ref set; refs are assigned by the writer.
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Box<RawValue>) -> Self {
        Self {
            join_ref: None,
            msg_ref: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    /// An empty-object payload, for heartbeat and leave frames.
    pub fn empty_payload() -> Box<RawValue> {
        RawValue::from_string("{}".to_owned()).expect("static JSON")
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.join_ref,
            &self.msg_ref,
            &self.topic,
            &self.event,
            &self.payload,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (join_ref, msg_ref, topic, event, payload) =
            <(Option<String>, Option<String>, String, String, Box<RawValue>)>::deserialize(
                deserializer,
            )?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Golden tests: these lock the exact wire shape so accidental field or
    // ordering changes cause immediate failures.

    #[test]
    fn golden_frame_with_refs() {
        let frame = Frame {
            join_ref: Some("1".into()),
            msg_ref: Some("1".into()),
            topic: "plugins:did:web:alice".into(),
            event: event::JOIN.into(),
            payload: serde_json::value::to_raw_value(&json!({"payload_types": []})).unwrap(),
        };
        let wire = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            wire,
            r#"["1","1","plugins:did:web:alice","phx_join",{"payload_types":[]}]"#
        );
    }

    #[test]
    fn golden_frame_null_refs() {
        let frame = Frame::new(CONTROL_TOPIC, event::HEARTBEAT, Frame::empty_payload());
        let wire = serde_json::to_string(&frame).unwrap();
        assert_eq!(wire, r#"[null,null,"phoenix","heartbeat",{}]"#);
    }

    #[test]
    fn decode_round_trip() {
        let wire = r#"[null,"42","plugins:did:web:bob","message",{"k":1}]"#;
        let frame: Frame = serde_json::from_str(wire).unwrap();
        assert_eq!(frame.join_ref, None);
        assert_eq!(frame.msg_ref.as_deref(), Some("42"));
        assert_eq!(frame.topic, "plugins:did:web:bob");
        assert_eq!(frame.event, event::MESSAGE);
        assert_eq!(frame.payload.get(), r#"{"k":1}"#);
    }

    #[test]
    fn decode_rejects_short_array() {
        let err = serde_json::from_str::<Frame>(r#"["1","2","topic","event"]"#);
        assert!(err.is_err());
    }

    #[test]
    fn decode_rejects_non_array() {
        assert!(serde_json::from_str::<Frame>(r#"{"topic":"t"}"#).is_err());
    }

    #[test]
    fn agent_topic_form() {
        assert_eq!(agent_topic("did:web:alice"), "plugins:did:web:alice");
    }
}
