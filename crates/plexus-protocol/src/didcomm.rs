//! DIDComm v2 plaintext envelope and the node's inbound context wrapper.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Standard DIDComm type URI for problem reports.
pub const PROBLEM_REPORT_TYPE: &str = "https://didcomm.org/report-problem/2.0/problem-report";

/// Problem code used when a handler fails to process a message.
pub const CANT_PROCESS_CODE: &str = "e.p.xfer.cant-process";

/// The DIDComm plaintext envelope as it appears on the wire.
///
/// `thid` and `pthid` are omitted when empty.  `body` is kept as raw JSON:
/// inbound, it stays undecoded until a handler asks for a concrete shape;
/// outbound, the SDK encodes the caller's value exactly once and carries the
/// bytes from then on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaintextEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(rename = "thid", default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(rename = "pthid", default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Box<RawValue>>,
}

/// Inbound wire shape: the node wraps every delivered copy in a context
/// object next to the plaintext.  Outbound messages are sent as the bare
/// [`PlaintextEnvelope`] with no wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<WireContext>,
    pub plaintext: Box<RawValue>,
}

/// Node-populated delivery metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireContext {
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub sender_credentials: Vec<WireCredential>,
}

/// A verified sender credential; the subject is flattened to `{id, name}`
/// by the SDK.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireCredential {
    pub credential_subject: CredentialSubject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialSubject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Payload of an `ack` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub ids: Vec<String>,
}

/// Body of a problem-report envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemReportBody {
    pub code: String,
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn golden_outbound_envelope() {
        let env = PlaintextEnvelope {
            id: "msg-1".into(),
            msg_type: "https://example.org/protocols/echo/1.0/request".into(),
            from: "did:web:alice".into(),
            to: vec!["did:web:bob".into()],
            thread_id: Some("th-1".into()),
            parent_thread_id: None,
            body: Some(serde_json::value::to_raw_value(&json!({"message": "ping"})).unwrap()),
        };
        let v: serde_json::Value = serde_json::from_str(&serde_json::to_string(&env).unwrap()).unwrap();
        assert_eq!(v["id"], "msg-1");
        assert_eq!(v["type"], "https://example.org/protocols/echo/1.0/request");
        assert_eq!(v["from"], "did:web:alice");
        assert_eq!(v["to"], json!(["did:web:bob"]));
        assert_eq!(v["thid"], "th-1");
        assert!(v.get("pthid").is_none());
        assert_eq!(v["body"], json!({"message": "ping"}));
    }

    #[test]
    fn envelope_round_trip() {
        let wire = json!({
            "id": "m1", "type": "https://ex/p/1.0/t", "from": "did:a",
            "to": ["did:b", "did:c"], "thid": "t1", "pthid": "p1",
            "body": {"nested": {"x": [1, 2]}}
        })
        .to_string();
        let env: PlaintextEnvelope = serde_json::from_str(&wire).unwrap();
        let back: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&env).unwrap()).unwrap();
        assert_eq!(back, serde_json::from_str::<serde_json::Value>(&wire).unwrap());
    }

    #[test]
    fn inbound_envelope_with_context() {
        let wire = json!({
            "context": {
                "recipient": "did:web:alice",
                "authorized": true,
                "sender_credentials": [
                    {"credential_subject": {"id": "cred-1", "name": "Example Corp"}}
                ]
            },
            "plaintext": {"id": "m1", "type": "https://ex/p/1.0/t", "from": "did:b", "to": []}
        })
        .to_string();
        let env: InboundEnvelope = serde_json::from_str(&wire).unwrap();
        let ctx = env.context.unwrap();
        assert_eq!(ctx.recipient, "did:web:alice");
        assert!(ctx.authorized);
        assert_eq!(ctx.sender_credentials[0].credential_subject.name, "Example Corp");
    }

    #[test]
    fn inbound_envelope_requires_plaintext() {
        let wire = json!({"context": {"recipient": "did:x"}}).to_string();
        assert!(serde_json::from_str::<InboundEnvelope>(&wire).is_err());
    }

    #[test]
    fn golden_ack_payload() {
        let ack = AckPayload {
            ids: vec!["m1".into(), "m2".into()],
        };
        assert_eq!(serde_json::to_string(&ack).unwrap(), r#"{"ids":["m1","m2"]}"#);
    }

    #[test]
    fn golden_problem_report_body() {
        let body = ProblemReportBody {
            code: CANT_PROCESS_CODE.into(),
            comment: "database unavailable".into(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"code": "e.p.xfer.cant-process", "comment": "database unavailable"})
        );
    }
}
