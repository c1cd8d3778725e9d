//! Join handshake payloads.

use serde::{Deserialize, Serialize};

/// Reply status for a successful join (or any accepted frame).
pub const STATUS_OK: &str = "ok";

/// Payload of the `phx_join` frame.
///
/// `payload_types` enumerates the protocol base URIs this agent handles so
/// the node can route matching traffic to it.  `did_spec` is present only
/// when the agent has no configured DID and asks the node to mint an
/// ephemeral one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinParams {
    pub payload_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did_spec: Option<DidSpec>,
}

/// Specification for a node-minted DID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidSpec {
    pub mode: String,
    pub storage: String,
    #[serde(rename = "type")]
    pub did_type: String,
    #[serde(rename = "verificationMethods")]
    pub verification_methods: Vec<VerificationMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub purpose: String,
}

impl DidSpec {
    /// The shape every agent requests: an ephemeral plugin DID with
    /// authentication, assertion, and key-agreement keys.
    pub fn ephemeral_plugin() -> Self {
        Self {
            mode: "Create".into(),
            storage: "ephemeral".into(),
            did_type: "plugin".into(),
            verification_methods: ["authentication", "assertionMethod", "keyAgreement"]
                .into_iter()
                .map(|purpose| VerificationMethod {
                    purpose: purpose.into(),
                })
                .collect(),
        }
    }
}

/// Payload of a `phx_reply` frame: `{status, response}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub response: ReplyResponse,
}

/// The `response` object of a reply.  For joins, `did` carries a
/// node-assigned identity; for rejections, `reason` explains the refusal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}
