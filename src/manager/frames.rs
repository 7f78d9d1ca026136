//! Control-channel frame codec.
//!
//! Every message on the manager channel is a single self-delimited JSON text
//! record tagged with a `type` field. Payloads that may contain arbitrary
//! bytes travel base64-encoded. Malformed or unknown-type frames are a
//! non-fatal decode error; the channel logs and drops them so a buggy
//! manager cannot crash the relay.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Header fields as they appear on the wire: name → value, duplicates folded.
pub type HeaderFields = BTreeMap<String, String>;

/// A control-channel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlFrame {
    /// Relay → manager: please review this request before it proceeds.
    ReviewRequest(ReviewRequest),
    /// Manager → relay: verdict for a review RPC, matched by id.
    Decision(Decision),
    /// Relay → manager: please review this target response before it is
    /// written to the client.
    ResponseReview(ResponseReview),
    /// Tunneled bytes for a relayed CONNECT connection, either direction.
    Data(DataFrame),
    /// The connection identified by `id` has closed on the sender's side.
    End { id: String },
}

/// The subject of a `review-request` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: String,
    #[serde(flatten)]
    pub subject: ReviewSubject,
}

/// What is being reviewed: a buffered plaintext request or a CONNECT intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReviewSubject {
    Http {
        method: String,
        url: String,
        headers: HeaderFields,
        #[serde(with = "base64_bytes")]
        body: Vec<u8>,
    },
    Connect {
        host: String,
        port: u16,
        headers: HeaderFields,
    },
}

/// Manager verdict for a review RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<Modified>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Accept,
    Reject,
}

impl Decision {
    pub fn is_reject(&self) -> bool {
        self.action == DecisionAction::Reject
    }

    /// Rejection reason, defaulting to a generic phrase when absent.
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("rejected by manager")
    }
}

/// Fields the manager wants changed. Absent fields mean "unchanged";
/// `headers` is shallow-merged over the original; `body` is a replacement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Modified {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderFields>,
    #[serde(
        default,
        with = "base64_bytes::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Vec<u8>>,
}

/// The buffered target response submitted for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseReview {
    pub id: String,
    pub status: u16,
    pub headers: HeaderFields,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

/// A chunk of tunneled bytes tagged with its connection id. `host`/`port`
/// are present only on relay → manager frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFrame {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Serialize a frame to its wire record.
pub fn encode(frame: &ControlFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Parse a wire record. Unknown `type` tags and malformed payloads are
/// decode errors the caller drops.
pub fn decode(raw: &str) -> Result<ControlFrame, serde_json::Error> {
    serde_json::from_str(raw)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }

    pub mod opt {
        use super::*;

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => ser.serialize_some(&STANDARD.encode(bytes)),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            let encoded: Option<String> = Option::deserialize(de)?;
            encoded
                .map(|s| STANDARD.decode(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_decision_with_modifications() {
        let raw = r#"{
            "type": "decision",
            "id": "abc",
            "action": "accept",
            "modified": {
                "url": "http://other.test/b",
                "headers": {"x-extra": "1"},
                "body": "aGk="
            }
        }"#;
        let frame = decode(raw).unwrap();
        let ControlFrame::Decision(decision) = frame else {
            panic!("expected decision");
        };
        assert_eq!(decision.id, "abc");
        assert!(!decision.is_reject());
        let modified = decision.modified.unwrap();
        assert_eq!(modified.url.as_deref(), Some("http://other.test/b"));
        assert_eq!(modified.body.as_deref(), Some(b"hi".as_slice()));
        assert!(modified.method.is_none());
    }

    #[test]
    fn decodes_reject_with_reason() {
        let raw = r#"{"type":"decision","id":"1","action":"reject","reason":"blocked"}"#;
        let ControlFrame::Decision(decision) = decode(raw).unwrap() else {
            panic!("expected decision");
        };
        assert!(decision.is_reject());
        assert_eq!(decision.reason(), "blocked");
    }

    #[test]
    fn rejects_unknown_frame_type() {
        assert!(decode(r#"{"type":"launch-missiles","id":"1"}"#).is_err());
    }

    #[test]
    fn rejects_malformed_record() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"id":"no-type"}"#).is_err());
    }

    #[test]
    fn rejects_invalid_base64_payload() {
        let raw = r#"{"type":"data","id":"7","data":"@@not-base64@@"}"#;
        assert!(decode(raw).is_err());
    }

    #[test]
    fn data_frame_round_trips_payload_bytes() {
        let frame = ControlFrame::Data(DataFrame {
            id: "3".into(),
            host: Some("example.test".into()),
            port: Some(443),
            data: b"ABC".to_vec(),
        });
        let wire = encode(&frame).unwrap();
        assert!(wire.contains("\"QUJD\""), "payload should be base64: {wire}");
        let ControlFrame::Data(parsed) = decode(&wire).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(parsed.data, b"ABC");
        assert_eq!(parsed.port, Some(443));
    }

    #[test]
    fn review_request_carries_kind_tag() {
        let frame = ControlFrame::ReviewRequest(ReviewRequest {
            id: "r1".into(),
            subject: ReviewSubject::Connect {
                host: "example.test".into(),
                port: 443,
                headers: HeaderFields::new(),
            },
        });
        let wire = encode(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "review-request");
        assert_eq!(value["kind"], "connect");
        assert_eq!(value["port"], 443);
    }
}
