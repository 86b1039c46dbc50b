//! Client <-> gateway wire frames (spec §6).
//!
//! JSON, UTF-8, one frame per WebSocket text message. Tagged on `type` so
//! `serde_json` can deserialize directly into the right inbound variant
//! without a manual dispatch step.

use serde::{Deserialize, Serialize};

/// A frame received from a client.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    SendMsg {
        msg_id: String,
        recipient: String,
        content: String,
        timestamp: i64,
    },
    Ack {
        msg_id: String,
    },
    Heartbeat,
}

/// A frame sent to a client.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message {
        msg_id: String,
        sender: String,
        content: String,
        timestamp: i64,
        sequence_number: u64,
    },
    Ack {
        msg_id: String,
        sequence_number: u64,
        timestamp: i64,
    },
    ReadReceipt {
        msg_id: String,
        reader_id: String,
        read_at: i64,
        conversation_id: String,
        timestamp: i64,
    },
    MembershipChange {
        group_id: String,
        user_id: String,
        event_type: MembershipEventType,
        timestamp: i64,
    },
    Error {
        error_code: String,
        error_message: String,
        timestamp: i64,
    },
    /// Server-initiated heartbeat, answered in kind by the client.
    Heartbeat,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipEventType {
    Join,
    Leave,
}

impl OutboundFrame {
    /// Builds an `error` frame from a [`crate::error::GatewayError`] and the
    /// current timestamp.
    pub fn error(code: &str, message: impl Into<String>, now_millis: i64) -> Self {
        OutboundFrame::Error {
            error_code: code.to_owned(),
            error_message: message.into(),
            timestamp: now_millis,
        }
    }

    /// Serializes to the JSON text that goes on the wire. Frames are
    /// constructed from already-validated data, so a serialization failure
    /// here would indicate a programming error, not a runtime condition to
    /// recover from.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("OutboundFrame must always serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_send_msg_round_trips() {
        let raw = r#"{"type":"send_msg","msg_id":"m1","recipient":"user_42","content":"hi","timestamp":1000}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame,
            InboundFrame::SendMsg {
                msg_id: "m1".into(),
                recipient: "user_42".into(),
                content: "hi".into(),
                timestamp: 1000,
            }
        );
    }

    #[test]
    fn inbound_heartbeat_has_no_body() {
        let raw = r#"{"type":"heartbeat"}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame, InboundFrame::Heartbeat);
    }

    #[test]
    fn outbound_error_serializes_with_snake_case_type() {
        let frame = OutboundFrame::error("RATE_LIMIT_EXCEEDED", "too fast", 42);
        let json = frame.to_json();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""error_code":"RATE_LIMIT_EXCEEDED""#));
    }

    #[test]
    fn unknown_inbound_type_fails_to_parse() {
        let raw = r#"{"type":"subscribe"}"#;
        let result: Result<InboundFrame, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }
}
