//! Shared control-channel protocol for skiff clients and the skiff-pier
//! relay. Keeping the frame definitions in a dedicated crate lets the server,
//! the client, and external tooling agree on the wire without pulling in
//! either side's runtime.
//!
//! Frames are JSON objects tagged by a `type` field. Field names are part of
//! the wire contract and are preserved exactly, including the mixed
//! camelCase/lowercase naming the deployed browser clients expect.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Length of a public short identifier.
pub const SHORT_ID_LEN: usize = 5;

/// Frames a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Bind a short identifier to this connection.
    #[serde(rename = "registerShortId")]
    RegisterShortId {
        #[serde(rename = "shortId")]
        short_id: String,
    },
    /// Ask the relay to deliver an offer blob to another identifier.
    #[serde(rename = "calluser")]
    CallUser {
        #[serde(rename = "userToCall")]
        user_to_call: String,
        /// Opaque negotiation blob, forwarded verbatim.
        #[serde(rename = "signalData")]
        signal_data: Value,
        from: String,
        name: String,
    },
    /// Return an answer blob to the identifier that sent the offer.
    #[serde(rename = "answercall")]
    AnswerCall { signal: Value, to: String },
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Transport-level endpoint id assigned on connect. Informational only;
    /// nothing routes by it.
    #[serde(rename = "me")]
    Me { id: String },
    /// Registration acknowledged; the client can stop retrying.
    #[serde(rename = "registered")]
    Registered {
        #[serde(rename = "shortId")]
        short_id: String,
    },
    /// Relayed incoming offer.
    #[serde(rename = "calluser")]
    IncomingCall {
        signal: Value,
        from: String,
        name: String,
    },
    /// Relayed answer, delivered to the original caller.
    #[serde(rename = "callaccepted")]
    CallAccepted { signal: Value },
    /// Broadcast: a registered peer disconnected.
    #[serde(rename = "callended")]
    CallEnded,
    /// The addressed identifier could not be reached.
    #[serde(rename = "callfailed")]
    CallFailed { target: String, reason: String },
}

/// Generate a public short identifier: five alphanumeric characters, drawn
/// once per client lifetime.
pub fn generate_short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(SHORT_ID_LEN)
        .collect()
}

/// Generate a transport-endpoint id (the `me` id).
pub fn generate_endpoint_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn register_frame_matches_wire_names() {
        let frame = ClientFrame::RegisterShortId {
            short_id: "aB3x9".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "registerShortId", "shortId": "aB3x9"})
        );
    }

    #[test_timeout::timeout]
    fn call_request_parses_browser_shape() {
        // Exactly what the deployed browser client puts on the wire.
        let raw = json!({
            "type": "calluser",
            "userToCall": "Qk2Lm",
            "signalData": {"sdp": "o1", "type": "offer"},
            "from": "aB3x9",
            "name": "alice"
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match frame {
            ClientFrame::CallUser {
                user_to_call,
                signal_data,
                from,
                name,
            } => {
                assert_eq!(user_to_call, "Qk2Lm");
                assert_eq!(signal_data["sdp"], "o1");
                assert_eq!(from, "aB3x9");
                assert_eq!(name, "alice");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn relayed_frames_match_wire_names() {
        let offer = ServerFrame::IncomingCall {
            signal: json!({"sdp": "o1"}),
            from: "aB3x9".to_string(),
            name: "alice".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&offer).unwrap(),
            json!({"type": "calluser", "signal": {"sdp": "o1"}, "from": "aB3x9", "name": "alice"})
        );

        let answer = ServerFrame::CallAccepted {
            signal: json!({"sdp": "a1"}),
        };
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            json!({"type": "callaccepted", "signal": {"sdp": "a1"}})
        );

        assert_eq!(
            serde_json::to_value(&ServerFrame::CallEnded).unwrap(),
            json!({"type": "callended"})
        );
    }

    #[test_timeout::timeout]
    fn unknown_type_is_rejected() {
        let raw = json!({"type": "shutdown", "reason": "nope"});
        assert!(serde_json::from_value::<ClientFrame>(raw).is_err());
    }

    #[test_timeout::timeout]
    fn short_ids_are_five_alphanumerics() {
        for _ in 0..64 {
            let id = generate_short_id();
            assert_eq!(id.len(), SHORT_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test_timeout::timeout]
    fn endpoint_ids_are_unique() {
        assert_ne!(generate_endpoint_id(), generate_endpoint_id());
    }
}
