use serde::{Deserialize, Serialize};

use crate::rtc::{MediaHandle, SignalPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Examiner,
    Student,
}

/// Messages participants send over the room transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Join {
        room_id: String,
        peer_id: String,
        role: Role,
    },

    Leave,

    Signal {
        to: String,
        payload: SignalPayload,
    },
}

/// Messages the hub sends back to participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    Joined {
        room_id: String,
        participants: Vec<ParticipantInfo>,
    },

    ParticipantJoined {
        peer_id: String,
        role: Role,
    },

    ParticipantLeft {
        peer_id: String,
    },

    Signal {
        from: String,
        payload: SignalPayload,
    },

    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub peer_id: String,
    pub role: Role,
}

/// An addressed negotiation message. The relay routes by `to` and never
/// looks inside `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    pub from: String,
    pub to: String,
    pub payload: SignalPayload,
}

/// One entry of the monitoring view: a student whose stream is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub participant_id: String,
    pub media: MediaHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_shape() {
        let json = r#"{"type":"Join","room_id":"R1","peer_id":"e1","role":"examiner"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Join { ref room_id, ref peer_id, role: Role::Examiner }
                if room_id == "R1" && peer_id == "e1"
        ));
    }

    #[test]
    fn test_leave_is_bare_tag() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"Leave"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Leave));
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = SignalingEnvelope {
            from: "s1".to_string(),
            to: "e1".to_string(),
            payload: SignalPayload::Answer {
                sdp: "v=0".to_string(),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: SignalingEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.from, "s1");
        assert_eq!(back.to, "e1");
        assert!(matches!(back.payload, SignalPayload::Answer { .. }));
    }
}
