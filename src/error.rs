use thiserror::Error;

/// Error taxonomy for the proctoring hub.
///
/// Registry and relay failures are recoverable by design: the coordinator
/// logs them and carries on, so a single bad envelope never takes a room
/// down.
#[derive(Debug, Error)]
pub enum HubError {
    /// Room and participant bookkeeping
    #[error("participant {peer_id} already registered in room {room_id}")]
    DuplicateParticipant { room_id: String, peer_id: String },

    #[error("room {0} not found")]
    RoomNotFound(String),

    /// Signaling relay
    #[error("recipient {0} is not registered in this room")]
    RecipientNotFound(String),

    #[error("transport for {0} is closed")]
    TransportClosed(String),

    /// Peer session lifecycle
    #[error("no live peer session for examiner {examiner_id} and student {student_id} in room {room_id}")]
    UnknownPeerSession {
        room_id: String,
        examiner_id: String,
        student_id: String,
    },

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("negotiation timed out after {0} seconds")]
    NegotiationTimeout(u64),

    /// External capabilities
    #[error("media acquisition failed: {0}")]
    MediaUnavailable(String),

    #[error("peer connection error: {0}")]
    PeerConnection(String),

    /// Wire format
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for Results using HubError
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// True for failures the coordinator is expected to log and absorb.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HubError::DuplicateParticipant { .. }
                | HubError::RecipientNotFound(_)
                | HubError::UnknownPeerSession { .. }
        )
    }

    /// Helper to create peer connection errors with context
    pub fn peer_connection(msg: impl Into<String>) -> Self {
        HubError::PeerConnection(msg.into())
    }

    /// Helper to create media errors with context
    pub fn media(msg: impl Into<String>) -> Self {
        HubError::MediaUnavailable(msg.into())
    }
}

/// Convert webrtc::Error to HubError
impl From<webrtc::Error> for HubError {
    fn from(err: webrtc::Error) -> Self {
        HubError::PeerConnection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::RecipientNotFound("student_1".to_string());
        assert_eq!(
            err.to_string(),
            "recipient student_1 is not registered in this room"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        let err = HubError::DuplicateParticipant {
            room_id: "r1".to_string(),
            peer_id: "s1".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(!HubError::NegotiationTimeout(30).is_recoverable());
    }

    #[test]
    fn test_error_helpers() {
        let err = HubError::media("permission denied");
        assert!(matches!(err, HubError::MediaUnavailable(_)));
    }
}
