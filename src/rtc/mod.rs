//! Seams for the external collaborators the coordination layer depends on:
//! the peer-connection capability and the media-acquisition capability.
//!
//! The session layer only ever talks to the traits in this module; the
//! production adapter over the `webrtc` crate lives in [`connector`].

pub mod connector;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Which side of a pair drives the negotiation. The examiner side is always
/// the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Display capture, published by students.
    Screen,
    /// Camera capture, published by the examiner.
    Camera,
}

/// Opaque handle to an acquired or received media stream.
///
/// The coordination layer only moves these around; decoding and rendering
/// belong to the monitoring view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHandle {
    pub id: String,
    pub kind: MediaKind,
}

impl MediaHandle {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// One negotiation message exchanged between two peer endpoints.
///
/// The relay routes these without looking inside; only the peer-connection
/// capability interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },
}

/// Events the peer-connection capability reports on its own schedule.
///
/// These are delivered over a channel and re-enter the owning room's event
/// queue; connector callbacks never touch coordinator state directly.
#[derive(Debug)]
pub enum ConnectorEvent {
    SignalProduced(SignalPayload),
    StreamReceived(MediaHandle),
    Error(String),
}

pub type ConnectorEventSender = mpsc::UnboundedSender<ConnectorEvent>;

/// A live peer-connection endpoint for one examiner↔student pair.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Feed one remote negotiation message into the underlying connection.
    async fn signal(&self, payload: SignalPayload) -> Result<()>;

    /// Tear the connection down. Must be safe to call more than once.
    async fn destroy(&self);
}

/// Constructs peer connectors. Implementations report negotiation progress
/// through the event sender handed to [`create`](Self::create).
#[async_trait]
pub trait PeerConnectorFactory: Send + Sync {
    async fn create(
        &self,
        role: NegotiationRole,
        local_media: MediaHandle,
        events: ConnectorEventSender,
    ) -> Result<Box<dyn PeerConnector>>;
}

/// Asynchronous media acquisition. May fail with a permission or device
/// error, which the coordinator surfaces to the requesting participant.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, kind: MediaKind) -> Result<MediaHandle>;
}

/// Media source for headless deployments: hands out logical handles and
/// leaves actual capture to the connected endpoints.
#[derive(Default)]
pub struct HeadlessMediaSource {
    counter: AtomicU64,
}

impl HeadlessMediaSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaSource for HeadlessMediaSource {
    async fn acquire(&self, kind: MediaKind) -> Result<MediaHandle> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let label = match kind {
            MediaKind::Screen => "screen",
            MediaKind::Camera => "camera",
        };
        Ok(MediaHandle::new(format!("{}-{}", label, seq), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_source_issues_unique_handles() {
        let source = HeadlessMediaSource::new();
        let first = source.acquire(MediaKind::Camera).await.unwrap();
        let second = source.acquire(MediaKind::Camera).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.kind, MediaKind::Camera);
    }

    #[test]
    fn test_signal_payload_wire_shape() {
        let payload = SignalPayload::Offer {
            sdp: "v=0".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
    }
}
