use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::error::{HubError, Result};

use super::messages::{ServerMessage, SignalingEnvelope};

/// Handle to a participant's outbound message stream. Backed by the
/// WebSocket pump in production and by plain channels in tests.
pub type Transport = mpsc::UnboundedSender<ServerMessage>;

/// Room-scoped message bus.
///
/// Forwards each envelope to the addressed recipient's transport and nothing
/// else; payloads pass through untouched. Delivery is at-most-once with no
/// buffering: an envelope for a recipient that is gone is dropped with a
/// typed error, and recovery is a fresh negotiation once the recipient
/// rejoins. FIFO order per sender-recipient pair follows from the underlying
/// unbounded channels.
pub struct SignalingRelay {
    transports: HashMap<String, Transport>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self {
            transports: HashMap::new(),
        }
    }

    pub fn register(&mut self, peer_id: impl Into<String>, transport: Transport) {
        self.transports.insert(peer_id.into(), transport);
    }

    pub fn unregister(&mut self, peer_id: &str) {
        self.transports.remove(peer_id);
    }

    /// Routes one envelope to its recipient.
    pub fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        let transport = self
            .transports
            .get(&envelope.to)
            .ok_or_else(|| HubError::RecipientNotFound(envelope.to.clone()))?;

        let to = envelope.to;
        transport
            .send(ServerMessage::Signal {
                from: envelope.from,
                payload: envelope.payload,
            })
            .map_err(|_| HubError::TransportClosed(to))
    }

    /// Sends a non-envelope server message directly to one participant.
    pub fn notify(&self, peer_id: &str, message: ServerMessage) -> Result<()> {
        let transport = self
            .transports
            .get(peer_id)
            .ok_or_else(|| HubError::RecipientNotFound(peer_id.to_string()))?;

        transport
            .send(message)
            .map_err(|_| HubError::TransportClosed(peer_id.to_string()))
    }

    /// Fans a membership notification out to everyone except `peer_id`,
    /// i.e. only to currently registered counterparts.
    pub fn broadcast_except(&self, peer_id: &str, message: ServerMessage) {
        for (id, transport) in &self.transports {
            if id != peer_id {
                let _ = transport.send(message.clone());
            }
        }
    }
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtc::SignalPayload;

    fn envelope(from: &str, to: &str, sdp: &str) -> SignalingEnvelope {
        SignalingEnvelope {
            from: from.to_string(),
            to: to.to_string(),
            payload: SignalPayload::Offer {
                sdp: sdp.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_send_routes_to_recipient_only() {
        let mut relay = SignalingRelay::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        relay.register("a", tx_a);
        relay.register("b", tx_b);

        relay.send(envelope("a", "b", "v=0")).unwrap();

        let received = rx_b.recv().await.unwrap();
        assert!(matches!(received, ServerMessage::Signal { ref from, .. } if from == "a"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_preserves_order_per_pair() {
        let mut relay = SignalingRelay::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.register("b", tx);

        relay.send(envelope("a", "b", "m1")).unwrap();
        relay.send(envelope("a", "b", "m2")).unwrap();

        for expected in ["m1", "m2"] {
            match rx.recv().await.unwrap() {
                ServerMessage::Signal {
                    payload: SignalPayload::Offer { sdp },
                    ..
                } => assert_eq!(sdp, expected),
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[test]
    fn test_send_to_unknown_recipient_fails() {
        let relay = SignalingRelay::new();
        let err = relay.send(envelope("a", "ghost", "v=0")).unwrap_err();
        assert!(matches!(err, HubError::RecipientNotFound(ref id) if id == "ghost"));
    }

    #[test]
    fn test_send_after_unregister_fails() {
        let mut relay = SignalingRelay::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        relay.register("b", tx);
        relay.unregister("b");

        let err = relay.send(envelope("a", "b", "v=0")).unwrap_err();
        assert!(matches!(err, HubError::RecipientNotFound(_)));
    }

    #[tokio::test]
    async fn test_broadcast_skips_the_subject() {
        let mut relay = SignalingRelay::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        relay.register("a", tx_a);
        relay.register("b", tx_b);

        relay.broadcast_except(
            "a",
            ServerMessage::ParticipantLeft {
                peer_id: "a".to_string(),
            },
        );

        assert!(rx_b.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }
}
