use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, RwLock};

use crate::error::{HubError, Result};
use crate::rtc::{MediaSource, PeerConnectorFactory};

use super::coordinator::{RoomCoordinator, RoomEvent, RoomSnapshot};
use super::messages::{MonitorEntry, Role, SignalingEnvelope};
use super::relay::Transport;

/// The hub's room table: one live coordinator per room, created on the
/// room's first join and pruned once its coordinator winds down.
pub struct SessionHub {
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    factory: Arc<dyn PeerConnectorFactory>,
    media: Arc<dyn MediaSource>,
    negotiation_timeout: Duration,
}

#[derive(Clone)]
struct RoomHandle {
    events: mpsc::UnboundedSender<RoomEvent>,
    monitor: watch::Receiver<Vec<MonitorEntry>>,
}

impl SessionHub {
    pub fn new(
        factory: Arc<dyn PeerConnectorFactory>,
        media: Arc<dyn MediaSource>,
        negotiation_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            factory,
            media,
            negotiation_timeout,
        })
    }

    /// Registers a participant, creating the room on first join. Resolves
    /// once the room coordinator has accepted or refused the registration.
    pub async fn join(
        &self,
        room_id: &str,
        peer_id: &str,
        role: Role,
        transport: Transport,
    ) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let event = RoomEvent::Join {
            peer_id: peer_id.to_string(),
            role,
            transport,
            ack: ack_tx,
        };
        self.dispatch(room_id, event, true).await?;
        ack_rx
            .await
            .map_err(|_| HubError::RoomNotFound(room_id.to_string()))?
    }

    /// Removes a participant. A leave for an unknown room or non-member is a
    /// benign no-op.
    pub async fn leave(&self, room_id: &str, peer_id: &str) {
        let event = RoomEvent::Leave {
            peer_id: peer_id.to_string(),
        };
        let _ = self.dispatch(room_id, event, false).await;
    }

    /// Routes a signaling envelope into the room. The result reflects the
    /// coordinator's routing decision, not transport delivery.
    pub async fn signal(
        &self,
        room_id: &str,
        envelope: SignalingEnvelope,
    ) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let event = RoomEvent::Envelope {
            envelope,
            ack: Some(ack_tx),
        };
        self.dispatch(room_id, event, false).await?;
        ack_rx
            .await
            .map_err(|_| HubError::RoomNotFound(room_id.to_string()))?
    }

    /// Live monitoring feed for a room: the set of students with a connected
    /// stream, updated as sessions connect and close.
    pub async fn monitor(&self, room_id: &str) -> Option<watch::Receiver<Vec<MonitorEntry>>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|handle| handle.monitor.clone())
    }

    /// Consistent point-in-time view of a room's participants and sessions.
    pub async fn snapshot(&self, room_id: &str) -> Result<RoomSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(room_id, RoomEvent::Snapshot { reply: reply_tx }, false)
            .await?;
        reply_rx
            .await
            .map_err(|_| HubError::RoomNotFound(room_id.to_string()))
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Delivers an event to a room's coordinator, optionally creating the
    /// room. A coordinator that already wound down reads as absent; with
    /// `create` set, a fresh one transparently replaces it.
    async fn dispatch(&self, room_id: &str, event: RoomEvent, create: bool) -> Result<()> {
        let mut event = event;

        // fast path: a live coordinator
        {
            let rooms = self.rooms.read().await;
            if let Some(handle) = rooms.get(room_id) {
                match handle.events.send(event) {
                    Ok(()) => return Ok(()),
                    Err(mpsc::error::SendError(returned)) => event = returned,
                }
            } else if !create {
                return Err(HubError::RoomNotFound(room_id.to_string()));
            }
        }

        if !create {
            return Err(HubError::RoomNotFound(room_id.to_string()));
        }

        let mut rooms = self.rooms.write().await;

        // somebody else may have created or replaced the room meanwhile
        if let Some(handle) = rooms.get(room_id) {
            match handle.events.send(event) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    event = returned;
                    rooms.remove(room_id);
                }
            }
        }

        let (events, monitor, task) = RoomCoordinator::spawn(
            room_id.to_string(),
            self.factory.clone(),
            self.media.clone(),
            self.negotiation_timeout,
        );

        events
            .send(event)
            .map_err(|_| HubError::RoomNotFound(room_id.to_string()))?;

        rooms.insert(
            room_id.to_string(),
            RoomHandle {
                events: events.clone(),
                monitor,
            },
        );

        // prune the entry once the coordinator winds down, unless a
        // replacement already took the slot
        let table = self.rooms.clone();
        let room = room_id.to_string();
        tokio::spawn(async move {
            let _ = task.await;
            let mut rooms = table.write().await;
            if let Some(handle) = rooms.get(&room) {
                if handle.events.is_closed() {
                    rooms.remove(&room);
                    tracing::debug!(room_id = %room, "room pruned");
                }
            }
        });

        Ok(())
    }
}
