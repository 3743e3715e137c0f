use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{HubError, Result};
use crate::rtc::{
    ConnectorEvent, MediaHandle, MediaKind, MediaSource, NegotiationRole, PeerConnector,
    PeerConnectorFactory,
};

use super::messages::{MonitorEntry, ParticipantInfo, Role, ServerMessage, SignalingEnvelope};
use super::peer::{PeerSession, SessionKey, SessionState};
use super::registry::RoomRegistry;
use super::relay::{SignalingRelay, Transport};

/// Everything that can happen to a room. Applied strictly in arrival order
/// by the coordinator task; callbacks from external capabilities re-enter
/// through this queue instead of touching room state directly.
pub enum RoomEvent {
    Join {
        peer_id: String,
        role: Role,
        transport: Transport,
        ack: oneshot::Sender<Result<()>>,
    },
    Leave {
        peer_id: String,
    },
    Envelope {
        envelope: SignalingEnvelope,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    MediaReady {
        peer_id: String,
        result: Result<MediaHandle>,
    },
    SessionReady {
        key: SessionKey,
        epoch: u64,
        result: Result<Box<dyn PeerConnector>>,
    },
    Connector {
        key: SessionKey,
        epoch: u64,
        event: ConnectorEvent,
    },
    NegotiationDeadline {
        key: SessionKey,
        epoch: u64,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

/// Point-in-time view of one room, served over the event queue so it
/// reflects every event enqueued before it.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub participants: Vec<ParticipantInfo>,
    pub sessions: Vec<SessionSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub key: SessionKey,
    pub role: NegotiationRole,
    pub state: SessionState,
}

/// Single-writer orchestrator for one room.
///
/// Owns the registry, the relay, and the arena of peer sessions keyed by
/// (room, examiner, student). All state lives on the coordinator task;
/// rooms never share mutable state, so they proceed fully in parallel.
pub struct RoomCoordinator {
    room_id: String,
    registry: RoomRegistry,
    relay: SignalingRelay,
    sessions: HashMap<SessionKey, PeerSession>,
    /// Local media per examiner, acquired asynchronously on join. Pairing
    /// with students is deferred until the examiner's media is here.
    examiner_media: HashMap<String, MediaHandle>,
    next_epoch: u64,
    factory: Arc<dyn PeerConnectorFactory>,
    media: Arc<dyn MediaSource>,
    negotiation_timeout: Duration,
    events_tx: mpsc::UnboundedSender<RoomEvent>,
    monitor_tx: watch::Sender<Vec<MonitorEntry>>,
}

impl RoomCoordinator {
    /// Spawns the coordinator task for a room. Returns the event sender, the
    /// monitoring feed, and the task handle.
    pub fn spawn(
        room_id: String,
        factory: Arc<dyn PeerConnectorFactory>,
        media: Arc<dyn MediaSource>,
        negotiation_timeout: Duration,
    ) -> (
        mpsc::UnboundedSender<RoomEvent>,
        watch::Receiver<Vec<MonitorEntry>>,
        JoinHandle<()>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (monitor_tx, monitor_rx) = watch::channel(Vec::new());

        let coordinator = Self {
            registry: RoomRegistry::new(room_id.clone()),
            relay: SignalingRelay::new(),
            sessions: HashMap::new(),
            examiner_media: HashMap::new(),
            next_epoch: 0,
            factory,
            media,
            negotiation_timeout,
            events_tx: events_tx.clone(),
            monitor_tx,
            room_id,
        };

        let handle = tokio::spawn(coordinator.run(events_rx));
        (events_tx, monitor_rx, handle)
    }

    async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<RoomEvent>) {
        tracing::info!(room_id = %self.room_id, "room coordinator started");

        while let Some(event) = events_rx.recv().await {
            let had_participants = !self.registry.is_empty();
            self.apply(event).await;

            // a room exists only through its membership; once the last
            // participant is gone the coordinator winds down
            if had_participants && self.registry.is_empty() {
                break;
            }
        }

        events_rx.close();
        let leftovers = std::mem::take(&mut self.sessions);
        for (_, mut session) in leftovers {
            session.close().await;
        }
        let _ = self.monitor_tx.send(Vec::new());
        tracing::info!(room_id = %self.room_id, "room coordinator stopped");
    }

    async fn apply(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Join {
                peer_id,
                role,
                transport,
                ack,
            } => {
                let result = self.handle_join(&peer_id, role, transport);
                let _ = ack.send(result);
            }
            RoomEvent::Leave { peer_id } => self.handle_leave(&peer_id).await,
            RoomEvent::Envelope { envelope, ack } => {
                let result = self.handle_envelope(envelope).await;
                if let Err(err) = &result {
                    tracing::warn!(
                        room_id = %self.room_id,
                        error = %err,
                        "envelope dropped"
                    );
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            RoomEvent::MediaReady { peer_id, result } => {
                self.handle_media_ready(&peer_id, result)
            }
            RoomEvent::SessionReady { key, epoch, result } => {
                self.handle_session_ready(key, epoch, result).await
            }
            RoomEvent::Connector { key, epoch, event } => {
                self.handle_connector_event(key, epoch, event).await
            }
            RoomEvent::NegotiationDeadline { key, epoch } => {
                self.handle_negotiation_deadline(key, epoch).await
            }
            RoomEvent::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_join(&mut self, peer_id: &str, role: Role, transport: Transport) -> Result<()> {
        if let Err(err) = self.registry.join(peer_id, role) {
            tracing::warn!(
                room_id = %self.room_id,
                peer_id = %peer_id,
                error = %err,
                "join rejected"
            );
            let _ = transport.send(ServerMessage::Error {
                code: "duplicate_participant".to_string(),
                message: err.to_string(),
                retryable: false,
            });
            return Err(err);
        }

        // membership notice goes only to counterparts already in the room
        self.relay.broadcast_except(
            peer_id,
            ServerMessage::ParticipantJoined {
                peer_id: peer_id.to_string(),
                role,
            },
        );

        self.relay.register(peer_id, transport.clone());
        let _ = transport.send(ServerMessage::Joined {
            room_id: self.room_id.clone(),
            participants: self.registry.participant_info(),
        });

        tracing::info!(
            room_id = %self.room_id,
            peer_id = %peer_id,
            role = ?role,
            "participant joined"
        );

        match role {
            Role::Examiner => {
                // pairing waits for the examiner's camera; acquisition runs
                // off the event loop and its result re-enters the queue
                let media = self.media.clone();
                let events = self.events_tx.clone();
                let examiner_id = peer_id.to_string();
                tokio::spawn(async move {
                    let result = media.acquire(MediaKind::Camera).await;
                    let _ = events.send(RoomEvent::MediaReady {
                        peer_id: examiner_id,
                        result,
                    });
                });
            }
            Role::Student => {
                // pairing is driven by whichever side arrives second
                let examiners: Vec<String> = self.examiner_media.keys().cloned().collect();
                for examiner_id in examiners {
                    self.open_session(&examiner_id, peer_id);
                }
            }
        }

        Ok(())
    }

    fn handle_media_ready(&mut self, peer_id: &str, result: Result<MediaHandle>) {
        if !self.registry.contains(peer_id) {
            // left while the capture dialog was pending
            return;
        }

        match result {
            Ok(handle) => {
                tracing::debug!(
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    media_id = %handle.id,
                    "local media acquired"
                );
                self.examiner_media.insert(peer_id.to_string(), handle);
                for student_id in self.registry.participants(Some(Role::Student)) {
                    self.open_session(peer_id, &student_id);
                }
            }
            Err(err) => {
                tracing::warn!(
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    error = %err,
                    "media acquisition failed"
                );
                // surfaced as a retry prompt; no sessions until resolved
                let _ = self.relay.notify(
                    peer_id,
                    ServerMessage::Error {
                        code: "media_unavailable".to_string(),
                        message: err.to_string(),
                        retryable: true,
                    },
                );
            }
        }
    }

    /// Creates the (examiner, student) session and kicks off connector
    /// construction. No-op when a live session already exists for the key.
    fn open_session(&mut self, examiner_id: &str, student_id: &str) {
        let key = SessionKey::new(&self.room_id, examiner_id, student_id);
        if self.sessions.contains_key(&key) {
            return;
        }

        let local_media = match self.examiner_media.get(examiner_id) {
            Some(handle) => handle.clone(),
            None => return,
        };

        self.next_epoch += 1;
        let epoch = self.next_epoch;

        let session = PeerSession::new(
            key.clone(),
            NegotiationRole::Initiator,
            Some(local_media.clone()),
            epoch,
        );
        self.sessions.insert(key.clone(), session);
        tracing::info!(session = %key, "peer session created");

        // forward capability callbacks into the single-writer queue
        let (connector_tx, mut connector_rx) = mpsc::unbounded_channel();
        {
            let events = self.events_tx.clone();
            let key = key.clone();
            tokio::spawn(async move {
                while let Some(event) = connector_rx.recv().await {
                    let forwarded = RoomEvent::Connector {
                        key: key.clone(),
                        epoch,
                        event,
                    };
                    if events.send(forwarded).is_err() {
                        break;
                    }
                }
            });
        }

        let factory = self.factory.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = factory
                .create(NegotiationRole::Initiator, local_media, connector_tx)
                .await;
            let _ = events.send(RoomEvent::SessionReady { key, epoch, result });
        });
    }

    async fn handle_session_ready(
        &mut self,
        key: SessionKey,
        epoch: u64,
        result: Result<Box<dyn PeerConnector>>,
    ) {
        let current = matches!(
            self.sessions.get(&key),
            Some(session) if session.epoch() == epoch
        );
        if !current {
            // the session was closed (or replaced) while the connector was
            // being built; the orphan must not leak
            if let Ok(connector) = result {
                connector.destroy().await;
            }
            return;
        }

        match result {
            Ok(connector) => {
                if let Some(session) = self.sessions.get_mut(&key) {
                    if let Err(err) = session.activate(connector).await {
                        tracing::error!(session = %key, error = %err, "activation failed");
                        self.discard_session(&key).await;
                        return;
                    }
                    tracing::debug!(session = %key, "negotiating");
                }

                // bounded negotiation window
                let events = self.events_tx.clone();
                let timeout = self.negotiation_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = events.send(RoomEvent::NegotiationDeadline { key, epoch });
                });
            }
            Err(err) => {
                tracing::error!(
                    session = %key,
                    error = %err,
                    "peer connection construction failed"
                );
                self.discard_session(&key).await;
            }
        }
    }

    /// Routes one envelope: messages addressed to an examiner feed the pair's
    /// session the hub owns; messages addressed to a student are relayed to
    /// its transport.
    async fn handle_envelope(&mut self, envelope: SignalingEnvelope) -> Result<()> {
        match self.registry.role_of(&envelope.to) {
            Some(Role::Examiner) => {
                let key = SessionKey::new(&self.room_id, &envelope.to, &envelope.from);
                match self.sessions.get_mut(&key) {
                    Some(session) => session.apply_remote_signal(envelope.payload).await,
                    None => Err(HubError::UnknownPeerSession {
                        room_id: self.room_id.clone(),
                        examiner_id: envelope.to,
                        student_id: envelope.from,
                    }),
                }
            }
            Some(Role::Student) => self.relay.send(envelope),
            None => Err(HubError::RecipientNotFound(envelope.to)),
        }
    }

    async fn handle_connector_event(&mut self, key: SessionKey, epoch: u64, event: ConnectorEvent) {
        let current = matches!(
            self.sessions.get(&key),
            Some(session) if session.epoch() == epoch
        );
        if !current {
            tracing::debug!(session = %key, "connector event for stale session ignored");
            return;
        }

        match event {
            ConnectorEvent::SignalProduced(payload) => {
                let envelope = SignalingEnvelope {
                    from: key.examiner_id.clone(),
                    to: key.student_id.clone(),
                    payload,
                };
                if let Err(err) = self.relay.send(envelope) {
                    // recipient raced away between send and delivery; the
                    // envelope is dropped and a rejoin renegotiates
                    tracing::warn!(session = %key, error = %err, "produced signal dropped");
                }
            }
            ConnectorEvent::StreamReceived(media) => {
                if let Some(session) = self.sessions.get_mut(&key) {
                    if session.stream_received(media) {
                        tracing::info!(session = %key, "peer session connected");
                    }
                }
                self.publish_monitor();
            }
            ConnectorEvent::Error(reason) => {
                let err = HubError::NegotiationFailed(reason);
                tracing::error!(session = %key, error = %err, "peer session failed");
                self.discard_session(&key).await;
            }
        }
    }

    async fn handle_negotiation_deadline(&mut self, key: SessionKey, epoch: u64) {
        let stuck = matches!(
            self.sessions.get(&key),
            Some(session) if session.epoch() == epoch
                && session.state() == SessionState::Negotiating
        );
        if !stuck {
            return;
        }

        let err = HubError::NegotiationTimeout(self.negotiation_timeout.as_secs());
        tracing::warn!(session = %key, error = %err, "negotiation timed out");
        self.discard_session(&key).await;
    }

    async fn handle_leave(&mut self, peer_id: &str) {
        let was_member = self.registry.leave(peer_id);
        self.relay.unregister(peer_id);
        self.examiner_media.remove(peer_id);

        // every session involving this participant goes down with it
        let affected: Vec<SessionKey> = self
            .sessions
            .keys()
            .filter(|k| k.examiner_id == peer_id || k.student_id == peer_id)
            .cloned()
            .collect();
        for key in affected {
            if let Some(mut session) = self.sessions.remove(&key) {
                session.close().await;
                tracing::info!(session = %key, "peer session closed");
            }
        }

        if was_member {
            self.relay.broadcast_except(
                peer_id,
                ServerMessage::ParticipantLeft {
                    peer_id: peer_id.to_string(),
                },
            );
            tracing::info!(room_id = %self.room_id, peer_id = %peer_id, "participant left");
        } else {
            tracing::debug!(
                room_id = %self.room_id,
                peer_id = %peer_id,
                "leave for non-member ignored"
            );
        }

        self.publish_monitor();
    }

    /// Removes a session from the arena, marks it failed, and refreshes the
    /// monitoring feed. No automatic retry: a fresh join/leave cycle creates
    /// a new session.
    async fn discard_session(&mut self, key: &SessionKey) {
        if let Some(mut session) = self.sessions.remove(key) {
            session.fail().await;
        }
        self.publish_monitor();
    }

    fn publish_monitor(&self) {
        let entries: Vec<MonitorEntry> = self
            .sessions
            .values()
            .filter(|s| s.state() == SessionState::Connected)
            .filter_map(|s| {
                s.remote_media().map(|media| MonitorEntry {
                    participant_id: s.key().student_id.clone(),
                    media: media.clone(),
                })
            })
            .collect();
        let _ = self.monitor_tx.send(entries);
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            participants: self.registry.participant_info(),
            sessions: self
                .sessions
                .values()
                .map(|s| SessionSnapshot {
                    key: s.key().clone(),
                    role: s.role(),
                    state: s.state(),
                })
                .collect(),
        }
    }
}
