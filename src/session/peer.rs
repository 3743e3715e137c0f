use std::fmt;

use crate::error::Result;
use crate::rtc::{MediaHandle, NegotiationRole, PeerConnector, SignalPayload};

/// Composite key of a peer session. At most one live session exists per key
/// at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub room_id: String,
    pub examiner_id: String,
    pub student_id: String,
}

impl SessionKey {
    pub fn new(
        room_id: impl Into<String>,
        examiner_id: impl Into<String>,
        student_id: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            examiner_id: examiner_id.into(),
            student_id: student_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}<->{}",
            self.room_id, self.examiner_id, self.student_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Instantiated; the underlying peer connection is still being built.
    Created,
    /// Exchanging negotiation messages. Zero or more round trips.
    Negotiating,
    /// Remote media is live.
    Connected,
    /// Torn down by the coordinator or local teardown. Terminal.
    Closed,
    /// Unrecoverable negotiation error or timeout. Terminal.
    Failed,
}

/// One examiner↔student negotiation.
///
/// Wraps the external peer-connection capability and tracks its lifecycle.
/// Owned exclusively by the room coordinator; all mutation happens on the
/// coordinator task, which is what makes the Closed/Failed guards sufficient
/// against signals racing a teardown.
pub struct PeerSession {
    key: SessionKey,
    role: NegotiationRole,
    state: SessionState,
    epoch: u64,
    connector: Option<Box<dyn PeerConnector>>,
    /// Remote signals that arrived before the connector finished building.
    pending_signals: Vec<SignalPayload>,
    local_media: Option<MediaHandle>,
    remote_media: Option<MediaHandle>,
}

impl PeerSession {
    pub fn new(
        key: SessionKey,
        role: NegotiationRole,
        local_media: Option<MediaHandle>,
        epoch: u64,
    ) -> Self {
        Self {
            key,
            role,
            state: SessionState::Created,
            epoch,
            connector: None,
            pending_signals: Vec::new(),
            local_media,
            remote_media: None,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Generation counter distinguishing this session from earlier sessions
    /// under the same key, so stale timers and connector results are ignored.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn local_media(&self) -> Option<&MediaHandle> {
        self.local_media.as_ref()
    }

    pub fn remote_media(&self) -> Option<&MediaHandle> {
        self.remote_media.as_ref()
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.state, SessionState::Closed | SessionState::Failed)
    }

    /// Attaches the constructed connector and enters `Negotiating`, feeding
    /// it any remote signals that arrived while it was being built.
    pub async fn activate(&mut self, connector: Box<dyn PeerConnector>) -> Result<()> {
        if self.state != SessionState::Created {
            connector.destroy().await;
            return Ok(());
        }

        self.connector = Some(connector);
        self.state = SessionState::Negotiating;

        let queued = std::mem::take(&mut self.pending_signals);
        for payload in queued {
            self.apply_remote_signal(payload).await?;
        }
        Ok(())
    }

    /// Feeds one inbound negotiation message into the session.
    ///
    /// A no-op once the session is Closed or Failed: late envelopes after
    /// teardown must not resurrect it.
    pub async fn apply_remote_signal(&mut self, payload: SignalPayload) -> Result<()> {
        match self.state {
            SessionState::Closed | SessionState::Failed => Ok(()),
            SessionState::Created => {
                self.pending_signals.push(payload);
                Ok(())
            }
            SessionState::Negotiating | SessionState::Connected => match &self.connector {
                Some(connector) => connector.signal(payload).await,
                None => Ok(()),
            },
        }
    }

    /// Records the remote stream. Returns true when this completed the
    /// negotiation (`Negotiating` → `Connected`).
    pub fn stream_received(&mut self, media: MediaHandle) -> bool {
        match self.state {
            SessionState::Negotiating => {
                self.remote_media = Some(media);
                self.state = SessionState::Connected;
                true
            }
            SessionState::Connected => {
                // renegotiated stream replaces the old handle
                self.remote_media = Some(media);
                false
            }
            _ => false,
        }
    }

    /// Coordinator-driven teardown. Idempotent.
    pub async fn close(&mut self) {
        self.shutdown(SessionState::Closed).await;
    }

    /// Marks the session failed and releases its resources. Idempotent.
    pub async fn fail(&mut self) {
        self.shutdown(SessionState::Failed).await;
    }

    async fn shutdown(&mut self, terminal: SessionState) {
        if !self.is_live() {
            return;
        }

        self.state = terminal;
        self.local_media = None;
        self.remote_media = None;
        self.pending_signals.clear();

        if let Some(connector) = self.connector.take() {
            connector.destroy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::rtc::MediaKind;

    /// Connector double that records what it is fed.
    struct RecordingConnector {
        signals: Arc<Mutex<Vec<SignalPayload>>>,
        destroyed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeerConnector for RecordingConnector {
        async fn signal(&self, payload: SignalPayload) -> Result<()> {
            self.signals.lock().unwrap().push(payload);
            Ok(())
        }

        async fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session() -> (PeerSession, Arc<Mutex<Vec<SignalPayload>>>, Arc<AtomicUsize>) {
        let signals = Arc::new(Mutex::new(Vec::new()));
        let destroyed = Arc::new(AtomicUsize::new(0));
        let session = PeerSession::new(
            SessionKey::new("r1", "e1", "s1"),
            NegotiationRole::Initiator,
            Some(MediaHandle::new("cam", MediaKind::Camera)),
            1,
        );
        (session, signals, destroyed)
    }

    fn connector(
        signals: &Arc<Mutex<Vec<SignalPayload>>>,
        destroyed: &Arc<AtomicUsize>,
    ) -> Box<dyn PeerConnector> {
        Box::new(RecordingConnector {
            signals: signals.clone(),
            destroyed: destroyed.clone(),
        })
    }

    fn answer(sdp: &str) -> SignalPayload {
        SignalPayload::Answer {
            sdp: sdp.to_string(),
        }
    }

    #[tokio::test]
    async fn test_activate_enters_negotiating_and_flushes_queued_signals() {
        let (mut session, signals, destroyed) = session();
        assert_eq!(session.state(), SessionState::Created);

        // signal arrives before the connector is ready
        session.apply_remote_signal(answer("early")).await.unwrap();
        assert!(signals.lock().unwrap().is_empty());

        session
            .activate(connector(&signals, &destroyed))
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Negotiating);

        let seen = signals.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], SignalPayload::Answer { ref sdp } if sdp == "early"));
    }

    #[tokio::test]
    async fn test_signals_preserve_order() {
        let (mut session, signals, destroyed) = session();
        session
            .activate(connector(&signals, &destroyed))
            .await
            .unwrap();

        session.apply_remote_signal(answer("m1")).await.unwrap();
        session.apply_remote_signal(answer("m2")).await.unwrap();

        let seen = signals.lock().unwrap();
        let sdps: Vec<_> = seen
            .iter()
            .map(|p| match p {
                SignalPayload::Answer { sdp } => sdp.clone(),
                _ => panic!("unexpected payload"),
            })
            .collect();
        assert_eq!(sdps, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_stream_received_connects_and_populates_remote_media() {
        let (mut session, signals, destroyed) = session();
        session
            .activate(connector(&signals, &destroyed))
            .await
            .unwrap();

        let media = MediaHandle::new("screen-s1", MediaKind::Screen);
        assert!(session.stream_received(media.clone()));
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.remote_media(), Some(&media));

        // a renegotiated stream replaces the handle without a transition
        let replacement = MediaHandle::new("screen-s1-b", MediaKind::Screen);
        assert!(!session.stream_received(replacement.clone()));
        assert_eq!(session.remote_media(), Some(&replacement));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut session, signals, destroyed) = session();
        session
            .activate(connector(&signals, &destroyed))
            .await
            .unwrap();

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        session.close().await;
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_signal_after_close_is_noop() {
        let (mut session, signals, destroyed) = session();
        session
            .activate(connector(&signals, &destroyed))
            .await
            .unwrap();
        session.close().await;

        session.apply_remote_signal(answer("late")).await.unwrap();
        assert!(signals.lock().unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_fail_releases_media_and_connector() {
        let (mut session, signals, destroyed) = session();
        session
            .activate(connector(&signals, &destroyed))
            .await
            .unwrap();
        session.stream_received(MediaHandle::new("screen", MediaKind::Screen));

        session.fail().await;
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.remote_media().is_none());
        assert!(session.local_media().is_none());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        // failing or closing again stays a no-op
        session.close().await;
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_activate_after_close_destroys_orphan_connector() {
        let (mut session, signals, destroyed) = session();
        session.close().await;

        session
            .activate(connector(&signals, &destroyed))
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
