//! Production peer-connection capability backed by the `webrtc` crate.
//!
//! The hub terminates the examiner side of every pair, so connectors built
//! here receive the student's display capture. Local descriptions are
//! produced non-trickle (the full SDP is emitted once ICE gathering
//! completes); inbound trickle candidates from the remote side are accepted
//! and queued until the remote description is set.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

use super::{
    ConnectorEvent, ConnectorEventSender, MediaHandle, MediaKind, NegotiationRole, PeerConnector,
    PeerConnectorFactory, SignalPayload,
};
use crate::config::RtcConfig;
use crate::error::{HubError, Result};

/// Builds the shared WebRTC API with VP8 video and Opus audio registered.
fn create_api() -> Arc<API> {
    let mut media_engine = MediaEngine::default();

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .expect("Failed to register VP8");

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .expect("Failed to register Opus");

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .expect("Failed to register interceptors");

    Arc::new(
        APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build(),
    )
}

pub struct WebRtcConnectorFactory {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnectorFactory {
    pub fn new(config: &RtcConfig) -> Self {
        let mut ice_servers = vec![RTCIceServer {
            urls: config.stun_urls.clone(),
            ..Default::default()
        }];

        if let Some(turn_url) = &config.turn_url {
            ice_servers.push(RTCIceServer {
                urls: vec![turn_url.clone()],
                username: config.turn_username.clone().unwrap_or_default(),
                credential: config.turn_credential.clone().unwrap_or_default(),
                ..Default::default()
            });
        }

        Self {
            api: create_api(),
            ice_servers,
        }
    }
}

#[async_trait]
impl PeerConnectorFactory for WebRtcConnectorFactory {
    async fn create(
        &self,
        role: NegotiationRole,
        local_media: MediaHandle,
        events: ConnectorEventSender,
    ) -> Result<Box<dyn PeerConnector>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);

        peer_connection
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await?;
        peer_connection
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await?;

        // Remote tracks surface as stream-received events. Students publish
        // display capture; anything else is treated as camera media.
        {
            let events = events.clone();
            peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
                let events = events.clone();
                let kind = if track.kind() == RTPCodecType::Video {
                    MediaKind::Screen
                } else {
                    MediaKind::Camera
                };
                let handle = MediaHandle::new(track.id(), kind);
                Box::pin(async move {
                    let _ = events.send(ConnectorEvent::StreamReceived(handle));
                })
            }));
        }

        {
            let events = events.clone();
            peer_connection.on_peer_connection_state_change(Box::new(move |state| {
                let events = events.clone();
                Box::pin(async move {
                    if state == RTCPeerConnectionState::Failed {
                        let _ = events.send(ConnectorEvent::Error(
                            "peer connection entered failed state".to_string(),
                        ));
                    }
                })
            }));
        }

        let connector = WebRtcConnector {
            peer_connection,
            events,
            pending_candidates: Mutex::new(Vec::new()),
        };

        if role == NegotiationRole::Initiator {
            connector.emit_offer().await?;
        }

        Ok(Box::new(connector))
    }
}

struct WebRtcConnector {
    peer_connection: Arc<RTCPeerConnection>,
    events: ConnectorEventSender,
    /// Trickle candidates received before the remote description is set.
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl WebRtcConnector {
    /// Produces the single initiation offer with all candidates bundled in.
    async fn emit_offer(&self) -> Result<()> {
        let offer = self.peer_connection.create_offer(None).await?;
        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection.set_local_description(offer).await?;
        let _ = gather_complete.recv().await;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| HubError::peer_connection("local description missing after gather"))?;

        let _ = self
            .events
            .send(ConnectorEvent::SignalProduced(SignalPayload::Offer {
                sdp: local.sdp,
            }));
        Ok(())
    }

    async fn emit_answer(&self) -> Result<()> {
        let answer = self.peer_connection.create_answer(None).await?;
        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| HubError::peer_connection("local description missing after gather"))?;

        let _ = self
            .events
            .send(ConnectorEvent::SignalProduced(SignalPayload::Answer {
                sdp: local.sdp,
            }));
        Ok(())
    }

    async fn flush_pending_candidates(&self) -> Result<()> {
        let candidates = {
            let mut pending = self.pending_candidates.lock().await;
            std::mem::take(&mut *pending)
        };

        for candidate in candidates {
            if let Err(e) = self.peer_connection.add_ice_candidate(candidate).await {
                tracing::warn!(error = %e, "failed to add queued ICE candidate");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn signal(&self, payload: SignalPayload) -> Result<()> {
        match payload {
            SignalPayload::Offer { sdp } => {
                let offer = RTCSessionDescription::offer(sdp)
                    .map_err(|e| HubError::peer_connection(format!("bad offer SDP: {}", e)))?;
                self.peer_connection.set_remote_description(offer).await?;
                self.flush_pending_candidates().await?;
                self.emit_answer().await
            }
            SignalPayload::Answer { sdp } => {
                let answer = RTCSessionDescription::answer(sdp)
                    .map_err(|e| HubError::peer_connection(format!("bad answer SDP: {}", e)))?;
                self.peer_connection.set_remote_description(answer).await?;
                self.flush_pending_candidates().await
            }
            SignalPayload::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                let init = RTCIceCandidateInit {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                    username_fragment: None,
                };

                if self.peer_connection.remote_description().await.is_none() {
                    let mut pending = self.pending_candidates.lock().await;
                    pending.push(init);
                    tracing::debug!(
                        queue_size = pending.len(),
                        "ICE candidate queued until remote description is set"
                    );
                    return Ok(());
                }

                self.peer_connection.add_ice_candidate(init).await?;
                Ok(())
            }
        }
    }

    async fn destroy(&self) {
        if let Err(e) = self.peer_connection.close().await {
            tracing::debug!(error = %e, "error closing peer connection");
        }
    }
}
