//! webrtc-rs implementation of [`PeerLink`]

use super::{ConnectionState, PeerEvent, PeerLink, PeerLinkFactory, SenderId, SenderInfo};
use crate::config::SessionConfig;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::session::SessionHandle;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

struct SenderSlot {
    kind: TrackKind,
    sender: Arc<RTCRtpSender>,
    track_id: Option<String>,
}

/// Peer link backed by a webrtc-rs `RTCPeerConnection`
pub struct RtcPeerLink {
    /// Unique identifier for this link instance
    connection_id: String,

    /// Local stream id announced for every outbound track
    stream_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Outbound senders by id
    senders: RwLock<HashMap<SenderId, SenderSlot>>,

    /// Sample tracks by local track id (media pumps write into these)
    tracks: RwLock<HashMap<String, Arc<TrackLocalStaticSample>>>,
}

fn ice_servers(config: &SessionConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        }))
        .collect()
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(Error::SdpError(
                "Rollback descriptions are not supported".to_string(),
            ))
        }
    }
    .map_err(|e| Error::SdpError(format!("Failed to parse description: {}", e)))
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

impl RtcPeerLink {
    /// Create a new link
    ///
    /// Candidates, remote tracks, negotiation requests and connection state
    /// changes are forwarded to `events`.
    #[instrument(skip(config, events), fields(room_id = %config.room_id))]
    pub async fn new(config: &SessionConfig, events: SessionHandle) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!(connection_id = %connection_id, "Creating peer link");

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        Self::install_handlers(&peer_connection, events);

        Ok(Self {
            connection_id: connection_id.clone(),
            stream_id: format!("stream-{}", connection_id),
            peer_connection,
            senders: RwLock::new(HashMap::new()),
            tracks: RwLock::new(HashMap::new()),
        })
    }

    fn install_handlers(peer_connection: &RTCPeerConnection, events: SessionHandle) {
        let handle = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let handle = handle.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        handle.peer_event(PeerEvent::LocalCandidate(from_candidate_init(init)));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let handle = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let handle = handle.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        other => {
                            warn!("Ignoring remote track of kind {:?}", other);
                            return;
                        }
                    };
                    handle.peer_event(PeerEvent::RemoteTrack {
                        stream_id: track.stream_id(),
                        track: RemoteTrack {
                            id: track.id(),
                            kind,
                        },
                    });
                })
            },
        ));

        let handle = events.clone();
        peer_connection.on_negotiation_needed(Box::new(move || {
            let handle = handle.clone();
            Box::pin(async move {
                handle.peer_event(PeerEvent::NegotiationNeeded);
            })
        }));

        let handle = events;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let handle = handle.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };
                    handle.peer_event(PeerEvent::ConnectionStateChanged(state));
                })
            },
        ));
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Sample track backing a local track, for writing media into
    pub async fn sample_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.tracks.read().await.get(track_id).cloned()
    }

    async fn sample_track_for(&self, track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
        let mut tracks = self.tracks.write().await;
        tracks
            .entry(track.id.clone())
            .or_insert_with(|| {
                Arc::new(TrackLocalStaticSample::new(
                    codec_for(track.kind),
                    track.id.clone(),
                    self.stream_id.clone(),
                ))
            })
            .clone()
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        debug!(connection_id = %self.connection_id, "Created SDP offer");
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        debug!(connection_id = %self.connection_id, "Created SDP answer");
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        debug!(connection_id = %self.connection_id, "Setting remote description");
        let description = to_rtc_description(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn rollback(&self) -> Result<()> {
        // The engine re-parses the SDP of a rollback, so reuse the pending offer
        let mut rollback = self
            .peer_connection
            .pending_local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local offer to roll back".to_string()))?;
        rollback.sdp_type = RTCSdpType::Rollback;

        self.peer_connection
            .set_local_description(rollback)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to roll back local offer: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        debug!("Adding ICE candidate: {}", candidate.candidate);

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId> {
        info!(track_id = %track.id, kind = %track.kind, "Adding local track");

        let sample = self.sample_track_for(track).await;
        let sender = self
            .peer_connection
            .add_track(sample as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind, e))
            })?;

        let id = uuid::Uuid::new_v4().to_string();
        self.senders.write().await.insert(
            id.clone(),
            SenderSlot {
                kind: track.kind,
                sender,
                track_id: Some(track.id.clone()),
            },
        );

        Ok(id)
    }

    async fn senders(&self) -> Vec<SenderInfo> {
        self.senders
            .read()
            .await
            .iter()
            .map(|(id, slot)| SenderInfo {
                id: id.clone(),
                kind: slot.kind,
                track_id: slot.track_id.clone(),
            })
            .collect()
    }

    async fn replace_track(&self, sender: &SenderId, track: Option<&LocalTrack>) -> Result<()> {
        let replacement = match track {
            Some(track) => Some(self.sample_track_for(track).await as Arc<dyn TrackLocal + Send + Sync>),
            None => None,
        };

        let mut senders = self.senders.write().await;
        let slot = senders
            .get_mut(sender)
            .ok_or_else(|| Error::MediaTrackError(format!("Unknown sender {}", sender)))?;

        slot.sender
            .replace_track(replacement)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to replace track: {}", e)))?;

        slot.track_id = track.map(|t| t.id.clone());
        debug!(sender = %sender, track_id = ?slot.track_id, "Replaced sender track");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!(connection_id = %self.connection_id, "Closing peer link");

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}

/// Factory for [`RtcPeerLink`]
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcPeerLinkFactory;

#[async_trait]
impl PeerLinkFactory for RtcPeerLinkFactory {
    async fn create(&self, config: &SessionConfig, events: SessionHandle) -> Result<Box<dyn PeerLink>> {
        Ok(Box::new(RtcPeerLink::new(config, events).await?))
    }
}
