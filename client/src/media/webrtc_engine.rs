//! WebRTC Engine
//!
//! One audio peer connection per call, built on webrtc-rs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sb_common::{IceCandidate, IceServer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine as Codecs,
        APIBuilder, API,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp::packet::Packet,
    rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType},
    track::track_local::{track_local_static_rtp::TrackLocalStaticRTP, TrackLocal, TrackLocalWriter},
    track::track_remote::TrackRemote,
};

use super::{EngineEvent, MediaConnectionState, MediaEngine, MediaError};

const OPUS_PAYLOAD_TYPE: u8 = 111;

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// webrtc-rs backed [`MediaEngine`].
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
    local_track: Arc<TrackLocalStaticRTP>,
    muted: AtomicBool,
}

impl WebRtcEngine {
    /// Create a peer connection with a local Opus track.
    ///
    /// Gathered candidates and state changes are pushed to `events`.
    pub async fn new(
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self, MediaError> {
        let api = Self::build_api()?;
        let peer_connection = Arc::new(
            api.new_peer_connection(Self::rtc_config(ice_servers))
                .await
                .map_err(|e| MediaError::PeerConnection(e.to_string()))?,
        );

        Self::install_handlers(&peer_connection, events);

        let local_track = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "audio".to_string(),
            "switchboard-call".to_string(),
        ));
        peer_connection
            .add_track(local_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MediaError::Track(e.to_string()))?;

        info!("WebRTC peer connection created");

        Ok(Self {
            peer_connection,
            local_track,
            muted: AtomicBool::new(false),
        })
    }

    fn build_api() -> Result<API, MediaError> {
        let mut codecs = Codecs::default();
        codecs
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| MediaError::Api(e.to_string()))?;

        let registry = register_default_interceptors(Registry::new(), &mut codecs)
            .map_err(|e| MediaError::Api(e.to_string()))?;

        Ok(APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build())
    }

    fn rtc_config(ice_servers: &[IceServer]) -> RTCConfiguration {
        let servers = if ice_servers.is_empty() {
            IceServer::default_stun()
        } else {
            ice_servers.to_vec()
        };

        RTCConfiguration {
            ice_servers: servers
                .into_iter()
                .map(|s| RTCIceServer {
                    urls: s.urls,
                    username: s.username.unwrap_or_default(),
                    credential: s.credential.unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn install_handlers(pc: &RTCPeerConnection, events: mpsc::UnboundedSender<EngineEvent>) {
        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // `None` marks the end of gathering
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(EngineEvent::LocalCandidate(from_init(init)));
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize local candidate"),
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                info!(state = %s, "Peer connection state changed");
                let state = match s {
                    RTCPeerConnectionState::Connected => MediaConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        MediaConnectionState::Disconnected
                    }
                    RTCPeerConnectionState::Failed => MediaConnectionState::Failed,
                    _ => MediaConnectionState::Connecting,
                };
                let _ = events.send(EngineEvent::StateChanged(state));
            })
        }));

        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                Box::pin(async move {
                    info!(
                        kind = %track.kind(),
                        codec = %track.codec().capability.mime_type,
                        "Remote track received"
                    );
                })
            },
        ));
    }

    /// Local audio track, for the capture pipeline.
    pub fn local_track(&self) -> Arc<TrackLocalStaticRTP> {
        self.local_track.clone()
    }

    /// Whether local audio is currently suppressed.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Write one encoded RTP packet, dropping it while muted.
    pub async fn write_audio(&self, packet: &Packet) -> Result<(), MediaError> {
        if self.is_muted() {
            return Ok(());
        }
        self.local_track
            .write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(|e| MediaError::Track(e.to_string()))
    }

    async fn set_remote(&self, description: RTCSessionDescription) -> Result<(), MediaError> {
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| MediaError::Sdp(e.to_string()))?;
        debug!("Remote description set");
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<String, MediaError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| MediaError::Sdp(e.to_string()))?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| MediaError::Sdp(e.to_string()))?;
        Ok(offer.sdp)
    }

    async fn apply_remote_offer(&self, sdp: &str) -> Result<(), MediaError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| MediaError::Sdp(e.to_string()))?;
        self.set_remote(offer).await
    }

    async fn create_answer(&self) -> Result<String, MediaError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| MediaError::Sdp(e.to_string()))?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| MediaError::Sdp(e.to_string()))?;
        Ok(answer.sdp)
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<(), MediaError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| MediaError::Sdp(e.to_string()))?;
        self.set_remote(answer).await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.peer_connection
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(|e| MediaError::Ice(e.to_string()))
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| MediaError::PeerConnection(e.to_string()))?;
        info!("WebRTC disconnected");
        Ok(())
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}
