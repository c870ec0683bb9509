use crate::config::IceConfig;
use crate::error::PeerLinkError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::types::{
    ConnectionState, IceCandidate, LocalTrack, RemoteStream, SdpType, SessionDescription,
    TrackKind, TransportPolicy,
};
use crate::peer::{PeerLink, PeerLinkEvent, PeerLinkEventKind, PeerLinkEventSender, PeerLinkFactory};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Peer link поверх `webrtc::RTCPeerConnection`
pub struct RtcPeerLink {
    id: String,
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
    local_tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

impl RtcPeerLink {
    /// Создаём peer и подписываемся на его события
    pub async fn new(
        api: &API,
        config: RTCConfiguration,
        id: String,
        events: PeerLinkEventSender,
    ) -> Result<Self, PeerLinkError> {
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| PeerLinkError::NegotiationUnavailable(e.to_string()))?,
        );

        attach_handlers(&pc, &id, events);

        Ok(Self {
            id,
            pc,
            closed: AtomicBool::new(false),
            local_tracks: Mutex::new(Vec::new()),
        })
    }

    fn ensure_open(&self) -> Result<(), PeerLinkError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PeerLinkError::Closed)
        } else {
            Ok(())
        }
    }

    /// Трек, в который провайдер медиа пишет семплы
    pub async fn local_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks
            .lock()
            .await
            .iter()
            .find(|t| t.id() == track_id)
            .cloned()
    }
}

fn attach_handlers(pc: &Arc<RTCPeerConnection>, link_id: &str, events: PeerLinkEventSender) {
    // Обработчик для локальных кандидатов (Trickle-ICE)
    let tx = events.clone();
    let id = link_id.to_owned();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        let id = id.clone();
        Box::pin(async move {
            let candidate = match cand {
                Some(c) => {
                    dump_candidate("LOCAL", &c);
                    match c.to_json() {
                        Ok(init) => Some(IceCandidate::from(init)),
                        Err(e) => {
                            warn!(link = %id, error = %e, "failed to serialize local candidate");
                            return;
                        }
                    }
                }
                None => None,
            };
            let _ = tx.send(PeerLinkEvent {
                link_id: id,
                kind: PeerLinkEventKind::LocalCandidate(candidate),
            });
        })
    }));

    let tx = events.clone();
    let id = link_id.to_owned();
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let tx = tx.clone();
        let id = id.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                other => {
                    warn!(link = %id, kind = ?other, "ignoring remote track of unknown kind");
                    return;
                }
            };
            let stream = RemoteStream {
                stream_id: track.stream_id(),
                track_id: track.id(),
                kind,
            };
            info!(link = %id, stream = %stream.stream_id, track = %stream.track_id, "remote track");
            let _ = tx.send(PeerLinkEvent {
                link_id: id,
                kind: PeerLinkEventKind::RemoteTrack(stream),
            });
        })
    }));

    // слабая ссылка, чтобы обработчик не держал pc живым
    let pc_stats: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    let tx = events;
    let id = link_id.to_owned();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        debug!(link = %id, state = %st, "peer connection state changed");

        if matches!(
            st,
            RTCPeerConnectionState::Connected | RTCPeerConnectionState::Failed
        ) {
            if let Some(pc) = pc_stats.upgrade() {
                let moment = if st == RTCPeerConnectionState::Connected {
                    "CONNECTED"
                } else {
                    "FAILED"
                };
                tokio::spawn(async move {
                    dump_selected_pair(&pc, moment).await;
                });
            }
        }

        let _ = tx.send(PeerLinkEvent {
            link_id: id.clone(),
            kind: PeerLinkEventKind::ConnectionState(map_state(st)),
        });
        Box::pin(async {})
    }));
}

fn map_state(st: RTCPeerConnectionState) -> ConnectionState {
    match st {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, PeerLinkError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(PeerLinkError::DescriptionRejected(format!(
            "unsupported sdp type {other}"
        ))),
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, PeerLinkError> {
    let res = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    res.map_err(|e| PeerLinkError::DescriptionRejected(e.to_string()))
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

#[async_trait]
impl PeerLink for RtcPeerLink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerLinkError> {
        self.ensure_open()?;
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerLinkError::NegotiationUnavailable(e.to_string()))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerLinkError> {
        self.ensure_open()?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerLinkError::NegotiationUnavailable(e.to_string()))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerLinkError> {
        self.ensure_open()?;
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| PeerLinkError::DescriptionRejected(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PeerLinkError> {
        self.ensure_open()?;
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| PeerLinkError::DescriptionRejected(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerLinkError> {
        self.ensure_open()?;
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| PeerLinkError::CandidateRejected(e.to_string()))
    }

    async fn bind_tracks(&self, tracks: &[LocalTrack]) -> Result<(), PeerLinkError> {
        self.ensure_open()?;

        if tracks.is_empty() {
            // без своих треков всё равно просим у собеседника аудио и видео
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                self.pc
                    .add_transceiver_from_kind(
                        kind,
                        Some(RTCRtpTransceiverInit {
                            direction: RTCRtpTransceiverDirection::Recvonly,
                            send_encodings: vec![],
                        }),
                    )
                    .await
                    .map_err(|e| PeerLinkError::Media(e.to_string()))?;
            }
            debug!(link = %self.id, "no local tracks, added recvonly transceivers");
            return Ok(());
        }

        let mut bound = self.local_tracks.lock().await;
        for track in tracks {
            let local = Arc::new(TrackLocalStaticSample::new(
                codec_for(track.kind),
                track.id.clone(),
                track.stream_id.clone(),
            ));
            self.pc
                .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| PeerLinkError::Media(e.to_string()))?;
            bound.push(local);
        }
        debug!(link = %self.id, count = tracks.len(), "bound local tracks");
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.local_tracks.lock().await.clear();
        if let Err(e) = self.pc.close().await {
            warn!(link = %self.id, error = %e, "error while closing peer connection");
        }
        info!(link = %self.id, "peer link closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Создаёт `RtcPeerLink` с общей ICE конфигурацией
pub struct RtcPeerLinkFactory {
    api: API,
    ice: IceConfig,
}

impl RtcPeerLinkFactory {
    pub fn new(ice: IceConfig) -> Result<Self, PeerLinkError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerLinkError::Media(e.to_string()))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| PeerLinkError::Media(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice })
    }
}

#[async_trait]
impl PeerLinkFactory for RtcPeerLinkFactory {
    async fn create(
        &self,
        link_id: String,
        events: PeerLinkEventSender,
    ) -> Result<Box<dyn PeerLink>, PeerLinkError> {
        let link = RtcPeerLink::new(&self.api, rtc_config(&self.ice), link_id, events).await?;
        Ok(Box::new(link))
    }
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(ice: &IceConfig) -> RTCConfiguration {
    let ice_servers = ice
        .servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_transport_policy: match ice.transport_policy {
            TransportPolicy::All => RTCIceTransportPolicy::All,
            TransportPolicy::Relay => RTCIceTransportPolicy::Relay,
        },
        ice_candidate_pool_size: ice.candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}
