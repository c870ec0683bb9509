//! Конечный автомат членства в комнате.
//!
//! Сессия решает, *когда* действует координатор; SDP и кандидаты она сама не
//! разбирает. Владеет ею одна задача драйвера, поэтому все обработчики берут
//! `&mut self`. Драйвер может бросить обработчик на любом `await`.

use crate::error::{NegotiationError, SessionError};
use crate::media::MediaDeviceProvider;
use crate::negotiation::NegotiationCoordinator;
use crate::peer::types::{ConnectionState, LocalTrack, RemoteStream};
use crate::peer::{PeerLinkEvent, PeerLinkEventKind, PeerLinkEventSender, PeerLinkFactory};
use crate::signaling::protocol::{ClientFrame, Envelope, InboundEvent, MembershipEvent, SignalingMessage};
use crate::signaling::SignalingChannel;
use crate::utils::random_id;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Ключ единственного peer link в комнате на двоих
pub const REMOTE_PEER: &str = "remote";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Idle,
    Joining,
    Joined,
    /// В комнате, второй участник ушёл
    JoinedUnbound,
    JoinedConnected,
    Leaving,
    Left,
}

impl MembershipState {
    fn in_room(self) -> bool {
        matches!(
            self,
            Self::Joined | Self::JoinedUnbound | Self::JoinedConnected
        )
    }
}

impl fmt::Display for MembershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::JoinedUnbound => "joined_unbound",
            Self::JoinedConnected => "joined_connected",
            Self::Leaving => "leaving",
            Self::Left => "left",
        };
        f.write_str(s)
    }
}

/// Уведомления для UI
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: MembershipState,
        to: MembershipState,
    },
    RemoteStreamAvailable {
        peer: String,
        stream: RemoteStream,
    },
    ConnectionStateChanged {
        peer: String,
        state: ConnectionState,
    },
    RoomFull {
        room_id: String,
    },
    NegotiationFailed {
        peer: String,
        reason: String,
    },
    /// Команда UI не выполнена; состояние не изменилось
    RequestRejected {
        request: &'static str,
        reason: String,
    },
    Left,
}

/// Зависимости сессии; все живут дольше неё
#[derive(Clone)]
pub struct SessionDeps {
    pub signaling: Arc<dyn SignalingChannel>,
    pub factory: Arc<dyn PeerLinkFactory>,
    pub media: Arc<dyn MediaDeviceProvider>,
}

pub struct Session {
    room_id: String,
    state: MembershipState,
    links: HashMap<String, NegotiationCoordinator>,
    local_tracks: Option<Vec<LocalTrack>>,
    deps: SessionDeps,
    peer_events: PeerLinkEventSender,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    pub fn new(
        room_id: impl Into<String>,
        deps: SessionDeps,
        peer_events: PeerLinkEventSender,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            state: MembershipState::Idle,
            links: HashMap::new(),
            local_tracks: None,
            deps,
            peer_events,
            events,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn state(&self) -> MembershipState {
        self.state
    }

    pub fn link(&self, peer: &str) -> Option<&NegotiationCoordinator> {
        self.links.get(peer)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn has_local_tracks(&self) -> bool {
        self.local_tracks.is_some()
    }

    fn emit(&self, event: SessionEvent) {
        // UI мог уже отписаться
        let _ = self.events.send(event);
    }

    fn transition(&mut self, to: MembershipState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(room = %self.room_id, %from, %to, "membership state changed");
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn report_negotiation_failure(&self, peer: &str, err: &NegotiationError) {
        warn!(room = %self.room_id, peer, error = %err, "negotiation failed");
        self.emit(SessionEvent::NegotiationFailed {
            peer: peer.to_owned(),
            reason: err.to_string(),
        });
    }

    /// Сообщает UI об отклонённой команде
    pub fn notify_rejected(&self, request: &'static str, err: &SessionError) {
        self.emit(SessionEvent::RequestRejected {
            request,
            reason: err.to_string(),
        });
    }

    // ========== ЗАПРОСЫ ОТ ВЫЗЫВАЮЩЕЙ СТОРОНЫ ==========

    /// idle → joining: захватывает локальные треки и просит сервер о комнате
    pub async fn request_join(&mut self) -> Result<(), SessionError> {
        if self.state != MembershipState::Idle {
            return Err(SessionError::InvalidState {
                request: "join",
                state: self.state,
            });
        }

        let tracks = self.deps.media.acquire().await?;
        self.local_tracks = Some(tracks);
        self.transition(MembershipState::Joining);

        let join = ClientFrame::Join {
            room: self.room_id.clone(),
        };
        if let Err(e) = self.deps.signaling.send(join).await {
            error!(room = %self.room_id, error = %e, "join could not be sent");
            self.teardown().await;
            self.transition(MembershipState::Left);
            self.emit(SessionEvent::Left);
            return Err(e.into());
        }
        Ok(())
    }

    /// Любое состояние, кроме left → leaving → left
    pub async fn request_leave(&mut self) -> Result<(), SessionError> {
        if self.state == MembershipState::Left {
            return Err(SessionError::InvalidState {
                request: "leave",
                state: self.state,
            });
        }
        let was_idle = self.state == MembershipState::Idle;
        self.transition(MembershipState::Leaving);

        if !self.links.is_empty() {
            self.send_best_effort(ClientFrame::Message {
                room: self.room_id.clone(),
                data: Envelope::Hangup,
            })
            .await;
        }
        if !was_idle {
            self.send_best_effort(ClientFrame::Leave {
                room: self.room_id.clone(),
            })
            .await;
        }

        self.teardown().await;
        self.transition(MembershipState::Left);
        self.emit(SessionEvent::Left);
        Ok(())
    }

    /// Повторяет answer после `NegotiationFailed` на чужой offer
    pub async fn retry_answer(&mut self) -> Result<(), SessionError> {
        if !self.state.in_room() {
            return Err(SessionError::InvalidState {
                request: "retry_answer",
                state: self.state,
            });
        }
        let coord = self
            .links
            .get_mut(REMOTE_PEER)
            .ok_or_else(|| SessionError::NoPeerLink(REMOTE_PEER.to_owned()))?;
        coord.retry_answer().await?;
        self.transition(MembershipState::JoinedConnected);
        Ok(())
    }

    /// Повторяет свой offer, если прошлый не ушёл
    pub async fn retry_offer(&mut self) -> Result<(), SessionError> {
        if !self.state.in_room() {
            return Err(SessionError::InvalidState {
                request: "retry_offer",
                state: self.state,
            });
        }
        let coord = self
            .links
            .get_mut(REMOTE_PEER)
            .ok_or_else(|| SessionError::NoPeerLink(REMOTE_PEER.to_owned()))?;
        if let Err(e) = coord.initiate_offer().await {
            self.report_negotiation_failure(REMOTE_PEER, &e);
            return Err(e.into());
        }
        self.transition(MembershipState::JoinedConnected);
        Ok(())
    }

    async fn send_best_effort(&self, frame: ClientFrame) {
        if let Err(e) = self.deps.signaling.send(frame).await {
            warn!(room = %self.room_id, error = %e, "signaling send failed during leave");
        }
    }

    // ========== ВХОДЯЩИЕ СОБЫТИЯ ==========

    /// Разбирает один кадр из канала сигнализации
    pub async fn handle_inbound(&mut self, event: InboundEvent) -> Result<(), SessionError> {
        match event {
            InboundEvent::Membership(ev) => {
                self.handle_membership(ev).await;
                Ok(())
            }
            InboundEvent::Signal {
                room_id, envelope, ..
            } => self.handle_signal(room_id.as_deref(), envelope).await,
        }
    }

    pub async fn handle_membership(&mut self, event: MembershipEvent) {
        use MembershipEvent as M;
        use MembershipState as S;

        if self.state == S::Left {
            debug!(event = event.name(), "session already left, ignoring");
            return;
        }
        if let Some(room) = event.room_id() {
            if room != self.room_id {
                warn!(expected = %self.room_id, got = room, event = event.name(), "membership event for another room");
                return;
            }
        }

        match (self.state, event) {
            (S::Joining, M::Joined { peer_id, .. }) => {
                debug!(room = %self.room_id, ?peer_id, "joined room");
                self.transition(S::Joined);
                if let Err(e) = self.ensure_link().await {
                    error!(room = %self.room_id, error = %e, "could not prepare peer link");
                }
            }
            (S::Joined | S::JoinedUnbound, M::OtherJoined { .. }) => {
                if let Err(e) = self.ensure_link().await {
                    error!(room = %self.room_id, error = %e, "could not prepare peer link");
                    return;
                }
                self.transition(S::JoinedConnected);
                if let Some(coord) = self.links.get_mut(REMOTE_PEER) {
                    if let Err(e) = coord.initiate_offer().await {
                        self.report_negotiation_failure(REMOTE_PEER, &e);
                    }
                }
            }
            (S::JoinedConnected, M::Bye { peer_id, .. }) => {
                info!(room = %self.room_id, ?peer_id, "peer left the room");
                self.unbind().await;
            }
            (_, M::Full { .. }) => {
                warn!(room = %self.room_id, "room is full");
                self.deps.signaling.disconnect().await;
                self.teardown().await;
                self.transition(S::Left);
                self.emit(SessionEvent::RoomFull {
                    room_id: self.room_id.clone(),
                });
                self.emit(SessionEvent::Left);
            }
            (_, M::Left { .. }) => {
                self.deps.signaling.disconnect().await;
                self.teardown().await;
                self.transition(S::Left);
                self.emit(SessionEvent::Left);
            }
            (_, M::Disconnected) => {
                warn!(room = %self.room_id, "signaling connection lost");
                self.teardown().await;
                self.transition(S::Left);
                self.emit(SessionEvent::Left);
            }
            (state, event) => {
                debug!(%state, event = event.name(), "event ignored in this state");
            }
        }
    }

    /// Конверт `{cmd, data}` от второго участника
    pub async fn handle_signal(
        &mut self,
        room_id: Option<&str>,
        envelope: Envelope,
    ) -> Result<(), SessionError> {
        if !self.state.in_room() {
            debug!(state = %self.state, "signal outside of a room, ignoring");
            return Ok(());
        }
        if let Some(room) = room_id {
            if room != self.room_id {
                warn!(expected = %self.room_id, got = room, "signal for another room");
                return Ok(());
            }
        }

        let data = match envelope {
            Envelope::Hangup => {
                if self.state == MembershipState::JoinedConnected {
                    info!(room = %self.room_id, "peer hung up");
                    self.unbind().await;
                }
                return Ok(());
            }
            Envelope::WebRtc { data } => data,
        };

        match data {
            SignalingMessage::Offer { sdp } => {
                self.ensure_link().await?;
                let result = match self.links.get_mut(REMOTE_PEER) {
                    Some(coord) => coord.handle_remote_offer(sdp).await,
                    None => return Err(SessionError::NoPeerLink(REMOTE_PEER.to_owned())),
                };
                match result {
                    Ok(()) => {
                        self.transition(MembershipState::JoinedConnected);
                        Ok(())
                    }
                    Err(e) => {
                        self.report_negotiation_failure(REMOTE_PEER, &e);
                        Err(e.into())
                    }
                }
            }
            SignalingMessage::Answer { sdp } => {
                let coord = self
                    .links
                    .get_mut(REMOTE_PEER)
                    .ok_or_else(|| SessionError::NoPeerLink(REMOTE_PEER.to_owned()))?;
                if let Err(e) = coord.handle_remote_answer(sdp).await {
                    self.report_negotiation_failure(REMOTE_PEER, &e);
                    return Err(e.into());
                }
                Ok(())
            }
            msg @ SignalingMessage::Candidate { .. } => {
                let Some(coord) = self.links.get_mut(REMOTE_PEER) else {
                    warn!(room = %self.room_id, "candidate without a peer link, dropping");
                    return Err(SessionError::NoPeerLink(REMOTE_PEER.to_owned()));
                };
                if let Some(candidate) = msg.into_candidate() {
                    coord.add_remote_candidate(candidate).await?;
                }
                Ok(())
            }
        }
    }

    /// Колбэк, пересланный из peer link
    pub async fn handle_peer_event(&mut self, event: PeerLinkEvent) {
        let Some((peer, coord)) = self
            .links
            .iter_mut()
            .find(|(_, c)| c.link_id() == event.link_id)
        else {
            debug!(link = %event.link_id, "event from a closed or replaced link, ignoring");
            return;
        };
        let peer = peer.clone();

        match event.kind {
            PeerLinkEventKind::LocalCandidate(candidate) => {
                if let Err(e) = coord.publish_local_candidate(candidate).await {
                    warn!(link = %event.link_id, error = %e, "local candidate not sent");
                }
            }
            PeerLinkEventKind::RemoteTrack(stream) => {
                info!(%peer, track = %stream.track_id, kind = ?stream.kind, "remote track available");
                self.emit(SessionEvent::RemoteStreamAvailable { peer, stream });
            }
            PeerLinkEventKind::ConnectionState(state) => {
                coord.set_connection_state(state);
                info!(%peer, %state, "peer connection state");
                self.emit(SessionEvent::ConnectionStateChanged { peer, state });
            }
        }
    }

    // ========== ВНУТРЕННЕЕ ==========

    /// Создаёт peer link, если его нет, и привязывает локальные треки
    async fn ensure_link(&mut self) -> Result<(), SessionError> {
        if !self.links.contains_key(REMOTE_PEER) {
            let link_id = random_id();
            let link = self
                .deps
                .factory
                .create(link_id.clone(), self.peer_events.clone())
                .await?;
            let coord = NegotiationCoordinator::new(
                self.room_id.clone(),
                REMOTE_PEER,
                link,
                self.deps.signaling.clone(),
            );
            info!(room = %self.room_id, link = %link_id, "peer link created");
            self.links.insert(REMOTE_PEER.to_owned(), coord);
        }

        let tracks = self.local_tracks.as_deref().unwrap_or_default();
        if let Some(coord) = self.links.get_mut(REMOTE_PEER) {
            coord.bind_tracks(tracks).await?;
        }
        Ok(())
    }

    /// joined_connected → joined_unbound: второй ушёл, мы остаёмся
    async fn unbind(&mut self) {
        self.close_links().await;
        self.transition(MembershipState::JoinedUnbound);
    }

    async fn close_links(&mut self) {
        for (_, mut coord) in self.links.drain() {
            coord.close().await;
        }
    }

    async fn teardown(&mut self) {
        self.close_links().await;
        if let Some(tracks) = self.local_tracks.take() {
            self.deps.media.release(tracks).await;
        }
    }
}
