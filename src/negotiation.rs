//! Offer/answer и trickle ICE для одного peer link.

use crate::error::{NegotiationError, PeerLinkError};
use crate::peer::ice;
use crate::peer::types::{ConnectionState, IceCandidate, LocalTrack, SdpType, SessionDescription};
use crate::peer::{PeerLink, PeerLinkState};
use crate::signaling::protocol::{ClientFrame, Envelope, SignalingMessage};
use crate::signaling::SignalingChannel;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Владеет одним [`PeerLink`] и применяет к нему всё по очереди.
///
/// Кандидаты, пришедшие раньше remote description, ждут в очереди и
/// применяются в порядке прихода сразу после неё. После каждого `await` на
/// link идёт проверка на закрытие: поздний результат не трогает ни состояние,
/// ни сигнализацию. Состояние меняется только после успешного `await`, так что
/// брошенная на полпути операция ничего не портит.
pub struct NegotiationCoordinator {
    room_id: String,
    peer: String,
    link: Box<dyn PeerLink>,
    state: PeerLinkState,
    signaling: Arc<dyn SignalingChannel>,
    /// Локальные кандидаты, отправленные пиру
    gathered: Vec<IceCandidate>,
    closed: bool,
}

impl NegotiationCoordinator {
    pub fn new(
        room_id: impl Into<String>,
        peer: impl Into<String>,
        link: Box<dyn PeerLink>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            peer: peer.into(),
            link,
            state: PeerLinkState::new(),
            signaling,
            gathered: Vec::new(),
            closed: false,
        }
    }

    pub fn link_id(&self) -> &str {
        self.link.id()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> &PeerLinkState {
        &self.state
    }

    pub fn has_outstanding_offer(&self) -> bool {
        self.state.has_outstanding_offer
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.link.is_closed()
    }

    fn ensure_live(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    async fn send(&self, msg: SignalingMessage) -> Result<(), NegotiationError> {
        self.signaling
            .send(ClientFrame::Message {
                room: self.room_id.clone(),
                data: Envelope::webrtc(msg),
            })
            .await?;
        Ok(())
    }

    /// Создаёт offer, ставит его локально и отправляет пиру
    pub async fn initiate_offer(&mut self) -> Result<(), NegotiationError> {
        self.ensure_live()?;
        if self.state.has_outstanding_offer {
            return Err(NegotiationError::AlreadyNegotiating);
        }

        let offer = self
            .link
            .create_offer()
            .await
            .map_err(|e| creation_failed(e, NegotiationError::OfferCreationFailed))?;
        self.ensure_live()?;

        self.link
            .set_local_description(offer.clone())
            .await
            .map_err(description_rejected)?;
        self.ensure_live()?;

        self.state.local_description = Some(offer.clone());
        self.state.has_outstanding_offer = true;
        info!(link = %self.link_id(), room = %self.room_id, "sending offer");
        self.send(SignalingMessage::from_description(&offer)).await
    }

    /// Ставит чужой offer, применяет очередь кандидатов и отвечает
    pub async fn handle_remote_offer(&mut self, sdp: String) -> Result<(), NegotiationError> {
        self.ensure_live()?;
        if self.state.has_outstanding_offer {
            // glare: наш offer ещё висит, отката нет
            return Err(NegotiationError::AlreadyNegotiating);
        }

        let offer = SessionDescription::offer(sdp);
        self.link
            .set_remote_description(offer.clone())
            .await
            .map_err(description_rejected)?;
        self.ensure_live()?;

        self.state.remote_description = Some(offer);
        self.flush_pending_candidates().await;
        self.answer().await
    }

    /// Повторный answer на уже поставленный offer, если прошлый не получился
    pub async fn retry_answer(&mut self) -> Result<(), NegotiationError> {
        self.ensure_live()?;
        let offer_applied = matches!(
            self.state.remote_description,
            Some(SessionDescription {
                kind: SdpType::Offer,
                ..
            })
        );
        let answered = matches!(
            self.state.local_description,
            Some(SessionDescription {
                kind: SdpType::Answer,
                ..
            })
        );
        if !offer_applied || answered {
            return Err(NegotiationError::NothingToAnswer);
        }
        self.answer().await
    }

    async fn answer(&mut self) -> Result<(), NegotiationError> {
        let answer = self
            .link
            .create_answer()
            .await
            .map_err(|e| creation_failed(e, NegotiationError::AnswerCreationFailed))?;
        self.ensure_live()?;

        self.link
            .set_local_description(answer.clone())
            .await
            .map_err(description_rejected)?;
        self.ensure_live()?;

        self.state.local_description = Some(answer.clone());
        info!(link = %self.link_id(), room = %self.room_id, "sending answer");
        self.send(SignalingMessage::from_description(&answer)).await
    }

    /// Ставит answer на наш висящий offer
    pub async fn handle_remote_answer(&mut self, sdp: String) -> Result<(), NegotiationError> {
        self.ensure_live()?;
        if !self.state.has_outstanding_offer {
            return Err(NegotiationError::UnexpectedAnswer);
        }

        let answer = SessionDescription::answer(sdp);
        self.link
            .set_remote_description(answer.clone())
            .await
            .map_err(description_rejected)?;
        self.ensure_live()?;

        self.state.remote_description = Some(answer);
        self.state.has_outstanding_offer = false;
        info!(link = %self.link_id(), "remote answer applied");
        self.flush_pending_candidates().await;
        Ok(())
    }

    /// Применяет кандидат сразу или кладёт в очередь до remote description
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), NegotiationError> {
        self.ensure_live()?;
        if !ice::is_well_formed(&candidate) {
            warn!(link = %self.link_id(), candidate = %candidate.candidate, "dropping malformed candidate");
            return Ok(());
        }
        let candidate = ice::normalize(candidate);

        if self.state.remote_description.is_none() {
            self.state.queue_candidate(candidate);
            debug!(
                link = %self.link_id(),
                queued = self.state.pending_remote_candidates.len(),
                "candidate queued until remote description"
            );
            return Ok(());
        }

        self.apply_candidate(candidate).await;
        Ok(())
    }

    async fn flush_pending_candidates(&mut self) {
        let pending = self.state.take_pending_candidates();
        if pending.is_empty() {
            return;
        }
        debug!(link = %self.link_id(), count = pending.len(), "flushing queued candidates");
        for candidate in pending {
            if self.is_closed() {
                return;
            }
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        let kind = ice::candidate_type(&candidate);
        if let Err(e) = self.link.add_ice_candidate(candidate).await {
            warn!(link = %self.link_id(), error = %e, "remote candidate rejected");
        } else {
            debug!(link = %self.link_id(), ?kind, "remote candidate applied");
        }
    }

    /// Отправляет локальный кандидат пиру. `None` означает конец сбора
    pub async fn publish_local_candidate(
        &mut self,
        candidate: Option<IceCandidate>,
    ) -> Result<(), NegotiationError> {
        self.ensure_live()?;
        match candidate {
            Some(c) => {
                debug!(link = %self.link_id(), candidate = %c.candidate, "sending local candidate");
                self.send(SignalingMessage::from_candidate(&c)).await?;
                self.gathered.push(c);
                Ok(())
            }
            None => {
                info!(link = %self.link_id(), count = self.gathered.len(), "local candidate gathering complete");
                ice::analyze_candidates(&self.gathered);
                Ok(())
            }
        }
    }

    /// Привязывает локальные треки; повторные вызовы ничего не делают
    pub async fn bind_tracks(&mut self, tracks: &[LocalTrack]) -> Result<(), PeerLinkError> {
        if self.is_closed() {
            return Err(PeerLinkError::Closed);
        }
        if self.state.tracks_bound {
            return Ok(());
        }
        self.link.bind_tracks(tracks).await?;
        if self.is_closed() {
            return Err(PeerLinkError::Closed);
        }
        self.state.tracks_bound = true;
        Ok(())
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        if !self.closed {
            self.state.set_connection_state(state);
        }
    }

    /// Закрывает link и выбрасывает буферы. Повторный вызов безопасен
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let dropped = self.state.pending_remote_candidates.len();
        let connected_secs = self.state.connected_secs();
        self.state.reset();
        self.gathered.clear();
        self.link.close().await;
        info!(link = %self.link_id(), peer = %self.peer, dropped, ?connected_secs, "peer link closed");
    }
}

fn creation_failed(
    err: PeerLinkError,
    wrap: fn(PeerLinkError) -> NegotiationError,
) -> NegotiationError {
    match err {
        PeerLinkError::Closed => NegotiationError::Closed,
        other => wrap(other),
    }
}

fn description_rejected(err: PeerLinkError) -> NegotiationError {
    match err {
        PeerLinkError::Closed => NegotiationError::Closed,
        other => NegotiationError::DescriptionRejected(other),
    }
}
