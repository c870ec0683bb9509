use crate::peer::types::{ConnectionState, IceCandidate, SessionDescription};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// ========== СОСТОЯНИЕ ОДНОГО PEER LINK ==========
///
/// Хранится координатором, а не глобально: у каждого соединения своё состояние.
#[derive(Debug, Default)]
pub struct PeerLinkState {
    /// Локальное описание (наш offer или answer)
    pub local_description: Option<SessionDescription>,
    /// Удалённое описание
    pub remote_description: Option<SessionDescription>,
    /// Кандидаты, полученные до установки remote description
    pub pending_remote_candidates: VecDeque<IceCandidate>,
    pub connection_state: ConnectionState,
    /// Наш offer отправлен, answer ещё не получен
    pub has_outstanding_offer: bool,
    /// Локальные треки уже привязаны
    pub tracks_bound: bool,
    /// Когда соединение впервые перешло в connected
    pub connected_at: Option<DateTime<Utc>>,
}

impl PeerLinkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ставит кандидат в очередь, сохраняя порядок прихода
    pub fn queue_candidate(&mut self, candidate: IceCandidate) {
        self.pending_remote_candidates.push_back(candidate);
    }

    /// Забирает все отложенные кандидаты; повторный вызов вернёт пустой список
    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        self.pending_remote_candidates.drain(..).collect()
    }

    /// Очищает описания и очередь кандидатов
    pub fn reset(&mut self) {
        self.local_description = None;
        self.remote_description = None;
        self.pending_remote_candidates.clear();
        self.has_outstanding_offer = false;
        self.tracks_bound = false;
        self.connected_at = None;
        self.connection_state = ConnectionState::Closed;
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        if state == ConnectionState::Connected && self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
        }
        self.connection_state = state;
    }

    /// Сколько секунд соединение было установлено
    pub fn connected_secs(&self) -> Option<i64> {
        self.connected_at
            .map(|at| (Utc::now() - at).num_seconds())
    }
}
