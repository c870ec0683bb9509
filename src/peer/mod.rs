pub mod connection;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::{RtcPeerLink, RtcPeerLinkFactory};
pub use state::PeerLinkState;
pub use types::{
    ConnectionState, IceCandidate, IceServerKind, LocalTrack, RemoteStream, SdpType,
    ServerConfig, SessionDescription, TrackKind, TransportPolicy,
};

use crate::error::PeerLinkError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Событие от peer link, помеченное id соединения
#[derive(Debug, Clone, PartialEq)]
pub struct PeerLinkEvent {
    pub link_id: String,
    pub kind: PeerLinkEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerLinkEventKind {
    /// Найден локальный кандидат; `None` означает конец сбора
    LocalCandidate(Option<IceCandidate>),
    RemoteTrack(RemoteStream),
    ConnectionState(ConnectionState),
}

pub type PeerLinkEventSender = mpsc::UnboundedSender<PeerLinkEvent>;

/// Возможности одной медиасессии.
///
/// `close` можно звать повторно. На кривом кандидате реализация не паникует,
/// а возвращает ошибку, которую координатор пишет в лог.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn id(&self) -> &str;

    async fn create_offer(&self) -> Result<SessionDescription, PeerLinkError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerLinkError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerLinkError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), PeerLinkError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerLinkError>;

    async fn bind_tracks(&self, tracks: &[LocalTrack]) -> Result<(), PeerLinkError>;

    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Создаёт peer link'и; события каждого соединения уходят в `events`
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(
        &self,
        link_id: String,
        events: PeerLinkEventSender,
    ) -> Result<Box<dyn PeerLink>, PeerLinkError>;
}
