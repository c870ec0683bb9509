//! Error types for each layer of the session stack.

use thiserror::Error;

/// Failures of the signaling transport or of its wire vocabulary.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Malformed or unexpected frame. Always dropped, never fatal.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("signaling channel closed")]
    Closed,
}

impl SignalingError {
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }
}

/// Failures reported by a peer link implementation.
#[derive(Debug, Error)]
pub enum PeerLinkError {
    /// The negotiation engine could not produce an offer or answer.
    #[error("negotiation unavailable: {0}")]
    NegotiationUnavailable(String),

    #[error("description rejected: {0}")]
    DescriptionRejected(String),

    #[error("candidate rejected: {0}")]
    CandidateRejected(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("peer link closed")]
    Closed,
}

/// Errors surfaced by the negotiation coordinator.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// An offer is already outstanding on this link.
    #[error("an offer is already outstanding")]
    AlreadyNegotiating,

    #[error("offer creation failed: {0}")]
    OfferCreationFailed(#[source] PeerLinkError),

    #[error("answer creation failed: {0}")]
    AnswerCreationFailed(#[source] PeerLinkError),

    /// An answer arrived with no offer outstanding.
    #[error("unexpected answer: no offer is outstanding")]
    UnexpectedAnswer,

    /// No remote offer is applied, so there is nothing to answer.
    #[error("no remote offer to answer")]
    NothingToAnswer,

    #[error("remote description rejected: {0}")]
    DescriptionRejected(#[source] PeerLinkError),

    /// The link was closed while the operation was in flight.
    #[error("peer link closed")]
    Closed,

    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),
}

/// Errors returned by caller-initiated session requests.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request `{request}` is not valid in state {state}")]
    InvalidState {
        request: &'static str,
        state: crate::session::MembershipState,
    },

    #[error("no peer link for `{0}`")]
    NoPeerLink(String),

    #[error("local media unavailable: {0}")]
    Media(String),

    #[error(transparent)]
    PeerLink(#[from] PeerLinkError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
}
