pub mod protocol;
pub mod websocket;

pub use protocol::{
    ClientFrame, Envelope, InboundEvent, MembershipEvent, ServerFrame, SignalingMessage,
};
pub use websocket::WsSignalingChannel;

use crate::error::SignalingError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Ordered stream of inbound events produced by a channel.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundEvent>;

/// Outbound half of the connection to the rendezvous server.
///
/// Frames are delivered in the order `send` is called. Inbound events are
/// delivered through the [`InboundReceiver`] handed out when the channel is
/// opened; an unexpected transport loss shows up there exactly once as
/// `MembershipEvent::Disconnected`. A local `disconnect` does not produce it.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, frame: ClientFrame) -> Result<(), SignalingError>;

    /// Closes the connection. Idempotent.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}
