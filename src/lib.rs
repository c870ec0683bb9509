pub mod config;
pub mod driver;
pub mod error;
pub mod logger;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use driver::{Command, Driver, SessionHandle};
pub use error::{ConfigError, NegotiationError, PeerLinkError, SessionError, SignalingError};
pub use session::{MembershipState, Session, SessionDeps, SessionEvent};

use media::StaticTrackProvider;
use peer::RtcPeerLinkFactory;
use signaling::{SignalingChannel, WsSignalingChannel};
use std::sync::Arc;
use tracing::{error, info};

/// Joins `config.room_id` and keeps the session alive until it is left.
///
/// Ctrl-C requests a leave. A rejected join (no capture device, say) ends the
/// run with an error. Session events are logged; a UI would consume them from
/// a [`SessionHandle`] instead.
pub async fn run(config: ClientConfig) -> anyhow::Result<()> {
    logger::init();
    config.validate()?;

    let (channel, inbound) =
        WsSignalingChannel::connect(&config.signaling_url, config.keepalive).await?;
    let signaling: Arc<dyn SignalingChannel> = Arc::new(channel);

    let deps = SessionDeps {
        signaling: signaling.clone(),
        factory: Arc::new(RtcPeerLinkFactory::new(config.ice.clone())?),
        media: Arc::new(StaticTrackProvider::new(utils::random_id(), true, true)),
    };
    let (driver, mut handle) = driver::start(config.room_id.clone(), deps, inbound);
    let task = tokio::spawn(driver.run());

    handle.join();
    let mut join_error = None;
    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(SessionEvent::Left) | None => break,
                Some(SessionEvent::RequestRejected { request: "join", reason }) => {
                    error!(%reason, "join rejected, leaving");
                    join_error = Some(reason);
                    handle.leave();
                }
                Some(event) => info!(?event, "session event"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, leaving room");
                handle.leave();
            }
        }
    }

    let session = task.await?;
    signaling.disconnect().await;
    info!(room = %session.room_id(), "session finished");
    if let Some(reason) = join_error {
        anyhow::bail!("could not join {}: {reason}", config.room_id);
    }
    Ok(())
}
