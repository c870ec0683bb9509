//! In-crate fakes for the session collaborators.

use crate::error::{PeerLinkError, SessionError, SignalingError};
use crate::media::MediaDeviceProvider;
use crate::peer::types::{IceCandidate, LocalTrack, SessionDescription};
use crate::peer::{PeerLink, PeerLinkEventSender, PeerLinkFactory};
use crate::signaling::protocol::{ClientFrame, Envelope, SignalingMessage};
use crate::signaling::SignalingChannel;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=offer\r\n";
pub const ANSWER_SDP: &str = "v=0\r\no=- 2 1 IN IP4 127.0.0.1\r\ns=answer\r\n";

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    BindTracks(usize),
    Close,
}

/// Shared view of one fake link, kept by the test after the link is boxed.
#[derive(Default)]
pub struct FakeLinkState {
    calls: Mutex<Vec<Call>>,
    closed: AtomicBool,
    pub fail_offer: AtomicBool,
    pub fail_answer: AtomicBool,
    /// Simulates a teardown that lands while offer/answer creation is pending.
    pub close_while_creating: AtomicBool,
    /// Offer/answer creation waits for `release` instead of resolving at once.
    pub hold_creation: AtomicBool,
    release: Notify,
}

impl FakeLinkState {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Lets one held offer/answer creation resolve.
    pub fn release_creation(&self) {
        self.release.notify_one();
    }

    async fn maybe_hold(&self) {
        if self.hold_creation.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
    }
}

pub struct FakePeerLink {
    id: String,
    shared: Arc<FakeLinkState>,
}

impl FakePeerLink {
    pub fn new(id: &str) -> (Self, Arc<FakeLinkState>) {
        let shared = Arc::new(FakeLinkState::default());
        (
            Self {
                id: id.to_owned(),
                shared: shared.clone(),
            },
            shared,
        )
    }

    fn check_open(&self) -> Result<(), PeerLinkError> {
        if self.shared.is_closed() {
            Err(PeerLinkError::Closed)
        } else {
            Ok(())
        }
    }

    fn maybe_close_midway(&self) {
        if self.shared.close_while_creating.load(Ordering::SeqCst) {
            self.shared.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PeerLink for FakePeerLink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerLinkError> {
        self.check_open()?;
        self.shared.record(Call::CreateOffer);
        self.shared.maybe_hold().await;
        if self.shared.fail_offer.load(Ordering::SeqCst) {
            return Err(PeerLinkError::NegotiationUnavailable("engine busy".into()));
        }
        self.maybe_close_midway();
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerLinkError> {
        self.check_open()?;
        self.shared.record(Call::CreateAnswer);
        self.shared.maybe_hold().await;
        if self.shared.fail_answer.load(Ordering::SeqCst) {
            return Err(PeerLinkError::NegotiationUnavailable("engine busy".into()));
        }
        self.maybe_close_midway();
        Ok(SessionDescription::answer(ANSWER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerLinkError> {
        self.check_open()?;
        self.shared.record(Call::SetLocal(desc));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PeerLinkError> {
        self.check_open()?;
        self.shared.record(Call::SetRemote(desc));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerLinkError> {
        self.check_open()?;
        self.shared.record(Call::AddCandidate(candidate));
        Ok(())
    }

    async fn bind_tracks(&self, tracks: &[LocalTrack]) -> Result<(), PeerLinkError> {
        self.check_open()?;
        self.shared.record(Call::BindTracks(tracks.len()));
        Ok(())
    }

    async fn close(&self) {
        self.shared.record(Call::Close);
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Factory that keeps a handle to every link it creates.
#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<(String, Arc<FakeLinkState>, PeerLinkEventSender)>>,
    pub fail_offer: AtomicBool,
    pub hold_creation: AtomicBool,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn link(&self, index: usize) -> Arc<FakeLinkState> {
        self.created.lock().unwrap()[index].1.clone()
    }

    pub fn link_id(&self, index: usize) -> String {
        self.created.lock().unwrap()[index].0.clone()
    }

    pub fn events(&self, index: usize) -> PeerLinkEventSender {
        self.created.lock().unwrap()[index].2.clone()
    }
}

#[async_trait]
impl PeerLinkFactory for FakeFactory {
    async fn create(
        &self,
        link_id: String,
        events: PeerLinkEventSender,
    ) -> Result<Box<dyn PeerLink>, PeerLinkError> {
        let (link, shared) = FakePeerLink::new(&link_id);
        shared
            .fail_offer
            .store(self.fail_offer.load(Ordering::SeqCst), Ordering::SeqCst);
        shared
            .hold_creation
            .store(self.hold_creation.load(Ordering::SeqCst), Ordering::SeqCst);
        self.created.lock().unwrap().push((link_id, shared, events));
        Ok(Box::new(link))
    }
}

/// Channel that records every outbound frame.
pub struct RecordingChannel {
    sent: Mutex<Vec<ClientFrame>>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
        }
    }
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<ClientFrame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<SignalingMessage> {
        self.sent()
            .into_iter()
            .filter_map(|f| match f {
                ClientFrame::Message {
                    data: Envelope::WebRtc { data },
                    ..
                } => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn offers(&self) -> usize {
        self.messages()
            .iter()
            .filter(|m| matches!(m, SignalingMessage::Offer { .. }))
            .count()
    }

    pub fn answers(&self) -> usize {
        self.messages()
            .iter()
            .filter(|m| matches!(m, SignalingMessage::Answer { .. }))
            .count()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for RecordingChannel {
    async fn send(&self, frame: ClientFrame) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::Closed);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Provider whose devices are never available.
pub struct UnavailableMedia;

#[async_trait]
impl MediaDeviceProvider for UnavailableMedia {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, SessionError> {
        Err(SessionError::Media("no capture device".into()))
    }

    async fn release(&self, _tracks: Vec<LocalTrack>) {}
}
