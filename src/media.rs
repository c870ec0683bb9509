//! Local media collaborator.
//!
//! The session never enumerates devices. It asks the provider for a track set
//! once per membership and hands it back exactly once on teardown.

use crate::error::SessionError;
use crate::peer::types::{LocalTrack, TrackKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[async_trait]
pub trait MediaDeviceProvider: Send + Sync {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, SessionError>;

    /// Returns ownership of the tracks to the provider.
    async fn release(&self, tracks: Vec<LocalTrack>);
}

/// Provider that hands out a fixed audio+video track pair.
///
/// Samples are written by whoever owns the capture pipeline through
/// `RtcPeerLink::local_track`.
pub struct StaticTrackProvider {
    stream_id: String,
    audio: bool,
    video: bool,
    outstanding: AtomicUsize,
}

impl StaticTrackProvider {
    pub fn new(stream_id: impl Into<String>, audio: bool, video: bool) -> Self {
        Self {
            stream_id: stream_id.into(),
            audio,
            video,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Number of track sets acquired but not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDeviceProvider for StaticTrackProvider {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, SessionError> {
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(LocalTrack {
                id: "audio".into(),
                stream_id: self.stream_id.clone(),
                kind: TrackKind::Audio,
            });
        }
        if self.video {
            tracks.push(LocalTrack {
                id: "video".into(),
                stream_id: self.stream_id.clone(),
                kind: TrackKind::Video,
            });
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        debug!(count = tracks.len(), "local tracks acquired");
        Ok(tracks)
    }

    async fn release(&self, tracks: Vec<LocalTrack>) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        debug!(count = tracks.len(), "local tracks released");
    }
}
