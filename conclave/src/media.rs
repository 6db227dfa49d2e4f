//! Local capture primitives: tracks, streams and the device trait that produces them.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::Error;

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[display(fmt = "audio")]
    Audio,
    #[display(fmt = "video")]
    Video,
}

impl TrackKind {
    pub const ALL: [TrackKind; 2] = [TrackKind::Audio, TrackKind::Video];
}

/// A handle to one captured track.
///
/// Clones share the same underlying track, so stopping or disabling through any clone is
/// observed by all of them. Once stopped, a track never becomes live again.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: Uuid,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    live: watch::Sender<bool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (live, _) = watch::channel(true);
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                live,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// A disabled track stays live but carries silence or black frames.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        *self.inner.live.borrow()
    }

    /// Releases the capture device behind this track. Stopping twice is harmless.
    pub fn stop(&self) {
        self.inner.live.send_replace(false);
    }

    /// Resolves once the track has been stopped, either locally or by the device.
    pub async fn ended(&self) {
        let mut rx = self.inner.live.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

impl core::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// An ordered set of tracks.
///
/// The first track of a kind is the primary track for that kind and is the one sent to peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> + '_ {
        self.tracks.iter().filter(move |track| track.kind() == kind)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> + '_ {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> + '_ {
        self.tracks_of(TrackKind::Video)
    }

    /// The primary track of the given kind.
    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks_of(kind).next()
    }

    pub fn contains(&self, track: &MediaTrack) -> bool {
        self.tracks.iter().any(|t| t == track)
    }

    pub fn has_live(&self, kind: TrackKind) -> bool {
        self.tracks_of(kind).any(MediaTrack::is_live)
    }

    /// A new stream holding every track except those of `kind`.
    pub fn without(&self, kind: TrackKind) -> MediaStream {
        MediaStream::new(
            self.tracks
                .iter()
                .filter(|track| track.kind() != kind)
                .cloned()
                .collect(),
        )
    }

    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        self.tracks_of(kind)
            .for_each(|track| track.set_enabled(enabled));
    }

    pub fn stop_kind(&self, kind: TrackKind) {
        self.tracks_of(kind).for_each(MediaTrack::stop);
    }

    pub fn stop(&self) {
        self.tracks.iter().for_each(MediaTrack::stop);
    }

    /// Stops every track of this stream that `other` does not also hold.
    pub fn stop_unshared(&self, other: &MediaStream) {
        self.tracks
            .iter()
            .filter(|track| !other.contains(track))
            .for_each(MediaTrack::stop);
    }
}

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[display(fmt = "user")]
    User,
    #[display(fmt = "environment")]
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub facing_mode: FacingMode,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            max_width: 1920,
            max_height: 1080,
            facing_mode: FacingMode::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    /// Ask for the shared surface's audio as well.
    pub audio: bool,
}

impl Default for DisplayConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1920,
            ideal_height: 1080,
            audio: true,
        }
    }
}

/// Camera and microphone capture request. A `None` kind is not requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl CaptureRequest {
    pub fn wants(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio.is_some(),
            TrackKind::Video => self.video.is_some(),
        }
    }
}

/// Source of local capture streams.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Captures camera and/or microphone.
    async fn user_media(&self, request: CaptureRequest) -> Result<MediaStream, Error>;

    /// Captures a display surface chosen by the user.
    async fn display_media(&self, constraints: DisplayConstraints) -> Result<MediaStream, Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn stopped_track_resolves_ended() {
        let track = MediaTrack::new(TrackKind::Video, "camera");
        let watcher = track.clone();
        let handle = tokio::spawn(async move { watcher.ended().await });

        assert!(track.is_live());
        track.stop();
        track.stop();
        handle.await.expect("watcher finished");
        assert!(!track.is_live());
    }

    #[test]
    fn clones_share_enabled_flag() {
        let track = MediaTrack::new(TrackKind::Audio, "microphone");
        let other = track.clone();
        other.set_enabled(false);
        assert!(!track.is_enabled());
        assert_eq!(track, other);
    }

    #[test]
    fn primary_track_is_first_of_kind() {
        let mic = MediaTrack::new(TrackKind::Audio, "microphone");
        let screen_audio = MediaTrack::new(TrackKind::Audio, "screen-audio");
        let camera = MediaTrack::new(TrackKind::Video, "camera");
        let stream = MediaStream::new(vec![camera.clone(), mic.clone(), screen_audio.clone()]);

        assert_eq!(stream.track(TrackKind::Audio), Some(&mic));
        assert_eq!(stream.audio_tracks().count(), 2);

        let audio_only = stream.without(TrackKind::Video);
        assert_ne!(audio_only.id(), stream.id());
        assert!(audio_only.track(TrackKind::Video).is_none());
        assert!(audio_only.contains(&screen_audio));
    }

    #[test]
    fn stop_unshared_keeps_shared_tracks() {
        let mic = MediaTrack::new(TrackKind::Audio, "microphone");
        let camera = MediaTrack::new(TrackKind::Video, "camera");
        let screen = MediaTrack::new(TrackKind::Video, "screen");
        let before = MediaStream::new(vec![camera.clone(), mic.clone()]);
        let after = MediaStream::new(vec![screen, mic.clone()]);

        before.stop_unshared(&after);
        assert!(!camera.is_live());
        assert!(mic.is_live());
        assert!(!before.has_live(TrackKind::Video));
    }
}
