use std::collections::VecDeque;

use async_trait::async_trait;
use conclave::{
    error::{Error, MediaAccessError},
    media::{CaptureRequest, DisplayConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind},
};
use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::gate::Gate;

pub const CAMERA_LABEL: &str = "camera";
pub const MICROPHONE_LABEL: &str = "microphone";
pub const SCREEN_LABEL: &str = "screen";
pub const SCREEN_AUDIO_LABEL: &str = "screen-audio";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureRecord {
    User(CaptureRequest),
    Display(DisplayConstraints),
}

/// Capture devices that hand out synthetic tracks.
#[derive(Default)]
pub struct MemoryDevices {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    user_failure: Option<MediaAccessError>,
    display_failure: Option<MediaAccessError>,
    gates: VecDeque<oneshot::Receiver<()>>,
    records: Vec<CaptureRecord>,
    issued: Vec<MediaTrack>,
}

impl MemoryDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes camera/microphone requests fail until cleared with `None`.
    pub fn fail_user_media(&self, error: Option<MediaAccessError>) {
        self.inner.lock().user_failure = error;
    }

    pub fn fail_display_media(&self, error: Option<MediaAccessError>) {
        self.inner.lock().display_failure = error;
    }

    /// The next capture request, of either kind, waits for the returned gate.
    /// Failures are evaluated after the gate opens.
    pub fn hold_next(&self) -> Gate {
        let (gate, rx) = Gate::new();
        self.inner.lock().gates.push_back(rx);
        gate
    }

    pub fn records(&self) -> Vec<CaptureRecord> {
        self.inner.lock().records.clone()
    }

    /// Every track handed out so far, live or stopped.
    pub fn issued(&self) -> Vec<MediaTrack> {
        self.inner.lock().issued.clone()
    }

    pub fn issued_with_label(&self, label: &str) -> Vec<MediaTrack> {
        self.inner
            .lock()
            .issued
            .iter()
            .filter(|track| track.label() == label)
            .cloned()
            .collect()
    }

    pub fn live_tracks(&self) -> Vec<MediaTrack> {
        self.inner
            .lock()
            .issued
            .iter()
            .filter(|track| track.is_live())
            .cloned()
            .collect()
    }

    fn begin(&self, record: CaptureRecord) -> Option<oneshot::Receiver<()>> {
        let mut inner = self.inner.lock();
        inner.records.push(record);
        inner.gates.pop_front()
    }

    fn issue(&self, tracks: Vec<MediaTrack>) -> MediaStream {
        self.inner.lock().issued.extend(tracks.iter().cloned());
        MediaStream::new(tracks)
    }
}

#[async_trait]
impl MediaDevices for MemoryDevices {
    async fn user_media(&self, request: CaptureRequest) -> Result<MediaStream, Error> {
        if let Some(gate) = self.begin(CaptureRecord::User(request)) {
            let _ = gate.await;
        }
        if let Some(error) = self.inner.lock().user_failure.clone() {
            tracing::debug!("refusing user media: {error}");
            return Err(error.into());
        }

        let mut tracks = vec![];
        if request.wants(TrackKind::Video) {
            tracks.push(MediaTrack::new(TrackKind::Video, CAMERA_LABEL));
        }
        if request.wants(TrackKind::Audio) {
            tracks.push(MediaTrack::new(TrackKind::Audio, MICROPHONE_LABEL));
        }
        Ok(self.issue(tracks))
    }

    async fn display_media(&self, constraints: DisplayConstraints) -> Result<MediaStream, Error> {
        if let Some(gate) = self.begin(CaptureRecord::Display(constraints)) {
            let _ = gate.await;
        }
        if let Some(error) = self.inner.lock().display_failure.clone() {
            tracing::debug!("refusing display media: {error}");
            return Err(error.into());
        }

        let mut tracks = vec![MediaTrack::new(TrackKind::Video, SCREEN_LABEL)];
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, SCREEN_AUDIO_LABEL));
        }
        Ok(self.issue(tracks))
    }
}
