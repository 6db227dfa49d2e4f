//! Local capture state and the transitions that change it.
//!
//! The controller does no I/O of its own. A transition that needs a device hands back a
//! [`PendingCapture`] for the caller to run, and the result is fed back through
//! [`MediaTrackController::resolve`]. Only one capturing transition is in flight at a time,
//! later ones queue behind it. Microphone changes never capture and apply immediately.

use std::{collections::VecDeque, sync::Arc};

use conclave::{
    error::{Error, MediaAccessError},
    media::{
        AudioConstraints, CaptureRequest, DisplayConstraints, MediaDevices, MediaStream,
        MediaTrack, TrackKind, VideoConstraints,
    },
    session::DeclaredFlags,
};
use derive_more::Display;
use futures::{channel::oneshot, future::BoxFuture, FutureExt};

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    #[display(fmt = "Microphone({})", _0)]
    Microphone(bool),
    #[display(fmt = "Camera({})", _0)]
    Camera(bool),
    #[display(fmt = "StartScreenShare")]
    StartScreenShare,
    #[display(fmt = "StopScreenShare")]
    StopScreenShare,
    /// The shared surface went away on its own
    #[display(fmt = "ScreenShareEnded")]
    ScreenShareEnded,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Origin {
    User,
    Host,
}

pub type Responder = oneshot::Sender<Result<(), Error>>;

pub struct TransitionRequest {
    pub transition: Transition,
    pub origin: Origin,
    pub rsp: Option<Responder>,
}

impl TransitionRequest {
    pub fn new(transition: Transition, origin: Origin, rsp: Option<Responder>) -> Self {
        Self {
            transition,
            origin,
            rsp,
        }
    }

    pub fn respond(&mut self, result: Result<(), Error>) {
        if let Some(rsp) = self.rsp.take() {
            let _ = rsp.send(result);
        }
    }
}

/// A flag the local participant must declare to the room.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Declaration {
    Audio(bool),
    Video(bool),
    ScreenShare(bool),
}

#[derive(Debug, Default)]
pub struct Effects {
    /// The new active stream, to be previewed and sent on every link
    pub stream: Option<MediaStream>,
    pub declarations: Vec<Declaration>,
    /// A screen track to watch, tagged with its share generation
    pub watch_screen: Option<(u64, MediaTrack)>,
}

pub struct Completion {
    pub request: TransitionRequest,
    pub result: Result<(), Error>,
    pub effects: Effects,
}

pub struct PendingCapture {
    pub generation: u64,
    pub future: BoxFuture<'static, Result<MediaStream, Error>>,
}

pub enum Progress {
    Completed(Completion),
    Capture(PendingCapture),
}

impl Progress {
    fn done(request: TransitionRequest, result: Result<(), Error>, effects: Effects) -> Self {
        Progress::Completed(Completion {
            request,
            result,
            effects,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CaptureKind {
    Camera,
    Display,
    Restore { video: bool },
}

struct InFlight {
    generation: u64,
    request: TransitionRequest,
    kind: CaptureKind,
}

/// What the local user is currently capturing and sending.
#[derive(Debug, Clone)]
pub struct LocalCaptureState {
    active: MediaStream,
    camera_enabled: bool,
    mic_enabled: bool,
    screen_sharing: bool,
    saved_camera: Option<MediaStream>,
    screen: Option<MediaStream>,
    declared: DeclaredFlags,
}

impl LocalCaptureState {
    fn new(active: MediaStream) -> Self {
        let camera_enabled = active.has_live(TrackKind::Video);
        let mic_enabled = active.has_live(TrackKind::Audio);
        Self {
            active,
            camera_enabled,
            mic_enabled,
            screen_sharing: false,
            saved_camera: None,
            screen: None,
            declared: DeclaredFlags {
                audio: mic_enabled,
                video: camera_enabled,
                screen_sharing: false,
            },
        }
    }

    /// The stream sent to peers.
    pub fn active(&self) -> &MediaStream {
        &self.active
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    /// The camera stream held aside while sharing.
    pub fn saved_camera(&self) -> Option<&MediaStream> {
        self.saved_camera.as_ref()
    }

    /// Video as seen by the room: camera or screen.
    pub fn video_reported(&self) -> bool {
        self.camera_enabled || self.screen_sharing
    }

    pub fn declared(&self) -> DeclaredFlags {
        self.declared
    }

    fn declare(&mut self, effects: &mut Effects) {
        let audio = self.mic_enabled;
        let video = self.video_reported();
        let sharing = self.screen_sharing;
        if self.declared.audio != audio {
            effects.declarations.push(Declaration::Audio(audio));
        }
        if self.declared.screen_sharing != sharing {
            effects.declarations.push(Declaration::ScreenShare(sharing));
        }
        if self.declared.video != video {
            effects.declarations.push(Declaration::Video(video));
        }
        self.declared = DeclaredFlags {
            audio,
            video,
            screen_sharing: sharing,
        };
    }

    fn replace_active(&mut self, next: MediaStream, effects: &mut Effects) {
        next.set_enabled(TrackKind::Audio, self.mic_enabled);
        let previous = std::mem::replace(&mut self.active, next);
        let keep = match &self.saved_camera {
            Some(saved) => MediaStream::new(
                self.active
                    .tracks()
                    .iter()
                    .chain(saved.tracks())
                    .cloned()
                    .collect(),
            ),
            None => self.active.clone(),
        };
        previous.stop_unshared(&keep);
        effects.stream = Some(self.active.clone());
    }

    fn set_microphone(&mut self, enabled: bool) -> Effects {
        let mut effects = Effects::default();
        self.mic_enabled = enabled;
        self.active.set_enabled(TrackKind::Audio, enabled);
        self.declare(&mut effects);
        effects
    }

    fn disable_camera(&mut self) -> Effects {
        let mut effects = Effects::default();
        if !self.camera_enabled {
            return effects;
        }
        self.camera_enabled = false;
        if self.screen_sharing {
            if let Some(saved) = self.saved_camera.take() {
                saved.stop_kind(TrackKind::Video);
                self.saved_camera = Some(saved.without(TrackKind::Video));
            }
        } else {
            self.active.stop_kind(TrackKind::Video);
            let next = self.active.without(TrackKind::Video);
            self.replace_active(next, &mut effects);
        }
        self.declare(&mut effects);
        effects
    }

    fn adopt_camera(&mut self, stream: MediaStream) -> Effects {
        let mut effects = Effects::default();
        self.camera_enabled = true;
        self.replace_active(stream, &mut effects);
        self.declare(&mut effects);
        effects
    }

    fn begin_share(&mut self, screen: MediaStream, share: u64) -> Effects {
        let mut effects = Effects::default();
        let composed = MediaStream::new(
            screen
                .video_tracks()
                .chain(self.active.audio_tracks())
                .chain(screen.audio_tracks())
                .cloned()
                .collect(),
        );
        effects.watch_screen = screen
            .track(TrackKind::Video)
            .cloned()
            .map(|track| (share, track));
        self.saved_camera = Some(self.active.clone());
        self.screen = Some(screen);
        self.screen_sharing = true;
        self.replace_active(composed, &mut effects);
        self.declare(&mut effects);
        effects
    }

    /// A saved camera stream that can be restored as-is for the current camera flag.
    fn restorable(&self) -> Option<MediaStream> {
        let saved = self.saved_camera.as_ref()?;
        if !saved.has_live(TrackKind::Audio) {
            return None;
        }
        if self.camera_enabled {
            saved.has_live(TrackKind::Video).then(|| saved.clone())
        } else {
            Some(saved.without(TrackKind::Video))
        }
    }

    /// Audio-only fallback when no camera stream can be restored.
    fn microphone_only(&self) -> MediaStream {
        let source = self.saved_camera.as_ref().unwrap_or(&self.active);
        MediaStream::new(
            source
                .audio_tracks()
                .filter(|track| track.is_live())
                .filter(|track| {
                    !self
                        .screen
                        .as_ref()
                        .map(|screen| screen.contains(track))
                        .unwrap_or_default()
                })
                .cloned()
                .collect(),
        )
    }

    fn end_share(&mut self, restored: MediaStream) -> Effects {
        let mut effects = Effects::default();
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if let Some(saved) = self.saved_camera.take() {
            saved.stop_unshared(&restored);
        }
        self.screen_sharing = false;
        self.camera_enabled = restored.has_live(TrackKind::Video);
        self.replace_active(restored, &mut effects);
        self.declare(&mut effects);
        effects
    }

    fn release(&mut self) {
        self.active.stop();
        if let Some(saved) = self.saved_camera.take() {
            saved.stop();
        }
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
    }
}

pub struct MediaTrackController {
    devices: Arc<dyn MediaDevices>,
    video: VideoConstraints,
    audio: AudioConstraints,
    display: DisplayConstraints,
    state: Option<LocalCaptureState>,
    in_flight: Option<InFlight>,
    queue: VecDeque<TransitionRequest>,
    generation: u64,
    share_generation: u64,
}

impl MediaTrackController {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        video: VideoConstraints,
        audio: AudioConstraints,
        display: DisplayConstraints,
    ) -> Self {
        Self {
            devices,
            video,
            audio,
            display,
            state: None,
            in_flight: None,
            queue: VecDeque::new(),
            generation: 0,
            share_generation: 0,
        }
    }

    /// Builds a camera/microphone capture. The returned future does not borrow the controller.
    pub fn acquire(&self, video: bool, audio: bool) -> BoxFuture<'static, Result<MediaStream, Error>> {
        let request = CaptureRequest {
            video: video.then_some(self.video),
            audio: audio.then_some(self.audio),
        };
        let devices = self.devices.clone();
        async move { devices.user_media(request).await }.boxed()
    }

    pub fn acquire_display(&self) -> BoxFuture<'static, Result<MediaStream, Error>> {
        let constraints = self.display;
        let devices = self.devices.clone();
        async move { devices.display_media(constraints).await }.boxed()
    }

    /// Takes ownership of the session's first capture.
    pub fn initialize(&mut self, stream: MediaStream) -> &LocalCaptureState {
        if let Some(mut previous) = self.state.take() {
            previous.release();
        }
        self.state.insert(LocalCaptureState::new(stream))
    }

    pub fn state(&self) -> Option<&LocalCaptureState> {
        self.state.as_ref()
    }

    pub fn active_stream(&self) -> Option<&MediaStream> {
        self.state.as_ref().map(LocalCaptureState::active)
    }

    pub fn declared(&self) -> Option<DeclaredFlags> {
        self.state.as_ref().map(LocalCaptureState::declared)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True if `transition` would leave the capture state as it is, with nothing in flight
    /// or queued that could change it first.
    pub fn is_settled_at(&self, transition: Transition) -> bool {
        let Some(state) = self.state.as_ref() else {
            return false;
        };
        match transition {
            Transition::Microphone(enabled) => state.mic_enabled == enabled,
            Transition::Camera(enabled) => {
                self.in_flight.is_none() && self.queue.is_empty() && state.camera_enabled == enabled
            }
            _ => false,
        }
    }

    /// Starts `request`, or queues it behind the capture in flight.
    pub fn submit(&mut self, request: TransitionRequest) -> Option<Progress> {
        let immediate = matches!(request.transition, Transition::Microphone(_));
        if self.in_flight.is_some() && !immediate {
            tracing::debug!(transition = %request.transition, "queueing behind capture in flight");
            self.queue.push_back(request);
            return None;
        }
        Some(self.begin(request))
    }

    /// Starts the next queued transition once nothing is in flight.
    pub fn next(&mut self) -> Option<Progress> {
        if self.in_flight.is_some() {
            return None;
        }
        let request = self.queue.pop_front()?;
        Some(self.begin(request))
    }

    /// Feeds back the result of a capture. Results of superseded captures are released.
    pub fn resolve(
        &mut self,
        generation: u64,
        result: Result<MediaStream, Error>,
    ) -> Option<Progress> {
        let matches = self
            .in_flight
            .as_ref()
            .map(|in_flight| in_flight.generation == generation)
            .unwrap_or_default();
        if !matches {
            if let Ok(stream) = result {
                tracing::debug!(generation, "releasing stale capture");
                stream.stop();
            }
            return None;
        }
        let in_flight = self.in_flight.take()?;
        Some(self.finish(in_flight, result))
    }

    /// Reacts to the shared surface ending. Ignores watchers of earlier shares.
    pub fn screen_share_ended(&mut self, share: u64) -> Option<Progress> {
        let sharing = self
            .state
            .as_ref()
            .map(LocalCaptureState::screen_sharing)
            .unwrap_or_default();
        if !sharing || share != self.share_generation {
            return None;
        }
        self.submit(TransitionRequest::new(
            Transition::ScreenShareEnded,
            Origin::User,
            None,
        ))
    }

    /// Stops every local track and drops all pending work.
    /// Returns the requests that were waiting, for the caller to cancel.
    pub fn release(&mut self) -> Vec<TransitionRequest> {
        if let Some(mut state) = self.state.take() {
            state.release();
        }
        self.generation += 1;
        self.in_flight
            .take()
            .map(|in_flight| in_flight.request)
            .into_iter()
            .chain(self.queue.drain(..))
            .collect()
    }

    fn capture(&mut self, request: TransitionRequest, kind: CaptureKind) -> Progress {
        self.generation += 1;
        let generation = self.generation;
        let future = match kind {
            CaptureKind::Camera => self.acquire(true, true),
            CaptureKind::Display => self.acquire_display(),
            CaptureKind::Restore { video } => self.acquire(video, true),
        };
        tracing::debug!(transition = %request.transition, generation, "capture started");
        self.in_flight = Some(InFlight {
            generation,
            request,
            kind,
        });
        Progress::Capture(PendingCapture { generation, future })
    }

    fn begin(&mut self, request: TransitionRequest) -> Progress {
        let Some(state) = self.state.as_mut() else {
            return Progress::done(request, Err(Error::SessionNotActive), Effects::default());
        };

        let transition = request.transition;
        match transition {
            Transition::Microphone(enabled) => {
                let effects = state.set_microphone(enabled);
                Progress::done(request, Ok(()), effects)
            }
            Transition::Camera(false) => {
                let effects = state.disable_camera();
                Progress::done(request, Ok(()), effects)
            }
            Transition::Camera(true) if state.camera_enabled => {
                Progress::done(request, Ok(()), Effects::default())
            }
            Transition::Camera(true) if state.screen_sharing => {
                state.camera_enabled = true;
                let mut effects = Effects::default();
                state.declare(&mut effects);
                Progress::done(request, Ok(()), effects)
            }
            Transition::Camera(true) => self.capture(request, CaptureKind::Camera),
            Transition::StartScreenShare if state.screen_sharing => {
                Progress::done(request, Ok(()), Effects::default())
            }
            Transition::StartScreenShare => self.capture(request, CaptureKind::Display),
            Transition::StopScreenShare | Transition::ScreenShareEnded => {
                if !state.screen_sharing {
                    return Progress::done(request, Ok(()), Effects::default());
                }
                match state.restorable() {
                    Some(saved) => {
                        let effects = state.end_share(saved);
                        Progress::done(request, Ok(()), effects)
                    }
                    None => {
                        let video = state.camera_enabled;
                        self.capture(request, CaptureKind::Restore { video })
                    }
                }
            }
        }
    }

    fn finish(&mut self, in_flight: InFlight, result: Result<MediaStream, Error>) -> Progress {
        let InFlight { request, kind, .. } = in_flight;
        let Some(state) = self.state.as_mut() else {
            if let Ok(stream) = result {
                stream.stop();
            }
            return Progress::done(request, Err(Error::TransitionCancelled), Effects::default());
        };

        match (kind, result) {
            (CaptureKind::Camera, Ok(stream)) => {
                if !stream.has_live(TrackKind::Video) {
                    stream.stop();
                    return Progress::done(
                        request,
                        Err(MediaAccessError::DeviceUnavailable.into()),
                        Effects::default(),
                    );
                }
                let effects = state.adopt_camera(stream);
                Progress::done(request, Ok(()), effects)
            }
            (CaptureKind::Display, Ok(screen)) => {
                if !screen.has_live(TrackKind::Video) {
                    screen.stop();
                    return Progress::done(
                        request,
                        Err(MediaAccessError::Capture("display capture has no video".into()).into()),
                        Effects::default(),
                    );
                }
                self.share_generation += 1;
                let effects = state.begin_share(screen, self.share_generation);
                Progress::done(request, Ok(()), effects)
            }
            (CaptureKind::Restore { .. }, Ok(stream)) => {
                let effects = state.end_share(stream);
                Progress::done(request, Ok(()), effects)
            }
            (CaptureKind::Restore { .. }, Err(e))
                if request.transition == Transition::ScreenShareEnded =>
            {
                tracing::warn!("camera could not be restored after the share ended: {e}");
                let fallback = state.microphone_only();
                let effects = state.end_share(fallback);
                Progress::done(request, Err(e), effects)
            }
            (_, Err(e)) => Progress::done(request, Err(e), Effects::default()),
        }
    }
}
