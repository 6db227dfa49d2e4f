//! The session surface consumed by a UI layer.

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    id::{PeerId, RoomId},
    media::{MediaStream, TrackKind},
};

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    #[display(fmt = "Idle")]
    Idle,
    #[display(fmt = "AcquiringMedia")]
    AcquiringMedia,
    #[display(fmt = "ConnectingTransport")]
    ConnectingTransport,
    #[display(fmt = "Joining")]
    Joining,
    #[display(fmt = "Active")]
    Active,
    #[display(fmt = "Leaving")]
    Leaving,
    #[display(fmt = "Terminated")]
    Terminated,
}

impl SessionState {
    /// States in which the session holds local media and expects room traffic.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::ConnectingTransport | SessionState::Joining | SessionState::Active
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Terminated)
    }
}

/// Presentation state of one member of the room, local or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: PeerId,
    pub display_name: String,
    pub is_host: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub is_screen_sharing: bool,
}

impl Participant {
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_host: false,
            audio_enabled: true,
            video_enabled: true,
            is_screen_sharing: false,
        }
    }

    /// Whether the participant is sending a visible picture, camera or screen.
    pub fn shows_video(&self) -> bool {
        self.video_enabled || self.is_screen_sharing
    }

    pub fn track_enabled(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio_enabled,
            TrackKind::Video => self.shows_video(),
        }
    }
}

/// Flags a participant declares to the room about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredFlags {
    pub audio: bool,
    pub video: bool,
    pub screen_sharing: bool,
}

impl Default for DeclaredFlags {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            screen_sharing: false,
        }
    }
}

/// Room-wide policy toggled by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterControls {
    #[serde(default = "enabled")]
    pub control_all_audio: bool,
    #[serde(default = "enabled")]
    pub control_all_video: bool,
}

fn enabled() -> bool {
    true
}

impl Default for MasterControls {
    fn default() -> Self {
        Self {
            control_all_audio: true,
            control_all_video: true,
        }
    }
}

impl MasterControls {
    pub fn controls(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.control_all_audio,
            TrackKind::Video => self.control_all_video,
        }
    }
}

/// A request the host sends about another participant's media.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostAction {
    #[display(fmt = "mute")]
    #[serde(rename = "mute")]
    MuteAudio,
    #[display(fmt = "unmute")]
    #[serde(rename = "unmute")]
    UnmuteAudio,
    #[display(fmt = "disable")]
    #[serde(rename = "disable")]
    DisableVideo,
    #[display(fmt = "enable")]
    #[serde(rename = "enable")]
    EnableVideo,
}

impl HostAction {
    pub fn kind(&self) -> TrackKind {
        match self {
            HostAction::MuteAudio | HostAction::UnmuteAudio => TrackKind::Audio,
            HostAction::DisableVideo | HostAction::EnableVideo => TrackKind::Video,
        }
    }

    pub fn enables(&self) -> bool {
        matches!(self, HostAction::UnmuteAudio | HostAction::EnableVideo)
    }

    /// Silencing actions are applied by the target. Enabling actions are only advisory.
    pub fn forced(&self) -> bool {
        !self.enables()
    }

    /// The action that flips a participant's current state for `kind`.
    pub fn toggle(kind: TrackKind, currently_enabled: bool) -> Self {
        match (kind, currently_enabled) {
            (TrackKind::Audio, true) => HostAction::MuteAudio,
            (TrackKind::Audio, false) => HostAction::UnmuteAudio,
            (TrackKind::Video, true) => HostAction::DisableVideo,
            (TrackKind::Video, false) => HostAction::EnableVideo,
        }
    }
}

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Shown briefly and dismissed on its own.
    #[display(fmt = "toast")]
    Toast,
    /// Must be acknowledged by the user.
    #[display(fmt = "blocking")]
    Blocking,
}

/// Drives the UI
#[derive(Debug, Clone)]
pub enum SessionEventKind {
    StateChanged {
        state: SessionState,
    },
    /// Human readable progress line, e.g. "Connecting to server..."
    ConnectionStatus {
        status: String,
    },
    /// The stream used for the local preview was replaced
    LocalStreamChanged {
        stream: MediaStream,
    },
    LocalParticipantUpdated {
        participant: Participant,
    },
    /// A link delivered its first remote stream
    ParticipantJoined {
        participant: Participant,
        stream: MediaStream,
    },
    ParticipantUpdated {
        participant: Participant,
    },
    /// A link delivered a new stream for an existing participant
    RemoteStreamChanged {
        peer_id: PeerId,
        stream: MediaStream,
    },
    ParticipantLeft {
        peer_id: PeerId,
    },
    HostStatusChanged {
        is_host: bool,
    },
    MasterControlsChanged {
        controls: MasterControls,
    },
    /// True while a host-forced change has recently been applied to the local media
    HostControlActive {
        active: bool,
    },
    Notice {
        level: NoticeLevel,
        message: String,
    },
    /// The local user left or was removed
    SessionEnded,
    /// The session ended because of an error reported by the room
    SessionTerminated {
        reason: String,
    },
}

pub struct SessionEventStream(pub BoxStream<'static, SessionEventKind>);

impl core::ops::Deref for SessionEventStream {
    type Target = BoxStream<'static, SessionEventKind>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for SessionEventStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[async_trait]
pub trait Session: Send + Sync {
    // ------ Misc ------
    /// The event stream notifies the UI of session changes
    async fn get_event_stream(&mut self) -> Result<SessionEventStream, Error>;

    // ------ Lifecycle ------
    /// Acquires local media, connects the transports and announces the local user to `room`.
    /// Returns once media is held and the transports are connecting.
    async fn join(&mut self, room: RoomId, display_name: String) -> Result<(), Error>;
    /// Tears everything down. Leaving an idle session is a no-op.
    async fn leave(&mut self) -> Result<(), Error>;

    // ------ Local media ------
    async fn set_microphone(&mut self, enabled: bool) -> Result<(), Error>;
    async fn set_camera(&mut self, enabled: bool) -> Result<(), Error>;
    async fn start_screen_share(&mut self) -> Result<(), Error>;
    async fn stop_screen_share(&mut self) -> Result<(), Error>;

    // ------ Host controls ------
    /// Flips `target`'s microphone. Muting is enforced, unmuting is a request.
    async fn host_control_audio(&mut self, target: PeerId, currently_enabled: bool) -> Result<(), Error>;
    /// Flips `target`'s camera. Disabling is enforced, enabling is a request.
    async fn host_control_video(&mut self, target: PeerId, currently_enabled: bool) -> Result<(), Error>;
    async fn host_action(&mut self, target: PeerId, action: HostAction) -> Result<(), Error>;
    async fn set_master_controls(&mut self, controls: MasterControls) -> Result<(), Error>;
    async fn remove_participant(&mut self, target: PeerId) -> Result<(), Error>;

    // ------ Queries ------
    async fn state(&self) -> Result<SessionState, Error>;
    /// The local participant first, then remote participants in the order they joined.
    async fn participants(&self) -> Result<Vec<Participant>, Error>;
    async fn local_participant(&self) -> Result<Participant, Error>;
    async fn local_stream(&self) -> Result<Option<MediaStream>, Error>;
    async fn is_host(&self) -> Result<bool, Error>;
    async fn master_controls(&self) -> Result<MasterControls, Error>;
}
