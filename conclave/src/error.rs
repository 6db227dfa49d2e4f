/// Errors shared by the session orchestrator and its collaborators.
use thiserror::Error;

use crate::id::PeerId;

#[derive(Error, Debug)]
pub enum Error {
    //Media Errors
    #[error(transparent)]
    MediaAccess(#[from] MediaAccessError),
    #[error("Transition was cancelled before it completed")]
    TransitionCancelled,

    //Transport Errors
    #[error("Transport error with {peer}: {message}")]
    Transport { peer: PeerId, message: String },
    #[error("Peer transport is unavailable: {0}")]
    TransportUnavailable(String),

    //Signaling Errors
    #[error("Signaling channel is disconnected")]
    SignalingDisconnected,
    #[error("Invalid \"{event}\" signal: {reason}")]
    InvalidSignal { event: String, reason: String },

    //Session Errors
    #[error("Session terminated: {0}")]
    SessionTerminated(String),
    #[error("Session is not active")]
    SessionNotActive,
    #[error("Session has already been started")]
    SessionAlreadyStarted,
    #[error("Only the host can perform this action")]
    NotHost,
    #[error("Participant {0} is not in the session")]
    ParticipantNotFound(PeerId),

    //Misc
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    #[error("{0}")]
    OtherWithContext(String),
    #[error("{0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

/// Reasons a capture request can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("Permission to access the device was denied")]
    PermissionDenied,
    #[error("No capture device is available")]
    DeviceUnavailable,
    #[error("Capture failed: {0}")]
    Capture(String),
}

impl Error {
    /// Errors after which the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::SessionTerminated(_))
    }

    /// Errors the local user can resolve, such as granting a device permission.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MediaAccess(MediaAccessError::PermissionDenied)
                | Error::MediaAccess(MediaAccessError::DeviceUnavailable)
        )
    }
}
