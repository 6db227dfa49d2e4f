use std::sync::Arc;

use conclave::{
    error::Error,
    id::{PeerId, RoomId},
    media::{MediaStream, TrackKind},
    session::{HostAction, MasterControls, Participant, SessionState},
    signaling::SignalingEvent,
    transport::{PeerLink, PeerTransportEvent},
};
use derive_more::Display;
use futures::channel::oneshot;

use crate::{link_manager::LinkDirection, media_controller::Responder};

#[derive(Display)]
pub enum Cmd {
    #[display(fmt = "Join")]
    Join {
        room_id: RoomId,
        display_name: String,
        rsp: Responder,
    },
    #[display(fmt = "Leave")]
    Leave { rsp: Responder },
    #[display(fmt = "SetMicrophone")]
    SetMicrophone { enabled: bool, rsp: Responder },
    #[display(fmt = "SetCamera")]
    SetCamera { enabled: bool, rsp: Responder },
    #[display(fmt = "StartScreenShare")]
    StartScreenShare { rsp: Responder },
    #[display(fmt = "StopScreenShare")]
    StopScreenShare { rsp: Responder },
    #[display(fmt = "HostToggle")]
    HostToggle {
        target: PeerId,
        kind: TrackKind,
        currently_enabled: bool,
        rsp: Responder,
    },
    #[display(fmt = "HostAction")]
    HostAction {
        target: PeerId,
        action: HostAction,
        rsp: Responder,
    },
    #[display(fmt = "SetMasterControls")]
    SetMasterControls {
        controls: MasterControls,
        rsp: Responder,
    },
    #[display(fmt = "RemoveParticipant")]
    RemoveParticipant { target: PeerId, rsp: Responder },
    #[display(fmt = "GetState")]
    GetState {
        rsp: oneshot::Sender<SessionState>,
    },
    #[display(fmt = "GetParticipants")]
    GetParticipants {
        rsp: oneshot::Sender<Vec<Participant>>,
    },
    #[display(fmt = "GetLocalParticipant")]
    GetLocalParticipant {
        rsp: oneshot::Sender<Participant>,
    },
    #[display(fmt = "GetLocalStream")]
    GetLocalStream {
        rsp: oneshot::Sender<Option<MediaStream>>,
    },
    #[display(fmt = "GetHostStatus")]
    GetHostStatus { rsp: oneshot::Sender<bool> },
    #[display(fmt = "GetMasterControls")]
    GetMasterControls {
        rsp: oneshot::Sender<MasterControls>,
    },
}

/// Everything the coordinator reacts to, processed one at a time.
#[derive(Display)]
pub enum Event {
    #[display(fmt = "Command({})", _0)]
    Command(Cmd),
    #[display(fmt = "Signaling({})", _0)]
    Signaling(SignalingEvent),
    #[display(fmt = "Transport({})", _0)]
    Transport(PeerTransportEvent),
    /// The capture started by `join` finished
    #[display(fmt = "SessionMediaReady")]
    SessionMediaReady {
        generation: u64,
        result: Result<MediaStream, Error>,
    },
    /// A capture started by a media transition finished
    #[display(fmt = "CaptureResolved")]
    CaptureResolved {
        generation: u64,
        result: Result<MediaStream, Error>,
    },
    /// A call or answer handed out by the link manager finished
    #[display(fmt = "LinkSettled({}, {})", remote, direction)]
    LinkSettled {
        remote: PeerId,
        attempt: u64,
        direction: LinkDirection,
        result: Result<Arc<dyn PeerLink>, Error>,
    },
    /// A dial scheduled after an announcement is due
    #[display(fmt = "DialDue({})", remote)]
    DialDue { remote: PeerId },
    /// The screen track of share `share` ended
    #[display(fmt = "ScreenShareEnded")]
    ScreenShareEnded { share: u64 },
    #[display(fmt = "TransportRecreateDue")]
    TransportRecreateDue,
    #[display(fmt = "HostIndicatorExpired")]
    HostIndicatorExpired { token: u64 },
}

impl From<Cmd> for Event {
    fn from(cmd: Cmd) -> Self {
        Event::Command(cmd)
    }
}

impl From<SignalingEvent> for Event {
    fn from(event: SignalingEvent) -> Self {
        Event::Signaling(event)
    }
}

impl From<PeerTransportEvent> for Event {
    fn from(event: PeerTransportEvent) -> Self {
        Event::Transport(event)
    }
}
