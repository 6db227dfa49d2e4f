use derive_more::Display;
use serde::Serialize;

use super::SignalMessage;
use crate::{
    error::Error,
    id::{PeerId, RoomId},
    session::{HostAction, MasterControls},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: RoomId,
    #[serde(rename = "username")]
    pub display_name: String,
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaToggleNotice {
    pub room_id: RoomId,
    pub peer_id: PeerId,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenShareNotice {
    pub room_id: RoomId,
    pub peer_id: PeerId,
    pub is_sharing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostControl {
    pub room_id: RoomId,
    pub target_peer_id: PeerId,
    pub action: HostAction,
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterControlsUpdate {
    pub room_id: RoomId,
    pub settings: MasterControls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveParticipant {
    pub room_id: RoomId,
    pub participant_id: Option<String>,
    pub peer_id: PeerId,
}

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMessageKind {
    #[display(fmt = "join")]
    Join,
    #[display(fmt = "leave")]
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessage {
    pub room_id: RoomId,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: SystemMessageKind,
}

/// Every relay message the session sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingSignal {
    JoinRoom(JoinRoom),
    ToggleAudio(MediaToggleNotice),
    ToggleVideo(MediaToggleNotice),
    ScreenShare(ScreenShareNotice),
    HostControlAudio(HostControl),
    HostControlVideo(HostControl),
    UpdateMasterControls(MasterControlsUpdate),
    RemoveParticipant(RemoveParticipant),
    SystemMessage(SystemMessage),
}

impl OutgoingSignal {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutgoingSignal::JoinRoom(_) => "join-room",
            OutgoingSignal::ToggleAudio(_) => "toggle-audio",
            OutgoingSignal::ToggleVideo(_) => "toggle-video",
            OutgoingSignal::ScreenShare(_) => "user-screen-share",
            OutgoingSignal::HostControlAudio(_) => "host-control-audio",
            OutgoingSignal::HostControlVideo(_) => "host-control-video",
            OutgoingSignal::UpdateMasterControls(_) => "update-host-master-controls",
            OutgoingSignal::RemoveParticipant(_) => "remove-participant",
            OutgoingSignal::SystemMessage(_) => "send-system-message",
        }
    }

    pub fn encode(&self) -> Result<SignalMessage, Error> {
        let payload = match self {
            OutgoingSignal::JoinRoom(p) => serde_json::to_value(p)?,
            OutgoingSignal::ToggleAudio(p) | OutgoingSignal::ToggleVideo(p) => {
                serde_json::to_value(p)?
            }
            OutgoingSignal::ScreenShare(p) => serde_json::to_value(p)?,
            OutgoingSignal::HostControlAudio(p) | OutgoingSignal::HostControlVideo(p) => {
                serde_json::to_value(p)?
            }
            OutgoingSignal::UpdateMasterControls(p) => serde_json::to_value(p)?,
            OutgoingSignal::RemoveParticipant(p) => serde_json::to_value(p)?,
            OutgoingSignal::SystemMessage(p) => serde_json::to_value(p)?,
        };
        Ok(SignalMessage::new(self.event_name(), payload))
    }
}
