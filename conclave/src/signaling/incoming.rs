use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize};

use super::SignalMessage;
use crate::{error::Error, id::PeerId, session::MasterControls};

/// A room member as described by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAnnouncement {
    #[serde(default, alias = "id", alias = "socketId")]
    pub participant_id: Option<String>,
    #[serde(default, rename = "username", alias = "displayName")]
    pub display_name: Option<String>,
    #[serde(default, alias = "transportId")]
    pub peer_id: Option<PeerId>,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default, alias = "audioEnabled")]
    pub is_audio_enabled: Option<bool>,
    #[serde(default, alias = "videoEnabled")]
    pub is_video_enabled: Option<bool>,
    #[serde(default, alias = "screenSharing")]
    pub is_screen_sharing: Option<bool>,
}

/// The relay sends the roster either as a list or keyed by participant id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Roster {
    List(Vec<MemberAnnouncement>),
    Map(BTreeMap<String, MemberAnnouncement>),
}

impl Roster {
    pub fn into_members(self) -> Vec<MemberAnnouncement> {
        match self {
            Roster::List(members) => members,
            Roster::Map(members) => members
                .into_iter()
                .map(|(key, mut member)| {
                    member.participant_id.get_or_insert(key);
                    member
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAssigned {
    pub is_host: bool,
}

/// A master control pushed to every participant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterControl {
    pub enabled: bool,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub host_username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDeparture {
    #[serde(default, alias = "transportId")]
    pub peer_id: Option<PeerId>,
    #[serde(default, alias = "id")]
    pub participant_id: Option<String>,
    #[serde(default, rename = "username", alias = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaToggle {
    #[serde(alias = "transportId")]
    pub peer_id: PeerId,
    pub enabled: bool,
    #[serde(default)]
    pub is_host_master_control: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenShareToggle {
    #[serde(alias = "transportId")]
    pub peer_id: PeerId,
    pub is_sharing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDirective {
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub host_username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomParticipants {
    pub participants: Roster,
}

/// Every relay message the session reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingSignal {
    HostAssigned(HostAssigned),
    MasterControlsUpdated(MasterControls),
    MasterAudioControl(MasterControl),
    MasterVideoControl(MasterControl),
    UserJoined(MemberAnnouncement),
    RoomParticipants(RoomParticipants),
    UserLeft(MemberDeparture),
    UserRemoved(MemberDeparture),
    UserToggleAudio(MediaToggle),
    UserToggleVideo(MediaToggle),
    UserScreenShare(ScreenShareToggle),
    HostMutedAudio(HostDirective),
    HostUnmutedAudio(HostDirective),
    HostDisabledVideo(HostDirective),
    HostEnabledVideo(HostDirective),
    YouWereRemoved,
    RoomError(RoomError),
}

impl IncomingSignal {
    /// Decodes a relay message. Unknown event names yield `Ok(None)`.
    pub fn decode(message: &SignalMessage) -> Result<Option<Self>, Error> {
        let event = message.event.as_str();
        let signal = match event {
            "host-assigned" => IncomingSignal::HostAssigned(payload(message)?),
            "host-master-controls-updated" => {
                IncomingSignal::MasterControlsUpdated(payload(message)?)
            }
            "host-master-audio-control" => IncomingSignal::MasterAudioControl(payload(message)?),
            "host-master-video-control" => IncomingSignal::MasterVideoControl(payload(message)?),
            "user-joined" => IncomingSignal::UserJoined(payload(message)?),
            "room-participants" => IncomingSignal::RoomParticipants(payload(message)?),
            "user-left" => IncomingSignal::UserLeft(payload(message)?),
            "user-removed" => IncomingSignal::UserRemoved(payload(message)?),
            "user-toggle-audio" => IncomingSignal::UserToggleAudio(payload(message)?),
            "user-toggle-video" => IncomingSignal::UserToggleVideo(payload(message)?),
            "user-screen-share" => IncomingSignal::UserScreenShare(payload(message)?),
            "host-muted-audio" => IncomingSignal::HostMutedAudio(payload(message)?),
            "host-unmuted-audio" => IncomingSignal::HostUnmutedAudio(payload(message)?),
            "host-disabled-video" => IncomingSignal::HostDisabledVideo(payload(message)?),
            "host-enabled-video" => IncomingSignal::HostEnabledVideo(payload(message)?),
            "you-were-removed" => IncomingSignal::YouWereRemoved,
            "room-error" => IncomingSignal::RoomError(payload(message)?),
            _ => return Ok(None),
        };
        Ok(Some(signal))
    }
}

fn payload<T: DeserializeOwned>(message: &SignalMessage) -> Result<T, Error> {
    let value = match &message.payload {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        value => value.clone(),
    };
    serde_json::from_value(value).map_err(|e| Error::InvalidSignal {
        event: message.event.clone(),
        reason: e.to_string(),
    })
}
