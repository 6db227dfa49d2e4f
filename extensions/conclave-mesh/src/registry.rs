//! Presentation state of everyone in the room.
//!
//! Announcements from the relay are remembered per peer, but a remote participant is only
//! admitted once its link delivers a stream. Flag updates for peers that are announced but
//! not yet admitted are kept with the announcement and applied on admission.

use std::collections::HashMap;

use conclave::{
    id::PeerId,
    media::MediaStream,
    session::{DeclaredFlags, Participant},
    signaling::MemberAnnouncement,
};
use indexmap::IndexMap;

pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Audio,
    Video,
    ScreenShare,
}

/// Where a flag value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Declared by the participant itself
    Authoritative,
    /// Assumed locally after the host forced a change, until the participant confirms
    Provisional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Joined(Participant),
    StreamReplaced(Participant),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagUpdate {
    Updated(Participant),
    Unchanged,
    /// Recorded against an announcement, applied when the participant is admitted
    Deferred,
    Unknown,
}

#[derive(Debug, Clone, Default)]
struct Announced {
    participant_id: Option<String>,
    display_name: Option<String>,
    is_host: bool,
    audio: Option<bool>,
    video: Option<bool>,
    screen_sharing: Option<bool>,
}

impl Announced {
    fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Audio => self.audio = Some(value),
            Flag::Video => self.video = Some(value),
            Flag::ScreenShare => self.screen_sharing = Some(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    participant: Participant,
    participant_id: Option<String>,
    stream: MediaStream,
    provisional_audio: bool,
    provisional_video: bool,
}

impl RemoteEntry {
    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// The relay's id for this participant, used by host removal.
    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }
}

pub struct ParticipantRegistry {
    local: Participant,
    remote: IndexMap<PeerId, RemoteEntry>,
    announced: HashMap<PeerId, Announced>,
}

impl ParticipantRegistry {
    pub fn new(local: Participant) -> Self {
        Self {
            local,
            remote: IndexMap::new(),
            announced: HashMap::new(),
        }
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn set_local_id(&mut self, id: PeerId) {
        self.local.id = id;
    }

    pub fn set_local_name(&mut self, display_name: impl Into<String>) {
        self.local.display_name = display_name.into();
    }

    pub fn set_local_host(&mut self, is_host: bool) -> bool {
        let changed = self.local.is_host != is_host;
        self.local.is_host = is_host;
        changed
    }

    pub fn set_local_flags(&mut self, flags: DeclaredFlags) -> bool {
        let before = (
            self.local.audio_enabled,
            self.local.video_enabled,
            self.local.is_screen_sharing,
        );
        self.local.audio_enabled = flags.audio;
        self.local.video_enabled = flags.video;
        self.local.is_screen_sharing = flags.screen_sharing;
        before != (flags.audio, flags.video, flags.screen_sharing)
    }

    /// Remembers what the relay said about `id`. Returns false for the local identity.
    pub fn announce(&mut self, id: &PeerId, member: &MemberAnnouncement) -> bool {
        if *id == self.local.id {
            return false;
        }
        let announced = self.announced.entry(id.clone()).or_default();
        if member.participant_id.is_some() {
            announced.participant_id = member.participant_id.clone();
        }
        if member.display_name.is_some() {
            announced.display_name = member.display_name.clone();
        }
        announced.is_host = member.is_host;
        if let Some(audio) = member.is_audio_enabled {
            announced.audio = Some(audio);
        }
        if let Some(video) = member.is_video_enabled {
            announced.video = Some(video);
        }
        if let Some(sharing) = member.is_screen_sharing {
            announced.screen_sharing = Some(sharing);
        }

        if let Some(entry) = self.remote.get_mut(id) {
            if let Some(name) = &announced.display_name {
                entry.participant.display_name = name.clone();
            }
            if announced.participant_id.is_some() {
                entry.participant_id = announced.participant_id.clone();
            }
            entry.participant.is_host = announced.is_host;
        }
        true
    }

    pub fn is_announced(&self, id: &PeerId) -> bool {
        self.announced.contains_key(id)
    }

    /// Admits `id` with its first stream, or swaps the stream of an admitted participant.
    pub fn admit(&mut self, id: &PeerId, stream: MediaStream) -> Admission {
        if let Some(entry) = self.remote.get_mut(id) {
            entry.stream = stream;
            return Admission::StreamReplaced(entry.participant.clone());
        }

        let announced = self.announced.get(id).cloned().unwrap_or_default();
        let mut participant = Participant::new(
            id.clone(),
            announced
                .display_name
                .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string()),
        );
        participant.is_host = announced.is_host;
        participant.audio_enabled = announced.audio.unwrap_or(true);
        participant.video_enabled = announced.video.unwrap_or(true);
        participant.is_screen_sharing = announced.screen_sharing.unwrap_or(false);

        self.remote.insert(
            id.clone(),
            RemoteEntry {
                participant: participant.clone(),
                participant_id: announced.participant_id,
                stream,
                provisional_audio: false,
                provisional_video: false,
            },
        );
        Admission::Joined(participant)
    }

    pub fn get(&self, id: &PeerId) -> Option<&RemoteEntry> {
        self.remote.get(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.remote.contains_key(id)
    }

    pub fn participant_id(&self, id: &PeerId) -> Option<String> {
        self.remote
            .get(id)
            .and_then(|entry| entry.participant_id.clone())
            .or_else(|| {
                self.announced
                    .get(id)
                    .and_then(|announced| announced.participant_id.clone())
            })
    }

    /// Forgets `id` entirely. Returns the admitted entry, if there was one.
    pub fn remove(&mut self, id: &PeerId) -> Option<RemoteEntry> {
        self.announced.remove(id);
        self.remote.shift_remove(id)
    }

    pub fn set_flag(
        &mut self,
        id: &PeerId,
        flag: Flag,
        value: bool,
        provenance: Provenance,
    ) -> FlagUpdate {
        let Some(entry) = self.remote.get_mut(id) else {
            return match (provenance, self.announced.get_mut(id)) {
                (Provenance::Authoritative, Some(announced)) => {
                    announced.set(flag, value);
                    FlagUpdate::Deferred
                }
                _ => FlagUpdate::Unknown,
            };
        };

        let participant = &mut entry.participant;
        let current = match flag {
            Flag::Audio => &mut participant.audio_enabled,
            Flag::Video => &mut participant.video_enabled,
            Flag::ScreenShare => &mut participant.is_screen_sharing,
        };
        let changed = *current != value;
        let provisional = provenance == Provenance::Provisional;
        if provisional && !changed {
            // nothing left to confirm
            return FlagUpdate::Unchanged;
        }
        *current = value;

        match flag {
            Flag::Audio => entry.provisional_audio = provisional,
            Flag::Video => entry.provisional_video = provisional,
            Flag::ScreenShare => {}
        }

        if changed {
            FlagUpdate::Updated(entry.participant.clone())
        } else {
            FlagUpdate::Unchanged
        }
    }

    pub fn is_provisional(&self, id: &PeerId, flag: Flag) -> bool {
        self.remote
            .get(id)
            .map(|entry| match flag {
                Flag::Audio => entry.provisional_audio,
                Flag::Video => entry.provisional_video,
                Flag::ScreenShare => false,
            })
            .unwrap_or_default()
    }

    pub fn remote_ids(&self) -> Vec<PeerId> {
        self.remote.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }

    /// The local participant first, then remote participants in admission order.
    pub fn snapshot(&self) -> Vec<Participant> {
        std::iter::once(self.local.clone())
            .chain(self.remote.values().map(|entry| entry.participant.clone()))
            .collect()
    }

    /// Drops every remote participant and announcement.
    pub fn clear(&mut self) -> Vec<PeerId> {
        self.announced.clear();
        self.remote.drain(..).map(|(id, _)| id).collect()
    }
}
