//! Host privileges, outgoing host commands and how incoming host signals are honoured.

use conclave::{
    error::Error,
    id::{PeerId, RoomId},
    media::TrackKind,
    session::{HostAction, MasterControls},
    signaling::{
        HostControl, IncomingSignal, MasterControl, MasterControlsUpdate, OutgoingSignal,
        RemoveParticipant,
    },
};

use crate::media_controller::Transition;

pub const MUTED_NOTICE: &str = "Host muted your microphone";
pub const UNMUTE_REQUEST_NOTICE: &str = "Host requested you to unmute your microphone";
pub const CAMERA_OFF_NOTICE: &str = "Host turned off your camera";
pub const CAMERA_ON_REQUEST_NOTICE: &str = "Host requested you to turn on your camera";
pub const REMOVED_NOTICE: &str = "You have been removed from the meeting by the host";

/// What the local participant should do about a host signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Apply the transition and tell the user why
    Force { transition: Transition, notice: String },
    /// Only tell the user
    Advise { notice: String },
    Ignore,
}

#[derive(Debug, Clone)]
pub struct HostAuthority {
    is_host: bool,
    master: MasterControls,
}

impl HostAuthority {
    pub fn new(master: MasterControls) -> Self {
        Self {
            is_host: false,
            master,
        }
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Returns true if the role changed.
    pub fn set_host(&mut self, is_host: bool) -> bool {
        let changed = self.is_host != is_host;
        self.is_host = is_host;
        changed
    }

    pub fn master(&self) -> MasterControls {
        self.master
    }

    /// Adopts controls published by the host. Returns true if anything changed.
    pub fn apply_master_update(&mut self, controls: MasterControls) -> bool {
        let changed = self.master != controls;
        self.master = controls;
        changed
    }

    fn ensure_host(&self) -> Result<(), Error> {
        if self.is_host {
            Ok(())
        } else {
            Err(Error::NotHost)
        }
    }

    pub fn command(
        &self,
        room_id: &RoomId,
        target: &PeerId,
        action: HostAction,
    ) -> Result<OutgoingSignal, Error> {
        self.ensure_host()?;
        let control = HostControl {
            room_id: room_id.clone(),
            target_peer_id: target.clone(),
            action,
            forced: action.forced(),
        };
        Ok(match action {
            HostAction::MuteAudio | HostAction::UnmuteAudio => {
                OutgoingSignal::HostControlAudio(control)
            }
            HostAction::DisableVideo | HostAction::EnableVideo => {
                OutgoingSignal::HostControlVideo(control)
            }
        })
    }

    pub fn removal(
        &self,
        room_id: &RoomId,
        target: &PeerId,
        participant_id: Option<String>,
    ) -> Result<OutgoingSignal, Error> {
        self.ensure_host()?;
        Ok(OutgoingSignal::RemoveParticipant(RemoveParticipant {
            room_id: room_id.clone(),
            participant_id,
            peer_id: target.clone(),
        }))
    }

    /// Publishes new master controls. The local copy is updated right away.
    pub fn update_master(
        &mut self,
        room_id: &RoomId,
        controls: MasterControls,
    ) -> Result<OutgoingSignal, Error> {
        self.ensure_host()?;
        self.master = controls;
        Ok(OutgoingSignal::UpdateMasterControls(MasterControlsUpdate {
            room_id: room_id.clone(),
            settings: controls,
        }))
    }

    /// Interprets a host signal addressed to the local participant.
    ///
    /// Silencing signals are applied only when tagged as forced. Enabling signals are
    /// only passed on as requests.
    pub fn interpret(&self, signal: &IncomingSignal) -> Directive {
        match signal {
            IncomingSignal::HostMutedAudio(directive) | IncomingSignal::HostDisabledVideo(directive)
                if !directive.forced =>
            {
                Directive::Ignore
            }
            IncomingSignal::HostMutedAudio(_) => Directive::Force {
                transition: Transition::Microphone(false),
                notice: MUTED_NOTICE.into(),
            },
            IncomingSignal::HostUnmutedAudio(_) => Directive::Advise {
                notice: UNMUTE_REQUEST_NOTICE.into(),
            },
            IncomingSignal::HostDisabledVideo(_) => Directive::Force {
                transition: Transition::Camera(false),
                notice: CAMERA_OFF_NOTICE.into(),
            },
            IncomingSignal::HostEnabledVideo(_) => Directive::Advise {
                notice: CAMERA_ON_REQUEST_NOTICE.into(),
            },
            IncomingSignal::MasterAudioControl(control) => {
                self.master_directive(control, TrackKind::Audio)
            }
            IncomingSignal::MasterVideoControl(control) => {
                self.master_directive(control, TrackKind::Video)
            }
            _ => Directive::Ignore,
        }
    }

    /// Room-wide controls only ever silence, only when forced and allowed by the policy,
    /// and never the host.
    fn master_directive(&self, control: &MasterControl, kind: TrackKind) -> Directive {
        if self.is_host || !self.master.controls(kind) || control.enabled || !control.forced {
            return Directive::Ignore;
        }
        let host = match &control.host_username {
            Some(name) => format!("Host {name}"),
            None => "Host".to_string(),
        };
        let (transition, notice) = match kind {
            TrackKind::Audio => (
                Transition::Microphone(false),
                format!("{host} muted everyone's microphone"),
            ),
            TrackKind::Video => (
                Transition::Camera(false),
                format!("{host} turned off everyone's camera"),
            ),
        };
        Directive::Force { transition, notice }
    }
}

#[cfg(test)]
mod test {
    use conclave::signaling::HostDirective;

    use super::*;

    fn room() -> RoomId {
        RoomId::from("standup")
    }

    #[test]
    fn commands_require_host() {
        let mut authority = HostAuthority::new(MasterControls::default());
        let target = PeerId::from("peer-b");
        assert!(matches!(
            authority.command(&room(), &target, HostAction::MuteAudio),
            Err(Error::NotHost)
        ));
        assert!(matches!(
            authority.update_master(&room(), MasterControls::default()),
            Err(Error::NotHost)
        ));

        authority.set_host(true);
        let signal = authority
            .command(&room(), &target, HostAction::EnableVideo)
            .expect("host may command");
        let OutgoingSignal::HostControlVideo(control) = signal else {
            panic!("expected a video control");
        };
        assert!(!control.forced);
        assert_eq!(control.action, HostAction::EnableVideo);
    }

    #[test]
    fn mute_is_forced_unmute_is_advisory() {
        let authority = HostAuthority::new(MasterControls::default());
        assert_eq!(
            authority.interpret(&IncomingSignal::HostMutedAudio(HostDirective {
                forced: true,
                host_username: None
            })),
            Directive::Force {
                transition: Transition::Microphone(false),
                notice: MUTED_NOTICE.into()
            }
        );
        assert_eq!(
            authority.interpret(&IncomingSignal::HostUnmutedAudio(HostDirective::default())),
            Directive::Advise {
                notice: UNMUTE_REQUEST_NOTICE.into()
            }
        );
        assert_eq!(
            authority.interpret(&IncomingSignal::YouWereRemoved),
            Directive::Ignore
        );
    }

    #[test]
    fn unforced_silencing_is_ignored() {
        let authority = HostAuthority::new(MasterControls::default());
        assert_eq!(
            authority.interpret(&IncomingSignal::HostMutedAudio(HostDirective::default())),
            Directive::Ignore
        );
        assert_eq!(
            authority.interpret(&IncomingSignal::HostDisabledVideo(HostDirective::default())),
            Directive::Ignore
        );
        assert_eq!(
            authority.interpret(&IncomingSignal::MasterAudioControl(MasterControl {
                enabled: false,
                forced: false,
                host_username: Some("Ada".into()),
            })),
            Directive::Ignore
        );
    }

    #[test]
    fn master_control_respects_policy_and_host() {
        let control = IncomingSignal::MasterAudioControl(MasterControl {
            enabled: false,
            forced: true,
            host_username: Some("Ada".into()),
        });

        let mut authority = HostAuthority::new(MasterControls::default());
        assert_eq!(
            authority.interpret(&control),
            Directive::Force {
                transition: Transition::Microphone(false),
                notice: "Host Ada muted everyone's microphone".into()
            }
        );

        authority.apply_master_update(MasterControls {
            control_all_audio: false,
            control_all_video: true,
        });
        assert_eq!(authority.interpret(&control), Directive::Ignore);

        authority.apply_master_update(MasterControls::default());
        authority.set_host(true);
        assert_eq!(authority.interpret(&control), Directive::Ignore);
    }

    #[test]
    fn master_enable_is_never_forced() {
        let authority = HostAuthority::new(MasterControls::default());
        let control = IncomingSignal::MasterVideoControl(MasterControl {
            enabled: true,
            forced: true,
            host_username: None,
        });
        assert_eq!(authority.interpret(&control), Directive::Ignore);
    }
}
