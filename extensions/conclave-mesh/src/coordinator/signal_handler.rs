use std::time::Duration;

use conclave::{
    id::PeerId,
    session::{NoticeLevel, SessionEventKind, SessionState},
    signaling::{IncomingSignal, MemberAnnouncement, MemberDeparture, SignalingEvent},
};

use super::{Event, SessionCoordinator};
use crate::{
    host_authority::{Directive, REMOVED_NOTICE},
    media_controller::{Origin, TransitionRequest},
    registry::{Flag, FlagUpdate, Provenance},
};

impl SessionCoordinator {
    pub(super) async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => {
                tracing::info!("signaling connected");
                self.signaling_connected = true;
                if !self.state.is_live() {
                    return;
                }
                self.status("Connected to server");
                self.announce_join().await;
            }
            SignalingEvent::Disconnected { reason } => {
                self.signaling_connected = false;
                if !self.state.is_live() {
                    return;
                }
                tracing::warn!("signaling disconnected: {reason}");
                self.status("Reconnecting...");
                if matches!(self.state, SessionState::Joining | SessionState::Active) {
                    self.set_state(SessionState::ConnectingTransport);
                }
            }
            SignalingEvent::Message(message) => {
                if !self.state.is_live() {
                    tracing::debug!(event = %message.event, "ignoring signal outside a live session");
                    return;
                }
                match IncomingSignal::decode(&message) {
                    Ok(Some(signal)) => self.handle_signal(signal).await,
                    Ok(None) => tracing::trace!(event = %message.event, "ignoring unknown signal"),
                    Err(e) => tracing::warn!("dropping malformed signal: {e}"),
                }
            }
        }
    }

    async fn handle_signal(&mut self, signal: IncomingSignal) {
        match signal {
            IncomingSignal::HostAssigned(assigned) => {
                let changed = self.authority.set_host(assigned.is_host);
                self.registry.set_local_host(assigned.is_host);
                if changed {
                    tracing::info!(is_host = assigned.is_host, "host role changed");
                    self.emit_ui(SessionEventKind::HostStatusChanged {
                        is_host: assigned.is_host,
                    });
                    self.emit_ui(SessionEventKind::LocalParticipantUpdated {
                        participant: self.registry.local().clone(),
                    });
                }
            }
            IncomingSignal::MasterControlsUpdated(controls) => {
                if self.authority.apply_master_update(controls) {
                    self.emit_ui(SessionEventKind::MasterControlsChanged { controls });
                }
            }
            IncomingSignal::UserJoined(member) => {
                let delay = self.config.timing().join_dial_delay;
                self.handle_announcement(member, delay);
            }
            IncomingSignal::RoomParticipants(roster) => {
                let members = roster.participants.into_members();
                tracing::debug!("roster with {} members", members.len());
                if self.state == SessionState::Joining {
                    self.set_state(SessionState::Active);
                    self.status("Connected");
                }
                let delay = self.config.timing().roster_dial_delay;
                for member in members {
                    self.handle_announcement(member, delay);
                }
            }
            IncomingSignal::UserLeft(departure) | IncomingSignal::UserRemoved(departure) => {
                self.handle_departure(departure).await
            }
            IncomingSignal::UserToggleAudio(toggle) => {
                self.apply_remote_flag(&toggle.peer_id, Flag::Audio, toggle.enabled)
            }
            IncomingSignal::UserToggleVideo(toggle) => {
                self.apply_remote_flag(&toggle.peer_id, Flag::Video, toggle.enabled)
            }
            IncomingSignal::UserScreenShare(toggle) => {
                self.apply_remote_flag(&toggle.peer_id, Flag::ScreenShare, toggle.is_sharing)
            }
            signal @ (IncomingSignal::HostMutedAudio(_)
            | IncomingSignal::HostUnmutedAudio(_)
            | IncomingSignal::HostDisabledVideo(_)
            | IncomingSignal::HostEnabledVideo(_)
            | IncomingSignal::MasterAudioControl(_)
            | IncomingSignal::MasterVideoControl(_)) => {
                let directive = self.authority.interpret(&signal);
                self.apply_directive(directive).await;
            }
            IncomingSignal::YouWereRemoved => {
                tracing::info!("removed from the room by the host");
                self.notice(NoticeLevel::Blocking, REMOVED_NOTICE);
                self.teardown().await;
                self.set_state(SessionState::Terminated);
                self.emit_ui(SessionEventKind::SessionEnded);
            }
            IncomingSignal::RoomError(error) => {
                tracing::error!("room error: {}", error.message);
                self.notice(NoticeLevel::Blocking, format!("Error: {}", error.message));
                self.teardown().await;
                self.set_state(SessionState::Terminated);
                self.emit_ui(SessionEventKind::SessionTerminated {
                    reason: error.message,
                });
            }
        }
    }

    /// Records an announced member and schedules a dial unless one is pending or linked.
    fn handle_announcement(&mut self, member: MemberAnnouncement, delay: Duration) {
        let Some(peer_id) = member.peer_id.clone() else {
            tracing::debug!("announcement without a transport id");
            return;
        };
        if self.local_id.as_ref() == Some(&peer_id) || !self.registry.announce(&peer_id, &member) {
            return;
        }
        if let Some(participant) = self.participant(&peer_id) {
            self.emit_ui(SessionEventKind::ParticipantUpdated { participant });
        }
        if self.links.contains(&peer_id)
            || self.links.is_connecting(&peer_id)
            || !self.pending_dials.insert(peer_id.clone())
        {
            return;
        }
        tracing::debug!(%peer_id, ?delay, "dial scheduled");
        self.schedule(delay, Event::DialDue { remote: peer_id });
    }

    async fn handle_departure(&mut self, departure: MemberDeparture) {
        let Some(peer_id) = departure.peer_id else {
            tracing::debug!("departure without a transport id");
            return;
        };
        tracing::info!(%peer_id, "participant left");
        self.drop_peer(&peer_id, true).await;
    }

    /// Forgets `peer_id` everywhere. A pending dial or link attempt for it is cancelled.
    pub(super) async fn drop_peer(&mut self, peer_id: &PeerId, close_link: bool) {
        self.pending_dials.remove(peer_id);
        self.held_dials.remove(peer_id);
        if close_link {
            self.links.close(peer_id).await;
        } else {
            self.links.forget(peer_id);
        }
        if self.registry.remove(peer_id).is_some() {
            self.emit_ui(SessionEventKind::ParticipantLeft {
                peer_id: peer_id.clone(),
            });
        }
    }

    fn apply_remote_flag(&mut self, peer_id: &PeerId, flag: Flag, value: bool) {
        match self
            .registry
            .set_flag(peer_id, flag, value, Provenance::Authoritative)
        {
            FlagUpdate::Updated(participant) => {
                self.emit_ui(SessionEventKind::ParticipantUpdated { participant })
            }
            FlagUpdate::Deferred => tracing::debug!(%peer_id, ?flag, "flag held until admission"),
            FlagUpdate::Unknown => tracing::debug!(%peer_id, ?flag, "flag for unknown participant"),
            FlagUpdate::Unchanged => {}
        }
    }

    async fn apply_directive(&mut self, directive: Directive) {
        match directive {
            Directive::Force { transition, .. } if self.media.is_settled_at(transition) => {
                tracing::debug!(%transition, "host control already in effect");
            }
            Directive::Force { transition, notice } => {
                tracing::info!(%transition, "applying host control");
                self.notice(NoticeLevel::Toast, notice);
                let progress = self
                    .media
                    .submit(TransitionRequest::new(transition, Origin::Host, None));
                self.drive(progress).await;
            }
            Directive::Advise { notice } => self.notice(NoticeLevel::Toast, notice),
            Directive::Ignore => {}
        }
    }
}
