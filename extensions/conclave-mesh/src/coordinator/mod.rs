//! The session state machine.
//!
//! [`SessionCoordinator::step`] applies one [`Event`] at a time. Captures and timers run
//! on spawned tasks and report back as events through the internal channel, so the
//! coordinator never blocks on a device prompt or a delay.

mod event;
mod signal_handler;
mod transport_handler;

pub use event::{Cmd, Event};

use std::{collections::HashSet, sync::Arc, time::Duration};

use conclave::{
    error::Error,
    id::{PeerId, RoomId},
    media::{MediaDevices, MediaStream, TrackKind},
    session::{
        DeclaredFlags, HostAction, MasterControls, NoticeLevel, Participant, SessionEventKind,
        SessionState,
    },
    signaling::{
        JoinRoom, MediaToggleNotice, OutgoingSignal, ScreenShareNotice, SignalingChannel,
        SignalingEventStream, SystemMessage, SystemMessageKind,
    },
    transport::{PeerTransport, PeerTransportEventStream},
};
use tokio::sync::{broadcast, mpsc::UnboundedSender};

use crate::{
    config::Config,
    host_authority::HostAuthority,
    link_manager::{PeerLinkManager, PendingLink},
    media_controller::{
        Completion, Declaration, Effects, MediaTrackController, Origin, PendingCapture, Progress,
        Responder, Transition, TransitionRequest,
    },
    registry::{Flag, FlagUpdate, ParticipantRegistry, Provenance},
};

pub const MEDIA_ACCESS_NOTICE: &str =
    "Failed to access camera/microphone. Please check permissions and try again.";

pub struct Args {
    pub config: Config,
    pub signaling: Arc<dyn SignalingChannel>,
    pub transport: Arc<dyn PeerTransport>,
    pub devices: Arc<dyn MediaDevices>,
    pub internal_tx: UnboundedSender<Event>,
    pub ui_event_ch: broadcast::Sender<SessionEventKind>,
}

pub struct SessionCoordinator {
    config: Config,
    signaling: Arc<dyn SignalingChannel>,
    transport: Arc<dyn PeerTransport>,
    state: SessionState,
    room: Option<RoomId>,
    local_id: Option<PeerId>,
    signaling_connected: bool,
    membership_announced: bool,
    registry: ParticipantRegistry,
    links: PeerLinkManager,
    media: MediaTrackController,
    authority: HostAuthority,
    // announced peers waiting for their dial delay
    pending_dials: HashSet<PeerId>,
    // due dials waiting for the local identity
    held_dials: HashSet<PeerId>,
    join_rsp: Option<Responder>,
    join_generation: u64,
    indicator_token: u64,
    internal_tx: UnboundedSender<Event>,
    ui_event_ch: broadcast::Sender<SessionEventKind>,
}

impl SessionCoordinator {
    pub fn new(args: Args) -> Self {
        let Args {
            config,
            signaling,
            transport,
            devices,
            internal_tx,
            ui_event_ch,
        } = args;

        let media = MediaTrackController::new(
            devices,
            *config.video(),
            *config.audio(),
            *config.display(),
        );
        Self {
            registry: ParticipantRegistry::new(Participant::new(PeerId::new(""), "")),
            links: PeerLinkManager::new(transport.clone()),
            authority: HostAuthority::new(config.master_controls()),
            media,
            config,
            signaling,
            transport,
            state: SessionState::Idle,
            room: None,
            local_id: None,
            signaling_connected: false,
            membership_announced: false,
            pending_dials: HashSet::new(),
            held_dials: HashSet::new(),
            join_rsp: None,
            join_generation: 0,
            indicator_token: 0,
            internal_tx,
            ui_event_ch,
        }
    }

    pub fn signaling_events(&self) -> SignalingEventStream {
        self.signaling.subscribe()
    }

    pub fn transport_events(&self) -> PeerTransportEventStream {
        self.transport.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    /// The local participant first, then remote participants in join order.
    pub fn participants(&self) -> Vec<Participant> {
        self.registry.snapshot()
    }

    pub fn local_participant(&self) -> &Participant {
        self.registry.local()
    }

    pub fn participant(&self, id: &PeerId) -> Option<Participant> {
        self.registry
            .get(id)
            .map(|entry| entry.participant().clone())
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.media.active_stream().cloned()
    }

    pub fn is_host(&self) -> bool {
        self.authority.is_host()
    }

    pub fn master_controls(&self) -> MasterControls {
        self.authority.master()
    }

    pub fn has_link(&self, remote: &PeerId) -> bool {
        self.links.contains(remote)
    }

    /// True while a call to or an answer for `remote` is pending.
    pub fn is_connecting(&self, remote: &PeerId) -> bool {
        self.links.is_connecting(remote)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_dial_pending(&self, remote: &PeerId) -> bool {
        self.pending_dials.contains(remote)
    }

    pub fn is_provisional(&self, remote: &PeerId, flag: Flag) -> bool {
        self.registry.is_provisional(remote, flag)
    }

    pub async fn step(&mut self, event: Event) {
        tracing::trace!(state = %self.state, "event: {event}");
        match event {
            Event::Command(cmd) => self.handle_command(cmd).await,
            Event::Signaling(event) => self.handle_signaling(event).await,
            Event::Transport(event) => self.handle_transport(event).await,
            Event::SessionMediaReady { generation, result } => {
                self.handle_session_media(generation, result).await
            }
            Event::CaptureResolved { generation, result } => {
                let progress = self.media.resolve(generation, result);
                self.drive(progress).await;
            }
            Event::ScreenShareEnded { share } => {
                tracing::debug!(share, "shared surface ended");
                let progress = self.media.screen_share_ended(share);
                self.drive(progress).await;
            }
            Event::LinkSettled {
                remote,
                attempt,
                direction,
                result,
            } => self.handle_link_settled(remote, attempt, direction, result).await,
            Event::DialDue { remote } => self.handle_dial_due(remote),
            Event::TransportRecreateDue => self.handle_recreate_due().await,
            Event::HostIndicatorExpired { token } => {
                if token == self.indicator_token {
                    self.emit_ui(SessionEventKind::HostControlActive { active: false });
                }
            }
        }
    }

    /// Tears the session down if it is still running.
    pub async fn shutdown(&mut self) {
        if self.state.is_finished() {
            return;
        }
        self.teardown().await;
        self.set_state(SessionState::Terminated);
        self.emit_ui(SessionEventKind::SessionEnded);
    }

    async fn handle_command(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::Join {
                room_id,
                display_name,
                rsp,
            } => self.join(room_id, display_name, rsp),
            Cmd::Leave { rsp } => {
                self.shutdown().await;
                let _ = rsp.send(Ok(()));
            }
            Cmd::SetMicrophone { enabled, rsp } => {
                self.transition(Transition::Microphone(enabled), rsp).await
            }
            Cmd::SetCamera { enabled, rsp } => {
                self.transition(Transition::Camera(enabled), rsp).await
            }
            Cmd::StartScreenShare { rsp } => {
                self.transition(Transition::StartScreenShare, rsp).await
            }
            Cmd::StopScreenShare { rsp } => {
                self.transition(Transition::StopScreenShare, rsp).await
            }
            Cmd::HostToggle {
                target,
                kind,
                currently_enabled,
                rsp,
            } => {
                let action = HostAction::toggle(kind, currently_enabled);
                let _ = rsp.send(self.host_action(target, action).await);
            }
            Cmd::HostAction {
                target,
                action,
                rsp,
            } => {
                let _ = rsp.send(self.host_action(target, action).await);
            }
            Cmd::SetMasterControls { controls, rsp } => {
                let _ = rsp.send(self.set_master_controls(controls).await);
            }
            Cmd::RemoveParticipant { target, rsp } => {
                let _ = rsp.send(self.remove_participant(target).await);
            }
            Cmd::GetState { rsp } => {
                let _ = rsp.send(self.state);
            }
            Cmd::GetParticipants { rsp } => {
                let _ = rsp.send(self.participants());
            }
            Cmd::GetLocalParticipant { rsp } => {
                let _ = rsp.send(self.registry.local().clone());
            }
            Cmd::GetLocalStream { rsp } => {
                let _ = rsp.send(self.local_stream());
            }
            Cmd::GetHostStatus { rsp } => {
                let _ = rsp.send(self.authority.is_host());
            }
            Cmd::GetMasterControls { rsp } => {
                let _ = rsp.send(self.authority.master());
            }
        }
    }

    #[tracing::instrument(skip(self, rsp))]
    fn join(&mut self, room_id: RoomId, display_name: String, rsp: Responder) {
        if !self.state.is_finished() {
            let _ = rsp.send(Err(Error::SessionAlreadyStarted));
            return;
        }
        tracing::info!("joining room");
        self.room = Some(room_id);
        self.registry = ParticipantRegistry::new(Participant::new(PeerId::new(""), display_name));
        self.authority = HostAuthority::new(self.config.master_controls());
        self.membership_announced = false;
        self.join_rsp = Some(rsp);
        self.set_state(SessionState::AcquiringMedia);
        self.status("Requesting camera and microphone access...");

        self.join_generation += 1;
        let generation = self.join_generation;
        let capture = self.media.acquire(true, true);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = capture.await;
            let _ = tx.send(Event::SessionMediaReady { generation, result });
        });
    }

    async fn handle_session_media(&mut self, generation: u64, result: Result<MediaStream, Error>) {
        if generation != self.join_generation || self.state != SessionState::AcquiringMedia {
            if let Ok(stream) = result {
                tracing::debug!("releasing media acquired for an abandoned join");
                stream.stop();
            }
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("failed to acquire session media: {e}");
                self.notice(NoticeLevel::Blocking, MEDIA_ACCESS_NOTICE);
                self.status("Failed to access camera/microphone");
                self.set_state(SessionState::Terminated);
                self.emit_ui(SessionEventKind::SessionTerminated {
                    reason: e.to_string(),
                });
                if let Some(rsp) = self.join_rsp.take() {
                    let _ = rsp.send(Err(e));
                }
                return;
            }
        };

        let state = self.media.initialize(stream);
        let stream = state.active().clone();
        let declared = state.declared();
        self.registry.set_local_flags(declared);
        self.emit_ui(SessionEventKind::LocalStreamChanged { stream });
        self.emit_ui(SessionEventKind::LocalParticipantUpdated {
            participant: self.registry.local().clone(),
        });

        self.set_state(SessionState::ConnectingTransport);
        self.status("Connecting to server...");
        if let Err(e) = self.signaling.connect().await {
            tracing::warn!("failed to connect signaling: {e}");
        }
        if let Err(e) = self.transport.open().await {
            tracing::error!("failed to open peer transport: {e}");
            self.schedule(
                self.config.timing().transport_recreate_delay,
                Event::TransportRecreateDue,
            );
        }
        if let Some(rsp) = self.join_rsp.take() {
            let _ = rsp.send(Ok(()));
        }
    }

    /// Announces the local participant once both the relay and the transport are up.
    async fn announce_join(&mut self) {
        if self.state != SessionState::ConnectingTransport || !self.signaling_connected {
            return;
        }
        let (Some(room_id), Some(peer_id)) = (self.room.clone(), self.local_id.clone()) else {
            return;
        };
        let display_name = self.registry.local().display_name.clone();
        let signal = OutgoingSignal::JoinRoom(JoinRoom {
            room_id: room_id.clone(),
            display_name: display_name.clone(),
            peer_id,
        });
        if let Err(e) = self.send_signal(signal).await {
            tracing::warn!("failed to announce join: {e}");
            return;
        }
        self.set_state(SessionState::Joining);
        self.status("Joining room...");

        if let Some(declared) = self.media.declared() {
            self.redeclare(declared).await;
        }

        if self.config.announce_membership() && !self.membership_announced {
            self.membership_announced = true;
            let signal = OutgoingSignal::SystemMessage(SystemMessage {
                room_id,
                message: format!("{display_name} joined the meeting"),
                kind: SystemMessageKind::Join,
            });
            if let Err(e) = self.send_signal(signal).await {
                tracing::warn!("failed to send join message: {e}");
            }
        }
    }

    /// Repeats every flag that differs from what the room assumes for a fresh participant.
    async fn redeclare(&mut self, declared: DeclaredFlags) {
        let assumed = DeclaredFlags::default();
        if declared.audio != assumed.audio {
            self.declare(Declaration::Audio(declared.audio)).await;
        }
        if declared.screen_sharing != assumed.screen_sharing {
            self.declare(Declaration::ScreenShare(declared.screen_sharing))
                .await;
        }
        if declared.video != assumed.video {
            self.declare(Declaration::Video(declared.video)).await;
        }
    }

    async fn transition(&mut self, transition: Transition, rsp: Responder) {
        if !self.state.is_live() {
            let _ = rsp.send(Err(Error::SessionNotActive));
            return;
        }
        let progress = self
            .media
            .submit(TransitionRequest::new(transition, Origin::User, Some(rsp)));
        self.drive(progress).await;
    }

    /// Runs transitions until one waits on a capture or the queue is empty.
    async fn drive(&mut self, mut progress: Option<Progress>) {
        while let Some(step) = progress.take() {
            match step {
                Progress::Capture(pending) => self.spawn_capture(pending),
                Progress::Completed(completion) => {
                    self.complete(completion).await;
                    progress = self.media.next();
                }
            }
        }
    }

    fn spawn_link(&self, pending: PendingLink) {
        let PendingLink {
            remote,
            attempt,
            direction,
            future,
        } = pending;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = future.await;
            let _ = tx.send(Event::LinkSettled {
                remote,
                attempt,
                direction,
                result,
            });
        });
    }

    fn spawn_capture(&self, pending: PendingCapture) {
        let PendingCapture { generation, future } = pending;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = future.await;
            let _ = tx.send(Event::CaptureResolved { generation, result });
        });
    }

    async fn complete(&mut self, completion: Completion) {
        let Completion {
            mut request,
            result,
            effects,
        } = completion;
        let transition = request.transition;
        self.apply_effects(effects).await;

        match &result {
            Ok(()) => {
                tracing::debug!(%transition, origin = ?request.origin, "transition applied");
                if request.origin == Origin::Host {
                    self.raise_host_indicator();
                }
            }
            Err(Error::TransitionCancelled) | Err(Error::SessionNotActive) => {}
            Err(e) => {
                tracing::warn!(%transition, "transition failed: {e}");
                self.notice(NoticeLevel::Toast, failure_notice(transition, e));
            }
        }
        request.respond(result);
    }

    async fn apply_effects(&mut self, effects: Effects) {
        let Effects {
            stream,
            declarations,
            watch_screen,
        } = effects;

        if let Some(stream) = stream {
            self.emit_ui(SessionEventKind::LocalStreamChanged {
                stream: stream.clone(),
            });
            let failures = self.links.replace_tracks(&stream).await;
            if !failures.is_empty() {
                tracing::warn!("{} track updates failed", failures.len());
            }
        }

        if let Some((share, track)) = watch_screen {
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                track.ended().await;
                let _ = tx.send(Event::ScreenShareEnded { share });
            });
        }

        if declarations.is_empty() {
            return;
        }
        for declaration in declarations {
            self.declare(declaration).await;
        }
        if let Some(declared) = self.media.declared() {
            if self.registry.set_local_flags(declared) {
                self.emit_ui(SessionEventKind::LocalParticipantUpdated {
                    participant: self.registry.local().clone(),
                });
            }
        }
    }

    async fn declare(&self, declaration: Declaration) {
        let (Some(room_id), Some(peer_id)) = (self.room.clone(), self.local_id.clone()) else {
            tracing::debug!(?declaration, "not announced yet");
            return;
        };
        let signal = match declaration {
            Declaration::Audio(enabled) => OutgoingSignal::ToggleAudio(MediaToggleNotice {
                room_id,
                peer_id,
                enabled,
            }),
            Declaration::Video(enabled) => OutgoingSignal::ToggleVideo(MediaToggleNotice {
                room_id,
                peer_id,
                enabled,
            }),
            Declaration::ScreenShare(is_sharing) => OutgoingSignal::ScreenShare(ScreenShareNotice {
                room_id,
                peer_id,
                is_sharing,
            }),
        };
        if let Err(e) = self.send_signal(signal).await {
            tracing::warn!(?declaration, "failed to declare: {e}");
        }
    }

    fn raise_host_indicator(&mut self) {
        self.indicator_token += 1;
        self.emit_ui(SessionEventKind::HostControlActive { active: true });
        self.schedule(
            self.config.timing().host_indicator_duration,
            Event::HostIndicatorExpired {
                token: self.indicator_token,
            },
        );
    }

    fn active_room(&self) -> Result<RoomId, Error> {
        match (&self.room, self.state.is_live()) {
            (Some(room), true) => Ok(room.clone()),
            _ => Err(Error::SessionNotActive),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn host_action(&mut self, target: PeerId, action: HostAction) -> Result<(), Error> {
        let room_id = self.active_room()?;
        let signal = self.authority.command(&room_id, &target, action)?;
        self.send_signal(signal).await?;

        if action.forced() {
            let flag = match action.kind() {
                TrackKind::Audio => Flag::Audio,
                TrackKind::Video => Flag::Video,
            };
            if let FlagUpdate::Updated(participant) =
                self.registry
                    .set_flag(&target, flag, false, Provenance::Provisional)
            {
                self.emit_ui(SessionEventKind::ParticipantUpdated { participant });
            }
        }
        Ok(())
    }

    async fn set_master_controls(&mut self, controls: MasterControls) -> Result<(), Error> {
        let room_id = self.active_room()?;
        let signal = self.authority.update_master(&room_id, controls)?;
        self.emit_ui(SessionEventKind::MasterControlsChanged { controls });
        self.send_signal(signal).await
    }

    async fn remove_participant(&mut self, target: PeerId) -> Result<(), Error> {
        let room_id = self.active_room()?;
        let participant_id = self.registry.participant_id(&target);
        let signal = self.authority.removal(&room_id, &target, participant_id)?;
        self.send_signal(signal).await
    }

    /// Releases everything, in order: links, capture, relay, transport.
    /// Each step runs even if an earlier one failed.
    async fn teardown(&mut self) {
        self.set_state(SessionState::Leaving);
        self.pending_dials.clear();
        self.held_dials.clear();

        self.links.close_all().await;
        for peer_id in self.registry.clear() {
            self.emit_ui(SessionEventKind::ParticipantLeft { peer_id });
        }

        for mut request in self.media.release() {
            request.respond(Err(Error::TransitionCancelled));
        }

        if self.config.announce_membership() && self.membership_announced && self.signaling_connected {
            if let Some(room_id) = self.room.clone() {
                let signal = OutgoingSignal::SystemMessage(SystemMessage {
                    room_id,
                    message: format!("{} left the meeting", self.registry.local().display_name),
                    kind: SystemMessageKind::Leave,
                });
                if let Err(e) = self.send_signal(signal).await {
                    tracing::warn!("failed to send leave message: {e}");
                }
            }
        }
        if let Err(e) = self.signaling.disconnect().await {
            tracing::warn!("failed to disconnect signaling: {e}");
        }
        self.signaling_connected = false;

        if let Err(e) = self.transport.destroy().await {
            tracing::warn!("failed to destroy peer transport: {e}");
        }
        self.local_id = None;

        self.authority.set_host(false);
        if let Some(rsp) = self.join_rsp.take() {
            let _ = rsp.send(Err(Error::SessionTerminated("session left".into())));
        }
        self.status("Disconnected");
    }

    async fn send_signal(&self, signal: OutgoingSignal) -> Result<(), Error> {
        let message = signal.encode()?;
        tracing::trace!(event = %message.event, "emitting signal");
        self.signaling.emit(message).await
    }

    /// Delivers `event` to the coordinator after `delay`. Zero delays are delivered immediately.
    fn schedule(&self, delay: Duration, event: Event) {
        if delay.is_zero() {
            let _ = self.internal_tx.send(event);
            return;
        }
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "session state changed");
        self.state = state;
        self.emit_ui(SessionEventKind::StateChanged { state });
    }

    fn status(&self, status: &str) {
        self.emit_ui(SessionEventKind::ConnectionStatus {
            status: status.into(),
        });
    }

    fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit_ui(SessionEventKind::Notice {
            level,
            message: message.into(),
        });
    }

    fn emit_ui(&self, event: SessionEventKind) {
        // no subscribers is fine
        let _ = self.ui_event_ch.send(event);
    }
}

fn failure_notice(transition: Transition, error: &Error) -> String {
    let action = match transition {
        Transition::Microphone(_) => "Failed to change microphone",
        Transition::Camera(_) => "Failed to turn on camera",
        Transition::StartScreenShare => "Failed to start screen sharing",
        Transition::StopScreenShare | Transition::ScreenShareEnded => {
            "Failed to restore camera after screen sharing"
        }
    };
    format!("{action}: {error}")
}
