//! Full-mesh session orchestration.
//!
//! [`MeshSession`] is a cheap, cloneable handle. Each call is sent to a single task that owns
//! the [`coordinator::SessionCoordinator`] and processes commands, relay traffic, transport
//! events and its own timers one at a time.

pub mod config;
pub mod coordinator;
pub mod host_authority;
pub mod link_manager;
pub mod media_controller;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use conclave::{
    error::Error,
    id::{PeerId, RoomId},
    media::{MediaDevices, MediaStream, TrackKind},
    session::{
        HostAction, MasterControls, Participant, Session, SessionEventKind, SessionEventStream,
        SessionState,
    },
    signaling::SignalingChannel,
    transport::PeerTransport,
};
use futures::{channel::oneshot, StreamExt};
use tokio::sync::{
    broadcast,
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Notify,
};

use crate::{
    config::Config,
    coordinator::{Args, Cmd, Event, SessionCoordinator},
};

#[derive(Clone)]
pub struct MeshSession {
    ch: UnboundedSender<Cmd>,
    ui_event_ch: broadcast::Sender<SessionEventKind>,
    _stop: Arc<StopOnDrop>,
}

/// Stops the coordinator task once the last handle is gone.
struct StopOnDrop(Arc<Notify>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.notify_waiters();
    }
}

impl MeshSession {
    pub fn new(
        config: Config,
        signaling: Arc<dyn SignalingChannel>,
        transport: Arc<dyn PeerTransport>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let (tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (ui_event_ch, _rx) = broadcast::channel(1024);
        let notify = Arc::new(Notify::new());
        let notify2 = notify.clone();

        let coordinator = SessionCoordinator::new(Args {
            config,
            signaling,
            transport,
            devices,
            internal_tx,
            ui_event_ch: ui_event_ch.clone(),
        });
        tokio::spawn(async move {
            run(coordinator, cmd_rx, internal_rx, notify2).await;
        });

        Self {
            ch: tx,
            ui_event_ch,
            _stop: Arc::new(StopOnDrop(notify)),
        }
    }

    async fn request(&self, cmd: impl FnOnce(oneshot::Sender<Result<(), Error>>) -> Cmd) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.ch
            .send(cmd(tx))
            .map_err(|x| Error::ChannelClosed(x.to_string()))?;
        rx.await
            .map_err(|x| Error::ChannelClosed(x.to_string()))?
    }

    async fn query<T>(&self, cmd: impl FnOnce(oneshot::Sender<T>) -> Cmd) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        self.ch
            .send(cmd(tx))
            .map_err(|x| Error::ChannelClosed(x.to_string()))?;
        rx.await.map_err(|x| Error::ChannelClosed(x.to_string()))
    }
}

async fn run(
    mut coordinator: SessionCoordinator,
    mut cmd_rx: UnboundedReceiver<Cmd>,
    mut internal_rx: UnboundedReceiver<Event>,
    notify: Arc<Notify>,
) {
    let mut signaling_events = coordinator.signaling_events();
    let mut transport_events = coordinator.transport_events();

    loop {
        let event = tokio::select! {
            _ = notify.notified() => {
                tracing::debug!("quitting session coordinator");
                break;
            },
            opt = cmd_rx.recv() => match opt {
                Some(cmd) => Event::Command(cmd),
                None => {
                    tracing::debug!("session cmd_rx channel is closed. quitting");
                    break;
                }
            },
            Some(event) = internal_rx.recv() => event,
            Some(event) = signaling_events.next() => Event::Signaling(event),
            Some(event) = transport_events.next() => Event::Transport(event),
        };
        coordinator.step(event).await;
    }

    coordinator.shutdown().await;
}

#[async_trait]
impl Session for MeshSession {
    async fn get_event_stream(&mut self) -> Result<SessionEventStream, Error> {
        let mut rx = self.ui_event_ch.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(_) => {}
                };
            }
        };
        Ok(SessionEventStream(Box::pin(stream)))
    }

    async fn join(&mut self, room: RoomId, display_name: String) -> Result<(), Error> {
        self.request(|rsp| Cmd::Join {
            room_id: room,
            display_name,
            rsp,
        })
        .await
    }

    async fn leave(&mut self) -> Result<(), Error> {
        self.request(|rsp| Cmd::Leave { rsp }).await
    }

    async fn set_microphone(&mut self, enabled: bool) -> Result<(), Error> {
        self.request(|rsp| Cmd::SetMicrophone { enabled, rsp }).await
    }

    async fn set_camera(&mut self, enabled: bool) -> Result<(), Error> {
        self.request(|rsp| Cmd::SetCamera { enabled, rsp }).await
    }

    async fn start_screen_share(&mut self) -> Result<(), Error> {
        self.request(|rsp| Cmd::StartScreenShare { rsp }).await
    }

    async fn stop_screen_share(&mut self) -> Result<(), Error> {
        self.request(|rsp| Cmd::StopScreenShare { rsp }).await
    }

    async fn host_control_audio(&mut self, target: PeerId, currently_enabled: bool) -> Result<(), Error> {
        self.request(|rsp| Cmd::HostToggle {
            target,
            kind: TrackKind::Audio,
            currently_enabled,
            rsp,
        })
        .await
    }

    async fn host_control_video(&mut self, target: PeerId, currently_enabled: bool) -> Result<(), Error> {
        self.request(|rsp| Cmd::HostToggle {
            target,
            kind: TrackKind::Video,
            currently_enabled,
            rsp,
        })
        .await
    }

    async fn host_action(&mut self, target: PeerId, action: HostAction) -> Result<(), Error> {
        self.request(|rsp| Cmd::HostAction {
            target,
            action,
            rsp,
        })
        .await
    }

    async fn set_master_controls(&mut self, controls: MasterControls) -> Result<(), Error> {
        self.request(|rsp| Cmd::SetMasterControls { controls, rsp })
            .await
    }

    async fn remove_participant(&mut self, target: PeerId) -> Result<(), Error> {
        self.request(|rsp| Cmd::RemoveParticipant { target, rsp })
            .await
    }

    async fn state(&self) -> Result<SessionState, Error> {
        self.query(|rsp| Cmd::GetState { rsp }).await
    }

    async fn participants(&self) -> Result<Vec<Participant>, Error> {
        self.query(|rsp| Cmd::GetParticipants { rsp }).await
    }

    async fn local_participant(&self) -> Result<Participant, Error> {
        self.query(|rsp| Cmd::GetLocalParticipant { rsp }).await
    }

    async fn local_stream(&self) -> Result<Option<MediaStream>, Error> {
        self.query(|rsp| Cmd::GetLocalStream { rsp }).await
    }

    async fn is_host(&self) -> Result<bool, Error> {
        self.query(|rsp| Cmd::GetHostStatus { rsp }).await
    }

    async fn master_controls(&self) -> Result<MasterControls, Error> {
        self.query(|rsp| Cmd::GetMasterControls { rsp }).await
    }
}
