#![allow(dead_code)]

use std::sync::Arc;

use conclave::{
    error::Error,
    id::{PeerId, RoomId},
    media::{MediaStream, MediaTrack, TrackKind},
    session::SessionEventKind,
    signaling::SignalingEventStream,
    transport::{IncomingLink, PeerTransportEvent, PeerTransportEventStream},
};
use conclave_memory::{MemoryDevices, MemoryLink, MemorySignaling, MemoryTransport};
use conclave_mesh::{
    config::Config,
    coordinator::{Args, Cmd, Event, SessionCoordinator},
    media_controller::Responder,
};
use futures::{channel::oneshot, FutureExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{
    broadcast,
    mpsc::{self, UnboundedReceiver},
};

pub const ROOM: &str = "standup";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A coordinator wired to in-memory collaborators, stepped by hand.
pub struct Harness {
    pub coordinator: SessionCoordinator,
    pub signaling: Arc<MemorySignaling>,
    pub transport: Arc<MemoryTransport>,
    pub devices: Arc<MemoryDevices>,
    internal_rx: UnboundedReceiver<Event>,
    ui_rx: broadcast::Receiver<SessionEventKind>,
    signaling_events: SignalingEventStream,
    transport_events: PeerTransportEventStream,
}

impl Harness {
    pub fn new(local: &str) -> Self {
        Self::with_config(local, Config::testing())
    }

    pub fn with_config(local: &str, config: Config) -> Self {
        init_tracing();
        let signaling = Arc::new(MemorySignaling::new());
        let transport = Arc::new(MemoryTransport::new(local));
        let devices = Arc::new(MemoryDevices::new());
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (ui_event_ch, ui_rx) = broadcast::channel(1024);

        let coordinator = SessionCoordinator::new(Args {
            config,
            signaling: signaling.clone(),
            transport: transport.clone(),
            devices: devices.clone(),
            internal_tx,
            ui_event_ch,
        });
        let signaling_events = coordinator.signaling_events();
        let transport_events = coordinator.transport_events();

        Self {
            coordinator,
            signaling,
            transport,
            devices,
            internal_rx,
            ui_rx,
            signaling_events,
            transport_events,
        }
    }

    /// Feeds the coordinator everything that is ready until nothing more arrives.
    pub async fn settle(&mut self) {
        loop {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            let mut progressed = false;
            while let Ok(event) = self.internal_rx.try_recv() {
                self.coordinator.step(event).await;
                progressed = true;
            }
            while let Some(Some(event)) = self.signaling_events.next().now_or_never() {
                self.coordinator.step(Event::Signaling(event)).await;
                progressed = true;
            }
            while let Some(Some(event)) = self.transport_events.next().now_or_never() {
                self.coordinator.step(Event::Transport(event)).await;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Submits a command without waiting for its answer.
    pub async fn submit(
        &mut self,
        cmd: impl FnOnce(Responder) -> Cmd,
    ) -> oneshot::Receiver<Result<(), Error>> {
        let (tx, rx) = oneshot::channel();
        self.coordinator.step(Event::Command(cmd(tx))).await;
        self.settle().await;
        rx
    }

    /// Submits a command and returns its answer, which must be ready once settled.
    pub async fn command(&mut self, cmd: impl FnOnce(Responder) -> Cmd) -> Result<(), Error> {
        let rx = self.submit(cmd).await;
        rx.now_or_never()
            .expect("command answered")
            .expect("responder kept")
    }

    pub async fn join(&mut self, display_name: &str) -> Result<(), Error> {
        let display_name = display_name.to_string();
        self.command(|rsp| Cmd::Join {
            room_id: RoomId::from(ROOM),
            display_name,
            rsp,
        })
        .await
    }

    /// Joins and receives `roster` from the relay.
    pub async fn join_active(&mut self, display_name: &str, roster: Vec<Value>) {
        self.join(display_name).await.expect("joined");
        self.deliver("room-participants", json!({ "participants": roster }))
            .await;
    }

    pub async fn deliver(&mut self, event: &str, payload: Value) {
        self.signaling.deliver(event, payload);
        self.settle().await;
    }

    pub async fn inject(&mut self, event: PeerTransportEvent) {
        self.transport.inject(event);
        self.settle().await;
    }

    pub async fn incoming(&mut self, remote: &str) {
        self.inject(PeerTransportEvent::Incoming(IncomingLink::new(PeerId::from(
            remote,
        ))))
        .await;
    }

    /// Delivers a camera and microphone stream from `remote` and returns it.
    pub async fn stream_from(&mut self, remote: &str) -> MediaStream {
        let stream = remote_stream(remote);
        self.inject(PeerTransportEvent::StreamReceived {
            remote: PeerId::from(remote),
            stream: stream.clone(),
        })
        .await;
        stream
    }

    pub async fn set_microphone(&mut self, enabled: bool) -> Result<(), Error> {
        self.command(|rsp| Cmd::SetMicrophone { enabled, rsp }).await
    }

    pub async fn set_camera(&mut self, enabled: bool) -> Result<(), Error> {
        self.command(|rsp| Cmd::SetCamera { enabled, rsp }).await
    }

    pub async fn start_screen_share(&mut self) -> Result<(), Error> {
        self.command(|rsp| Cmd::StartScreenShare { rsp }).await
    }

    pub async fn stop_screen_share(&mut self) -> Result<(), Error> {
        self.command(|rsp| Cmd::StopScreenShare { rsp }).await
    }

    pub async fn leave(&mut self) -> Result<(), Error> {
        self.command(|rsp| Cmd::Leave { rsp }).await
    }

    /// UI events emitted since the last call.
    pub fn ui_events(&mut self) -> Vec<SessionEventKind> {
        let mut events = vec![];
        while let Ok(event) = self.ui_rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn notices(&mut self) -> Vec<String> {
        self.ui_events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEventKind::Notice { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn link(&self, remote: &str) -> Arc<MemoryLink> {
        self.transport
            .link(&PeerId::from(remote))
            .expect("link exists")
    }

    pub fn local_track(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.coordinator
            .local_stream()
            .and_then(|stream| stream.track(kind).cloned())
    }
}

/// A room member as the relay announces it.
pub fn member(peer: &str, name: &str) -> Value {
    json!({
        "id": format!("socket-{peer}"),
        "username": name,
        "peerId": peer,
    })
}

pub fn remote_stream(remote: &str) -> MediaStream {
    MediaStream::new(vec![
        MediaTrack::new(TrackKind::Audio, format!("{remote}-microphone")),
        MediaTrack::new(TrackKind::Video, format!("{remote}-camera")),
    ])
}
