use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use conclave::{
    error::Error,
    id::PeerId,
    media::{MediaStream, MediaTrack, TrackKind},
    transport::{IncomingLink, PeerLink, PeerTransport, PeerTransportEvent, PeerTransportEventStream},
};
use futures::channel::oneshot;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::gate::Gate;

/// An operation the session performed on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOp {
    Replace { kind: TrackKind, track: Uuid },
    Add { kind: TrackKind, track: Uuid },
    Remove(TrackKind),
    Close,
}

/// A link that keeps one sender per kind and logs every operation.
pub struct MemoryLink {
    remote: PeerId,
    inner: Mutex<LinkInner>,
}

struct LinkInner {
    senders: BTreeMap<TrackKind, MediaTrack>,
    ops: Vec<LinkOp>,
    closed: bool,
    fail_replace: bool,
}

impl MemoryLink {
    pub fn new(remote: PeerId, stream: &MediaStream) -> Self {
        let senders = TrackKind::ALL
            .into_iter()
            .filter_map(|kind| stream.track(kind).map(|track| (kind, track.clone())))
            .collect();
        Self {
            remote,
            inner: Mutex::new(LinkInner {
                senders,
                ops: vec![],
                closed: false,
                fail_replace: false,
            }),
        }
    }

    pub fn ops(&self) -> Vec<LinkOp> {
        self.inner.lock().ops.clone()
    }

    pub fn sender(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.inner.lock().senders.get(&kind).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Makes subsequent `replace_track` calls fail.
    pub fn fail_replace(&self, fail: bool) {
        self.inner.lock().fail_replace = fail;
    }
}

#[async_trait]
impl PeerLink for MemoryLink {
    fn remote(&self) -> &PeerId {
        &self.remote
    }

    fn sender_kinds(&self) -> Vec<TrackKind> {
        self.inner.lock().senders.keys().copied().collect()
    }

    async fn replace_track(&self, track: MediaTrack) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let kind = track.kind();
        if inner.fail_replace || !inner.senders.contains_key(&kind) {
            return Err(Error::Transport {
                peer: self.remote.clone(),
                message: format!("no {kind} sender to replace"),
            });
        }
        inner.ops.push(LinkOp::Replace {
            kind,
            track: track.id(),
        });
        inner.senders.insert(kind, track);
        Ok(())
    }

    async fn add_track(&self, track: MediaTrack) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let kind = track.kind();
        inner.ops.push(LinkOp::Add {
            kind,
            track: track.id(),
        });
        inner.senders.insert(kind, track);
        Ok(())
    }

    async fn remove_track(&self, kind: TrackKind) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.ops.push(LinkOp::Remove(kind));
        inner.senders.remove(&kind);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.ops.push(LinkOp::Close);
        inner.closed = true;
        Ok(())
    }
}

/// A peer transport that creates [`MemoryLink`]s and delivers injected events.
pub struct MemoryTransport {
    event_ch: broadcast::Sender<PeerTransportEvent>,
    inner: Mutex<TransportInner>,
}

struct TransportInner {
    next_id: PeerId,
    current_id: Option<PeerId>,
    destroyed: bool,
    opens: usize,
    reconnects: usize,
    calls: Vec<PeerId>,
    answers: Vec<IncomingLink>,
    links: Vec<Arc<MemoryLink>>,
    unreachable: HashSet<PeerId>,
    call_gates: VecDeque<oneshot::Receiver<()>>,
}

impl MemoryTransport {
    /// `id` is the identity registered by the next `open`.
    pub fn new(id: impl Into<PeerId>) -> Self {
        let (event_ch, _) = broadcast::channel(1024);
        Self {
            event_ch,
            inner: Mutex::new(TransportInner {
                next_id: id.into(),
                current_id: None,
                destroyed: true,
                opens: 0,
                reconnects: 0,
                calls: vec![],
                answers: vec![],
                links: vec![],
                unreachable: HashSet::new(),
                call_gates: VecDeque::new(),
            }),
        }
    }

    pub fn inject(&self, event: PeerTransportEvent) {
        if let Err(e) = self.event_ch.send(event) {
            tracing::debug!("no transport subscribers: {e}");
        }
    }

    pub fn set_next_id(&self, id: impl Into<PeerId>) {
        self.inner.lock().next_id = id.into();
    }

    /// Simulates the broker discarding the identity.
    pub fn lose_identity(&self) {
        let mut inner = self.inner.lock();
        inner.destroyed = true;
        inner.current_id = None;
    }

    /// Makes calls to `remote` fail.
    pub fn set_unreachable(&self, remote: impl Into<PeerId>) {
        self.inner.lock().unreachable.insert(remote.into());
    }

    /// The next outgoing call is recorded right away but only completes once the
    /// returned gate is released. Reachability is checked after that.
    pub fn hold_next_call(&self) -> Gate {
        let (gate, rx) = Gate::new();
        self.inner.lock().call_gates.push_back(rx);
        gate
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.inner.lock().current_id.clone()
    }

    pub fn opens(&self) -> usize {
        self.inner.lock().opens
    }

    pub fn reconnects(&self) -> usize {
        self.inner.lock().reconnects
    }

    pub fn calls(&self) -> Vec<PeerId> {
        self.inner.lock().calls.clone()
    }

    pub fn answers(&self) -> Vec<IncomingLink> {
        self.inner.lock().answers.clone()
    }

    pub fn links(&self) -> Vec<Arc<MemoryLink>> {
        self.inner.lock().links.clone()
    }

    /// The most recent link created towards `remote`.
    pub fn link(&self, remote: &PeerId) -> Option<Arc<MemoryLink>> {
        self.inner
            .lock()
            .links
            .iter()
            .rev()
            .find(|link| link.remote() == remote)
            .cloned()
    }

    fn create_link(&self, remote: PeerId, stream: &MediaStream) -> Arc<MemoryLink> {
        let link = Arc::new(MemoryLink::new(remote, stream));
        self.inner.lock().links.push(link.clone());
        link
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn subscribe(&self) -> PeerTransportEventStream {
        let mut rx = self.event_ch.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(_) => {}
                };
            }
        };
        PeerTransportEventStream(Box::pin(stream))
    }

    async fn open(&self) -> Result<(), Error> {
        let id = {
            let mut inner = self.inner.lock();
            inner.destroyed = false;
            inner.opens += 1;
            inner.current_id = Some(inner.next_id.clone());
            inner.next_id.clone()
        };
        self.inject(PeerTransportEvent::Open { id });
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), Error> {
        let id = {
            let mut inner = self.inner.lock();
            inner.reconnects += 1;
            inner.current_id.clone()
        };
        match id {
            Some(id) => {
                self.inject(PeerTransportEvent::Open { id });
                Ok(())
            }
            None => Err(Error::TransportUnavailable("identity was destroyed".into())),
        }
    }

    fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    async fn destroy(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.destroyed = true;
        inner.current_id = None;
        Ok(())
    }

    async fn call(&self, remote: &PeerId, stream: &MediaStream) -> Result<Arc<dyn PeerLink>, Error> {
        let gate = {
            let mut inner = self.inner.lock();
            inner.calls.push(remote.clone());
            inner.call_gates.pop_front()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.inner.lock().unreachable.contains(remote) {
            return Err(Error::Transport {
                peer: remote.clone(),
                message: "peer unreachable".into(),
            });
        }
        let link: Arc<dyn PeerLink> = self.create_link(remote.clone(), stream);
        Ok(link)
    }

    async fn answer(&self, request: IncomingLink, stream: &MediaStream) -> Result<Arc<dyn PeerLink>, Error> {
        let remote = request.remote.clone();
        self.inner.lock().answers.push(request);
        let link: Arc<dyn PeerLink> = self.create_link(remote, stream);
        Ok(link)
    }
}
