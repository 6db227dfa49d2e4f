//! At most one media link per remote participant.
//!
//! Calling and answering can take as long as the remote needs to negotiate, so the manager
//! never awaits them itself. [`PeerLinkManager::dial`] and [`PeerLinkManager::answer`] hand
//! back a [`PendingLink`] for the caller to run, and the result is fed back through
//! [`PeerLinkManager::settle`]. Closing a remote while its attempt is pending cancels it,
//! and the link it produces is closed on arrival.

use std::{collections::HashMap, sync::Arc};

use conclave::{
    error::Error,
    id::PeerId,
    media::{MediaStream, TrackKind},
    transport::{IncomingLink, PeerLink, PeerTransport},
};
use derive_more::Display;
use futures::{future::BoxFuture, FutureExt};

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum LinkDirection {
    #[display(fmt = "outbound")]
    Outbound,
    #[display(fmt = "inbound")]
    Inbound,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Opened(LinkDirection),
    /// The attempt was cancelled while it was pending and its link was closed
    Discarded,
}

pub struct LinkEntry {
    link: Arc<dyn PeerLink>,
    direction: LinkDirection,
    stream_received: bool,
}

impl LinkEntry {
    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    pub fn stream_received(&self) -> bool {
        self.stream_received
    }
}

/// A call or answer to run outside the manager.
pub struct PendingLink {
    pub remote: PeerId,
    pub attempt: u64,
    pub direction: LinkDirection,
    pub future: BoxFuture<'static, Result<Arc<dyn PeerLink>, Error>>,
}

struct Attempt {
    id: u64,
    direction: LinkDirection,
    // the stream the link was offered with
    stream: MediaStream,
}

/// One failed track operation during [`PeerLinkManager::replace_tracks`].
#[derive(Debug)]
pub struct TrackFailure {
    pub remote: PeerId,
    pub kind: TrackKind,
    pub error: Error,
}

pub struct PeerLinkManager {
    transport: Arc<dyn PeerTransport>,
    links: HashMap<PeerId, LinkEntry>,
    attempts: HashMap<PeerId, Attempt>,
    next_attempt: u64,
}

impl PeerLinkManager {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            transport,
            links: HashMap::new(),
            attempts: HashMap::new(),
            next_attempt: 0,
        }
    }

    pub fn contains(&self, remote: &PeerId) -> bool {
        self.links.contains_key(remote)
    }

    /// True while a call or answer for `remote` is pending.
    pub fn is_connecting(&self, remote: &PeerId) -> bool {
        self.attempts.contains_key(remote)
    }

    pub fn get(&self, remote: &PeerId) -> Option<&LinkEntry> {
        self.links.get(remote)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn remotes(&self) -> Vec<PeerId> {
        self.links.keys().cloned().collect()
    }

    /// Prepares a call to `remote` unless a link exists or an attempt is pending.
    #[tracing::instrument(skip(self, stream))]
    pub fn dial(&mut self, remote: &PeerId, stream: &MediaStream) -> Option<PendingLink> {
        if self.links.contains_key(remote) || self.attempts.contains_key(remote) {
            tracing::debug!("link already exists or is being set up");
            return None;
        }
        let transport = self.transport.clone();
        let target = remote.clone();
        let offered = stream.clone();
        let future = async move {
            transport
                .call(&target, &offered)
                .await
                .map_err(|e| link_error(&target, e))
        }
        .boxed();
        Some(self.begin(remote.clone(), LinkDirection::Outbound, stream, future))
    }

    /// Prepares an answer to an offered link unless a link to the same remote exists or
    /// an attempt is pending.
    #[tracing::instrument(skip(self, stream), fields(remote = %request.remote))]
    pub fn answer(&mut self, request: IncomingLink, stream: &MediaStream) -> Option<PendingLink> {
        let remote = request.remote.clone();
        if self.links.contains_key(&remote) || self.attempts.contains_key(&remote) {
            tracing::debug!("ignoring duplicate incoming link");
            return None;
        }
        let transport = self.transport.clone();
        let target = remote.clone();
        let offered = stream.clone();
        let future = async move {
            transport
                .answer(request, &offered)
                .await
                .map_err(|e| link_error(&target, e))
        }
        .boxed();
        Some(self.begin(remote, LinkDirection::Inbound, stream, future))
    }

    fn begin(
        &mut self,
        remote: PeerId,
        direction: LinkDirection,
        stream: &MediaStream,
        future: BoxFuture<'static, Result<Arc<dyn PeerLink>, Error>>,
    ) -> PendingLink {
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.attempts.insert(
            remote.clone(),
            Attempt {
                id: attempt,
                direction,
                stream: stream.clone(),
            },
        );
        PendingLink {
            remote,
            attempt,
            direction,
            future,
        }
    }

    /// Feeds back the result of a pending call or answer.
    ///
    /// A link for a cancelled or superseded attempt is closed. If the local tracks changed
    /// while the attempt was pending, the new link is pointed at `current`.
    pub async fn settle(
        &mut self,
        remote: &PeerId,
        attempt: u64,
        result: Result<Arc<dyn PeerLink>, Error>,
        current: Option<&MediaStream>,
    ) -> Result<LinkOutcome, Error> {
        let pending = match self.attempts.remove(remote) {
            Some(pending) if pending.id == attempt => pending,
            other => {
                if let Some(other) = other {
                    self.attempts.insert(remote.clone(), other);
                }
                if let Ok(link) = result {
                    tracing::debug!(%remote, attempt, "closing link of a cancelled attempt");
                    if let Err(e) = link.close().await {
                        tracing::warn!(%remote, "failed to close link: {e}");
                    }
                }
                return Ok(LinkOutcome::Discarded);
            }
        };

        let link = result?;
        if let Some(current) = current.filter(|current| !same_tracks(current, &pending.stream)) {
            let mut failures = vec![];
            update_senders(remote, link.as_ref(), current, &mut failures).await;
            if !failures.is_empty() {
                tracing::warn!(%remote, "{} track updates failed on a new link", failures.len());
            }
        }
        tracing::debug!(%remote, direction = %pending.direction, "link established");
        self.links.insert(
            remote.clone(),
            LinkEntry {
                link,
                direction: pending.direction,
                stream_received: false,
            },
        );
        Ok(LinkOutcome::Opened(pending.direction))
    }

    /// Records that `remote` started sending. False if no link exists.
    pub fn mark_stream_received(&mut self, remote: &PeerId) -> bool {
        match self.links.get_mut(remote) {
            Some(entry) => {
                entry.stream_received = true;
                true
            }
            None => false,
        }
    }

    /// Points every link at the tracks of `stream`.
    ///
    /// Per kind, an existing sender is replaced, a missing sender is added and a sender
    /// whose kind is absent from `stream` is removed. Failures are logged and collected
    /// without stopping the other links.
    pub async fn replace_tracks(&self, stream: &MediaStream) -> Vec<TrackFailure> {
        let mut failures = vec![];
        for (remote, entry) in &self.links {
            update_senders(remote, entry.link.as_ref(), stream, &mut failures).await;
        }
        failures
    }

    /// Closes and forgets the link to `remote`, cancelling a pending attempt.
    /// Returns false if there was no link.
    pub async fn close(&mut self, remote: &PeerId) -> bool {
        self.attempts.remove(remote);
        let Some(entry) = self.links.remove(remote) else {
            return false;
        };
        if let Err(e) = entry.link.close().await {
            tracing::warn!(%remote, "failed to close link: {e}");
        }
        true
    }

    /// Forgets a link the transport already closed.
    pub fn forget(&mut self, remote: &PeerId) -> bool {
        self.attempts.remove(remote);
        self.links.remove(remote).is_some()
    }

    pub async fn close_all(&mut self) {
        self.attempts.clear();
        for (remote, entry) in self.links.drain() {
            if let Err(e) = entry.link.close().await {
                tracing::warn!(%remote, "failed to close link: {e}");
            }
        }
    }
}

async fn update_senders(
    remote: &PeerId,
    link: &dyn PeerLink,
    stream: &MediaStream,
    failures: &mut Vec<TrackFailure>,
) {
    let senders = link.sender_kinds();
    for kind in TrackKind::ALL {
        let has_sender = senders.contains(&kind);
        let result = match (stream.track(kind), has_sender) {
            (Some(track), true) => link.replace_track(track.clone()).await,
            (Some(track), false) => link.add_track(track.clone()).await,
            (None, true) => link.remove_track(kind).await,
            (None, false) => continue,
        };
        if let Err(error) = result {
            tracing::error!(%remote, %kind, "failed to update sender: {error}");
            failures.push(TrackFailure {
                remote: remote.clone(),
                kind,
                error,
            });
        }
    }
}

fn same_tracks(a: &MediaStream, b: &MediaStream) -> bool {
    TrackKind::ALL.into_iter().all(|kind| {
        a.track(kind).map(|track| track.id()) == b.track(kind).map(|track| track.id())
    })
}

fn link_error(remote: &PeerId, error: Error) -> Error {
    match error {
        e @ Error::Transport { .. } => e,
        e => Error::Transport {
            peer: remote.clone(),
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod test {
    use conclave::media::MediaTrack;
    use conclave_memory::{LinkOp, MemoryTransport};

    use super::*;

    fn camera_stream() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Video, "camera"),
            MediaTrack::new(TrackKind::Audio, "microphone"),
        ])
    }

    /// Runs a pending attempt to completion.
    async fn complete(
        manager: &mut PeerLinkManager,
        pending: Option<PendingLink>,
        current: &MediaStream,
    ) -> Result<LinkOutcome, Error> {
        let pending = pending.expect("attempt started");
        let result = pending.future.await;
        manager
            .settle(&pending.remote, pending.attempt, result, Some(current))
            .await
    }

    async fn connect(manager: &mut PeerLinkManager, remote: &PeerId) -> Result<LinkOutcome, Error> {
        let stream = camera_stream();
        let pending = manager.dial(remote, &stream);
        complete(manager, pending, &stream).await
    }

    #[tokio::test]
    async fn dial_is_idempotent() -> anyhow::Result<()> {
        let transport = Arc::new(MemoryTransport::new("peer-a"));
        let mut manager = PeerLinkManager::new(transport.clone());
        let bo = PeerId::from("peer-b");
        let stream = camera_stream();

        let pending = manager.dial(&bo, &stream);
        assert!(manager.is_connecting(&bo));
        assert!(manager.dial(&bo, &stream).is_none());
        assert_eq!(
            complete(&mut manager, pending, &stream).await?,
            LinkOutcome::Opened(LinkDirection::Outbound)
        );

        assert!(manager.dial(&bo, &stream).is_none());
        assert!(!manager.is_connecting(&bo));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(manager.len(), 1);
        assert_eq!(
            manager.get(&bo).map(LinkEntry::direction),
            Some(LinkDirection::Outbound)
        );
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_incoming_is_ignored() -> anyhow::Result<()> {
        let transport = Arc::new(MemoryTransport::new("peer-a"));
        let mut manager = PeerLinkManager::new(transport.clone());
        let bo = PeerId::from("peer-b");

        connect(&mut manager, &bo).await?;
        assert!(manager
            .answer(IncomingLink::new(bo.clone()), &camera_stream())
            .is_none());
        assert!(transport.answers().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_call_leaves_no_link() {
        let transport = Arc::new(MemoryTransport::new("peer-a"));
        transport.set_unreachable("peer-c");
        let mut manager = PeerLinkManager::new(transport);
        let cy = PeerId::from("peer-c");
        let result = connect(&mut manager, &cy).await;
        assert!(matches!(result, Err(Error::Transport { .. })));
        assert!(manager.is_empty());
        assert!(!manager.is_connecting(&cy));
    }

    #[tokio::test]
    async fn cancelled_attempt_closes_its_link() -> anyhow::Result<()> {
        let transport = Arc::new(MemoryTransport::new("peer-a"));
        let mut manager = PeerLinkManager::new(transport.clone());
        let bo = PeerId::from("peer-b");
        let stream = camera_stream();

        let pending = manager.dial(&bo, &stream);
        assert!(!manager.close(&bo).await);
        assert!(!manager.is_connecting(&bo));

        assert_eq!(
            complete(&mut manager, pending, &stream).await?,
            LinkOutcome::Discarded
        );
        assert!(manager.is_empty());
        assert!(transport.link(&bo).expect("link").is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn new_link_follows_tracks_changed_meanwhile() -> anyhow::Result<()> {
        let transport = Arc::new(MemoryTransport::new("peer-a"));
        let mut manager = PeerLinkManager::new(transport.clone());
        let bo = PeerId::from("peer-b");

        let pending = manager.dial(&bo, &camera_stream());
        let screen = MediaTrack::new(TrackKind::Video, "screen");
        let current = MediaStream::new(vec![screen.clone()]);
        complete(&mut manager, pending, &current).await?;

        let link = transport.link(&bo).expect("link");
        assert_eq!(link.sender(TrackKind::Video), Some(screen.clone()));
        assert!(link.ops().contains(&LinkOp::Replace {
            kind: TrackKind::Video,
            track: screen.id()
        }));
        assert!(link.ops().contains(&LinkOp::Remove(TrackKind::Audio)));
        Ok(())
    }

    #[tokio::test]
    async fn replace_tracks_per_kind() -> anyhow::Result<()> {
        let transport = Arc::new(MemoryTransport::new("peer-a"));
        let mut manager = PeerLinkManager::new(transport.clone());
        let bo = PeerId::from("peer-b");
        let cy = PeerId::from("peer-c");
        connect(&mut manager, &bo).await?;
        connect(&mut manager, &cy).await?;

        let mic = MediaTrack::new(TrackKind::Audio, "microphone");
        let audio_only = MediaStream::new(vec![mic.clone()]);
        transport.link(&cy).expect("link").fail_replace(true);

        let failures = manager.replace_tracks(&audio_only).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].remote, cy);

        let ops = transport.link(&bo).expect("link").ops();
        assert!(ops.contains(&LinkOp::Replace {
            kind: TrackKind::Audio,
            track: mic.id()
        }));
        assert!(ops.contains(&LinkOp::Remove(TrackKind::Video)));
        // the failing link still had its video sender removed
        assert!(transport
            .link(&cy)
            .expect("link")
            .ops()
            .contains(&LinkOp::Remove(TrackKind::Video)));

        let camera = MediaTrack::new(TrackKind::Video, "camera");
        manager
            .replace_tracks(&MediaStream::new(vec![camera.clone(), mic]))
            .await;
        assert!(transport.link(&bo).expect("link").ops().contains(&LinkOp::Add {
            kind: TrackKind::Video,
            track: camera.id()
        }));
        Ok(())
    }

    #[tokio::test]
    async fn close_unknown_is_noop() -> anyhow::Result<()> {
        let transport = Arc::new(MemoryTransport::new("peer-a"));
        let mut manager = PeerLinkManager::new(transport.clone());
        let bo = PeerId::from("peer-b");
        assert!(!manager.close(&bo).await);

        connect(&mut manager, &bo).await?;
        assert!(manager.close(&bo).await);
        assert!(transport.link(&bo).expect("link").is_closed());
        assert!(!manager.close(&bo).await);
        Ok(())
    }
}
