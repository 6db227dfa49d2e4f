//! Peer-to-peer media links.

use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::{
    error::Error,
    id::PeerId,
    media::{MediaStream, MediaTrack, TrackKind},
};

/// A link offered by a remote participant, waiting to be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingLink {
    pub remote: PeerId,
    pub request_id: Uuid,
}

impl IncomingLink {
    pub fn new(remote: PeerId) -> Self {
        Self {
            remote,
            request_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Display, Clone)]
pub enum PeerTransportEvent {
    /// The transport is registered and reachable under `id`
    #[display(fmt = "Open")]
    Open { id: PeerId },
    #[display(fmt = "Incoming")]
    Incoming(IncomingLink),
    /// The remote side of a link started sending media
    #[display(fmt = "StreamReceived")]
    StreamReceived { remote: PeerId, stream: MediaStream },
    #[display(fmt = "LinkClosed")]
    LinkClosed { remote: PeerId },
    #[display(fmt = "LinkError")]
    LinkError { remote: PeerId, message: String },
    /// Lost the broker but the identity is kept and can be reconnected
    #[display(fmt = "Disconnected")]
    Disconnected,
    #[display(fmt = "Closed")]
    Closed,
    #[display(fmt = "Error")]
    Error { message: String },
}

pub struct PeerTransportEventStream(pub BoxStream<'static, PeerTransportEvent>);

impl core::ops::Deref for PeerTransportEventStream {
    type Target = BoxStream<'static, PeerTransportEvent>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for PeerTransportEventStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// One established media link with a remote participant.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn remote(&self) -> &PeerId;

    /// Kinds for which the link currently has an outgoing sender.
    fn sender_kinds(&self) -> Vec<TrackKind>;

    /// Swaps the outgoing track of the track's kind without renegotiating.
    async fn replace_track(&self, track: MediaTrack) -> Result<(), Error>;

    async fn add_track(&self, track: MediaTrack) -> Result<(), Error>;

    async fn remove_track(&self, kind: TrackKind) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// The transport that registers the local identity and creates links.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    fn subscribe(&self) -> PeerTransportEventStream;

    /// Registers a fresh identity. Reports `Open` once reachable.
    async fn open(&self) -> Result<(), Error>;

    /// Re-registers the existing identity after `Disconnected`.
    async fn reconnect(&self) -> Result<(), Error>;

    /// True once the identity is gone and only `open` can recover.
    fn is_destroyed(&self) -> bool;

    async fn destroy(&self) -> Result<(), Error>;

    /// Offers a link to `remote`, sending `stream`.
    async fn call(&self, remote: &PeerId, stream: &MediaStream) -> Result<Arc<dyn PeerLink>, Error>;

    /// Accepts an offered link, sending `stream`.
    async fn answer(&self, request: IncomingLink, stream: &MediaStream) -> Result<Arc<dyn PeerLink>, Error>;
}
