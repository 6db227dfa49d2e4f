use std::{sync::Arc, time::Duration};

use conclave::{
    error::Error,
    id::PeerId,
    session::{SessionEventKind, SessionState},
    transport::{IncomingLink, PeerLink, PeerTransportEvent},
};

use super::{Event, SessionCoordinator};
use crate::{
    link_manager::{LinkDirection, LinkOutcome},
    registry::Admission,
};

/// Of two participants that learn about each other at the same time, only the one with
/// the lower id calls.
pub(crate) fn initiates(local: &PeerId, remote: &PeerId) -> bool {
    local < remote
}

impl SessionCoordinator {
    pub(super) async fn handle_transport(&mut self, event: PeerTransportEvent) {
        if !self.state.is_live() {
            tracing::debug!("ignoring transport event {event} outside a live session");
            return;
        }
        match event {
            PeerTransportEvent::Open { id } => {
                tracing::info!(%id, "peer transport open");
                self.registry.set_local_id(id.clone());
                self.local_id = Some(id);
                self.announce_join().await;
                for remote in std::mem::take(&mut self.held_dials) {
                    if self.pending_dials.contains(&remote) {
                        self.schedule(Duration::ZERO, Event::DialDue { remote });
                    }
                }
            }
            PeerTransportEvent::Incoming(request) => self.handle_incoming(request).await,
            PeerTransportEvent::StreamReceived { remote, stream } => {
                if !self.links.mark_stream_received(&remote) {
                    tracing::debug!(%remote, "stream for a link that no longer exists");
                    stream.stop();
                    return;
                }
                match self.registry.admit(&remote, stream.clone()) {
                    Admission::Joined(participant) => {
                        tracing::info!(%remote, name = %participant.display_name, "participant joined");
                        self.emit_ui(SessionEventKind::ParticipantJoined {
                            participant,
                            stream,
                        });
                    }
                    Admission::StreamReplaced(_) => {
                        self.emit_ui(SessionEventKind::RemoteStreamChanged {
                            peer_id: remote,
                            stream,
                        });
                    }
                }
            }
            PeerTransportEvent::LinkClosed { remote } => {
                tracing::info!(%remote, "link closed");
                self.drop_peer(&remote, false).await;
            }
            PeerTransportEvent::LinkError { remote, message } => {
                tracing::warn!(%remote, "link error: {message}");
                self.drop_peer(&remote, true).await;
            }
            PeerTransportEvent::Disconnected => {
                tracing::warn!("peer transport disconnected");
                self.status("Reconnecting...");
                if matches!(self.state, SessionState::Joining | SessionState::Active) {
                    self.set_state(SessionState::ConnectingTransport);
                }
                if self.transport.is_destroyed() {
                    return;
                }
                if let Err(e) = self.transport.reconnect().await {
                    tracing::error!("failed to reconnect peer transport: {e}");
                    self.schedule(
                        self.config.timing().transport_recreate_delay,
                        Event::TransportRecreateDue,
                    );
                }
            }
            PeerTransportEvent::Closed => {
                tracing::info!("peer transport closed");
                self.status("Disconnected");
            }
            PeerTransportEvent::Error { message } => {
                tracing::error!("peer transport error: {message}");
                self.status("Peer connection error");
                self.schedule(
                    self.config.timing().transport_recreate_delay,
                    Event::TransportRecreateDue,
                );
            }
        }
    }

    async fn handle_incoming(&mut self, request: IncomingLink) {
        let remote = request.remote.clone();
        let Some(stream) = self.media.active_stream().cloned() else {
            tracing::debug!(%remote, "no local media to answer with");
            return;
        };
        // the remote dialed first, no need to dial it ourselves
        self.pending_dials.remove(&remote);
        self.held_dials.remove(&remote);
        if let Some(pending) = self.links.answer(request, &stream) {
            self.spawn_link(pending);
        }
    }

    pub(super) fn handle_dial_due(&mut self, remote: PeerId) {
        if !self.pending_dials.contains(&remote) {
            tracing::debug!(%remote, "dial no longer pending");
            return;
        }
        if !self.state.is_live() {
            self.pending_dials.remove(&remote);
            return;
        }
        let Some(local) = self.local_id.clone() else {
            tracing::debug!(%remote, "no local identity yet, dial held");
            self.held_dials.insert(remote);
            return;
        };
        self.pending_dials.remove(&remote);
        if local == remote || self.links.contains(&remote) {
            return;
        }
        if !initiates(&local, &remote) {
            tracing::debug!(%remote, "waiting for remote to dial");
            return;
        }
        let Some(stream) = self.media.active_stream().cloned() else {
            return;
        };
        if let Some(pending) = self.links.dial(&remote, &stream) {
            tracing::debug!(%remote, "dialing");
            self.spawn_link(pending);
        }
    }

    pub(super) async fn handle_link_settled(
        &mut self,
        remote: PeerId,
        attempt: u64,
        direction: LinkDirection,
        result: Result<Arc<dyn PeerLink>, Error>,
    ) {
        let outcome = self
            .links
            .settle(&remote, attempt, result, self.media.active_stream())
            .await;
        match (outcome, direction) {
            (Ok(LinkOutcome::Opened(_)), _) => tracing::debug!(%remote, %direction, "link open"),
            (Ok(LinkOutcome::Discarded), _) => {
                tracing::debug!(%remote, "peer left while its link was being set up")
            }
            (Err(e), LinkDirection::Outbound) => tracing::warn!(%remote, "failed to dial: {e}"),
            (Err(e), LinkDirection::Inbound) => tracing::warn!(%remote, "failed to answer: {e}"),
        }
    }

    pub(super) async fn handle_recreate_due(&mut self) {
        if !self.state.is_live() {
            return;
        }
        if !self.transport.is_destroyed() {
            tracing::debug!("peer transport still alive");
            return;
        }
        tracing::info!("recreating peer transport");
        if matches!(self.state, SessionState::Joining | SessionState::Active) {
            self.set_state(SessionState::ConnectingTransport);
        }
        self.local_id = None;
        if let Err(e) = self.transport.open().await {
            tracing::error!("failed to recreate peer transport: {e}");
            self.schedule(
                self.config.timing().transport_recreate_delay,
                Event::TransportRecreateDue,
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exactly_one_side_initiates() {
        let a = PeerId::from("peer-a");
        let b = PeerId::from("peer-b");
        assert!(initiates(&a, &b));
        assert!(!initiates(&b, &a));
        assert!(!initiates(&a, &a));
    }
}
