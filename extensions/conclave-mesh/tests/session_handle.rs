mod common;

use std::{sync::Arc, time::Duration};

use common::{init_tracing, ROOM};
use conclave::{
    id::RoomId,
    session::{Session, SessionEventKind, SessionEventStream, SessionState},
    transport::PeerTransport,
};
use conclave_memory::{MemoryDevices, MemorySignaling, MemoryTransport};
use conclave_mesh::{config::Config, MeshSession};
use futures::StreamExt;
use serde_json::json;

async fn wait_for_state(events: &mut SessionEventStream, wanted: SessionState) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            if let SessionEventKind::StateChanged { state } = event {
                if state == wanted {
                    return;
                }
            }
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn handle_drives_a_session() -> anyhow::Result<()> {
    init_tracing();
    let signaling = Arc::new(MemorySignaling::new());
    let transport = Arc::new(MemoryTransport::new("peer-b"));
    let devices = Arc::new(MemoryDevices::new());
    let mut session = MeshSession::new(
        Config::testing(),
        signaling.clone(),
        transport.clone(),
        devices.clone(),
    );
    let mut events = session.get_event_stream().await?;

    session.join(RoomId::from(ROOM), "Bea".into()).await?;
    wait_for_state(&mut events, SessionState::Joining).await?;

    signaling.deliver("room-participants", json!({ "participants": [] }));
    wait_for_state(&mut events, SessionState::Active).await?;
    assert_eq!(session.state().await?, SessionState::Active);

    session.set_microphone(false).await?;
    let participants = session.participants().await?;
    assert_eq!(participants.len(), 1);
    assert!(!participants[0].audio_enabled);
    assert_eq!(session.local_participant().await?, participants[0]);
    assert!(!session.is_host().await?);
    assert!(session.local_stream().await?.is_some());

    session.leave().await?;
    assert_eq!(session.state().await?, SessionState::Terminated);
    assert!(devices.live_tracks().is_empty());
    Ok(())
}

#[tokio::test]
async fn dropping_the_handle_ends_the_session() -> anyhow::Result<()> {
    init_tracing();
    let signaling = Arc::new(MemorySignaling::new());
    let transport = Arc::new(MemoryTransport::new("peer-b"));
    let devices = Arc::new(MemoryDevices::new());
    let mut session = MeshSession::new(
        Config::testing(),
        signaling.clone(),
        transport.clone(),
        devices.clone(),
    );
    let mut events = session.get_event_stream().await?;
    session.join(RoomId::from(ROOM), "Bea".into()).await?;
    wait_for_state(&mut events, SessionState::Joining).await?;

    drop(session);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !transport.is_destroyed() || !devices.live_tracks().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(signaling.disconnects(), 1);
    Ok(())
}
