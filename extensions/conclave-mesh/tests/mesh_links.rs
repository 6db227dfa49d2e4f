mod common;

use std::time::Duration;

use common::{member, Harness, ROOM};
use conclave::{
    id::PeerId,
    media::TrackKind,
    session::{SessionEventKind, SessionState},
    signaling::{SignalMessage, SignalingEvent},
    transport::PeerTransportEvent,
};
use conclave_memory::LinkOp;
use conclave_mesh::{config::Config, coordinator::Event, registry::UNKNOWN_DISPLAY_NAME};
use serde_json::json;

#[tokio::test]
async fn join_announces_once_relay_and_transport_are_up() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join("Bea").await?;

    assert_eq!(h.coordinator.state(), SessionState::Joining);
    assert_eq!(h.coordinator.local_id(), Some(&PeerId::from("peer-b")));
    assert_eq!(
        h.signaling.emitted_named("join-room"),
        vec![json!({ "roomId": ROOM, "username": "Bea", "peerId": "peer-b" })]
    );

    h.deliver("room-participants", json!({ "participants": [] }))
        .await;
    assert_eq!(h.coordinator.state(), SessionState::Active);
    assert!(h.ui_events().iter().any(|event| matches!(
        event,
        SessionEventKind::ConnectionStatus { status } if status == "Connected"
    )));
    Ok(())
}

#[tokio::test]
async fn only_the_lower_id_dials() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active(
        "Bea",
        vec![
            member("peer-a", "Ann"),
            member("peer-b", "Bea"),
            member("peer-c", "Cy"),
        ],
    )
    .await;

    assert_eq!(h.transport.calls(), vec![PeerId::from("peer-c")]);
    assert!(h.coordinator.has_link(&PeerId::from("peer-c")));
    assert!(!h.coordinator.has_link(&PeerId::from("peer-a")));
    assert!(!h.coordinator.is_dial_pending(&PeerId::from("peer-a")));

    h.incoming("peer-a").await;
    assert_eq!(h.transport.answers().len(), 1);
    assert_eq!(h.coordinator.link_count(), 2);
    Ok(())
}

#[tokio::test]
async fn repeated_offers_and_announcements_keep_one_link() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![member("peer-c", "Cy")]).await;
    h.incoming("peer-a").await;

    h.incoming("peer-a").await;
    h.deliver("user-joined", member("peer-c", "Cy")).await;
    h.deliver("room-participants", json!({ "participants": [member("peer-c", "Cy")] }))
        .await;

    assert_eq!(h.transport.answers().len(), 1);
    assert_eq!(h.transport.calls().len(), 1);
    assert_eq!(h.coordinator.link_count(), 2);
    assert_eq!(h.transport.links().len(), 2);
    Ok(())
}

#[tokio::test]
async fn simultaneous_announcements_open_exactly_one_link() -> anyhow::Result<()> {
    let mut a = Harness::new("peer-a");
    let mut b = Harness::new("peer-b");
    a.join_active("Ann", vec![]).await;
    b.join_active("Bea", vec![]).await;

    a.deliver("user-joined", member("peer-b", "Bea")).await;
    b.deliver("user-joined", member("peer-a", "Ann")).await;

    assert_eq!(a.transport.calls(), vec![PeerId::from("peer-b")]);
    assert!(b.transport.calls().is_empty());

    // the call from `a` reaches `b`
    b.incoming("peer-a").await;
    assert_eq!(a.coordinator.link_count(), 1);
    assert_eq!(b.coordinator.link_count(), 1);
    Ok(())
}

#[tokio::test]
async fn first_stream_admits_with_announced_details() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![member("peer-c", "Cy")]).await;
    assert!(h.coordinator.participant(&PeerId::from("peer-c")).is_none());
    h.ui_events();

    h.stream_from("peer-c").await;
    let participants = h.coordinator.participants();
    assert_eq!(participants.len(), 2);
    assert_eq!(participants[0].id, PeerId::from("peer-b"));
    assert_eq!(participants[1].display_name, "Cy");
    assert!(h.ui_events().iter().any(|event| matches!(
        event,
        SessionEventKind::ParticipantJoined { participant, .. } if participant.id == PeerId::from("peer-c")
    )));

    h.stream_from("peer-c").await;
    assert_eq!(h.coordinator.participants().len(), 2);
    assert!(h
        .ui_events()
        .iter()
        .any(|event| matches!(event, SessionEventKind::RemoteStreamChanged { .. })));
    Ok(())
}

#[tokio::test]
async fn unannounced_sender_gets_placeholder_name() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![]).await;
    h.incoming("peer-a").await;
    h.stream_from("peer-a").await;

    let participant = h
        .coordinator
        .participant(&PeerId::from("peer-a"))
        .expect("admitted");
    assert_eq!(participant.display_name, UNKNOWN_DISPLAY_NAME);
    Ok(())
}

#[tokio::test]
async fn flags_before_first_stream_are_kept() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![member("peer-c", "Cy")]).await;

    h.deliver("user-toggle-audio", json!({ "peerId": "peer-c", "enabled": false }))
        .await;
    h.deliver("user-screen-share", json!({ "peerId": "peer-c", "isSharing": true }))
        .await;
    assert!(h.coordinator.participant(&PeerId::from("peer-c")).is_none());

    h.stream_from("peer-c").await;
    let participant = h
        .coordinator
        .participant(&PeerId::from("peer-c"))
        .expect("admitted");
    assert!(!participant.audio_enabled);
    assert!(participant.is_screen_sharing);
    assert!(participant.video_enabled);
    Ok(())
}

#[tokio::test]
async fn stream_without_link_is_released() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![]).await;

    let stream = h.stream_from("peer-z").await;
    assert!(h.coordinator.participant(&PeerId::from("peer-z")).is_none());
    assert!(!stream.has_live(TrackKind::Audio));
    assert!(!stream.has_live(TrackKind::Video));
    Ok(())
}

#[tokio::test]
async fn departure_before_dial_cancels_it() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![]).await;

    h.signaling.deliver("user-joined", member("peer-c", "Cy"));
    h.signaling
        .deliver("user-left", json!({ "peerId": "peer-c", "username": "Cy" }));
    h.settle().await;

    assert!(h.transport.calls().is_empty());
    assert!(!h.coordinator.is_dial_pending(&PeerId::from("peer-c")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dial_waits_for_announcement_delay() -> anyhow::Result<()> {
    let mut h = Harness::with_config("peer-b", Config::development());
    h.join_active("Bea", vec![]).await;

    h.deliver("user-joined", member("peer-c", "Cy")).await;
    h.deliver("user-joined", member("peer-d", "Di")).await;
    assert!(h.coordinator.is_dial_pending(&PeerId::from("peer-c")));
    assert!(h.transport.calls().is_empty());

    h.deliver("user-left", json!({ "peerId": "peer-d" })).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.settle().await;

    assert_eq!(h.transport.calls(), vec![PeerId::from("peer-c")]);
    Ok(())
}

#[tokio::test]
async fn failed_dial_keeps_announcement() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.transport.set_unreachable("peer-c");
    h.join_active("Bea", vec![member("peer-c", "Cy")]).await;

    assert_eq!(h.transport.calls(), vec![PeerId::from("peer-c")]);
    assert!(!h.coordinator.has_link(&PeerId::from("peer-c")));

    h.incoming("peer-c").await;
    h.stream_from("peer-c").await;
    let participant = h
        .coordinator
        .participant(&PeerId::from("peer-c"))
        .expect("admitted");
    assert_eq!(participant.display_name, "Cy");
    Ok(())
}

#[tokio::test]
async fn departure_closes_link_and_removes_participant() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![member("peer-c", "Cy")]).await;
    h.stream_from("peer-c").await;
    h.ui_events();

    h.deliver("user-left", json!({ "peerId": "peer-c", "username": "Cy" }))
        .await;

    assert!(!h.coordinator.has_link(&PeerId::from("peer-c")));
    assert!(h.coordinator.participant(&PeerId::from("peer-c")).is_none());
    assert!(h.link("peer-c").ops().contains(&LinkOp::Close));
    assert!(h.ui_events().iter().any(|event| matches!(
        event,
        SessionEventKind::ParticipantLeft { peer_id } if *peer_id == PeerId::from("peer-c")
    )));
    Ok(())
}

#[tokio::test]
async fn closed_link_removes_participant() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![member("peer-c", "Cy")]).await;
    h.stream_from("peer-c").await;

    h.inject(PeerTransportEvent::LinkClosed {
        remote: PeerId::from("peer-c"),
    })
    .await;

    assert!(!h.coordinator.has_link(&PeerId::from("peer-c")));
    assert_eq!(h.coordinator.participants().len(), 1);
    assert!(!h.link("peer-c").ops().contains(&LinkOp::Close));

    // later track changes leave the closed link alone
    h.set_camera(false).await?;
    assert!(h.link("peer-c").ops().is_empty());
    Ok(())
}

#[tokio::test]
async fn link_error_closes_and_removes() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![member("peer-c", "Cy")]).await;
    h.stream_from("peer-c").await;

    h.inject(PeerTransportEvent::LinkError {
        remote: PeerId::from("peer-c"),
        message: "ice failed".into(),
    })
    .await;

    assert!(!h.coordinator.has_link(&PeerId::from("peer-c")));
    assert!(h.coordinator.participant(&PeerId::from("peer-c")).is_none());
    assert!(h.link("peer-c").ops().contains(&LinkOp::Close));

    // announced again later, dialed again
    h.deliver("user-joined", member("peer-c", "Cy")).await;
    assert_eq!(h.transport.calls().len(), 2);
    Ok(())
}

#[tokio::test]
async fn member_updates_keyed_by_transport_id() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![member("peer-c", "Cy")]).await;
    h.stream_from("peer-c").await;
    let cy = PeerId::from("peer-c");

    h.deliver("user-toggle-audio", json!({ "transportId": "peer-c", "enabled": false }))
        .await;
    h.deliver("user-screen-share", json!({ "transportId": "peer-c", "isSharing": true }))
        .await;
    let participant = h.coordinator.participant(&cy).expect("admitted");
    assert!(!participant.audio_enabled);
    assert!(participant.is_screen_sharing);

    h.deliver("user-left", json!({ "transportId": "peer-c" })).await;
    assert!(h.coordinator.participant(&cy).is_none());
    assert!(!h.coordinator.has_link(&cy));
    assert!(h.link("peer-c").is_closed());
    Ok(())
}

#[tokio::test]
async fn departure_during_call_setup_prevails() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![]).await;
    let cy = PeerId::from("peer-c");
    let gate = h.transport.hold_next_call();

    h.deliver("user-joined", member("peer-c", "Cy")).await;
    assert_eq!(h.transport.calls(), vec![cy.clone()]);
    assert!(h.coordinator.is_connecting(&cy));
    assert!(!h.coordinator.has_link(&cy));

    // handled while the call is still being set up
    h.deliver("user-left", json!({ "peerId": "peer-c" })).await;
    assert!(!h.coordinator.is_connecting(&cy));

    gate.release();
    h.settle().await;

    assert!(!h.coordinator.has_link(&cy));
    assert!(h.link("peer-c").is_closed());
    assert_eq!(h.coordinator.participants().len(), 1);
    Ok(())
}

#[tokio::test]
async fn announcement_during_identity_recreation_is_dialed() -> anyhow::Result<()> {
    let mut h = Harness::new("peer-b");
    h.join_active("Bea", vec![]).await;
    let cy = PeerId::from("peer-c");
    h.transport.lose_identity();
    h.transport.set_next_id("peer-b2");

    h.coordinator.step(Event::TransportRecreateDue).await;
    assert_eq!(h.coordinator.local_id(), None);
    h.coordinator
        .step(Event::Signaling(SignalingEvent::Message(SignalMessage::new(
            "user-joined",
            member("peer-c", "Cy"),
        ))))
        .await;
    h.coordinator
        .step(Event::DialDue { remote: cy.clone() })
        .await;
    assert!(h.transport.calls().is_empty());
    assert!(h.coordinator.is_dial_pending(&cy));

    // the new identity opens and the held dial goes out
    h.settle().await;
    assert_eq!(h.coordinator.local_id(), Some(&PeerId::from("peer-b2")));
    assert_eq!(h.transport.calls(), vec![cy.clone()]);
    assert!(h.coordinator.has_link(&cy));
    Ok(())
}
