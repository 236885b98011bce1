//! Integration tests for the position synchronization system
//!
//! These tests run a real hub on an ephemeral port and drive it with raw
//! websocket clients, validating the wire protocol end to end.

use futures_util::{SinkExt, StreamExt};
use shared::store::MemoryStore;
use shared::{Message, Participant};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_hub() -> (SocketAddr, MemoryStore) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = server::registry::shared();
    let store = MemoryStore::new();
    tokio::spawn(server::broadcast::serve(listener, registry, store.clone()));
    (addr, store)
}

async fn connect(addr: SocketAddr, id: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}/ws/{}", addr, id))
        .await
        .expect("handshake should succeed");
    ws
}

async fn send(ws: &mut Ws, message: &Message) {
    ws.send(WsMessage::Text(message.encode().unwrap().into()))
        .await
        .unwrap();
}

/// Reads frames until the next protocol message, with a timeout.
async fn recv(ws: &mut Ws) -> Message {
    let deadline = Duration::from_secs(2);
    loop {
        let frame = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended unexpectedly")
            .expect("transport error");
        if let WsMessage::Text(text) = frame {
            return Message::decode(&text).expect("server sent an invalid frame");
        }
    }
}

/// Asserts that nothing arrives within a grace period.
async fn assert_silent(ws: &mut Ws) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected no traffic, got {:?}", result);
}

fn participant(id: &str, x: f32, y: f32) -> Participant {
    Participant::new(id, format!("name-{}", id), x, y, "blue")
}

fn join(id: &str, x: f32, y: f32) -> Message {
    Message::Join {
        participant: participant(id, x, y),
    }
}

/// CONNECTION HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    /// A connection lacking a participant id is rejected at the handshake
    #[tokio::test]
    async fn connection_without_id_is_rejected() {
        let (addr, _store) = start_hub().await;
        assert!(connect_async(format!("ws://{}/", addr)).await.is_err());
        // The bare endpoint path must not be mistaken for an id
        assert!(connect_async(format!("ws://{}/ws", addr)).await.is_err());
    }

    #[tokio::test]
    async fn id_can_be_supplied_as_query_parameter() {
        let (addr, _store) = start_hub().await;
        let (mut ws, _) = connect_async(format!("ws://{}/ws?id=q", addr))
            .await
            .expect("handshake with query id should succeed");

        send(&mut ws, &join("q", 0.0, 0.0)).await;
        match recv(&mut ws).await {
            Message::Snapshot { participants } => {
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].id, "q");
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }
}

/// JOIN AND SNAPSHOT TESTS
mod join_tests {
    use super::*;

    /// The snapshot sent to a fresh joiner holds exactly the active set,
    /// including the joiner itself
    #[tokio::test]
    async fn snapshot_contains_active_set_including_joiner() {
        let (addr, _store) = start_hub().await;

        let mut a = connect(addr, "a").await;
        send(&mut a, &join("a", 1.0, 1.0)).await;
        match recv(&mut a).await {
            Message::Snapshot { participants } => {
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].id, "a");
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }

        let mut b = connect(addr, "b").await;
        send(&mut b, &join("b", 2.0, 2.0)).await;
        match recv(&mut b).await {
            Message::Snapshot { mut participants } => {
                participants.sort_by(|p, q| p.id.cmp(&q.id));
                assert_eq!(participants.len(), 2);
                assert_eq!(participants[0].id, "a");
                assert_eq!(participants[1].id, "b");
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }

        // The earlier participant hears the join, not a snapshot
        match recv(&mut a).await {
            Message::Join { participant } => {
                assert_eq!(participant.id, "b");
                assert_eq!(participant.x, 2.0);
            }
            other => panic!("Expected join broadcast, got {:?}", other),
        }
    }

    /// A repeat join from the same connection overwrites, not duplicates
    #[tokio::test]
    async fn repeat_join_overwrites_participant() {
        let (addr, _store) = start_hub().await;

        let mut a = connect(addr, "a").await;
        send(&mut a, &join("a", 1.0, 1.0)).await;
        recv(&mut a).await; // snapshot

        let mut renamed = participant("a", 5.0, 5.0);
        renamed.name = "Renamed".to_string();
        send(
            &mut a,
            &Message::Join {
                participant: renamed,
            },
        )
        .await;
        // The snapshot is unicast once per connection; a repeat join only
        // overwrites and stays silent
        assert_silent(&mut a).await;

        let mut b = connect(addr, "b").await;
        send(&mut b, &join("b", 0.0, 0.0)).await;
        match recv(&mut b).await {
            Message::Snapshot { participants } => {
                let entries: Vec<_> = participants.iter().filter(|p| p.id == "a").collect();
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].name, "Renamed");
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }
}

/// POSITION RELAY TESTS
mod position_tests {
    use super::*;

    /// Position updates reach every other active connection but are never
    /// echoed to their originator
    #[tokio::test]
    async fn position_relayed_without_echo() {
        let (addr, _store) = start_hub().await;

        let mut a = connect(addr, "a").await;
        send(&mut a, &join("a", 1.0, 1.0)).await;
        recv(&mut a).await;

        let mut b = connect(addr, "b").await;
        send(&mut b, &join("b", 2.0, 2.0)).await;
        recv(&mut b).await;
        recv(&mut a).await; // b's join broadcast

        send(
            &mut a,
            &Message::Position {
                id: "a".to_string(),
                x: 10.0,
                y: 20.0,
            },
        )
        .await;

        match recv(&mut b).await {
            Message::Position { id, x, y } => {
                assert_eq!(id, "a");
                assert_eq!(x, 10.0);
                assert_eq!(y, 20.0);
            }
            other => panic!("Expected relayed position, got {:?}", other),
        }

        assert_silent(&mut a).await;
    }

    /// Positions sent before joining have no participant to attach to
    #[tokio::test]
    async fn position_before_join_is_ignored() {
        let (addr, _store) = start_hub().await;

        let mut a = connect(addr, "a").await;
        send(&mut a, &join("a", 1.0, 1.0)).await;
        recv(&mut a).await;

        let mut c = connect(addr, "c").await;
        send(
            &mut c,
            &Message::Position {
                id: "c".to_string(),
                x: 3.0,
                y: 3.0,
            },
        )
        .await;

        assert_silent(&mut a).await;

        // The connection survives and can still join normally
        send(&mut c, &join("c", 4.0, 4.0)).await;
        match recv(&mut c).await {
            Message::Snapshot { participants } => {
                assert_eq!(participants.len(), 2);
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    /// Malformed frames are dropped without killing the connection
    #[tokio::test]
    async fn malformed_frame_does_not_close_connection() {
        let (addr, _store) = start_hub().await;

        let mut a = connect(addr, "a").await;
        a.send(WsMessage::Text("{not json".to_string().into()))
            .await
            .unwrap();
        a.send(WsMessage::Text(r#"{"kind":"warp","id":"a"}"#.to_string().into()))
            .await
            .unwrap();

        send(&mut a, &join("a", 1.0, 1.0)).await;
        match recv(&mut a).await {
            Message::Snapshot { participants } => assert_eq!(participants.len(), 1),
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }
}

/// DISCONNECT AND CLEANUP TESTS
mod leave_tests {
    use super::*;
    use shared::store::ParticipantStore;

    /// Closing a connection broadcasts a leave and cleans the store
    #[tokio::test]
    async fn disconnect_broadcasts_leave_and_deletes_store_record() {
        let (addr, store) = start_hub().await;
        store.create(&participant("b", 0.0, 0.0)).await.unwrap();

        let mut a = connect(addr, "a").await;
        send(&mut a, &join("a", 1.0, 1.0)).await;
        recv(&mut a).await;

        let mut b = connect(addr, "b").await;
        send(&mut b, &join("b", 2.0, 2.0)).await;
        recv(&mut b).await;
        recv(&mut a).await; // b's join broadcast

        b.close(None).await.unwrap();

        match recv(&mut a).await {
            Message::Leave { id } => assert_eq!(id, "b"),
            other => panic!("Expected leave broadcast, got {:?}", other),
        }

        // Store deletion is asynchronous and best-effort; give it a moment
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.list_all().await.unwrap().iter().all(|p| p.id != "b"));
    }
}

/// END-TO-END PIPELINE TESTS
mod pipeline_tests {
    use super::*;
    use client::connection::{Connector, ConnectorEvent};
    use client::mirror::Mirror;

    /// The reconnection controller's URL and the hub's handshake agree:
    /// connecting with a base URL lands on `/ws/<id>` and joins
    #[tokio::test]
    async fn connector_handshakes_and_joins_live_hub() {
        let (addr, _store) = start_hub().await;
        let mut connector =
            Connector::connect(&format!("ws://{}", addr), participant("c", 1.0, 1.0));

        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), connector.next_event())
                .await
                .expect("timed out waiting for connector event")
                .expect("event channel closed");
            match event {
                ConnectorEvent::Connected => {}
                ConnectorEvent::Message(Message::Snapshot { participants }) => {
                    assert_eq!(participants.len(), 1);
                    assert_eq!(participants[0].id, "c");
                    break;
                }
                other => panic!("Unexpected event {:?}", other),
            }
        }

        assert!(connector.is_connected());
        connector.disconnect();
    }

    /// The full scenario: two participants, a relayed position update, and
    /// a client mirror that interpolates onto the exact target
    #[tokio::test]
    async fn position_update_flows_into_interpolated_mirror() {
        let (addr, _store) = start_hub().await;

        let mut a = connect(addr, "a").await;
        send(&mut a, &join("a", 1.0, 1.0)).await;
        recv(&mut a).await;

        // B keeps a mirror fed by its own traffic
        let mut mirror = Mirror::new(participant("b", 2.0, 2.0));
        let mut b = connect(addr, "b").await;
        send(&mut b, &join("b", 2.0, 2.0)).await;
        mirror.apply(&recv(&mut b).await); // snapshot [a, b]
        recv(&mut a).await; // b's join broadcast

        assert_eq!(mirror.len(), 2);
        let remote = mirror.get("a").unwrap();
        assert_eq!((remote.target_x, remote.target_y), (1.0, 1.0));

        send(
            &mut a,
            &Message::Position {
                id: "a".to_string(),
                x: 10.0,
                y: 20.0,
            },
        )
        .await;
        mirror.apply(&recv(&mut b).await);

        // Render ticks converge onto the new target and stabilize exactly
        let mut prior_distance = f32::MAX;
        for _ in 0..200 {
            mirror.step();
            let remote = mirror.get("a").unwrap();
            let dx = 10.0 - remote.participant.x;
            let dy = 20.0 - remote.participant.y;
            let distance = (dx * dx + dy * dy).sqrt();
            assert!(distance <= prior_distance);
            prior_distance = distance;
        }
        let remote = mirror.get("a").unwrap();
        assert_eq!(remote.participant.x, 10.0);
        assert_eq!(remote.participant.y, 20.0);
    }
}
