//! Broadcast engine: websocket accept loop and per-connection routing
//!
//! Each accepted socket gets its own task running a `tokio::select!` over
//! the inbound frame stream and the connection's outbound queue. Messages
//! are decoded once at this boundary and dispatched through one exhaustive
//! match; anything malformed is dropped with a log line and the connection
//! stays open.

use crate::registry::{Activation, SharedRegistry};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::store::ParticipantStore;
use shared::Message;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Accepts connections forever, spawning one handler task per socket.
pub async fn serve<S: ParticipantStore>(
    listener: TcpListener,
    registry: SharedRegistry,
    store: S,
) -> Result<(), std::io::Error> {
    let mut next_serial: u64 = 1;

    loop {
        let (socket, addr) = listener.accept().await?;
        let serial = next_serial;
        next_serial += 1;

        tokio::spawn(handle_connection(
            socket,
            addr,
            serial,
            registry.clone(),
            store.clone(),
        ));
    }
}

/// Pulls the participant id out of the connection URI: either an `id`
/// query parameter or the single segment after `/ws/`. A bare path like
/// `/ws` carries no id and is rejected.
fn extract_participant_id(uri: &Uri) -> Option<String> {
    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            if let Some(id) = pair.strip_prefix("id=") {
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
    }

    let segment = uri.path().strip_prefix("/ws/")?.trim_end_matches('/');
    if segment.is_empty() || segment.contains('/') {
        None
    } else {
        Some(segment.to_string())
    }
}

async fn handle_connection<S: ParticipantStore>(
    socket: TcpStream,
    addr: SocketAddr,
    serial: u64,
    registry: SharedRegistry,
    store: S,
) {
    // A connection lacking an id is rejected during the handshake
    let mut participant_id: Option<String> = None;
    let handshake = accept_hdr_async(socket, |req: &Request, resp: Response| {
        match extract_participant_id(req.uri()) {
            Some(id) => {
                participant_id = Some(id);
                Ok(resp)
            }
            None => {
                let mut reject =
                    ErrorResponse::new(Some("participant id required in URI".to_string()));
                *reject.status_mut() = StatusCode::BAD_REQUEST;
                Err(reject)
            }
        }
    })
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let id = match participant_id {
        Some(id) => id,
        None => return,
    };

    info!("Participant {} connected from {}", id, addr);

    let (tx, mut outbound) = mpsc::unbounded_channel::<WsMessage>();
    registry.write().await.insert_pending(&id, serial, tx);

    let (mut sink, mut frames) = ws.split();

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(frame) => {
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                // Queue dropped: a newer connection took over this id
                None => break,
            },

            inbound = frames.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_frame(&id, &text, &registry).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary ignored
                Some(Err(e)) => {
                    debug!("Transport error for {}: {}", id, e);
                    break;
                }
            },
        }
    }

    if registry.write().await.remove(&id, serial).is_some() {
        info!("Participant {} disconnected", id);

        let leave = Message::Leave { id: id.clone() };
        if let Ok(text) = leave.encode() {
            registry.read().await.broadcast(&text, Some(&id));
        }

        // Best-effort durable-store cleanup: logged, never retried
        let id_for_store = id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.delete(&id_for_store).await {
                warn!("Store delete for {} failed: {}", id_for_store, e);
            }
        });
    }
}

/// Decodes and routes one inbound text frame from `conn_id`.
async fn handle_frame(conn_id: &str, text: &str, registry: &SharedRegistry) {
    let message = match Message::decode(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping malformed frame from {}: {}", conn_id, e);
            return;
        }
    };

    match message {
        Message::Join { participant } => {
            if participant.id != conn_id {
                warn!(
                    "Dropping join from {} claiming id {}",
                    conn_id, participant.id
                );
                return;
            }

            // Store first so the joiner appears in its own snapshot; the
            // snapshot is taken under the same lock as the activation.
            // A repeat join overwrites the stored participant and nothing
            // more; the snapshot unicast happens once per connection.
            let snapshot = {
                let mut reg = registry.write().await;
                match reg.activate(conn_id, participant.clone()) {
                    Some(Activation::Joined) => reg.snapshot(),
                    Some(Activation::Rejoined) => {
                        debug!("Participant {} refreshed its join", conn_id);
                        return;
                    }
                    None => return,
                }
            };
            info!("Participant {} joined ({} active)", conn_id, snapshot.len());

            let reg = registry.read().await;
            if let Ok(text) = (Message::Snapshot {
                participants: snapshot,
            })
            .encode()
            {
                reg.send_to(conn_id, &text);
            }
            if let Ok(text) = (Message::Join { participant }).encode() {
                reg.broadcast(&text, Some(conn_id));
            }
        }

        Message::Position { id, x, y } => {
            if id != conn_id {
                warn!("Dropping position from {} claiming id {}", conn_id, id);
                return;
            }

            let accepted = registry.write().await.update_position(&id, x, y);
            if accepted {
                // Relay the original frame verbatim to everyone else
                registry.read().await.broadcast(text, Some(conn_id));
            } else {
                debug!("Ignoring position from {} before join", conn_id);
            }
        }

        // Server-to-client kinds arriving from a client are protocol misuse
        Message::Leave { .. } | Message::Snapshot { .. } => {
            debug!("Ignoring server-only message kind from {}", conn_id);
        }
    }
}
