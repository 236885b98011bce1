//! Reconnection controller: owns the client's single websocket
//!
//! The controller runs one background task around the socket. While the
//! socket is down, `send` queues instead of failing; on reopen the queue is
//! flushed in enqueue order and a fresh join is emitted. Unexpected closes
//! trigger linearly backed-off retries up to a cap, after which a single
//! permanent-disconnect event is surfaced and the task stops.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{Message, Participant, BASE_RETRY_DELAY_MS, MAX_RETRY_ATTEMPTS};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Linear retry schedule: the k-th consecutive failure waits
/// `base * k`, up to `max_attempts` scheduled retries.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next retry, or `None` once the cap is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.base * self.attempt)
    }

    /// A successful connection restarts the schedule.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Marks the session as deliberately ended so no retry is scheduled.
    pub fn exhaust(&mut self) {
        self.attempt = self.max_attempts;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Lifecycle and traffic events surfaced to the session.
#[derive(Debug)]
pub enum ConnectorEvent {
    Connected,
    Disconnected,
    Message(Message),
    /// Retry cap exhausted; emitted exactly once, then the task ends.
    GaveUp,
}

enum Command {
    Send(Message),
    Disconnect,
}

/// Handle to the connection task. At most one live transport exists per
/// `Connector`; dropping the handle ends the session.
pub struct Connector {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ConnectorEvent>,
    connected: Arc<AtomicBool>,
}

impl Connector {
    /// Starts the connection task. The participant id becomes part of the
    /// connection URI, and the full participant is announced with a join
    /// on every (re)connect.
    pub fn connect(server_url: &str, participant: Participant) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let url = session_url(server_url, &participant.id);
        tokio::spawn(run_connection(
            url,
            participant,
            cmd_rx,
            event_tx,
            connected.clone(),
        ));

        Self {
            cmd_tx,
            events,
            connected,
        }
    }

    /// Non-blocking send. While disconnected the message is queued and
    /// delivered, in order, on the next successful connect.
    pub fn send(&self, message: Message) {
        if self.cmd_tx.send(Command::Send(message)).is_err() {
            debug!("Dropping send after permanent disconnect");
        }
    }

    /// Deliberately ends the session; no automatic reconnection follows.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn next_event(&mut self) -> Option<ConnectorEvent> {
        self.events.recv().await
    }
}

/// Connection URI carrying the participant id on the hub's `/ws/<id>`
/// endpoint.
fn session_url(server_url: &str, id: &str) -> String {
    format!("{}/ws/{}", server_url.trim_end_matches('/'), id)
}

/// Moves commands that arrived while disconnected into the outgoing queue.
/// Returns true if the session was deliberately ended.
fn drain_commands(
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    queue: &mut VecDeque<Message>,
) -> bool {
    loop {
        match cmd_rx.try_recv() {
            Ok(Command::Send(message)) => queue.push_back(message),
            Ok(Command::Disconnect) => return true,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}

async fn send_frame(sink: &mut WsSink, message: &Message) -> Result<(), ()> {
    let text = match message.encode() {
        Ok(text) => text,
        Err(e) => {
            // An unencodable message is dropped, never fatal
            warn!("Failed to encode outgoing message: {}", e);
            return Ok(());
        }
    };
    sink.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| debug!("Send failed: {}", e))
}

async fn run_connection(
    url: String,
    participant: Participant,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<ConnectorEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(BASE_RETRY_DELAY_MS),
        MAX_RETRY_ATTEMPTS,
    );
    let mut queue: VecDeque<Message> = VecDeque::new();

    loop {
        if drain_commands(&mut cmd_rx, &mut queue) {
            break;
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                backoff.reset();
                connected.store(true, Ordering::Relaxed);
                let _ = event_tx.send(ConnectorEvent::Connected);
                info!("Connected to {}", url);

                let (mut sink, mut frames) = ws.split();

                // Flush in original enqueue order, then announce presence
                while let Some(message) = queue.pop_front() {
                    if send_frame(&mut sink, &message).await.is_err() {
                        queue.push_front(message);
                        break;
                    }
                }
                let join = Message::Join {
                    participant: participant.clone(),
                };
                let _ = send_frame(&mut sink, &join).await;

                let deliberate = loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => match cmd {
                            Some(Command::Send(message)) => {
                                if send_frame(&mut sink, &message).await.is_err() {
                                    queue.push_back(message);
                                    break false;
                                }
                            }
                            Some(Command::Disconnect) | None => {
                                let _ = sink.close().await;
                                break true;
                            }
                        },

                        frame = frames.next() => match frame {
                            Some(Ok(WsMessage::Text(text))) => match Message::decode(&text) {
                                Ok(message) => {
                                    let _ = event_tx.send(ConnectorEvent::Message(message));
                                }
                                Err(e) => warn!("Dropping malformed frame: {}", e),
                            },
                            Some(Ok(WsMessage::Close(_))) | None => break false,
                            Some(Ok(_)) => {} // ping/pong/binary ignored
                            Some(Err(e)) => {
                                debug!("Transport error: {}", e);
                                break false;
                            }
                        },
                    }
                };

                connected.store(false, Ordering::Relaxed);
                let _ = event_tx.send(ConnectorEvent::Disconnected);

                if deliberate {
                    backoff.exhaust();
                    break;
                }
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", url, e);
            }
        }

        match backoff.next_delay() {
            Some(delay) => {
                info!(
                    "Reconnecting in {:?} (attempt {})",
                    delay,
                    backoff.attempt()
                );
                sleep(delay).await;
            }
            None => {
                warn!("Retry cap reached, giving up on {}", url);
                let _ = event_tx.send(ConnectorEvent::GaveUp);
                break;
            }
        }
    }
}
