//! Session wiring: one event loop over all client-side timelines
//!
//! The simulation tick, render tick, network flush, and store flush run as
//! independently scheduled intervals inside a single `tokio::select!`
//! loop, so none of them ever blocks another. The mirror is touched only
//! from this loop; there is no concurrent writer.

use crate::connection::{Connector, ConnectorEvent};
use crate::mirror::{Mirror, MoveIntent};
use crate::throttle::Throttle;
use log::{debug, info, warn};
use shared::store::{ParticipantStore, StoreError, StoreEventKind};
use shared::{
    Participant, RENDER_TICK_MS, SIM_TICK_MS, STORE_FLUSH_INTERVAL_MS, THROTTLE_INTERVAL_MS,
};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

/// A running client session: mirror, throttler, connection, and the
/// best-effort durable-store mirror of the local participant.
pub struct Session<S: ParticipantStore> {
    mirror: Mirror,
    throttle: Throttle,
    connector: Connector,
    store: S,
    store_events: mpsc::UnboundedReceiver<shared::store::StoreEvent>,
    permanently_disconnected: bool,
    last_error: Option<String>,
}

impl<S: ParticipantStore> Session<S> {
    /// Registers the local participant with the store (best-effort) and
    /// starts connecting. The session is usable immediately; sends queue
    /// until the socket opens.
    pub async fn start(server_url: &str, local: Participant, store: S) -> Self {
        if let Err(e) = store.create(&local).await {
            warn!("Store create for {} failed: {}", local.id, e);
        }

        let store_events = store.subscribe();
        let connector = Connector::connect(server_url, local.clone());
        Self {
            mirror: Mirror::new(local),
            throttle: Throttle::new(),
            connector,
            store,
            store_events,
            permanently_disconnected: false,
            last_error: None,
        }
    }

    /// The participant set for the render surface.
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }

    /// True once reconnection attempts are exhausted; the single
    /// user-visible "disconnected" indicator.
    pub fn is_permanently_disconnected(&self) -> bool {
        self.permanently_disconnected
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Ends the session deliberately; queued messages are discarded.
    pub fn shutdown(&self) {
        self.connector.disconnect();
    }

    /// Runs the event loop until the driver returns `None` (the render
    /// surface went away) or the connection is permanently lost. The
    /// driver is called once per simulation tick with the current mirror
    /// and supplies the local movement intent.
    pub async fn run<F>(&mut self, mut driver: F)
    where
        F: FnMut(&Mirror) -> Option<MoveIntent>,
    {
        let mut sim = interval(Duration::from_millis(SIM_TICK_MS));
        let mut render = interval(Duration::from_millis(RENDER_TICK_MS));
        let mut net_flush = interval(Duration::from_millis(THROTTLE_INTERVAL_MS));
        let mut store_flush = interval(Duration::from_millis(STORE_FLUSH_INTERVAL_MS));
        // Cleared when the store closes its feed, so a dead subscription
        // cannot keep resolving instantly in the select below
        let mut store_feed_open = true;

        loop {
            tokio::select! {
                _ = sim.tick() => {
                    match driver(&self.mirror) {
                        Some(intent) => {
                            if let Some((x, y)) = self.mirror.apply_intent(intent) {
                                let id = self.mirror.local_id().to_string();
                                self.throttle.record(&id, x, y);
                            }
                        }
                        None => break,
                    }
                }

                _ = render.tick() => {
                    self.mirror.step();
                }

                _ = net_flush.tick() => {
                    for message in self.throttle.drain() {
                        self.connector.send(message);
                    }
                }

                _ = store_flush.tick() => {
                    self.flush_position_to_store().await;
                }

                event = self.connector.next_event() => match event {
                    Some(ConnectorEvent::Message(message)) => {
                        self.mirror.apply(&message);
                    }
                    Some(ConnectorEvent::Connected) => {
                        info!("Session connected");
                    }
                    Some(ConnectorEvent::Disconnected) => {
                        debug!("Session lost its connection");
                    }
                    Some(ConnectorEvent::GaveUp) | None => {
                        self.permanently_disconnected = true;
                        self.last_error = Some("reconnection attempts exhausted".to_string());
                        break;
                    }
                },

                event = self.store_events.recv(), if store_feed_open => match event {
                    Some(event) => {
                        // Store notifications may refresh display names of
                        // known remotes; live positions are never overridden
                        if matches!(event.kind, StoreEventKind::Inserted | StoreEventKind::Updated) {
                            self.mirror.refresh_name(&event.record.id, &event.record.name);
                        }
                    }
                    None => store_feed_open = false,
                }
            }
        }

        self.connector.disconnect();
    }

    /// Slow-path mirror of the local position into the durable store.
    /// Failures are logged; the next scheduled write is unaffected.
    async fn flush_position_to_store(&self) {
        let local = self.mirror.local();
        match self.store.update_position(&local.id, local.x, local.y).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                if let Err(e) = self.store.create(local).await {
                    warn!("Store create for {} failed: {}", local.id, e);
                }
            }
            Err(e) => warn!("Store position write for {} failed: {}", local.id, e),
        }
    }
}
