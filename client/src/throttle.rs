//! Position throttler: latest-write-wins coalescing of movement
//!
//! Local movement can change every simulation tick, far faster than we
//! want to touch the network. Each id gets a single slot that every new
//! position overwrites; the flush timer drains at most one pending pair
//! per id per interval, bounding bandwidth independent of simulation rate.

use shared::Message;
use std::collections::HashMap;

#[derive(Default)]
pub struct Throttle {
    pending: HashMap<String, (f32, f32)>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a position, overwriting any unsent value for the same id.
    pub fn record(&mut self, id: &str, x: f32, y: f32) {
        self.pending.insert(id.to_string(), (x, y));
    }

    /// Drains every pending slot into ready-to-send position messages and
    /// clears them. An empty throttle drains to nothing.
    pub fn drain(&mut self) -> Vec<Message> {
        self.pending
            .drain()
            .map(|(id, (x, y))| Message::Position { id, x, y })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
