//! Participant mirror and interpolation engine
//!
//! The mirror is the locally held set of participants exposed to the
//! render surface. The local entry is authoritative and moves only under
//! movement intents; every remote entry carries the last received network
//! position as an interpolation target and converges toward it one
//! smoothing step per render tick, snapping exactly once close enough.

use log::debug;
use shared::{clamp_to_field, Message, Participant, MOVE_STEP, SMOOTHING, SNAP_EPSILON};
use std::collections::HashMap;

/// Directional movement flags, sampled once per simulation tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveIntent {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl MoveIntent {
    pub fn is_idle(&self) -> bool {
        !(self.up || self.down || self.left || self.right)
    }
}

/// One mirrored participant. `participant.x/y` is the rendered position;
/// `target_x/y` is the most recent authoritative network position. For the
/// local entry the two are always equal.
#[derive(Debug, Clone)]
pub struct Entry {
    pub participant: Participant,
    pub target_x: f32,
    pub target_y: f32,
}

impl Entry {
    fn at_position(participant: Participant) -> Self {
        let (x, y) = (participant.x, participant.y);
        Self {
            participant,
            target_x: x,
            target_y: y,
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// The client-side set of participants, owned by a single task; message
/// handlers and the render tick mutate it on the same timeline.
pub struct Mirror {
    local_id: String,
    entries: HashMap<String, Entry>,
}

impl Mirror {
    /// Creates the mirror with the local participant already present,
    /// clamped onto the field.
    pub fn new(mut local: Participant) -> Self {
        local.x = clamp_to_field(local.x);
        local.y = clamp_to_field(local.y);
        let local_id = local.id.clone();
        let mut entries = HashMap::new();
        entries.insert(local_id.clone(), Entry::at_position(local));
        Self { local_id, entries }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local(&self) -> &Participant {
        &self.entries[&self.local_id].participant
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    /// Everything the render surface needs, once per render tick.
    pub fn participants(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies one decoded network message. Targets move only here, never
    /// in the render loop; the local entry's position is never overridden.
    pub fn apply(&mut self, message: &Message) {
        match message {
            Message::Join { participant } => self.upsert_remote(participant),
            Message::Snapshot { participants } => {
                for participant in participants {
                    self.upsert_remote(participant);
                }
            }
            Message::Position { id, x, y } => {
                if *id == self.local_id {
                    return;
                }
                match self.entries.get_mut(id) {
                    Some(entry) => {
                        entry.target_x = *x;
                        entry.target_y = *y;
                    }
                    // Position for an id we have never seen a join for
                    None => debug!("Dropping position for unknown participant {}", id),
                }
            }
            Message::Leave { id } => {
                if *id != self.local_id {
                    self.entries.remove(id);
                }
            }
        }
    }

    fn upsert_remote(&mut self, participant: &Participant) {
        if participant.id == self.local_id {
            return;
        }
        match self.entries.get_mut(&participant.id) {
            Some(entry) => {
                // Known participant: retarget, refresh display fields,
                // keep the currently rendered position
                entry.target_x = participant.x;
                entry.target_y = participant.y;
                entry.participant.name = participant.name.clone();
                entry.participant.color = participant.color.clone();
            }
            None => {
                // New participant appears right at its reported position
                self.entries
                    .insert(participant.id.clone(), Entry::at_position(participant.clone()));
            }
        }
    }

    /// One interpolation step, run per render tick. Each remote entry
    /// moves a fixed fraction toward its target on each axis, and snaps
    /// exactly onto the target once both axes are within epsilon.
    pub fn step(&mut self) {
        for (id, entry) in self.entries.iter_mut() {
            if *id == self.local_id {
                continue;
            }

            let p = &mut entry.participant;
            if (p.x - entry.target_x).abs() < SNAP_EPSILON
                && (p.y - entry.target_y).abs() < SNAP_EPSILON
            {
                p.x = entry.target_x;
                p.y = entry.target_y;
                continue;
            }

            p.x = lerp(p.x, entry.target_x, SMOOTHING);
            p.y = lerp(p.y, entry.target_y, SMOOTHING);
        }
    }

    /// Moves the local participant by one simulation tick of intent,
    /// clamped per axis to the field. Returns the new position when it
    /// changed, for handing to the throttler.
    pub fn apply_intent(&mut self, intent: MoveIntent) -> Option<(f32, f32)> {
        if intent.is_idle() {
            return None;
        }

        let entry = self.entries.get_mut(&self.local_id)?;
        let p = &mut entry.participant;
        let (old_x, old_y) = (p.x, p.y);

        let mut dx = 0.0;
        let mut dy = 0.0;
        if intent.left {
            dx -= MOVE_STEP;
        }
        if intent.right {
            dx += MOVE_STEP;
        }
        if intent.up {
            dy -= MOVE_STEP;
        }
        if intent.down {
            dy += MOVE_STEP;
        }

        p.x = clamp_to_field(p.x + dx);
        p.y = clamp_to_field(p.y + dy);
        entry.target_x = p.x;
        entry.target_y = p.y;

        if (p.x, p.y) == (old_x, old_y) {
            None
        } else {
            Some((p.x, p.y))
        }
    }

    /// Refreshes the display name of a known remote entry from a durable
    /// store notification. Never touches positions and never the local
    /// entry; the mirror stays authoritative for both.
    pub fn refresh_name(&mut self, id: &str, name: &str) {
        if id == self.local_id {
            return;
        }
        if let Some(entry) = self.entries.get_mut(id) {
            entry.participant.name = name.to_string();
        }
    }
}
