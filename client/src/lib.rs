//! # Presence Client Library
//!
//! Client side of the shared-position synchronization system. It keeps a
//! local mirror of every participant smooth and current while tolerating
//! an unreliable connection to the hub.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! Owns the single websocket to the hub: connect, detect failure, retry
//! with linear backoff up to a cap, and queue outgoing messages while
//! disconnected so callers never block or fail on `send`.
//!
//! ### Mirror Module (`mirror`)
//! The locally held set of participants. The local entry is authoritative
//! and driven by movement intents; remote entries carry an interpolation
//! target fed by network updates and converge toward it each render tick.
//!
//! ### Throttle Module (`throttle`)
//! Latest-write-wins coalescing of high-frequency local movement into a
//! bounded-rate stream of position sends.
//!
//! ### Session Module (`session`)
//! Wires the above together with the durable-store mirror into one
//! `tokio::select!` event loop with independently scheduled simulation,
//! render, network-flush, and store-flush ticks.
//!
//! Rendering itself stays outside this crate: the session exposes the
//! mirror and the local participant id on every tick, and accepts a small
//! set of directional flags as movement intent.

pub mod connection;
pub mod mirror;
pub mod session;
pub mod throttle;
