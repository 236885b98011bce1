//! # Presence Hub Server Library
//!
//! Server side of the shared-position synchronization system. The hub
//! admits websocket participants, relays their position changes, and keeps
//! every connected viewer's picture of the field consistent.
//!
//! ## Architecture
//!
//! One asynchronous task per connection, all of them sharing a single
//! [`registry::Registry`] behind an `Arc<RwLock<_>>`. Per-connection
//! outbound traffic flows through an unbounded channel owned by that
//! connection's task, so a slow or dead peer can only back up its own
//! queue and never stalls delivery to anyone else.
//!
//! ## Modules
//!
//! - `registry`: the connection table and participant state, with the
//!   `Pending -> Active -> removed` lifecycle and best-effort fan-out.
//! - `broadcast`: the accept loop, websocket handshake (participant id in
//!   the request URI), frame decoding, and per-message routing.
//!
//! Malformed frames, transport failures, and durable-store failures are
//! all handled at the point of detection; none of them can take down the
//! process or another participant's session.

pub mod broadcast;
pub mod registry;
