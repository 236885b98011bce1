//! Durable-store collaborator interface
//!
//! The store is a slower, eventually-consistent mirror of participant state.
//! It is never authoritative: every operation here is best-effort, and no
//! failure may propagate into the live protocol path. Callers log store
//! errors and move on.

use crate::Participant;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum StoreError {
    NotFound(String),
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "no record for participant {}", id),
            StoreError::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Inserted,
    Updated,
    Deleted,
}

/// Change notification delivered to subscribers, carrying the record as it
/// was after (or for `Deleted`, before) the mutation.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub record: Participant,
    pub kind: StoreEventKind,
}

/// Asynchronous participant persistence with change notifications.
///
/// Implementations are expected to be cheap to clone and safe to call from
/// multiple tasks; `MemoryStore` is the reference implementation used by the
/// binaries and tests.
pub trait ParticipantStore: Clone + Send + Sync + 'static {
    fn create(
        &self,
        participant: &Participant,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_position(
        &self,
        id: &str,
        x: f32,
        y: f32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_name(
        &self,
        id: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn list_all(&self) -> impl Future<Output = Result<Vec<Participant>, StoreError>> + Send;

    /// Registers a change-notification subscriber. Events are delivered
    /// in mutation order; a dropped receiver is silently unsubscribed.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent>;
}

#[derive(Default)]
struct MemoryStoreInner {
    records: HashMap<String, Participant>,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

/// In-memory `ParticipantStore` with fan-out change notifications.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(inner: &mut MemoryStoreInner, record: Participant, kind: StoreEventKind) {
        inner
            .subscribers
            .retain(|tx| tx.send(StoreEvent { record: record.clone(), kind }).is_ok());
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("poisoned lock".to_string()))
    }
}

impl ParticipantStore for MemoryStore {
    async fn create(&self, participant: &Participant) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let kind = if inner
            .records
            .insert(participant.id.clone(), participant.clone())
            .is_some()
        {
            StoreEventKind::Updated
        } else {
            StoreEventKind::Inserted
        };
        Self::notify(&mut inner, participant.clone(), kind);
        Ok(())
    }

    async fn update_position(&self, id: &str, x: f32, y: f32) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let record = match inner.records.get_mut(id) {
            Some(record) => {
                record.x = x;
                record.y = y;
                record.clone()
            }
            None => return Err(StoreError::NotFound(id.to_string())),
        };
        Self::notify(&mut inner, record, StoreEventKind::Updated);
        Ok(())
    }

    async fn update_name(&self, id: &str, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let record = match inner.records.get_mut(id) {
            Some(record) => {
                record.name = name.to_string();
                record.clone()
            }
            None => return Err(StoreError::NotFound(id.to_string())),
        };
        Self::notify(&mut inner, record, StoreEventKind::Updated);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.records.remove(id) {
            Some(record) => {
                Self::notify(&mut inner, record, StoreEventKind::Deleted);
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn list_all(&self) -> Result<Vec<Participant>, StoreError> {
        Ok(self.lock()?.records.values().cloned().collect())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.push(tx);
        }
        rx
    }
}
