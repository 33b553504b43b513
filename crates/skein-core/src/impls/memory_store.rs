//! In-memory store implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Msg, StorageError, StrandConf};
use crate::ports::{Storage, UnackedCursor};

/// One registered strand and its unacknowledged envelopes (keyed by id, so in creation order).
#[derive(Debug, Clone)]
struct StrandRecord {
    conf: StrandConf,
    messages: BTreeMap<String, Msg>,
}

/// In-memory store state.
#[derive(Debug, Default)]
struct MemoryStoreState {
    /// Strand registry; BTreeMap keeps the unacked cursor in `(strand, id)` order.
    strands: BTreeMap<String, StrandRecord>,

    closed: bool,
}

impl MemoryStoreState {
    fn open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn record(&self, strand: &str) -> Result<&StrandRecord, StorageError> {
        self.open()?;
        self.strands
            .get(strand)
            .ok_or_else(|| StorageError::StrandNotFound(strand.to_string()))
    }

    fn record_mut(&mut self, strand: &str) -> Result<&mut StrandRecord, StorageError> {
        self.open()?;
        self.strands
            .get_mut(strand)
            .ok_or_else(|| StorageError::StrandNotFound(strand.to_string()))
    }

    fn clear(&mut self) {
        self.strands.clear();
        self.closed = false;
    }
}

/// Volatile store: fast, shared, gone after a restart.
///
/// `reload` cannot bring anything back, so it behaves like `reset`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn create_strand(&self, strand: &str, conf: StrandConf) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.open()?;
        if state.strands.contains_key(strand) {
            return Err(StorageError::StrandExists(strand.to_string()));
        }
        state.strands.insert(
            strand.to_string(),
            StrandRecord {
                conf,
                messages: BTreeMap::new(),
            },
        );
        tracing::debug!(strand, durable = conf.durable, "strand created in memory store");
        Ok(())
    }

    async fn delete_strand(&self, strand: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.open()?;
        let record = state
            .strands
            .remove(strand)
            .ok_or_else(|| StorageError::StrandNotFound(strand.to_string()))?;
        tracing::debug!(
            strand,
            dropped = record.messages.len(),
            "strand deleted from memory store"
        );
        Ok(())
    }

    async fn has_strand(&self, strand: &str) -> Result<bool, StorageError> {
        let state = self.state.lock().await;
        state.open()?;
        Ok(state.strands.contains_key(strand))
    }

    async fn strand_config(&self, strand: &str) -> Result<Option<StrandConf>, StorageError> {
        let state = self.state.lock().await;
        state.open()?;
        Ok(state.strands.get(strand).map(|record| record.conf))
    }

    async fn strands(&self) -> Result<Vec<(String, StrandConf)>, StorageError> {
        let state = self.state.lock().await;
        state.open()?;
        Ok(state
            .strands
            .iter()
            .map(|(id, record)| (id.clone(), record.conf))
            .collect())
    }

    async fn save(&self, msg: &Msg) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let record = state.record_mut(msg.strand())?;
        record.messages.insert(msg.id().to_string(), msg.clone());
        Ok(())
    }

    async fn acknowledge(&self, strand: &str, msg_id: &str) -> Result<Msg, StorageError> {
        let mut state = self.state.lock().await;
        let record = state.record_mut(strand)?;
        record
            .messages
            .remove(msg_id)
            .ok_or_else(|| StorageError::MessageNotFound {
                strand: strand.to_string(),
                msg_id: msg_id.to_string(),
            })
    }

    async fn unacked(&self, strand: &str) -> Result<usize, StorageError> {
        let state = self.state.lock().await;
        Ok(state.record(strand)?.messages.len())
    }

    async fn unacked_iterator(&self) -> Result<UnackedCursor, StorageError> {
        let state = self.state.lock().await;
        state.open()?;
        // Snapshot under the lock; the cursor itself holds nothing.
        let snapshot: Vec<Msg> = state
            .strands
            .values()
            .flat_map(|record| record.messages.values().cloned())
            .collect();
        Ok(UnackedCursor::new(snapshot.into_iter().map(Ok)))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.state.lock().await.closed = true;
        Ok(())
    }

    async fn reset(&self) -> Result<(), StorageError> {
        self.state.lock().await.clear();
        tracing::debug!("memory store reset");
        Ok(())
    }

    async fn reload(&self) -> Result<(), StorageError> {
        self.reset().await
    }
}
