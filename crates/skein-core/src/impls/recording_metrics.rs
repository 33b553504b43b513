//! RecordingMetrics - keeps every observation in memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::ports::MetricsSink;

/// Per-strand snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrandMetrics {
    pub sent: u64,
    pub received: u64,
    pub depth: usize,
}

#[derive(Default)]
pub struct RecordingMetrics {
    strands: Mutex<HashMap<String, StrandMetrics>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, StrandMetrics>> {
        self.strands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn strand(&self, strand: &str) -> StrandMetrics {
        self.guard().get(strand).copied().unwrap_or_default()
    }

    pub fn sent(&self, strand: &str) -> u64 {
        self.strand(strand).sent
    }

    pub fn received(&self, strand: &str) -> u64 {
        self.strand(strand).received
    }

    pub fn depth(&self, strand: &str) -> usize {
        self.strand(strand).depth
    }

    /// Everything recorded so far, ordered by strand.
    pub fn snapshot(&self) -> BTreeMap<String, StrandMetrics> {
        self.guard()
            .iter()
            .map(|(strand, m)| (strand.clone(), *m))
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn message_sent(&self, strand: &str) {
        self.guard().entry(strand.to_string()).or_default().sent += 1;
    }

    fn message_received(&self, strand: &str) {
        self.guard().entry(strand.to_string()).or_default().received += 1;
    }

    fn queue_depth(&self, strand: &str, depth: usize) {
        self.guard().entry(strand.to_string()).or_default().depth = depth;
    }
}
