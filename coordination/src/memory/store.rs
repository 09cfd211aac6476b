//! Memory Store — similarity search over an expert's episodic records.
//!
//! The store is an external collaborator: the orchestration core only ever
//! reads from it. [`InMemoryStore`] is the reference implementation used by
//! the runner binary and tests.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{EpisodicRecord, Event};

/// Errors from memory store lookups.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("memory store unavailable: {0}")]
    Unavailable(String),
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub record_id: String,
    /// Similarity in [-1, 1]; how it is computed is up to the store.
    pub similarity: f64,
    pub timestamp: DateTime<Utc>,
    /// Event the record is about.
    pub event_ref: String,
}

/// Trait for episodic memory stores.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Return up to `limit` records owned by `owner_id` that are relevant to `event`.
    async fn search(
        &self,
        owner_id: &str,
        event: &Event,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, StoreError>;
}

/// Shared reference to a memory store.
pub type SharedMemoryStore = Arc<dyn MemoryStore>;

/// Cosine similarity of two vectors, 0.0 when undefined.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// In-memory implementation of MemoryStore.
///
/// A record is a candidate when its owner matches and it either lists no
/// participants or shares at least one with the event.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<EpisodicRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<EpisodicRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn insert(&self, record: EpisodicRecord) {
        match self.records.write() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shared(self) -> SharedMemoryStore {
        Arc::new(self)
    }

    fn is_relevant(record: &EpisodicRecord, owner_id: &str, event: &Event) -> bool {
        record.owner_id == owner_id
            && (record.participants.is_empty()
                || record.participants.iter().any(|p| event.involves(p)))
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(
        &self,
        owner_id: &str,
        event: &Event,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut hits: Vec<MemoryHit> = records
            .iter()
            .filter(|r| Self::is_relevant(r, owner_id, event))
            .map(|r| MemoryHit {
                record_id: r.id.clone(),
                similarity: cosine_similarity(&r.content_vector, &event.context_vector),
                timestamp: r.timestamp,
                event_ref: r.event_id.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
