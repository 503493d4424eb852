//! In-process store implementations.

use super::{slice_key, RecordStore, VectorStore};
use crate::error::Result;
use crate::ingestion::ToolSlice;
use crate::search::{IndexedSlice, SimilarityIndex, SliceHit};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Key-value record store backed by a sorted map.
#[derive(Default)]
pub struct MemoryRecordStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Vector store holding slices in a configurable [`SimilarityIndex`].
///
/// One write lock covers each replacement, so a tool's old and new slice
/// sets are never visible together.
pub struct MemoryVectorStore {
    index: RwLock<Box<dyn SimilarityIndex>>,
    next_seq: AtomicU64,
}

impl MemoryVectorStore {
    pub fn new(index: Box<dyn SimilarityIndex>) -> Self {
        Self {
            index: RwLock::new(index),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Live slices in insertion order, for snapshots.
    pub fn export(&self) -> Vec<IndexedSlice> {
        self.index.read().slices()
    }

    /// Load previously exported slices, keeping their sequence numbers.
    pub fn restore(&self, slices: Vec<IndexedSlice>) -> Result<()> {
        let mut index = self.index.write();
        let mut max_seq = None;
        for slice in slices {
            max_seq = max_seq.max(Some(slice.seq));
            index.insert(slice)?;
        }
        if let Some(seq) = max_seq {
            self.next_seq.fetch_max(seq + 1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn backend(&self) -> &'static str {
        self.index.read().backend()
    }

    async fn replace_slices(&self, tool_id: Uuid, slices: Vec<ToolSlice>) -> Result<()> {
        let count = slices.len();
        let first_seq = self.next_seq.fetch_add(count as u64, Ordering::SeqCst);

        let entries: Vec<IndexedSlice> = slices
            .into_iter()
            .enumerate()
            .map(|(position, slice)| IndexedSlice {
                seq: first_seq + position as u64,
                key: slice_key(&tool_id, position),
                owner: tool_id,
                kind: slice.kind,
                vector: slice.embedding,
            })
            .collect();

        let mut index = self.index.write();
        let removed = index.remove_owner(&tool_id);

        for (position, entry) in entries.into_iter().enumerate() {
            if let Err(e) = index.insert(entry) {
                // Leave no partial set behind
                index.remove_owner(&tool_id);
                tracing::warn!(
                    tool_id = %tool_id,
                    position,
                    error = %e,
                    "Slice insert failed, tool slices removed"
                );
                return Err(e);
            }
        }

        tracing::debug!(tool_id = %tool_id, removed, inserted = count, "Slice set replaced");
        Ok(())
    }

    async fn remove_tool(&self, tool_id: Uuid) -> Result<usize> {
        Ok(self.index.write().remove_owner(&tool_id))
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<SliceHit>> {
        Ok(self.index.read().search(vector, limit))
    }

    async fn slice_count(&self) -> Result<usize> {
        Ok(self.index.read().len())
    }

    async fn drop_index(&self) -> Result<()> {
        self.index.write().clear();
        Ok(())
    }

    async fn recreate_index(&self) -> Result<()> {
        self.index.write().rebuild();
        Ok(())
    }
}
