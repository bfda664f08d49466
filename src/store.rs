//! Boundary to the external chunk store. The ingester owns chunks only while
//! they are hot (`Open`/`Closed`); once handed to a [`ChunkStoreIface`] they
//! are `Flushed` and the ingester's copy is dropped.

use crate::chunk::ChunkDesc;
use crate::error::StoreFailure;
use crate::labels::Label;
use async_trait::async_trait;

/// One series' worth of chunks ready to flush, addressed by fingerprint and
/// label set (the store has no notion of fingerprints of its own).
#[derive(Clone)]
pub struct FlushBatch {
    pub user_id: String,
    pub fingerprint: u64,
    pub labels: Vec<Label>,
    pub chunks: Vec<ChunkDesc>,
}

/// External durable chunk store. Implementations own encoding-at-rest;
/// callers always pass [`ChunkDesc`] and let the store call
/// [`crate::chunk::ChunkEncoder::to_bytes`] itself, so a store can choose to
/// batch, compress, or shard writes however it likes.
#[async_trait]
pub trait ChunkStoreIface: Send + Sync {
    async fn put(&self, batch: FlushBatch) -> Result<(), StoreFailure>;
}

/// In-memory double used by tests and by a bare `Ingester` with no
/// configured backing store. Never evicts what it holds.
#[derive(Default)]
pub struct InMemoryChunkStore {
    inner: std::sync::Mutex<Vec<(String, u64, Vec<Label>, Vec<ChunkDesc>)>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flushed_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn flushed_for(&self, user_id: &str, fingerprint: u64) -> Vec<ChunkDesc> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(u, fp, _, _)| u == user_id && *fp == fingerprint)
            .flat_map(|(_, _, _, chunks)| chunks.clone())
            .collect()
    }

    /// Every sample flushed for `user_id`, across all series and chunks, in
    /// the order the batches were recorded.
    pub fn all_samples_for_user(&self, user_id: &str) -> Vec<crate::common::Sample> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(u, _, _, _)| u == user_id)
            .flat_map(|(_, _, _, chunks)| chunks.iter())
            .flat_map(|desc| desc.chunk.iter())
            .collect()
    }
}

#[async_trait]
impl ChunkStoreIface for InMemoryChunkStore {
    async fn put(&self, batch: FlushBatch) -> Result<(), StoreFailure> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.push((batch.user_id, batch.fingerprint, batch.labels, batch.chunks));
        Ok(())
    }
}

/// Test/demo double that fails every `put`, to exercise the flush loop's
/// retry-next-tick behavior.
#[derive(Default)]
pub struct FailingChunkStore;

#[async_trait]
impl ChunkStoreIface for FailingChunkStore {
    async fn put(&self, _batch: FlushBatch) -> Result<(), StoreFailure> {
        Err(StoreFailure("store unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkDesc, ChunkEncoder};
    use crate::common::Sample;

    fn batch(fp: u64) -> FlushBatch {
        let mut chunk = ChunkEncoder::new(16);
        chunk.add(Sample::new(1, 1.0));
        FlushBatch {
            user_id: "tenant-a".to_string(),
            fingerprint: fp,
            labels: vec![Label::new("__name__", "cpu")],
            chunks: vec![ChunkDesc::new(chunk, 1)],
        }
    }

    #[tokio::test]
    async fn in_memory_store_records_flushed_batches() {
        let store = InMemoryChunkStore::new();
        store.put(batch(1)).await.unwrap();
        assert_eq!(store.flushed_count(), 1);
        assert_eq!(store.flushed_for("tenant-a", 1).len(), 1);
    }

    #[tokio::test]
    async fn failing_store_reports_store_failure() {
        let store = FailingChunkStore;
        assert!(store.put(batch(1)).await.is_err());
    }
}
