use std::mem;
use tracing::debug;

use super::engine::SyncError;
use super::JobDefinition;
use crate::db::{LocalRecord, RecordStore};

/// Chunks mapped records into fixed-size upserts.
///
/// Records pushed across several pages form one stream: full chunks are
/// written as soon as they fill and the tail waits for the next push or for
/// `flush`.
#[derive(Debug)]
pub struct UpsertBatcher<'a> {
    definition: &'a JobDefinition,
    update_columns: Vec<&'static str>,
    pending: Vec<LocalRecord>,
    written: usize,
    batches: usize,
}

impl<'a> UpsertBatcher<'a> {
    pub fn new(definition: &'a JobDefinition) -> Self {
        Self {
            definition,
            update_columns: definition.update_columns(),
            pending: Vec::new(),
            written: 0,
            batches: 0,
        }
    }

    /// Queue `records` and write every chunk that is now full.
    pub async fn push(
        &mut self,
        store: &dyn RecordStore,
        records: Vec<LocalRecord>,
    ) -> Result<(), SyncError> {
        self.pending.extend(records);
        let size = self.definition.chunk_size();
        while self.pending.len() >= size {
            let rest = self.pending.split_off(size);
            let chunk = mem::replace(&mut self.pending, rest);
            self.write_chunk(store, &chunk).await?;
        }
        Ok(())
    }

    /// Write whatever is still pending as a final, possibly short, chunk.
    pub async fn flush(&mut self, store: &dyn RecordStore) -> Result<(), SyncError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = mem::take(&mut self.pending);
        self.write_chunk(store, &chunk).await
    }

    /// Write `records` in chunks right away.
    pub async fn write(
        &mut self,
        store: &dyn RecordStore,
        records: Vec<LocalRecord>,
    ) -> Result<(), SyncError> {
        self.push(store, records).await?;
        self.flush(store).await
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    async fn write_chunk(
        &mut self,
        store: &dyn RecordStore,
        chunk: &[LocalRecord],
    ) -> Result<(), SyncError> {
        store
            .upsert(
                self.definition.table,
                chunk,
                self.definition.conflict_keys,
                &self.update_columns,
            )
            .await
            .map_err(SyncError::Persistence)?;
        self.written += chunk.len();
        self.batches += 1;
        debug!(
            table = self.definition.table,
            size = chunk.len(),
            batch = self.batches,
            "wrote upsert chunk"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NaturalKey;
    use crate::jobs::corporation::BLUEPRINTS;
    use crate::model::Owner;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingStore {
        upserts: Arc<Mutex<Vec<Vec<i64>>>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl RecordStore for RecordingStore {
        async fn upsert(
            &self,
            _table: &str,
            records: &[LocalRecord],
            _conflict_keys: &[&str],
            update_columns: &[&str],
        ) -> Result<u64> {
            assert!(!update_columns.contains(&"created_at"));
            let mut calls = self.upserts.lock().await;
            if self.fail_on_call == Some(calls.len()) {
                return Err(anyhow!("disk full"));
            }
            calls.push(records.iter().filter_map(|r| r.int("item_id")).collect());
            Ok(records.len() as u64)
        }

        async fn delete_missing(
            &self,
            _table: &str,
            _owner: &Owner,
            _key_columns: &[&str],
            _known: &HashSet<NaturalKey>,
        ) -> Result<u64> {
            unreachable!("batcher never deletes")
        }

        async fn count(&self, _table: &str, _owner: &Owner) -> Result<i64> {
            unreachable!("batcher never counts")
        }
    }

    fn records(range: std::ops::Range<i64>) -> Vec<LocalRecord> {
        let now = Utc::now();
        range
            .map(|id| LocalRecord::for_owner(&Owner::Corporation(1)).with("item_id", id).stamped(now))
            .collect()
    }

    #[tokio::test]
    async fn write_issues_ceil_n_over_c_chunks_in_order() {
        let store = RecordingStore::default();
        let mut batcher = UpsertBatcher::new(&BLUEPRINTS);
        batcher.write(&store, records(0..250)).await.unwrap();

        let calls = store.upserts.lock().await.clone();
        let sizes: Vec<_> = calls.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        let flat: Vec<i64> = calls.into_iter().flatten().collect();
        assert_eq!(flat, (0..250).collect::<Vec<_>>());
        assert_eq!(batcher.written(), 250);
        assert_eq!(batcher.batches(), 3);
    }

    #[tokio::test]
    async fn push_carries_tail_between_pages() {
        let store = RecordingStore::default();
        let mut batcher = UpsertBatcher::new(&BLUEPRINTS);
        batcher.push(&store, records(0..70)).await.unwrap();
        assert_eq!(store.upserts.lock().await.len(), 0);
        assert_eq!(batcher.pending(), 70);

        batcher.push(&store, records(70..140)).await.unwrap();
        assert_eq!(store.upserts.lock().await.len(), 1);
        assert_eq!(batcher.pending(), 40);

        batcher.flush(&store).await.unwrap();
        batcher.flush(&store).await.unwrap();
        let sizes: Vec<_> = store.upserts.lock().await.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 40]);
    }

    #[tokio::test]
    async fn empty_write_issues_nothing() {
        let store = RecordingStore::default();
        let mut batcher = UpsertBatcher::new(&BLUEPRINTS);
        batcher.write(&store, Vec::new()).await.unwrap();
        assert!(store.upserts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_stops_at_chunk_boundary() {
        let store = RecordingStore {
            fail_on_call: Some(1),
            ..Default::default()
        };
        let mut batcher = UpsertBatcher::new(&BLUEPRINTS);
        let err = batcher.write(&store, records(0..300)).await.unwrap_err();
        assert!(matches!(err, SyncError::Persistence(_)));
        assert_eq!(store.upserts.lock().await.len(), 1);
        assert_eq!(batcher.written(), 100);
    }
}
