//! Accumulate rows and write them in bulk: one insert-skip-conflicts statement
//! per full buffer, one more for the remainder. Round trips are amortized over
//! the batch; a failed flush aborts the whole load and is the caller's problem.
use anyhow::Result;
use futures::future::BoxFuture;
use tracing::debug;

use crate::models::EntityKind;

/// Write batch for entities built without per-record lookups.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
/// Write batch for entities whose construction needs resolver lookups; kept
/// smaller to bound the lookup cost behind any single flush.
pub const RESOLVED_BATCH_SIZE: usize = 1_000;

/// One bulk insert against store `S` for row type `R`, returning rows written.
pub type FlushFn<S, R> = for<'a> fn(&'a S, &'a [R]) -> BoxFuture<'a, Result<u64>>;

/// Totals for one completed load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub rows: u64,
    pub inserted: u64,
    pub flushes: u64,
}

pub struct BatchWriter<'s, S, R> {
    store: &'s S,
    kind: EntityKind,
    capacity: usize,
    flush: FlushFn<S, R>,
    buf: Vec<R>,
    stats: BatchStats,
}

impl<'s, S, R> BatchWriter<'s, S, R> {
    pub fn new(store: &'s S, kind: EntityKind, capacity: usize, flush: FlushFn<S, R>) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            kind,
            capacity,
            flush,
            buf: Vec::with_capacity(capacity),
            stats: BatchStats::default(),
        }
    }

    pub async fn push(&mut self, row: R) -> Result<()> {
        self.buf.push(row);
        if self.buf.len() >= self.capacity {
            self.flush_buf().await?;
        }
        Ok(())
    }

    /// Flush the remaining partial buffer and hand back the totals.
    pub async fn finish(mut self) -> Result<BatchStats> {
        if !self.buf.is_empty() {
            self.flush_buf().await?;
        }
        Ok(self.stats)
    }

    async fn flush_buf(&mut self) -> Result<()> {
        let inserted = (self.flush)(self.store, &self.buf).await?;
        self.stats.rows += self.buf.len() as u64;
        self.stats.inserted += inserted;
        self.stats.flushes += 1;
        debug!(
            kind = self.kind.as_str(),
            rows = self.buf.len(),
            inserted,
            "batch flushed"
        );
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUrl;
    use crate::store::{MemStore, Store};
    use uuid::Uuid;

    fn flush_urls<'a>(store: &'a MemStore, rows: &'a [NewUrl]) -> BoxFuture<'a, Result<u64>> {
        store.insert_urls(rows)
    }

    fn url_row(n: usize, url_type_id: Uuid) -> NewUrl {
        NewUrl {
            id: Uuid::new_v4(),
            url: format!("https://example.com/{n}"),
            url_type_id,
        }
    }

    #[tokio::test]
    async fn flushes_at_capacity_and_drains_remainder() {
        let store = MemStore::new();
        let url_type_id = Uuid::new_v4();
        let mut writer = BatchWriter::new(&store, EntityKind::Urls, 10, flush_urls);
        for n in 0..25 {
            writer.push(url_row(n, url_type_id)).await.unwrap();
        }
        let stats = writer.finish().await.unwrap();
        assert_eq!(stats.rows, 25);
        assert_eq!(stats.inserted, 25);
        assert_eq!(stats.flushes, 3);
        assert_eq!(
            store.insert_log(),
            vec![("urls", 10), ("urls", 10), ("urls", 5)]
        );
    }

    #[tokio::test]
    async fn exact_multiple_has_no_trailing_flush() {
        let store = MemStore::new();
        let url_type_id = Uuid::new_v4();
        let mut writer = BatchWriter::new(&store, EntityKind::Urls, 5, flush_urls);
        for n in 0..10 {
            writer.push(url_row(n, url_type_id)).await.unwrap();
        }
        let stats = writer.finish().await.unwrap();
        assert_eq!(stats.flushes, 2);
        assert_eq!(store.insert_log(), vec![("urls", 5), ("urls", 5)]);
    }

    #[tokio::test]
    async fn empty_input_never_touches_the_store() {
        let store = MemStore::new();
        let writer: BatchWriter<'_, MemStore, NewUrl> =
            BatchWriter::new(&store, EntityKind::Urls, 10, flush_urls);
        let stats = writer.finish().await.unwrap();
        assert_eq!(stats, BatchStats::default());
        assert!(store.insert_log().is_empty());
    }

    #[tokio::test]
    async fn flush_error_propagates() {
        let store = MemStore::new();
        store.fail_after_inserts(1);
        let url_type_id = Uuid::new_v4();
        let mut writer = BatchWriter::new(&store, EntityKind::Urls, 2, flush_urls);
        writer.push(url_row(0, url_type_id)).await.unwrap();
        writer.push(url_row(1, url_type_id)).await.unwrap();
        writer.push(url_row(2, url_type_id)).await.unwrap();
        let err = writer.push(url_row(3, url_type_id)).await;
        assert!(err.is_err());
        // the first flush landed, the failed one did not
        assert_eq!(store.urls().len(), 2);
    }
}
