//! URL frontier: a restart-safe, at-least-once work queue of URLs with
//! dedup against every URL ever seen.
//!
//! State lives entirely in the queue store: a `pending` list, one
//! `processing:<worker>` list per worker (the worker's lease), a terminal
//! `failed` list, the `visited_url` approximate-membership filter, and the
//! crawler/indexer handoff cursor under `last_indexed_object_id`.

pub mod normalize;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, WebseekError};
use crate::store::{ListOp, QueueStore};

pub use normalize::normalize_url;

const PENDING_QUEUE: &str = "pending";
const FAILED_QUEUE: &str = "failed";
const PROCESSING_PREFIX: &str = "processing:";
const VISITED_FILTER: &str = "visited_url";
const LAST_INDEXED_KEY: &str = "last_indexed_object_id";

/// One unit of crawl work
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlItem {
    pub url: String,
    pub depth: i64,
}

#[derive(Serialize, Deserialize)]
struct FailedItem {
    item: CrawlItem,
    reason: String,
}

pub struct Frontier {
    store: Arc<dyn QueueStore>,
}

impl Frontier {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    fn processing_key(worker_id: &str) -> String {
        format!("{}{}", PROCESSING_PREFIX, worker_id)
    }

    /// Enqueue a URL unless the filter has seen it. Normalization failures
    /// surface as `BadUrl`; already-seen URLs are dropped silently.
    pub async fn seed(&self, url: &str, depth: i64) -> Result<()> {
        let normalized = normalize_url(url)?;
        if self.store.filter_contains(VISITED_FILTER, &normalized).await? {
            return Ok(());
        }
        self.store.filter_insert(VISITED_FILTER, &normalized).await?;
        let item = CrawlItem {
            url: normalized,
            depth,
        };
        self.store
            .push_front(PENDING_QUEUE, &serde_json::to_string(&item)?)
            .await
    }

    /// Mark a URL as seen without enqueueing it
    pub async fn visit(&self, url: &str) -> Result<()> {
        let normalized = normalize_url(url)?;
        if self.store.filter_contains(VISITED_FILTER, &normalized).await? {
            return Ok(());
        }
        self.store.filter_insert(VISITED_FILTER, &normalized).await
    }

    /// Lease up to `count` items for a worker.
    ///
    /// Recovery-first: if the worker's processing list still holds items
    /// from a previous run they are returned as-is, without touching
    /// pending. Otherwise the oldest `count` pending items are moved into
    /// the processing list in one atomic step. `FrontierEmpty` when there
    /// is nothing to hand out.
    pub async fn next_batch(&self, worker_id: &str, count: usize) -> Result<Vec<CrawlItem>> {
        if count == 0 {
            return Err(WebseekError::InvalidRequest(
                "batch size must be positive".to_string(),
            ));
        }
        let processing_key = Self::processing_key(worker_id);

        let leftover = self
            .store
            .range(&processing_key, 0, count as i64 - 1)
            .await?;
        if !leftover.is_empty() {
            warn!(
                worker_id,
                count = leftover.len(),
                "recovering in-flight urls from a previous run"
            );
            return Ok(Self::decode_items(&leftover));
        }

        let raw = self
            .store
            .range(PENDING_QUEUE, -(count as i64), -1)
            .await?;
        let items = Self::decode_items(&raw);
        if items.is_empty() {
            return Err(WebseekError::FrontierEmpty);
        }

        let mut ops = vec![ListOp::Trim {
            list: PENDING_QUEUE.to_string(),
            start: 0,
            stop: -(count as i64 + 1),
        }];
        for item in &items {
            ops.push(ListOp::PushFront {
                list: processing_key.clone(),
                item: serde_json::to_string(item)?,
            });
        }
        self.store.apply(ops).await?;

        Ok(items)
    }

    /// Release a successfully processed item and re-assert its URL into the
    /// visited filter (idempotent).
    pub async fn done(&self, item: &CrawlItem, worker_id: &str) -> Result<()> {
        if let Err(e) = self.store.filter_insert(VISITED_FILTER, &item.url).await {
            warn!(url = %item.url, error = %e, "failed to re-assert url into visited filter");
        }
        self.store
            .apply(vec![ListOp::Remove {
                list: Self::processing_key(worker_id),
                item: serde_json::to_string(item)?,
            }])
            .await
    }

    /// Move an item from the worker's lease onto the terminal failed list.
    /// Never re-enqueues; retries are an operator concern.
    pub async fn fail(&self, item: &CrawlItem, worker_id: &str, reason: &str) -> Result<()> {
        let failed = FailedItem {
            item: item.clone(),
            reason: reason.to_string(),
        };
        self.store
            .apply(vec![
                ListOp::Remove {
                    list: Self::processing_key(worker_id),
                    item: serde_json::to_string(item)?,
                },
                ListOp::PushFront {
                    list: FAILED_QUEUE.to_string(),
                    item: serde_json::to_string(&failed)?,
                },
            ])
            .await
    }

    /// Number of pending items
    pub async fn size(&self) -> Result<i64> {
        self.store.len(PENDING_QUEUE).await
    }

    /// Read the crawler/indexer handoff cursor
    pub async fn last_indexed(&self) -> Result<Option<String>> {
        self.store.get(LAST_INDEXED_KEY).await
    }

    /// Persist the crawler/indexer handoff cursor
    pub async fn set_last_indexed(&self, id: &str) -> Result<()> {
        self.store.set(LAST_INDEXED_KEY, id).await
    }

    fn decode_items(raw: &[String]) -> Vec<CrawlItem> {
        raw.iter()
            .filter_map(|s| match serde_json::from_str::<CrawlItem>(s) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(raw = %s, error = %e, "skipping undecodable frontier item");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryQueueStore;

    fn frontier() -> Frontier {
        Frontier::new(Arc::new(MemoryQueueStore::new()))
    }

    #[tokio::test]
    async fn test_seed_dedups_equivalent_urls() {
        let f = frontier();
        f.seed("https://WWW.Example.COM/a#frag", 0).await.unwrap();
        f.seed("https://example.com/a", 0).await.unwrap();
        assert_eq!(f.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_seed_rejects_bad_url() {
        let f = frontier();
        assert!(matches!(
            f.seed("", 0).await,
            Err(WebseekError::BadUrl { .. })
        ));
        assert_eq!(f.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_next_batch_moves_pending_to_processing() {
        let f = frontier();
        f.seed("https://a.test", 0).await.unwrap();
        f.seed("https://b.test", 0).await.unwrap();
        f.seed("https://c.test", 0).await.unwrap();

        let batch = f.next_batch("w0", 2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(f.size().await.unwrap(), 1);

        // the oldest two seeds were leased
        let urls: Vec<&str> = batch.iter().map(|i| i.url.as_str()).collect();
        assert!(urls.contains(&"https://a.test/"));
        assert!(urls.contains(&"https://b.test/"));
    }

    #[tokio::test]
    async fn test_next_batch_recovery_first() {
        let f = frontier();
        f.seed("https://a.test", 0).await.unwrap();
        f.seed("https://b.test", 0).await.unwrap();

        let first = f.next_batch("w0", 1).await.unwrap();
        // crash before done: the lease survives and is returned again,
        // without draining more pending items
        let recovered = f.next_batch("w0", 5).await.unwrap();
        assert_eq!(first, recovered);
        assert_eq!(f.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_done_clears_lease() {
        let f = frontier();
        f.seed("https://a.test", 0).await.unwrap();
        let batch = f.next_batch("w0", 1).await.unwrap();
        f.done(&batch[0], "w0").await.unwrap();

        assert!(matches!(
            f.next_batch("w0", 1).await,
            Err(WebseekError::FrontierEmpty)
        ));
        // done re-asserts the filter: the url cannot be re-enqueued
        f.seed("https://a.test", 0).await.unwrap();
        assert_eq!(f.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fail_is_terminal() {
        let f = frontier();
        f.seed("https://a.test", 0).await.unwrap();
        let batch = f.next_batch("w0", 1).await.unwrap();
        f.fail(&batch[0], "w0", "http 500").await.unwrap();

        assert!(matches!(
            f.next_batch("w0", 1).await,
            Err(WebseekError::FrontierEmpty)
        ));
        assert_eq!(f.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_frontier() {
        let f = frontier();
        assert!(matches!(
            f.next_batch("w0", 10).await,
            Err(WebseekError::FrontierEmpty)
        ));
    }

    #[tokio::test]
    async fn test_cursor_roundtrip() {
        let f = frontier();
        assert_eq!(f.last_indexed().await.unwrap(), None);
        f.set_last_indexed("00000000000000000000002a").await.unwrap();
        assert_eq!(
            f.last_indexed().await.unwrap(),
            Some("00000000000000000000002a".to_string())
        );
    }
}
