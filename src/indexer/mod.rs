//! Indexer stage: drains unindexed raw pages from the document store in
//! cursor order and turns them into documents, terms and positional
//! postings through the batch writer.

pub mod batch;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::IndexerConfig;
use crate::error::Result;
use crate::frontier::Frontier;
use crate::models::RawPage;
use crate::store::{IndexStore, PageStore};

pub use batch::{Batch, BatchWriter};

/// How often a partially filled batch is flushed anyway
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

pub struct Indexer {
    pages: Arc<dyn PageStore>,
    frontier: Arc<Frontier>,
    writer: Arc<BatchWriter>,
    workers: usize,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        cfg: &IndexerConfig,
        pages: Arc<dyn PageStore>,
        frontier: Arc<Frontier>,
        index: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            pages,
            frontier,
            writer: Arc::new(BatchWriter::new(index)),
            workers: cfg.workers.max(1),
            batch_size: cfg.batch_size.max(1),
        }
    }

    /// Feed unindexed pages to a pool of batch workers until the store is
    /// drained or the token is cancelled. The cursor is read from and
    /// persisted through the frontier k/v, so a restart resumes in place.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let (tx, rx) = mpsc::channel::<RawPage>(self.batch_size * 2);
        let rx = Arc::new(Mutex::new(rx));

        let mut pool: JoinSet<()> = JoinSet::new();
        for i in 0..self.workers {
            let rx = rx.clone();
            let pages = self.pages.clone();
            let frontier = self.frontier.clone();
            let writer = self.writer.clone();
            let cancel = cancel.clone();
            let batch_size = self.batch_size;
            pool.spawn(async move {
                batch_worker(i, rx, pages, frontier, writer, batch_size, cancel).await;
            });
        }
        info!(workers = self.workers, "indexer started");

        let mut cursor = self.frontier.last_indexed().await?;
        if let Some(id) = &cursor {
            info!(cursor = %id, "resuming from persisted cursor");
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let batch = match self
                .pages
                .fetch_batch(cursor.as_deref(), self.batch_size, true)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "failed to fetch raw page batch, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(2)) => continue,
                    }
                }
            };
            if batch.is_empty() {
                info!("no more documents to process");
                break;
            }
            cursor = batch.last().map(|p| p.id.clone());
            for page in batch {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(page) => {
                        if sent.is_err() {
                            error!("all indexer workers exited early");
                            return Ok(());
                        }
                    }
                }
            }
        }

        drop(tx);
        while pool.join_next().await.is_some() {}
        info!("indexer finished");
        Ok(())
    }
}

/// One batch worker: accumulates pages up to the batch size, flushing on a
/// ticker so a trickle of pages never waits forever.
async fn batch_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<RawPage>>>,
    pages: Arc<dyn PageStore>,
    frontier: Arc<Frontier>,
    writer: Arc<BatchWriter>,
    batch_size: usize,
    cancel: CancellationToken,
) {
    let mut pending: Vec<RawPage> = Vec::new();
    let mut ticker = interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = async { rx.lock().await.recv().await } => {
                match received {
                    Some(page) => {
                        pending.push(page);
                        if pending.len() >= batch_size {
                            flush(worker_id, &mut pending, &pages, &frontier, &writer).await;
                        }
                    }
                    None => {
                        flush(worker_id, &mut pending, &pages, &frontier, &writer).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(worker_id, &mut pending, &pages, &frontier, &writer).await;
                }
            }
            _ = cancel.cancelled() => {
                // finish what we already pulled, then persist and return
                flush(worker_id, &mut pending, &pages, &frontier, &writer).await;
                return;
            }
        }
    }
}

/// Write one accumulated batch. On failure the pages stay unindexed and the
/// cursor is left alone, so the batch is reprocessed on the next run.
async fn flush(
    worker_id: usize,
    pending: &mut Vec<RawPage>,
    pages: &Arc<dyn PageStore>,
    frontier: &Arc<Frontier>,
    writer: &Arc<BatchWriter>,
) {
    if pending.is_empty() {
        return;
    }
    let raw_ids: Vec<String> = pending.iter().map(|p| p.id.clone()).collect();
    let last_id = raw_ids.iter().max().cloned();
    let batch = Batch::build(std::mem::take(pending));

    match writer.write(&batch).await {
        Ok(doc_ids) => {
            info!(worker = worker_id, docs = doc_ids.len(), "indexed batch");
            if let Err(e) = pages.mark_indexed(&raw_ids).await {
                warn!(worker = worker_id, error = %e, "failed to mark pages indexed");
            }
            if let Some(id) = last_id {
                if let Err(e) = frontier.set_last_indexed(&id).await {
                    warn!(worker = worker_id, error = %e, "failed to persist index cursor");
                }
            }
        }
        Err(e) => {
            error!(worker = worker_id, error = %e, "batch write failed, will reprocess");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;
    use crate::store::{MemoryIndexStore, MemoryPageStore, MemoryQueueStore};

    fn page(url: &str, body: &str) -> RawPage {
        RawPage {
            url: url.to_string(),
            body_text: body.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_indexer_drains_and_marks_pages() {
        let pages = Arc::new(MemoryPageStore::new());
        let index = Arc::new(MemoryIndexStore::new());
        let frontier = Arc::new(Frontier::new(Arc::new(MemoryQueueStore::new())));

        pages
            .insert_batch(vec![
                page("https://a.test/", "dogs dogs cat"),
                page("https://b.test/", "cat bird"),
            ])
            .await
            .unwrap();

        let cfg = IndexerConfig {
            workers: 2,
            batch_size: 10,
            ..Default::default()
        };
        let indexer = Indexer::new(&cfg, pages.clone(), frontier.clone(), index.clone());
        indexer.run(CancellationToken::new()).await.unwrap();

        assert_eq!(index.total_documents().await.unwrap(), 2);
        // everything is marked, so a second run has nothing to do
        assert!(pages.fetch_batch(None, 10, true).await.unwrap().is_empty());
        // the cursor points at the last raw page
        assert!(frontier.last_indexed().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_indexer_resumes_from_cursor() {
        let pages = Arc::new(MemoryPageStore::new());
        let index = Arc::new(MemoryIndexStore::new());
        let frontier = Arc::new(Frontier::new(Arc::new(MemoryQueueStore::new())));

        let ids = pages
            .insert_batch(vec![page("https://a.test/", "old news")])
            .await
            .unwrap();
        // pretend a previous run already processed page one
        frontier.set_last_indexed(&ids[0]).await.unwrap();
        pages
            .insert_batch(vec![page("https://b.test/", "fresh stories")])
            .await
            .unwrap();

        let cfg = IndexerConfig {
            workers: 1,
            batch_size: 10,
            ..Default::default()
        };
        let indexer = Indexer::new(&cfg, pages.clone(), frontier.clone(), index.clone());
        indexer.run(CancellationToken::new()).await.unwrap();

        // only the fresh page was indexed
        assert_eq!(index.total_documents().await.unwrap(), 1);
    }
}
