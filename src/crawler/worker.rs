use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crawler::fetch::PageFetcher;
use crate::error::WebseekError;
use crate::frontier::{CrawlItem, Frontier};
use crate::models::RawPage;
use crate::store::PageStore;

/// Per-batch fetch concurrency bound inside one worker
const MAX_CONCURRENT_FETCHES: usize = 5;
/// How long to sleep when the frontier has nothing to hand out
const IDLE_BACKOFF: Duration = Duration::from_secs(5);

/// A fetcher worker: leases URL batches from the frontier, fetches and
/// parses them with bounded concurrency, and bulk-appends the successful
/// pages to the raw document store.
pub struct Worker {
    pub id: String,
    frontier: Arc<Frontier>,
    fetcher: Arc<dyn PageFetcher>,
    pages: Arc<dyn PageStore>,
    batch_size: usize,
    cancel: CancellationToken,
    stop: CancellationToken,
}

impl Worker {
    pub fn new(
        id: String,
        frontier: Arc<Frontier>,
        fetcher: Arc<dyn PageFetcher>,
        pages: Arc<dyn PageStore>,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            frontier,
            fetcher,
            pages,
            batch_size,
            cancel,
            stop: CancellationToken::new(),
        }
    }

    /// Handle used to stop this worker without cancelling the whole pool
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub async fn run(&self) {
        info!(worker = %self.id, "worker starting");
        loop {
            if self.cancel.is_cancelled() || self.stop.is_cancelled() {
                info!(worker = %self.id, "worker shutting down");
                return;
            }

            let items = match self.frontier.next_batch(&self.id, self.batch_size).await {
                Ok(items) => items,
                Err(WebseekError::FrontierEmpty) => {
                    debug!(worker = %self.id, "frontier empty, backing off");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = self.stop.cancelled() => return,
                        _ = tokio::time::sleep(IDLE_BACKOFF) => continue,
                    }
                }
                Err(e) => {
                    error!(worker = %self.id, error = %e, "cannot lease batch, shutting down");
                    return;
                }
            };

            let pages = self.process_batch(items).await;
            if pages.is_empty() {
                continue;
            }
            let fetched = pages.len();
            if let Err(e) = self.pages.insert_batch(pages).await {
                error!(worker = %self.id, error = %e, "failed to store fetched batch");
            } else {
                info!(worker = %self.id, fetched, "stored batch");
            }
        }
    }

    /// Fetch every item of a leased batch with at most
    /// `MAX_CONCURRENT_FETCHES` requests in flight, reporting done/fail per
    /// item, and return the successfully fetched pages.
    async fn process_batch(&self, items: Vec<CrawlItem>) -> Vec<RawPage> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
        let mut tasks: JoinSet<Option<RawPage>> = JoinSet::new();

        for item in items {
            if item.url.is_empty() {
                warn!(worker = %self.id, "frontier returned empty url, skipping");
                continue;
            }
            let semaphore = semaphore.clone();
            let frontier = self.frontier.clone();
            let fetcher = self.fetcher.clone();
            let cancel = self.cancel.clone();
            let stop = self.stop.clone();
            let worker_id = self.id.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.ok()?;
                if cancel.is_cancelled() || stop.is_cancelled() {
                    return None;
                }

                debug!(worker = %worker_id, url = %item.url, "fetching");
                let fetched = match fetcher.fetch(&item.url).await {
                    Ok(page) => {
                        if let Err(e) = frontier.done(&item, &worker_id).await {
                            error!(worker = %worker_id, url = %item.url, error = %e,
                                "failed to report crawl success");
                        }
                        Some(page)
                    }
                    Err(e) => {
                        warn!(worker = %worker_id, url = %item.url, error = %e, "fetch failed");
                        if let Err(e) = frontier.fail(&item, &worker_id, &e.to_string()).await {
                            error!(worker = %worker_id, url = %item.url, error = %e,
                                "failed to report crawl failure");
                        }
                        None
                    }
                };

                // pace requests with uniform jitter
                let delay = Duration::from_millis(rand::thread_rng().gen_range(500..1000));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                    _ = stop.cancelled() => {}
                }

                fetched
            });
        }

        let mut pages = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(page)) => pages.push(page),
                Ok(None) => {}
                Err(e) => error!(worker = %self.id, error = %e, "fetch task panicked"),
            }
        }
        pages
    }
}
