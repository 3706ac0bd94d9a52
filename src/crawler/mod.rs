//! Crawler stage: seed loading and the fetcher worker pool.

pub mod fetch;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, WebseekError};
use crate::frontier::Frontier;
use crate::store::PageStore;

pub use fetch::{extract_page, HttpFetcher, PageFetcher};
pub use worker::Worker;

/// The crawler: a frontier, a fetcher, a page store, and a pool of workers.
pub struct Crawler {
    frontier: Arc<Frontier>,
    fetcher: Arc<dyn PageFetcher>,
    pages: Arc<dyn PageStore>,
    workers: usize,
    batch_size: usize,
}

impl Crawler {
    pub fn new(
        cfg: &Config,
        frontier: Arc<Frontier>,
        fetcher: Arc<dyn PageFetcher>,
        pages: Arc<dyn PageStore>,
    ) -> Self {
        Self {
            frontier,
            fetcher,
            pages,
            workers: cfg.workers.max(1),
            batch_size: cfg.index.batch_size.max(1),
        }
    }

    /// Run the worker pool until every worker returns (cancellation or a
    /// fatal per-worker error).
    pub async fn run(&self, cancel: CancellationToken) {
        let mut pool: JoinSet<()> = JoinSet::new();
        for i in 0..self.workers {
            let worker = Worker::new(
                format!("worker-{}", i),
                self.frontier.clone(),
                self.fetcher.clone(),
                self.pages.clone(),
                self.batch_size,
                cancel.clone(),
            );
            pool.spawn(async move { worker.run().await });
        }
        info!(workers = self.workers, "crawler started");

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "crawler worker aborted");
            }
        }
        info!("all crawler workers finished");
    }

    /// Load a CSV seed file (header row with a `Domain` column) and enqueue
    /// every domain at depth 0. Returns the number of rows enqueued.
    pub async fn seed_from_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let urls = load_seed_urls(path)?;
        let mut enqueued = 0;
        for url in urls {
            match self.frontier.seed(&url, 0).await {
                Ok(()) => enqueued += 1,
                Err(e) => warn!(url = %url, error = %e, "skipping seed url"),
            }
        }
        info!(enqueued, "seeded frontier");
        Ok(enqueued)
    }
}

/// Read the `Domain` column of a CSV seed file
pub fn load_seed_urls(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| WebseekError::Config(format!("cannot read seed file: {}", e)))?;

    let headers = reader
        .headers()
        .map_err(|e| WebseekError::Config(format!("cannot read seed header: {}", e)))?;
    let domain_idx = headers
        .iter()
        .position(|h| h == "Domain")
        .ok_or_else(|| WebseekError::Config("seed file has no Domain column".to_string()))?;

    let mut urls = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| WebseekError::Config(format!("bad seed row: {}", e)))?;
        if let Some(domain) = record.get(domain_idx) {
            if !domain.trim().is_empty() {
                urls.push(domain.trim().to_string());
            }
        }
    }
    Ok(urls)
}
