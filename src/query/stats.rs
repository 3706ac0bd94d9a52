use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::IndexStore;

/// Corpus-wide statistics needed by every scorer: total document count and
/// mean document length. Queried once at startup, refreshed on a ticker,
/// and read lock-free from atomics; readers see eventually-consistent
/// values.
pub struct GlobalStats {
    store: Arc<dyn IndexStore>,
    total_docs: AtomicI64,
    avg_token_count_bits: AtomicU64,
    started: Instant,
    last_refresh_ms: AtomicU64,
    refresh_interval: Duration,
    refreshing: AtomicBool,
}

impl GlobalStats {
    pub fn new(store: Arc<dyn IndexStore>, refresh_interval: Duration) -> Self {
        Self {
            store,
            total_docs: AtomicI64::new(0),
            avg_token_count_bits: AtomicU64::new(0f64.to_bits()),
            started: Instant::now(),
            last_refresh_ms: AtomicU64::new(0),
            refresh_interval,
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn total_docs(&self) -> i64 {
        self.total_docs.load(Ordering::Relaxed)
    }

    pub fn avg_token_count(&self) -> f64 {
        f64::from_bits(self.avg_token_count_bits.load(Ordering::Relaxed))
    }

    /// Re-query both statistics from the store
    pub async fn refresh(&self) -> Result<()> {
        let total = self.store.total_documents().await?;
        let avg = self.store.avg_token_count().await?;
        self.total_docs.store(total, Ordering::Relaxed);
        self.avg_token_count_bits
            .store(avg.to_bits(), Ordering::Relaxed);
        self.last_refresh_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
        debug!(total, avg, "refreshed global statistics");
        Ok(())
    }

    fn is_stale(&self) -> bool {
        let last = self.last_refresh_ms.load(Ordering::Relaxed);
        let now = self.started.elapsed().as_millis() as u64;
        now.saturating_sub(last) > self.refresh_interval.as_millis() as u64
    }

    /// Kick off an asynchronous refresh when the values are older than the
    /// refresh interval. Readers keep the stale values in the meantime.
    pub fn maybe_refresh(self: &Arc<Self>) {
        if !self.is_stale() {
            return;
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let stats = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = stats.refresh().await {
                warn!(error = %e, "async stats refresh failed");
            }
            stats.refreshing.store(false, Ordering::Release);
        });
    }

    /// Start the periodic refresher
    pub fn spawn_refresher(self: &Arc<Self>, cancel: CancellationToken) {
        let stats = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(stats.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the startup refresh already happened
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = stats.refresh().await {
                            warn!(error = %e, "periodic stats refresh failed");
                        }
                    }
                }
            }
        });
    }
}
