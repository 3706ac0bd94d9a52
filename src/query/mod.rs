//! Query engine: parse, match, score, assemble.

pub mod cache;
pub mod exec;
pub mod parser;
pub mod rank;
pub mod results;
pub mod stats;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::QueryEngineConfig;
use crate::error::Result;
use crate::models::{DocumentDetail, Posting, SearchResult};
use crate::store::IndexStore;

pub use cache::LruCache;
pub use parser::{parse, Operator, QueryPlan};
pub use rank::ScoringStrategy;
pub use stats::GlobalStats;

/// What a search returns: one page of results, the total after dedup, and
/// the elapsed wall time in seconds.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub elapsed_seconds: f64,
}

pub struct QueryEngine {
    pub(crate) store: Arc<dyn IndexStore>,
    pub(crate) term_cache: Arc<LruCache<String, i64>>,
    pub(crate) posting_cache: Arc<LruCache<i64, Vec<Posting>>>,
    pub(crate) idf_cache: Arc<LruCache<i64, f64>>,
    pub(crate) doc_cache: Arc<LruCache<i64, DocumentDetail>>,
    pub(crate) stats: Arc<GlobalStats>,
    pub(crate) strategy: ScoringStrategy,
    pub(crate) max_workers: usize,
}

impl QueryEngine {
    /// Build an engine and take the initial snapshot of the global
    /// statistics. Fails when the postings store is unreachable.
    pub async fn new(cfg: &QueryEngineConfig, store: Arc<dyn IndexStore>) -> Result<Self> {
        let refresh = Duration::from_secs(cfg.cache_refresh_time.max(1));
        let stats = Arc::new(GlobalStats::new(store.clone(), refresh));
        stats.refresh().await?;

        Ok(Self {
            store,
            // term ids are immortal, so that cache never expires; the
            // others go stale when documents are reindexed
            term_cache: Arc::new(LruCache::new(cfg.term_cache_size, None)),
            posting_cache: Arc::new(LruCache::new(cfg.posting_cache_size, Some(refresh))),
            idf_cache: Arc::new(LruCache::new(cfg.idf_cache_size, Some(refresh))),
            doc_cache: Arc::new(LruCache::new(cfg.document_cache_size, Some(refresh))),
            stats,
            strategy: ScoringStrategy::from_name(&cfg.scoring),
            max_workers: cfg.max_workers.max(1),
        })
    }

    /// Start the stats refresher and the cache sweepers
    pub fn start_background_tasks(&self, cancel: CancellationToken) {
        self.stats.spawn_refresher(cancel.clone());
        self.posting_cache.spawn_sweeper(cancel.clone());
        self.idf_cache.spawn_sweeper(cancel.clone());
        self.doc_cache.spawn_sweeper(cancel);
    }

    /// Run one search: parse, resolve terms, select candidates, rank,
    /// paginate, assemble. A query with no resolvable terms returns an
    /// empty outcome, not an error.
    pub async fn search(
        &self,
        raw_query: &str,
        page: usize,
        page_size: usize,
    ) -> Result<SearchOutcome> {
        let started = Instant::now();
        let mut plan = parser::parse(raw_query, page, page_size);
        self.resolve_term_ids(&mut plan).await?;

        if plan.term_ids.is_empty() {
            return Ok(SearchOutcome {
                results: Vec::new(),
                total: 0,
                elapsed_seconds: started.elapsed().as_secs_f64(),
            });
        }

        let candidates = match plan.operator {
            Operator::Phrase => self.phrase_search(&plan).await?,
            _ => self.boolean_search(&plan).await?,
        };

        let scored = self.rank(candidates, &plan).await?;
        let (results, total) = self.assemble(scored, &plan).await?;

        Ok(SearchOutcome {
            results,
            total,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        })
    }

    /// Resolve the plan's terms to ids through the term LRU; unknown terms
    /// are dropped from the plan.
    async fn resolve_term_ids(&self, plan: &mut QueryPlan) -> Result<()> {
        if plan.terms.is_empty() {
            return Ok(());
        }
        let mut resolved = std::collections::HashMap::new();
        let mut missing = Vec::new();
        for term in &plan.terms {
            match self.term_cache.get(term) {
                Some(id) => {
                    resolved.insert(term.clone(), id);
                }
                None => missing.push(term.clone()),
            }
        }
        if !missing.is_empty() {
            for (term, id) in self.store.term_ids(&missing).await? {
                self.term_cache.put(term.clone(), id);
                resolved.insert(term, id);
            }
        }
        plan.term_ids = plan
            .terms
            .iter()
            .filter_map(|t| resolved.get(t).copied())
            .collect();
        Ok(())
    }

    /// Preload the posting cache with the highest-volume terms
    pub async fn warm_cache(&self, top_n: usize) -> Result<()> {
        let term_ids = self.store.top_terms(top_n).await?;
        let loaded = self.postings_batch(&term_ids).await?.len();
        info!(loaded, "warmed posting cache");
        Ok(())
    }
}
