use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::error;

use crate::error::Result;
use crate::models::ScoredDoc;
use crate::query::parser::{Operator, QueryPlan};
use crate::query::QueryEngine;

pub const BM25_K1: f64 = 1.2;
pub const BM25_B: f64 = 0.75;

/// Scoring kernel, selected once per engine from the config string
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoringStrategy {
    Bm25,
    TfIdf,
    Cosine,
    Hybrid,
}

impl ScoringStrategy {
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "tfidf" | "tf-idf" => ScoringStrategy::TfIdf,
            "cosine" => ScoringStrategy::Cosine,
            "hybrid" => ScoringStrategy::Hybrid,
            _ => ScoringStrategy::Bm25,
        }
    }
}

/// Everything a scorer worker needs, prefetched so scoring is pure
/// computation. Each worker writes to a distinct result slot, so no lock is
/// involved in the hot path.
struct ScoreInputs {
    doc_ids: Vec<i64>,
    term_ids: Vec<i64>,
    doc_lengths: HashMap<i64, i64>,
    idfs: HashMap<i64, f64>,
    tfs: HashMap<(i64, i64), i64>,
    avg_len: f64,
    strategy: ScoringStrategy,
    is_phrase: bool,
}

impl ScoreInputs {
    fn score(&self, idx: usize) -> f64 {
        let doc_id = self.doc_ids[idx];
        match self.strategy {
            ScoringStrategy::Bm25 => self.bm25(doc_id),
            ScoringStrategy::TfIdf => self.tfidf(doc_id),
            ScoringStrategy::Cosine => self.cosine(doc_id),
            ScoringStrategy::Hybrid => self.hybrid(doc_id),
        }
    }

    fn length_norm(&self, doc_id: i64) -> f64 {
        let doc_len = self.doc_lengths.get(&doc_id).copied().unwrap_or(0) as f64;
        if self.avg_len > 0.0 {
            doc_len / self.avg_len
        } else {
            1.0
        }
    }

    /// BM25: idf * (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * |d| / avgdl)).
    /// A term with a missing posting or df contributes 0, never an error.
    fn bm25(&self, doc_id: i64) -> f64 {
        let norm = self.length_norm(doc_id);
        let mut score = 0.0;
        for term_id in &self.term_ids {
            let tf = self.tfs.get(&(doc_id, *term_id)).copied().unwrap_or(0) as f64;
            if tf == 0.0 {
                continue;
            }
            let Some(idf) = self.idfs.get(term_id) else {
                continue;
            };
            let numerator = tf * (BM25_K1 + 1.0);
            let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm);
            score += idf * numerator / denominator;
        }
        score
    }

    fn tfidf(&self, doc_id: i64) -> f64 {
        let mut score = 0.0;
        for term_id in &self.term_ids {
            let tf = self.tfs.get(&(doc_id, *term_id)).copied().unwrap_or(0) as f64;
            if tf == 0.0 {
                continue;
            }
            let Some(idf) = self.idfs.get(term_id) else {
                continue;
            };
            score += (1.0 + tf.ln()) * idf;
        }
        score
    }

    fn cosine(&self, doc_id: i64) -> f64 {
        let mut dot = 0.0;
        let mut doc_norm = 0.0;
        let mut query_norm = 0.0;
        for term_id in &self.term_ids {
            let Some(idf) = self.idfs.get(term_id) else {
                continue;
            };
            let tf = self.tfs.get(&(doc_id, *term_id)).copied().unwrap_or(0) as f64;
            let doc_weight = tf * idf;
            let query_weight = idf;
            dot += doc_weight * query_weight;
            doc_norm += doc_weight * doc_weight;
            query_norm += query_weight * query_weight;
        }
        if doc_norm == 0.0 || query_norm == 0.0 {
            return 0.0;
        }
        dot / (doc_norm.sqrt() * query_norm.sqrt())
    }

    /// BM25 with phrase, short-document and multi-term-coverage boosts
    fn hybrid(&self, doc_id: i64) -> f64 {
        let mut score = self.bm25(doc_id);
        if self.is_phrase {
            score *= 1.2;
        }
        if self.doc_lengths.get(&doc_id).copied().unwrap_or(0) < 500 {
            score *= 1.1;
        }
        let matched = self
            .term_ids
            .iter()
            .filter(|t| self.tfs.get(&(doc_id, **t)).copied().unwrap_or(0) > 0)
            .count();
        if matched > 1 {
            score *= 1.0 + 0.1 * (matched as f64 - 1.0);
        }
        score
    }
}

impl QueryEngine {
    /// Score every candidate with a pool of `min(max_workers, candidates)`
    /// workers fed by a channel of indices into a pre-sized slot array, and
    /// return the candidates sorted by score descending.
    pub(crate) async fn rank(&self, doc_ids: Vec<i64>, plan: &QueryPlan) -> Result<Vec<ScoredDoc>> {
        if doc_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.maybe_refresh();

        let doc_lengths = self.doc_lengths_batch(&doc_ids).await?;
        let idfs = self.idf_batch(&plan.term_ids).await?;
        let tfs = self
            .store
            .term_frequencies(&doc_ids, &plan.term_ids)
            .await?;

        let total = doc_ids.len();
        let inputs = Arc::new(ScoreInputs {
            doc_ids,
            term_ids: plan.term_ids.clone(),
            doc_lengths,
            idfs,
            tfs,
            avg_len: self.stats.avg_token_count(),
            strategy: self.strategy,
            is_phrase: plan.operator == Operator::Phrase,
        });

        let workers = self.max_workers.min(total).max(1);
        let (job_tx, job_rx) = mpsc::channel::<usize>(total);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, f64)>(total);

        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let inputs = inputs.clone();
            tokio::spawn(async move {
                loop {
                    let Some(idx) = job_rx.lock().await.recv().await else {
                        return;
                    };
                    let score = inputs.score(idx);
                    if result_tx.send((idx, score)).await.is_err() {
                        return;
                    }
                }
            });
        }
        drop(result_tx);

        for idx in 0..total {
            if job_tx.send(idx).await.is_err() {
                error!("scorer pool exited early");
                break;
            }
        }
        drop(job_tx);

        let mut scored = vec![
            ScoredDoc {
                doc_id: 0,
                score: 0.0
            };
            total
        ];
        while let Some((idx, score)) = result_rx.recv().await {
            scored[idx] = ScoredDoc {
                doc_id: inputs.doc_ids[idx],
                score,
            };
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        Ok(scored)
    }

    /// Document lengths for the candidates, via the document LRU where a
    /// detail row is already cached
    async fn doc_lengths_batch(&self, doc_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        let mut lengths = HashMap::with_capacity(doc_ids.len());
        let mut missing = Vec::new();
        for &doc_id in doc_ids {
            match self.doc_cache.get(&doc_id) {
                Some(detail) => {
                    lengths.insert(doc_id, detail.token_count);
                }
                None => missing.push(doc_id),
            }
        }
        if !missing.is_empty() {
            lengths.extend(self.store.doc_lengths(&missing).await?);
        }
        Ok(lengths)
    }

    /// IDF per term via the IDF LRU; `ln(N / (df + 1))` on miss
    async fn idf_batch(&self, term_ids: &[i64]) -> Result<HashMap<i64, f64>> {
        let mut idfs = HashMap::with_capacity(term_ids.len());
        let mut missing = Vec::new();
        for &term_id in term_ids {
            match self.idf_cache.get(&term_id) {
                Some(idf) => {
                    idfs.insert(term_id, idf);
                }
                None => missing.push(term_id),
            }
        }
        if !missing.is_empty() {
            let total_docs = self.stats.total_docs() as f64;
            for (term_id, df) in self.store.doc_frequencies(&missing).await? {
                let idf = (total_docs / (df as f64 + 1.0)).ln();
                self.idf_cache.put(term_id, idf);
                idfs.insert(term_id, idf);
            }
        }
        Ok(idfs)
    }
}
