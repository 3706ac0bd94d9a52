use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;
use crate::models::{DocumentDetail, DocumentUpsert, Posting, PostingUpsert};

/// Contract of the postings store: the canonical inverted index over
/// `documents(id, url UNIQUE, title, description, token_count, indexed_at)`,
/// `terms(id, term UNIQUE)` and `postings(term_id, doc_id, positions)`.
///
/// Write operations mirror the batch protocol of the indexer; read
/// operations are the batched lookups the query engine issues.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Upsert documents keyed on url. Ids are returned in input order;
    /// an existing url keeps its id and has its row updated in place.
    async fn upsert_documents(&self, docs: &[DocumentUpsert]) -> Result<Vec<i64>>;

    /// Insert term texts, ignoring ones that already exist
    async fn insert_terms(&self, terms: &[String]) -> Result<()>;

    /// Resolve term texts to ids; unknown terms are absent from the map
    async fn term_ids(&self, terms: &[String]) -> Result<HashMap<String, i64>>;

    /// Upsert postings; an existing (term_id, doc_id) has its positions
    /// replaced wholesale
    async fn upsert_postings(&self, postings: &[PostingUpsert]) -> Result<()>;

    /// Doc ids containing every one of the distinct given terms
    async fn docs_matching_all(&self, term_ids: &[i64]) -> Result<Vec<i64>>;

    /// Doc ids containing at least one of the given terms
    async fn docs_matching_any(&self, term_ids: &[i64]) -> Result<Vec<i64>>;

    /// Full positional postings for each term, ordered by doc id
    async fn postings_for_terms(&self, term_ids: &[i64]) -> Result<HashMap<i64, Vec<Posting>>>;

    /// Number of distinct documents containing each term
    async fn doc_frequencies(&self, term_ids: &[i64]) -> Result<HashMap<i64, i64>>;

    /// token_count for each document; missing docs are absent from the map
    async fn doc_lengths(&self, doc_ids: &[i64]) -> Result<HashMap<i64, i64>>;

    /// Term frequency (positions length) for every (doc, term) pair present
    async fn term_frequencies(
        &self,
        doc_ids: &[i64],
        term_ids: &[i64],
    ) -> Result<HashMap<(i64, i64), i64>>;

    /// Document rows for result assembly
    async fn documents_by_id(&self, doc_ids: &[i64]) -> Result<HashMap<i64, DocumentDetail>>;

    /// Doc ids whose url contains the given substring
    async fn docs_with_url_containing(&self, needle: &str) -> Result<HashSet<i64>>;

    /// Ids of the `n` terms with the highest total term frequency
    async fn top_terms(&self, n: usize) -> Result<Vec<i64>>;

    /// Total number of documents
    async fn total_documents(&self) -> Result<i64>;

    /// Mean token_count over all documents, 0 when empty
    async fn avg_token_count(&self) -> Result<f64>;
}

struct DocumentRow {
    id: i64,
    url: String,
    title: String,
    description: String,
    token_count: i64,
    #[allow(dead_code)]
    indexed_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryIndex {
    docs: BTreeMap<i64, DocumentRow>,
    doc_by_url: HashMap<String, i64>,
    next_doc_id: i64,
    terms: HashMap<String, i64>,
    next_term_id: i64,
    postings: BTreeMap<(i64, i64), Vec<i32>>,
}

/// In-memory postings store
pub struct MemoryIndexStore {
    state: RwLock<MemoryIndex>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryIndex::default()),
        }
    }
}

impl Default for MemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn upsert_documents(&self, docs: &[DocumentUpsert]) -> Result<Vec<i64>> {
        let mut state = self.state.write();
        let now = Utc::now();
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = match state.doc_by_url.get(&doc.url) {
                Some(&id) => {
                    let row = state.docs.get_mut(&id).expect("url index out of sync");
                    row.title = doc.title.clone();
                    row.description = doc.description.clone();
                    row.token_count = doc.token_count;
                    row.indexed_at = now;
                    id
                }
                None => {
                    state.next_doc_id += 1;
                    let id = state.next_doc_id;
                    state.docs.insert(
                        id,
                        DocumentRow {
                            id,
                            url: doc.url.clone(),
                            title: doc.title.clone(),
                            description: doc.description.clone(),
                            token_count: doc.token_count,
                            indexed_at: now,
                        },
                    );
                    state.doc_by_url.insert(doc.url.clone(), id);
                    id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    async fn insert_terms(&self, terms: &[String]) -> Result<()> {
        let mut state = self.state.write();
        for term in terms {
            if !state.terms.contains_key(term) {
                state.next_term_id += 1;
                let id = state.next_term_id;
                state.terms.insert(term.clone(), id);
            }
        }
        Ok(())
    }

    async fn term_ids(&self, terms: &[String]) -> Result<HashMap<String, i64>> {
        let state = self.state.read();
        Ok(terms
            .iter()
            .filter_map(|t| state.terms.get(t).map(|&id| (t.clone(), id)))
            .collect())
    }

    async fn upsert_postings(&self, postings: &[PostingUpsert]) -> Result<()> {
        let mut state = self.state.write();
        for posting in postings {
            state
                .postings
                .insert((posting.term_id, posting.doc_id), posting.positions.clone());
        }
        Ok(())
    }

    async fn docs_matching_all(&self, term_ids: &[i64]) -> Result<Vec<i64>> {
        let distinct: HashSet<i64> = term_ids.iter().copied().collect();
        if distinct.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read();
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for &term_id in &distinct {
            for (&(_, doc_id), _) in state
                .postings
                .range((term_id, i64::MIN)..=(term_id, i64::MAX))
            {
                *counts.entry(doc_id).or_insert(0) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|&(_, n)| n == distinct.len())
            .map(|(doc_id, _)| doc_id)
            .collect())
    }

    async fn docs_matching_any(&self, term_ids: &[i64]) -> Result<Vec<i64>> {
        let state = self.state.read();
        let mut docs: BTreeMap<i64, ()> = BTreeMap::new();
        for &term_id in term_ids {
            for (&(_, doc_id), _) in state
                .postings
                .range((term_id, i64::MIN)..=(term_id, i64::MAX))
            {
                docs.insert(doc_id, ());
            }
        }
        Ok(docs.into_keys().collect())
    }

    async fn postings_for_terms(&self, term_ids: &[i64]) -> Result<HashMap<i64, Vec<Posting>>> {
        let state = self.state.read();
        let mut result: HashMap<i64, Vec<Posting>> = HashMap::new();
        for &term_id in term_ids {
            for (&(_, doc_id), positions) in state
                .postings
                .range((term_id, i64::MIN)..=(term_id, i64::MAX))
            {
                result.entry(term_id).or_default().push(Posting {
                    doc_id,
                    positions: positions.clone(),
                });
            }
        }
        Ok(result)
    }

    async fn doc_frequencies(&self, term_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        let state = self.state.read();
        let mut result = HashMap::new();
        for &term_id in term_ids {
            let df = state
                .postings
                .range((term_id, i64::MIN)..=(term_id, i64::MAX))
                .count() as i64;
            if df > 0 {
                result.insert(term_id, df);
            }
        }
        Ok(result)
    }

    async fn doc_lengths(&self, doc_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        let state = self.state.read();
        Ok(doc_ids
            .iter()
            .filter_map(|id| state.docs.get(id).map(|row| (*id, row.token_count)))
            .collect())
    }

    async fn term_frequencies(
        &self,
        doc_ids: &[i64],
        term_ids: &[i64],
    ) -> Result<HashMap<(i64, i64), i64>> {
        let state = self.state.read();
        let docs: HashSet<i64> = doc_ids.iter().copied().collect();
        let mut result = HashMap::new();
        for &term_id in term_ids {
            for (&(_, doc_id), positions) in state
                .postings
                .range((term_id, i64::MIN)..=(term_id, i64::MAX))
            {
                if docs.contains(&doc_id) {
                    result.insert((doc_id, term_id), positions.len() as i64);
                }
            }
        }
        Ok(result)
    }

    async fn documents_by_id(&self, doc_ids: &[i64]) -> Result<HashMap<i64, DocumentDetail>> {
        let state = self.state.read();
        Ok(doc_ids
            .iter()
            .filter_map(|id| {
                state.docs.get(id).map(|row| {
                    (
                        *id,
                        DocumentDetail {
                            id: row.id,
                            url: row.url.clone(),
                            title: row.title.clone(),
                            description: row.description.clone(),
                            token_count: row.token_count,
                        },
                    )
                })
            })
            .collect())
    }

    async fn docs_with_url_containing(&self, needle: &str) -> Result<HashSet<i64>> {
        let state = self.state.read();
        Ok(state
            .docs
            .values()
            .filter(|row| row.url.contains(needle))
            .map(|row| row.id)
            .collect())
    }

    async fn top_terms(&self, n: usize) -> Result<Vec<i64>> {
        let state = self.state.read();
        let mut totals: HashMap<i64, i64> = HashMap::new();
        for (&(term_id, _), positions) in state.postings.iter() {
            *totals.entry(term_id).or_insert(0) += positions.len() as i64;
        }
        let mut ranked: Vec<(i64, i64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(n).map(|(id, _)| id).collect())
    }

    async fn total_documents(&self) -> Result<i64> {
        Ok(self.state.read().docs.len() as i64)
    }

    async fn avg_token_count(&self) -> Result<f64> {
        let state = self.state.read();
        if state.docs.is_empty() {
            return Ok(0.0);
        }
        let total: i64 = state.docs.values().map(|row| row.token_count).sum();
        Ok(total as f64 / state.docs.len() as f64)
    }
}
