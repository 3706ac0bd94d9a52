use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::models::Posting;
use crate::query::parser::{Operator, QueryPlan};
use crate::query::QueryEngine;

impl QueryEngine {
    /// AND/OR candidate selection, with the optional site filter applied
    pub(crate) async fn boolean_search(&self, plan: &QueryPlan) -> Result<Vec<i64>> {
        if plan.term_ids.is_empty() {
            return Ok(Vec::new());
        }

        let site_filter = self.site_filter(plan).await?;
        if let Some(allowed) = &site_filter {
            if allowed.is_empty() {
                return Ok(Vec::new());
            }
        }

        let doc_ids = match plan.operator {
            Operator::Or => self.store.docs_matching_any(&plan.term_ids).await?,
            _ => self.store.docs_matching_all(&plan.term_ids).await?,
        };

        Ok(match site_filter {
            Some(allowed) => doc_ids
                .into_iter()
                .filter(|id| allowed.contains(id))
                .collect(),
            None => doc_ids,
        })
    }

    /// Phrase candidate selection: intersect the doc sets of all query
    /// terms, then keep docs where the terms occur at consecutive
    /// positions. Degrades to boolean search below two resolved terms.
    pub(crate) async fn phrase_search(&self, plan: &QueryPlan) -> Result<Vec<i64>> {
        if plan.term_ids.len() < 2 {
            return self.boolean_search(plan).await;
        }

        let postings = self.postings_batch(&plan.term_ids).await?;
        for term_id in &plan.term_ids {
            if postings.get(term_id).map_or(true, |p| p.is_empty()) {
                return Ok(Vec::new());
            }
        }

        let site_filter = self.site_filter(plan).await?;
        if let Some(allowed) = &site_filter {
            if allowed.is_empty() {
                return Ok(Vec::new());
            }
        }

        let common = common_documents(&postings, &plan.term_ids);
        let mut matches: Vec<i64> = common
            .into_iter()
            .filter(|&doc_id| {
                site_filter
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(&doc_id))
            })
            .filter(|&doc_id| phrase_match(doc_id, &plan.term_ids, &postings))
            .collect();
        matches.sort_unstable();
        Ok(matches)
    }

    async fn site_filter(&self, plan: &QueryPlan) -> Result<Option<HashSet<i64>>> {
        match plan.filters.get("site") {
            Some(site) => Ok(Some(self.store.docs_with_url_containing(site).await?)),
            None => Ok(None),
        }
    }

    /// Postings for a set of terms, via the posting LRU
    pub(crate) async fn postings_batch(
        &self,
        term_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Posting>>> {
        let mut result = HashMap::with_capacity(term_ids.len());
        let mut missing = Vec::new();
        for &term_id in term_ids {
            match self.posting_cache.get(&term_id) {
                Some(postings) => {
                    result.insert(term_id, postings);
                }
                None => missing.push(term_id),
            }
        }
        if !missing.is_empty() {
            for (term_id, postings) in self.store.postings_for_terms(&missing).await? {
                self.posting_cache.put(term_id, postings.clone());
                result.insert(term_id, postings);
            }
        }
        Ok(result)
    }
}

/// Docs present in every term's posting list
fn common_documents(postings: &HashMap<i64, Vec<Posting>>, term_ids: &[i64]) -> HashSet<i64> {
    let Some(first) = term_ids.first() else {
        return HashSet::new();
    };
    let mut common: HashSet<i64> = postings
        .get(first)
        .map(|p| p.iter().map(|posting| posting.doc_id).collect())
        .unwrap_or_default();

    for term_id in &term_ids[1..] {
        let docs: HashSet<i64> = postings
            .get(term_id)
            .map(|p| p.iter().map(|posting| posting.doc_id).collect())
            .unwrap_or_default();
        common.retain(|doc| docs.contains(doc));
        if common.is_empty() {
            break;
        }
    }
    common
}

/// Whether the terms occur as a consecutive phrase in the document: some
/// start position `p0` of the first term such that term `i` has `p0 + i`.
fn phrase_match(doc_id: i64, term_ids: &[i64], postings: &HashMap<i64, Vec<Posting>>) -> bool {
    let mut term_positions: Vec<&[i32]> = Vec::with_capacity(term_ids.len());
    for term_id in term_ids {
        let positions = postings
            .get(term_id)
            .and_then(|p| p.iter().find(|posting| posting.doc_id == doc_id))
            .map(|posting| posting.positions.as_slice());
        match positions {
            Some(p) if !p.is_empty() => term_positions.push(p),
            _ => return false,
        }
    }

    term_positions[0].iter().any(|&start| {
        term_positions[1..]
            .iter()
            .enumerate()
            .all(|(i, positions)| positions.binary_search(&(start + i as i32 + 1)).is_ok())
    })
}
