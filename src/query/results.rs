use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::models::{DocumentDetail, ScoredDoc, SearchResult};
use crate::query::parser::QueryPlan;
use crate::query::QueryEngine;
use crate::text;

/// Default snippet window width, in bytes of cleaned text
pub const SNIPPET_MAX_LENGTH: usize = 150;

const TITLE_MAX_CHARS: usize = 200;
const DESCRIPTION_MAX_CHARS: usize = 500;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

impl QueryEngine {
    /// Turn the full scored candidate list into the final page of results.
    ///
    /// Validation and URL dedup run over the whole list before pagination,
    /// so `total` is consistent across pages and no URL appears twice.
    /// Snippets and highlighting are only computed for the returned page.
    pub(crate) async fn assemble(
        &self,
        scored: Vec<ScoredDoc>,
        plan: &QueryPlan,
    ) -> Result<(Vec<SearchResult>, usize)> {
        let doc_ids: Vec<i64> = scored.iter().map(|s| s.doc_id).collect();
        let details = self.document_details(&doc_ids).await?;

        let mut results: Vec<SearchResult> = scored
            .iter()
            .filter_map(|sd| {
                // a row missing during assembly is skipped, not an error
                let doc = details.get(&sd.doc_id)?;
                Some(SearchResult {
                    doc_id: sd.doc_id,
                    url: doc.url.clone(),
                    title: doc.title.clone(),
                    description: doc.description.clone(),
                    score: sd.score,
                    snippet: String::new(),
                })
            })
            .collect();

        for result in &mut results {
            result.score = boosted_score(result, &plan.terms);
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });

        let results = deduplicate_results(validate_results(results));
        let total = results.len();

        let start = (plan.page - 1) * plan.page_size;
        let mut page: Vec<SearchResult> = results
            .into_iter()
            .skip(start)
            .take(plan.page_size)
            .collect();

        for result in &mut page {
            result.snippet =
                generate_snippet(&result.description, &plan.terms, SNIPPET_MAX_LENGTH);
            result.title = highlight_terms(&result.title, &plan.terms);
        }

        Ok((page, total))
    }

    /// Document rows for the given ids, through the document LRU
    pub(crate) async fn document_details(
        &self,
        doc_ids: &[i64],
    ) -> Result<HashMap<i64, DocumentDetail>> {
        let mut details = HashMap::with_capacity(doc_ids.len());
        let mut missing = Vec::new();
        for &doc_id in doc_ids {
            match self.doc_cache.get(&doc_id) {
                Some(detail) => {
                    details.insert(doc_id, detail);
                }
                None => missing.push(doc_id),
            }
        }
        if !missing.is_empty() {
            for (doc_id, detail) in self.store.documents_by_id(&missing).await? {
                self.doc_cache.put(doc_id, detail.clone());
                details.insert(doc_id, detail);
            }
        }
        Ok(details)
    }
}

/// Light assembly-time boosts on top of the kernel score: query terms in
/// the title, compact URLs, and query-term density in the description.
pub fn boosted_score(result: &SearchResult, terms: &[String]) -> f64 {
    let mut score = result.score;

    let title_lower = result.title.to_lowercase();
    for term in terms {
        if title_lower.contains(&term.to_lowercase()) {
            score += 0.2 * term.len() as f64;
        }
    }

    if result.url.len() < 50 {
        score += 0.1;
    } else if result.url.len() > 200 {
        score -= 0.1;
    }

    let desc_lower = result.description.to_lowercase();
    for term in terms {
        score += desc_lower.matches(&term.to_lowercase()).count() as f64 * 0.05;
    }

    score
}

/// Wrap case-insensitive whole-word matches of the query terms in
/// `<mark>` tags, longest terms first so longer matches win, without
/// double-wrapping.
pub fn highlight_terms(text: &str, terms: &[String]) -> String {
    if terms.is_empty() {
        return text.to_string();
    }

    let mut sorted: Vec<&String> = terms.iter().collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut result = text.to_string();
    for term in sorted {
        if term.len() < 2 {
            continue;
        }
        let Ok(pattern) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))) else {
            continue;
        };
        result = pattern
            .replace_all(&result, |caps: &regex::Captures| {
                let matched = &caps[0];
                if matched.contains("<mark>") {
                    matched.to_string()
                } else {
                    format!("<mark>{}</mark>", matched)
                }
            })
            .into_owned();
    }
    result
}

/// Build a highlighted snippet around the densest query-term window of the
/// description.
pub fn generate_snippet(description: &str, terms: &[String], max_length: usize) -> String {
    if description.is_empty() {
        return String::new();
    }

    let clean = html_escape::decode_html_entities(description).into_owned();
    let clean = clean.replace(['\n', '\t'], " ");
    let clean = WHITESPACE.replace_all(&clean, " ");
    let clean = clean.trim();

    if clean.len() <= max_length {
        return highlight_terms(clean, terms);
    }

    let best = best_snippet_position(clean, terms, max_length);
    let mut start = floor_char_boundary(clean, best);
    let mut end = floor_char_boundary(clean, (best + max_length).min(clean.len()));

    // expand to the nearest word boundaries, looking at most 20 bytes out
    if start > 0 {
        let probe = floor_char_boundary(clean, start.saturating_sub(20));
        if let Some(word_start) = clean[probe..start].rfind(' ') {
            start = probe + word_start + 1;
        }
    }
    if end < clean.len() {
        let probe = floor_char_boundary(clean, (end + 20).min(clean.len()));
        if let Some(word_end) = clean[end..probe].find(' ') {
            end += word_end;
        }
    }

    let mut snippet = clean[start..end].to_string();
    if start > 0 {
        snippet = format!("...{}", snippet);
    }
    if end < clean.len() {
        snippet.push_str("...");
    }

    highlight_terms(&snippet, terms)
}

/// Slide a window across the text in quarter-window steps and pick the
/// offset maximizing the sum of query-term occurrences weighted by term
/// length, ignoring terms of length <= 2.
fn best_snippet_position(text: &str, terms: &[String], window: usize) -> usize {
    if text.len() <= window {
        return 0;
    }

    let text_lower = text.to_lowercase();
    let step = (window / 4).max(1);
    let mut best_pos = 0;
    let mut best_score = 0;

    let mut i = 0;
    while i + window <= text.len() {
        let start = floor_char_boundary(&text_lower, i.min(text_lower.len()));
        let end = floor_char_boundary(&text_lower, (i + window).min(text_lower.len()));
        let slice = &text_lower[start..end];

        let mut score = 0;
        for term in terms {
            if term.len() > 2 {
                let term_lower = term.to_lowercase();
                score += slice.matches(&term_lower).count() * term_lower.len();
            }
        }
        if score > best_score {
            best_score = score;
            best_pos = i;
        }
        i += step;
    }

    best_pos
}

/// Drop malformed rows and bound field sizes
pub fn validate_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| !r.url.is_empty() && !r.title.is_empty())
        .map(|mut r| {
            r.title = truncate_chars(&text::remove_invalid_utf8(&r.title), TITLE_MAX_CHARS);
            r.description = truncate_chars(
                &text::remove_invalid_utf8(&r.description),
                DESCRIPTION_MAX_CHARS,
            );
            r
        })
        .collect()
}

/// Collapse results whose URLs are equal after lowercasing and stripping a
/// trailing slash; the first (highest-ranked) occurrence wins.
pub fn deduplicate_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<String> = HashSet::new();
    results
        .into_iter()
        .filter(|r| {
            let key = r.url.to_lowercase().trim_end_matches('/').to_string();
            seen.insert(key)
        })
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
