use serde::{Deserialize, Serialize};

/// One positional posting: all positions of a term within one document,
/// strictly increasing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: i64,
    pub positions: Vec<i32>,
}

/// A document upsert as produced by the indexer batch writer
#[derive(Clone, Debug)]
pub struct DocumentUpsert {
    pub url: String,
    pub title: String,
    pub description: String,
    pub token_count: i64,
}

/// A posting upsert, keyed (term_id, doc_id); replaces any prior positions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostingUpsert {
    pub term_id: i64,
    pub doc_id: i64,
    pub positions: Vec<i32>,
}

/// Document row as read back for result assembly
#[derive(Clone, Debug, Default)]
pub struct DocumentDetail {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub token_count: i64,
}

/// A candidate document with its relevance score
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: i64,
    pub score: f64,
}

/// Search result as returned by the query engine and the HTTP API
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub score: f64,
    pub snippet: String,
}
