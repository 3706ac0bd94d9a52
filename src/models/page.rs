use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw crawled page, as produced by a fetcher worker and consumed by the
/// indexer. Stored append-only in the document store under an opaque,
/// lexicographically ordered id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawPage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub body_text: String,
    pub paragraphs: Vec<String>,
    pub internal_links: Vec<String>,
    pub external_links: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_string: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub token_count: usize,
}

impl RawPage {
    /// The text the indexer tokenizes for this page
    pub fn indexable_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.title,
            self.description,
            self.body_text,
            self.paragraphs.join(" ")
        )
    }
}
