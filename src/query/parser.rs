use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::text;

/// Boolean semantics of a parsed query
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    Phrase,
}

/// A parsed search request: filters pulled out, operator decided, remaining
/// text run through the shared normalization pipeline.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    pub raw_query: String,
    pub terms: Vec<String>,
    pub term_ids: Vec<i64>,
    pub operator: Operator,
    pub page: usize,
    pub page_size: usize,
    pub filters: HashMap<String, String>,
}

/// `key:value` or `key:"quoted value"` filter tokens
static FILTER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\w+):("([^"]+)"|(\S+))"#).unwrap());

pub fn parse(raw_query: &str, page: usize, page_size: usize) -> QueryPlan {
    let mut remaining = raw_query.to_string();
    let mut filters = HashMap::new();

    for caps in FILTER_PATTERN.captures_iter(raw_query) {
        let key = caps[1].to_lowercase();
        let value = caps
            .get(3)
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        filters.insert(key, value);
        remaining = remaining.replacen(&caps[0], "", 1);
    }

    let operator = if remaining.contains('"') {
        Operator::Phrase
    } else if remaining.split_whitespace().any(|t| t == "OR") {
        Operator::Or
    } else {
        Operator::And
    };

    let terms = text::analyze(&remaining);

    QueryPlan {
        raw_query: raw_query.to_string(),
        terms,
        term_ids: Vec::new(),
        operator,
        page: page.max(1),
        page_size,
        filters,
    }
}
