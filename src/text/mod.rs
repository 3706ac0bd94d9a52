//! Text normalization pipeline shared verbatim by the indexer and the query
//! engine. Any divergence between the two sides breaks recall, so this is
//! the only place tokenization logic lives.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use once_cell::sync::Lazy;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

/// Noise patterns removed before tokenization, each replaced with a space.
/// Applied to lowercased text, in order.
static NOISE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"<[^>]*>",                              // html tags
        r"[a-z\-]+:\s*[^;]+;",                   // css declarations
        r#""[^"]+"\s*:\s*"?[^",}{\[\]]*"?"#,     // json key/value fragments
        r"[a-f0-9]{32,}\.(jpg|jpeg|png|svg|webp)", // hashed asset filenames
        r#"https?://[^\s"]+"#,                   // absolute urls
        r"[\d\-_\.]{6,}",                        // long digit/punct runs
        r"[a-z_]+\([^\)]*\)",                    // function-call patterns
        r"\[\d+[a-z]*\]",                        // bracketed citations
        r"\[(.*?)\]\((.*?)\)",                   // markdown links
    ]
    .iter()
    .map(|p| Regex::new(p).expect("noise pattern must compile"))
    .collect()
});

static NON_ALPHA: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static STEMMER: Lazy<Stemmer> = Lazy::new(|| Stemmer::create(Algorithm::English));

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "is", "are", "in", "on", "it", "this", "that",
        "to", "for", "of", "with",
    ]
    .into_iter()
    .collect()
});

/// Strip artifacts of invalid UTF-8 (replacement characters left behind by
/// lossy decoding at ingestion).
pub fn remove_invalid_utf8(text: &str) -> String {
    text.chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Reduce raw text to lowercase alphabetic words separated by single
/// spaces, NFC-normalized.
pub fn normalize(text: &str) -> String {
    let mut text = remove_invalid_utf8(text).to_lowercase();

    for pattern in NOISE_PATTERNS.iter() {
        text = pattern.replace_all(&text, " ").into_owned();
    }

    let text = text.replace(['-', '/'], " ");
    let text = NON_ALPHA.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");

    text.trim().nfc().collect()
}

fn has_vowel(token: &str) -> bool {
    token.chars().any(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'))
}

fn has_repeated_chars(token: &str, n: usize) -> bool {
    if token.len() < n {
        return false;
    }
    let mut count = 1;
    let mut prev = None;
    for c in token.chars() {
        if Some(c) == prev {
            count += 1;
            if count >= n {
                return true;
            }
        } else {
            count = 1;
            prev = Some(c);
        }
    }
    false
}

/// Split normalized text on whitespace and drop noise tokens: length <= 1,
/// stop words, vowel-less tokens, and runs of 3 identical letters.
pub fn tokenize_and_filter(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .filter(|token| {
            token.len() > 1
                && !STOP_WORDS.contains(token)
                && has_vowel(token)
                && !has_repeated_chars(token, 3)
        })
        .collect()
}

/// Stem tokens with the Snowball English stemmer. The stemmer is treated as
/// an untrusted pure function: a panic drops the offending token and the
/// pipeline carries on. Stems of length <= 1 or without a vowel are dropped.
pub fn stem_tokens(tokens: &[&str]) -> Vec<String> {
    let mut stemmed = Vec::with_capacity(tokens.len());
    for token in tokens {
        match catch_unwind(AssertUnwindSafe(|| STEMMER.stem(token).to_string())) {
            Ok(stem) => {
                if stem.len() > 1 && has_vowel(&stem) {
                    stemmed.push(stem);
                }
            }
            Err(_) => {
                warn!(token = %token, "recovered from stemmer panic, dropping token");
            }
        }
    }
    stemmed
}

/// The full pipeline: raw text to the ordered list of emitted tokens.
/// Positions used throughout the index are the 0-based indices into this
/// list.
pub fn analyze(text: &str) -> Vec<String> {
    let clean = normalize(text);
    let tokens = tokenize_and_filter(&clean);
    stem_tokens(&tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_markup_and_noise() {
        let clean = normalize("<p>Hello</p> color: red; \"key\":\"value\" world");
        assert_eq!(clean, "hello world");
    }

    #[test]
    fn test_normalize_strips_urls_and_calls() {
        let clean = normalize("see https://example.com/page and foo(bar) done");
        assert_eq!(clean, "see and done");
    }

    #[test]
    fn test_normalize_strips_citations_and_digit_runs() {
        let clean = normalize("fact[12a] code 123-456_789 rest");
        assert_eq!(clean, "fact code rest");
    }

    #[test]
    fn test_hyphen_and_slash_split_words() {
        assert_eq!(normalize("well-known read/write"), "well known read write");
    }

    #[test]
    fn test_filter_drops_noise_tokens() {
        // "a" (short + stop), "the" (stop), "xyz" (no vowel), "aaab" (3-run)
        let tokens = tokenize_and_filter("a the xyz aaab horse");
        assert_eq!(tokens, vec!["horse"]);
    }

    #[test]
    fn test_analyze_stems() {
        assert_eq!(analyze("dogs dogs cat"), vec!["dog", "dog", "cat"]);
        assert_eq!(analyze("cat bird"), vec!["cat", "bird"]);
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let text = "The Quick\u{00A0}brown Fox — jumps over the lazy dog!";
        assert_eq!(analyze(text), analyze(text));
    }

    #[test]
    fn test_analyze_nfc_invariant() {
        // "café" composed vs decomposed
        let composed = "caf\u{e9} menu";
        let decomposed = "cafe\u{301} menu";
        let nfc: String = decomposed.nfc().collect();
        assert_eq!(nfc, composed);
        assert_eq!(analyze(composed), analyze(&nfc));
    }

    #[test]
    fn test_analyze_drops_stop_words_and_keeps_order() {
        let tokens = analyze("the quick brown fox");
        assert_eq!(tokens, vec!["quick", "brown", "fox"]);
    }

    #[test]
    fn test_replacement_characters_removed() {
        let text = "bro\u{FFFD}ken text";
        assert_eq!(analyze(text), vec!["broken", "text"]);
    }

    #[test]
    fn test_short_stems_dropped() {
        // nothing should survive: single letters after normalization
        assert!(analyze("a b c 1 2 3").is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(analyze("").is_empty());
        assert!(analyze("   \t\n ").is_empty());
    }
}
