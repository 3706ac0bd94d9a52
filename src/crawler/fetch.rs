use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::{Result, WebseekError};
use crate::models::RawPage;
use crate::text;

/// Contract of the HTTP fetch client plus HTML walker: turn a URL into a
/// raw page record.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RawPage>;
}

/// Fetcher backed by a shared reqwest client with browser-like headers and
/// optional proxy support.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36",
            ),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10);

        if cfg.proxy_enabled && !cfg.proxy_url.is_empty() {
            let proxy = reqwest::Proxy::all(&cfg.proxy_url)
                .map_err(|e| WebseekError::Config(format!("invalid proxy url: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| WebseekError::Config(format!("cannot build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WebseekError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebseekError::Fetch {
                url: url.to_string(),
                reason: format!("bad response status: {}", status),
            });
        }

        let body = response.text().await.map_err(|e| WebseekError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(extract_page(url, &body))
    }
}

/// Walk an HTML document and build the raw page record: title, meta
/// description and keywords, the concatenated text of block-level elements,
/// normalized paragraphs, and absolutized links partitioned into internal
/// (same host) and external.
pub fn extract_page(url: &str, html: &str) -> RawPage {
    let document = Html::parse_document(html);

    let title_sel = Selector::parse("title").expect("static selector");
    let meta_desc_sel = Selector::parse("meta[name='description']").expect("static selector");
    let meta_keywords_sel = Selector::parse("meta[name='keywords']").expect("static selector");
    let body_sel = Selector::parse("h1, h2, h3, h4, h5, h6, p, span, div").expect("static selector");
    let link_sel = Selector::parse("a[href]").expect("static selector");
    let para_sel = Selector::parse("p").expect("static selector");

    let title = document
        .select(&title_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let description = document
        .select(&meta_desc_sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let keywords = document
        .select(&meta_keywords_sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|raw| {
            raw.split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut body_text = String::new();
    for el in document.select(&body_sel) {
        let text = el.text().collect::<String>();
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            body_text.push_str(&text);
            body_text.push(' ');
        }
    }

    let base = Url::parse(url).ok();
    let mut internal_links = Vec::new();
    let mut external_links = Vec::new();
    if let Some(base) = &base {
        let mut seen = std::collections::HashSet::new();
        for el in document.select(&link_sel) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let Ok(absolute) = base.join(href.trim()) else {
                continue;
            };
            if !absolute.scheme().starts_with("http") {
                continue;
            }
            let absolute = absolute.to_string();
            if !seen.insert(absolute.clone()) {
                continue;
            }
            let same_host = Url::parse(&absolute)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                == base.host_str().map(|h| h.to_string());
            if same_host {
                internal_links.push(absolute);
            } else {
                external_links.push(absolute);
            }
        }
    }

    let paragraphs = document
        .select(&para_sel)
        .filter_map(|el| {
            let raw = el.text().collect::<String>();
            let normalized = text::normalize(raw.trim());
            (!normalized.is_empty()).then_some(normalized)
        })
        .collect();

    RawPage {
        url: url.to_string(),
        title,
        description,
        keywords,
        body_text,
        paragraphs,
        internal_links,
        external_links,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html>
          <head>
            <title> Sample Page </title>
            <meta name="description" content=" A test page. ">
            <meta name="keywords" content="rust, search , ,engines">
          </head>
          <body>
            <h1>Heading</h1>
            <p>First   paragraph about dogs.</p>
            <p>   </p>
            <script>var x = 1;</script>
            <a href="/about">About</a>
            <a href="https://other.test/page">Elsewhere</a>
            <a href="mailto:nobody@example.com">Mail</a>
          </body>
        </html>
    "#;

    #[test]
    fn test_extract_metadata() {
        let page = extract_page("https://example.com/", SAMPLE);
        assert_eq!(page.title, "Sample Page");
        assert_eq!(page.description, "A test page.");
        assert_eq!(page.keywords, vec!["rust", "search", "engines"]);
    }

    #[test]
    fn test_extract_body_text_excludes_script() {
        let page = extract_page("https://example.com/", SAMPLE);
        assert!(page.body_text.contains("Heading"));
        assert!(page.body_text.contains("First paragraph about dogs."));
        assert!(!page.body_text.contains("var x"));
    }

    #[test]
    fn test_links_partitioned_by_host() {
        let page = extract_page("https://example.com/", SAMPLE);
        assert_eq!(page.internal_links, vec!["https://example.com/about"]);
        assert_eq!(page.external_links, vec!["https://other.test/page"]);
    }

    #[test]
    fn test_paragraphs_normalized_and_nonempty() {
        let page = extract_page("https://example.com/", SAMPLE);
        assert_eq!(page.paragraphs, vec!["first paragraph about dogs"]);
    }
}
