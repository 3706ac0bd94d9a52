use url::Url;

use crate::error::{Result, WebseekError};

/// Canonicalize a URL so every producer agrees on a single spelling.
///
/// Steps: trim whitespace, default the scheme to https, lowercase scheme and
/// host, strip a leading `www.`, punycode the host, default an empty path to
/// `/`, drop the fragment, re-serialize. Must stay bit-identical across the
/// seeder, the crawler and link discovery or the dedup filter breaks.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| WebseekError::BadUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    // scheme and host come back lowercased and IDNA-encoded from the parser;
    // the www prefix is our own convention
    if let Some(host) = url.host_str() {
        if let Some(stripped) = host.strip_prefix("www.") {
            let stripped = stripped.to_string();
            url.set_host(Some(&stripped)).map_err(|e| WebseekError::BadUrl {
                url: raw.to_string(),
                reason: e.to_string(),
            })?;
        }
    } else {
        return Err(WebseekError::BadUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    url.set_fragment(None);
    Ok(url.to_string())
}
