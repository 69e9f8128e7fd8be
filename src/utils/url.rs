//! URL normalization and resolution.
//!
//! Queue deduplication works on the normalized form: lowercase scheme and
//! host, fragment stripped, query keys sorted. Discovery resolves relative
//! hrefs against the page URL and filters out non-HTTP schemes.

use anyhow::{Result, anyhow};
use url::{ParseError, Url};

/// Normalize a URL for deduplication.
///
/// Lowercases scheme and host, drops the fragment, and sorts query pairs by
/// key so `?b=2&a=1` and `?a=1&b=2` collapse to the same entry.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut parsed = Url::parse(raw).map_err(|e| anyhow!("invalid URL {raw}: {e}"))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("unsupported scheme: {}", parsed.scheme()));
    }

    parsed.set_fragment(None);

    if let Some(host) = parsed.host_str() {
        let lowered = host.to_ascii_lowercase();
        if lowered != host {
            parsed
                .set_host(Some(&lowered))
                .map_err(|e| anyhow!("invalid host in {raw}: {e}"))?;
        }
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    Ok(parsed.to_string())
}

/// Resolve a raw href against a base URL, with all the common problems
/// accounted for: relative paths, empty strings, section references, and
/// non-HTTP schemes.
pub fn resolve_href(base: &Url, raw: &str) -> Result<Url> {
    if raw.is_empty() || raw.starts_with('#') {
        return Err(anyhow!("bad link: {raw:?}"));
    }

    let url = raw.parse().or_else(|err| {
        if err == ParseError::RelativeUrlWithoutBase {
            base.join(raw)
        } else {
            Err(err)
        }
    });

    let url = url.map_err(|e| anyhow!("bad link {raw:?}: {e}"))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow!("unaccepted scheme: {raw}"));
    }
    if url.host_str().is_none() {
        return Err(anyhow!("no host: {raw}"));
    }

    Ok(url)
}

/// Check if a URL is something the engine will crawl.
#[must_use]
pub fn is_crawlable_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    // Skip data URLs, javascript URLs, and other non-http schemes
    if url.starts_with("data:") || url.starts_with("javascript:") || url.starts_with("mailto:") {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Extract the host portion of a URL string.
pub fn extract_domain(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str).map_err(|e| anyhow!("failed to parse URL {url_str}: {e}"))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("URL has no host: {url_str}"))
}
