//! Crawl strategies (C9): four pure-ish functions of `(fetcher, url,
//! options) -> CrawlResult`, dispatched by URL classification.
//!
//! None of these write anything — they return markdown documents for the
//! orchestrator to chunk/embed/store, breaking the orchestrator/strategy
//! cycle the original implementation had (§9 design note: "strategy
//! returns documents; orchestrator writes").

use std::collections::{HashSet, VecDeque};

use regex::Regex;
use serde_json::json;

use crate::crawl::fetch::{FetchOptions, PageFetcher};
use crate::validate::{self, UrlKind};

/// One markdown document produced by a strategy, ready for C2/C3.
#[derive(Debug, Clone)]
pub struct CrawledDocument {
    pub url: String,
    pub markdown: String,
}

/// Outcome of running a strategy (or the orchestrator wrapping one).
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub success: bool,
    pub url: String,
    pub pages_crawled: usize,
    pub documents: Vec<CrawledDocument>,
    pub metadata: serde_json::Value,
}

impl CrawlResult {
    fn empty_failure(url: &str, reason: &str) -> Self {
        Self {
            success: false,
            url: url.to_string(),
            pages_crawled: 0,
            documents: Vec::new(),
            metadata: json!({ "error": reason }),
        }
    }
}

/// Knobs shared by all four strategies.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: u32,
    pub max_concurrent: usize,
    pub fetch: FetchOptions,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_concurrent: 10,
            fetch: FetchOptions::default(),
        }
    }
}

/// Dispatch on [`validate::classify`] and run the matching strategy.
pub async fn dispatch(fetcher: &dyn PageFetcher, url: &str, options: &CrawlOptions) -> CrawlResult {
    match validate::classify(url) {
        UrlKind::TextFile => text_file(fetcher, url).await,
        UrlKind::Sitemap => sitemap(fetcher, url, options).await,
        UrlKind::Webpage => recursive(fetcher, url, options).await,
    }
}

/// One fetch, one document.
pub async fn single(fetcher: &dyn PageFetcher, url: &str, options: &CrawlOptions) -> CrawlResult {
    match fetcher.fetch(url, &options.fetch).await {
        Ok(markdown) if !markdown.trim().is_empty() => CrawlResult {
            success: true,
            url: url.to_string(),
            pages_crawled: 1,
            documents: vec![CrawledDocument {
                url: url.to_string(),
                markdown,
            }],
            metadata: json!({ "strategy": "single" }),
        },
        Ok(_) => CrawlResult::empty_failure(url, "empty page body"),
        Err(e) => CrawlResult::empty_failure(url, &e.to_string()),
    }
}

/// One fetch, expected large plain text/markdown, no link-following. Two
/// slightly different error-handling paths existed in the source for this
/// strategy (§9); this spec takes the broader one: never raise, return an
/// empty-but-successful-shaped failure on any error.
pub async fn text_file(fetcher: &dyn PageFetcher, url: &str) -> CrawlResult {
    match fetcher.fetch_raw(url).await {
        Ok(text) if !text.trim().is_empty() => CrawlResult {
            success: true,
            url: url.to_string(),
            pages_crawled: 1,
            documents: vec![CrawledDocument {
                url: url.to_string(),
                markdown: text,
            }],
            metadata: json!({ "strategy": "text_file" }),
        },
        Ok(_) => CrawlResult::empty_failure(url, "empty text file"),
        Err(e) => {
            tracing::warn!(url, error = %e, "text file fetch failed");
            CrawlResult::empty_failure(url, &e.to_string())
        }
    }
}

/// HTTP GET the sitemap, extract `<loc>` URLs namespace-agnostically, then
/// batch-crawl each one. A single bad URL is isolated — it does not fail
/// the batch (spec.md scenario 2).
pub async fn sitemap(fetcher: &dyn PageFetcher, url: &str, options: &CrawlOptions) -> CrawlResult {
    let body = match fetcher.fetch_raw(url).await {
        Ok(b) => b,
        Err(e) => return CrawlResult::empty_failure(url, &e.to_string()),
    };

    let urls = extract_loc_urls(&body);
    if urls.is_empty() {
        return CrawlResult::empty_failure(url, "sitemap contained no <loc> entries");
    }

    let documents = batch_crawl(fetcher, &urls, options).await;
    let pages_crawled = documents.len();

    CrawlResult {
        success: pages_crawled > 0,
        url: url.to_string(),
        pages_crawled,
        documents,
        metadata: json!({ "strategy": "sitemap", "sitemap_entries": urls.len() }),
    }
}

/// BFS over the seed URL up to `max_depth`, following only same-host links
/// (defragmented and deduped). Each depth's frontier is crawled as a batch.
pub async fn recursive(fetcher: &dyn PageFetcher, seed: &str, options: &CrawlOptions) -> CrawlResult {
    let seed_host = match url::Url::parse(seed).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(h) => h,
        None => return CrawlResult::empty_failure(seed, "seed URL has no host"),
    };

    let mut visited: HashSet<String> = HashSet::new();
    let mut documents = Vec::new();
    let mut frontier: VecDeque<String> = VecDeque::new();
    frontier.push_back(defragment(seed));
    visited.insert(defragment(seed));

    for _depth in 0..options.max_depth.max(1) {
        if frontier.is_empty() {
            break;
        }
        let batch: Vec<String> = frontier.drain(..).collect();
        let raw_pages = batch_crawl_raw(fetcher, &batch, options).await;

        let mut next_frontier = Vec::new();
        for (page_url, raw_html) in &raw_pages {
            let markdown = if looks_like_html(raw_html) {
                html2text::from_read(raw_html.as_bytes(), 120).unwrap_or_default()
            } else {
                raw_html.clone()
            };
            if !markdown.trim().is_empty() {
                documents.push(CrawledDocument {
                    url: page_url.clone(),
                    markdown,
                });
            }

            for link in extract_links(raw_html, page_url) {
                let link = defragment(&link);
                if visited.contains(&link) {
                    continue;
                }
                let same_host = url::Url::parse(&link)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    == Some(seed_host.clone());
                if same_host {
                    visited.insert(link.clone());
                    next_frontier.push(link);
                }
            }
        }
        frontier.extend(next_frontier);
    }

    let pages_crawled = documents.len();
    CrawlResult {
        success: pages_crawled > 0,
        url: seed.to_string(),
        pages_crawled,
        documents,
        metadata: json!({ "strategy": "recursive", "urls_visited": visited.len() }),
    }
}

/// Fetch each URL independently (bounded by `max_concurrent`), returning
/// only the ones that succeeded with non-empty content, already converted
/// to markdown.
async fn batch_crawl(fetcher: &dyn PageFetcher, urls: &[String], options: &CrawlOptions) -> Vec<CrawledDocument> {
    let raw = batch_crawl_raw(fetcher, urls, options).await;
    raw.into_iter()
        .filter_map(|(url, body)| {
            let markdown = if looks_like_html(&body) {
                html2text::from_read(body.as_bytes(), 120).unwrap_or_default()
            } else {
                body
            };
            if markdown.trim().is_empty() {
                None
            } else {
                Some(CrawledDocument { url, markdown })
            }
        })
        .collect()
}

/// Fetch each URL independently (bounded by `max_concurrent`), returning
/// raw bodies so callers needing link extraction (recursive strategy) can
/// inspect the untouched HTML.
async fn batch_crawl_raw(
    fetcher: &dyn PageFetcher,
    urls: &[String],
    options: &CrawlOptions,
) -> Vec<(String, String)> {
    use futures::stream::{self, StreamExt};

    let concurrency = options.max_concurrent.max(1);
    stream::iter(urls.iter().cloned())
        .map(|url| async move {
            match fetcher.fetch_raw(&url).await {
                Ok(body) => Some((url, body)),
                Err(e) => {
                    tracing::warn!(url, error = %e, "page fetch failed, skipping");
                    None
                }
            }
        })
        .buffer_unordered(concurrency)
        .filter_map(|r| async move { r })
        .collect()
        .await
}

fn looks_like_html(body: &str) -> bool {
    let trimmed = body.trim_start();
    let byte_cap = trimmed
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&i| i <= 512)
        .last()
        .unwrap_or(0);
    let lower = trimmed[..byte_cap].to_lowercase();
    lower.contains("<html") || lower.contains("<!doctype html") || lower.contains("<body")
}

/// Namespace-agnostic `<loc>...</loc>` extraction: matches `<loc>` whether
/// or not it carries a namespace prefix (`<ns:loc>`), since sitemap XML in
/// the wild is inconsistent about declaring one.
fn extract_loc_urls(xml: &str) -> Vec<String> {
    static PATTERN: &str = r"(?is)<(?:\w+:)?loc>\s*([^<\s][^<]*?)\s*</(?:\w+:)?loc>";
    let re = Regex::new(PATTERN).expect("static sitemap loc regex is valid");
    re.captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|u| !u.is_empty())
        .collect()
}

/// Extract `href` targets from anchor tags, resolved against `base`.
fn extract_links(html: &str, base: &str) -> Vec<String> {
    static PATTERN: &str = r#"(?is)<a\s+[^>]*href\s*=\s*["']([^"']+)["']"#;
    let re = Regex::new(PATTERN).expect("static anchor href regex is valid");
    let base_url = match url::Url::parse(base) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };

    re.captures_iter(html)
        .filter_map(|c| c.get(1))
        .filter_map(|m| base_url.join(m.as_str()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|u| u.to_string())
        .collect()
}

fn defragment(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_loc_urls_ignoring_namespace_prefix() {
        let xml = r#"<?xml version="1.0"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url><loc>https://example.com/a</loc></url>
            <url><ns:loc>https://example.com/b</ns:loc></url>
        </urlset>"#;
        let urls = extract_loc_urls(xml);
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn extracts_loc_urls_returns_empty_for_non_sitemap() {
        assert!(extract_loc_urls("<html><body>no locs here</body></html>").is_empty());
    }

    #[test]
    fn extract_links_resolves_relative_hrefs_against_base() {
        let html = r#"<a href="/docs/page">link</a><a href="https://other.example/x">ext</a>"#;
        let links = extract_links(html, "https://example.com/index.html");
        assert_eq!(
            links,
            vec![
                "https://example.com/docs/page".to_string(),
                "https://other.example/x".to_string(),
            ]
        );
    }

    #[test]
    fn defragment_strips_fragment() {
        assert_eq!(defragment("https://example.com/a#section"), "https://example.com/a");
        assert_eq!(defragment("https://example.com/a"), "https://example.com/a");
    }

    #[test]
    fn loc_regex_and_href_regex_compile() {
        // Regression guard: regex::Regex::new panics at call time, not
        // compile time, if the pattern is malformed.
        let _ = extract_loc_urls("");
        let _ = extract_links("", "https://example.com");
    }
}
