//! Page fetching: the one external collaborator spec.md explicitly keeps
//! out of scope ("the headless browser and its installation check"). What's
//! implemented here is the HTTP contract a strategy needs — fetch bytes,
//! convert to plain text/markdown — not a browser. Anything claiming to be
//! a real rendering engine (JS execution, stealth fingerprinting) would live
//! behind the same trait without the strategies above it changing.
//!
//! Grounded on `fourthplaces-rootsignal`'s `PageScraper` trait and
//! `ChromeScraper::html_to_text` (`html2text::from_read`), with the Chrome
//! subprocess swapped for a plain `reqwest` GET since shelling out to a
//! browser binary is the out-of-scope part.

use async_trait::async_trait;
use std::time::Duration;

/// Options that shape how a page is fetched. `wait_for_selector` and
/// `extra_wait_ms` are accepted (stealth mode, §4.10) but are no-ops here —
/// there is no DOM to wait on without a real browser; a future
/// browser-backed `PageFetcher` would honor them.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub stealth: bool,
    pub wait_for_selector: Option<String>,
    pub extra_wait_ms: Option<u64>,
}

/// Fetches a URL and returns its content as plain text/markdown.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> anyhow::Result<String>;
    async fn fetch_raw(&self, url: &str) -> anyhow::Result<String>;
}

/// Default fetcher: plain HTTP GET, HTML converted to readable text via
/// `html2text`. Non-HTML bodies (sitemaps, `.txt` files) are returned
/// verbatim by the caller via [`PageFetcher::fetch_raw`].
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("crawlrag/0.1 (+https://github.com/parallax-labs/crawl-rag)")
            .build()?;
        Ok(Self { client, timeout })
    }

    fn stealth_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
        // "Undetected" browser profile, approximated: a common desktop
        // browser UA instead of our own. There is no real fingerprint
        // evasion without an actual browser engine.
        Ok(reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            )
            .build()?)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> anyhow::Result<String> {
        let html = if options.stealth {
            let client = Self::stealth_client(self.timeout)?;
            let resp = client.get(url).send().await?;
            if let Some(wait) = options.extra_wait_ms {
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
            resp.text().await?
        } else {
            self.client.get(url).send().await?.text().await?
        };

        if looks_like_html(&html) {
            Ok(html2text::from_read(html.as_bytes(), 120).unwrap_or_default())
        } else {
            Ok(html)
        }
    }

    async fn fetch_raw(&self, url: &str) -> anyhow::Result<String> {
        Ok(self.client.get(url).send().await?.text().await?)
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_html_bodies() {
        assert!(looks_like_html("<!DOCTYPE html><html><body>hi</body></html>"));
        assert!(looks_like_html("  <html><head></head></html>"));
    }

    #[test]
    fn plain_text_is_not_html() {
        assert!(!looks_like_html("Just a plain text file.\n\nNo markup here."));
    }
}
