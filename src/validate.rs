//! URL classification, storage-safety checks, and tool-parameter range
//! validators.
//!
//! `classify`/`is_safe_for_storage`/`source_id`/`document_id` implement the
//! URL & path validators. The range-check functions below them validate the
//! scalar parameters that arrive at the tool-dispatch boundary (depth,
//! concurrency, chunk size, match count, query, source filter) before a
//! request reaches the crawl orchestrator or retrieval orchestrator.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::PipelineError;

/// How a URL should be crawled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Sitemap,
    TextFile,
    Webpage,
}

/// Classify a URL by its path: sitemap iff the path ends with `sitemap.xml`
/// or contains `sitemap`; text_file iff it ends with `.txt`; else webpage.
pub fn classify(url: &str) -> UrlKind {
    let path_lower = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase(),
        Err(_) => url.to_lowercase(),
    };

    if path_lower.ends_with("sitemap.xml") || path_lower.contains("sitemap") {
        UrlKind::Sitemap
    } else if path_lower.ends_with(".txt") {
        UrlKind::TextFile
    } else {
        UrlKind::Webpage
    }
}

/// Substrings commonly used in SQL/NoSQL injection attempts. Checked only
/// against the authority and path components, not the whole URL string, so
/// a path segment containing one of these tokens is rejected but an
/// unrelated occurrence elsewhere in the URL is not.
const UNSAFE_PATTERNS: &[&str] = &[
    "'", "\"", ";", "--", "/*", "*/", "xp_", "sp_", "union", "select", "drop", "insert",
];

/// Is this URL safe to store (and to fetch on the caller's behalf)?
///
/// Requires: scheme in {http, https, ftp}, a non-empty authority, length
/// at most 2048 bytes, and no injection-pattern token in the authority or
/// path. Unsafe URLs are dropped silently before DB writes — this function
/// never raises, it only reports yes/no.
pub fn is_safe_for_storage(url: &str) -> bool {
    if url.is_empty() || url.len() > 2048 {
        return false;
    }

    let parsed = match Url::parse(url) {
        Ok(p) => p,
        Err(_) => return false,
    };

    match parsed.scheme() {
        "http" | "https" | "ftp" => {}
        _ => return false,
    }

    if parsed.host_str().is_none() {
        return false;
    }

    let authority_lower = parsed.authority().to_lowercase();
    let path_lower = parsed.path().to_lowercase();

    for pattern in UNSAFE_PATTERNS {
        if authority_lower.contains(pattern) || path_lower.contains(pattern) {
            return false;
        }
    }

    true
}

/// The source key for a URL: its authority if present, else its path.
pub fn source_id(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let authority = parsed.authority();
            if !authority.is_empty() {
                authority.to_string()
            } else {
                parsed.path().to_string()
            }
        }
        Err(_) => url.to_string(),
    }
}

/// A deterministic 128-bit hex digest of the URL, stable across processes
/// and runs. The first 32 hex characters of the SHA-256 digest.
pub fn document_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

// ============ Tool-parameter range validators ============

pub fn validate_depth(depth: u32) -> Result<u32, PipelineError> {
    if !(1..=10).contains(&depth) {
        return Err(PipelineError::Validation(format!(
            "max_depth must be in 1..=10, got {depth}"
        )));
    }
    Ok(depth)
}

pub fn validate_concurrent_limit(limit: u32) -> Result<u32, PipelineError> {
    if !(1..=50).contains(&limit) {
        return Err(PipelineError::Validation(format!(
            "max_concurrent must be in 1..=50, got {limit}"
        )));
    }
    Ok(limit)
}

pub fn validate_match_count(count: u32) -> Result<u32, PipelineError> {
    if !(1..=100).contains(&count) {
        return Err(PipelineError::Validation(format!(
            "match_count must be in 1..=100, got {count}"
        )));
    }
    Ok(count)
}

pub fn validate_chunk_size(size: usize) -> Result<usize, PipelineError> {
    if !(100..=50_000).contains(&size) {
        return Err(PipelineError::Validation(format!(
            "chunk_size must be in 100..=50000, got {size}"
        )));
    }
    Ok(size)
}

pub fn validate_query(query: &str, min_length: usize) -> Result<&str, PipelineError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Validation("query must not be empty".into()));
    }
    if trimmed.len() < min_length {
        return Err(PipelineError::Validation(format!(
            "query must be at least {min_length} characters"
        )));
    }
    Ok(trimmed)
}

/// Empty/whitespace-only source filters collapse to `None`.
pub fn validate_source_filter(source: Option<&str>) -> Option<String> {
    source
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_sitemap() {
        assert_eq!(classify("https://example.com/sitemap.xml"), UrlKind::Sitemap);
        assert_eq!(
            classify("https://example.com/sitemap_index.xml"),
            UrlKind::Sitemap
        );
    }

    #[test]
    fn classify_text_file() {
        assert_eq!(classify("https://example.com/llms.txt"), UrlKind::TextFile);
    }

    #[test]
    fn classify_webpage_default() {
        assert_eq!(classify("https://example.com/docs/guide"), UrlKind::Webpage);
    }

    #[test]
    fn safe_url_accepted() {
        assert!(is_safe_for_storage("https://example.com/docs/guide?x=1"));
    }

    #[test]
    fn unsafe_scheme_rejected() {
        assert!(!is_safe_for_storage("javascript:alert(1)"));
    }

    #[test]
    fn unsafe_path_sql_token_rejected() {
        assert!(!is_safe_for_storage("https://example.com/union/select/drop"));
    }

    #[test]
    fn unsafe_authority_token_rejected() {
        assert!(!is_safe_for_storage("https://ex--ample.com/"));
    }

    #[test]
    fn oversized_url_rejected() {
        let long = format!("https://example.com/{}", "a".repeat(2100));
        assert!(!is_safe_for_storage(&long));
    }

    #[test]
    fn missing_authority_rejected() {
        assert!(!is_safe_for_storage("file:///etc/passwd"));
    }

    #[test]
    fn source_id_from_authority() {
        assert_eq!(source_id("https://example.com/a/b"), "example.com");
    }

    #[test]
    fn document_id_stable_across_calls() {
        let a = document_id("https://example.com/docs");
        let b = document_id("https://example.com/docs");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn document_id_differs_per_url() {
        assert_ne!(
            document_id("https://example.com/a"),
            document_id("https://example.com/b")
        );
    }

    #[test]
    fn range_validators() {
        assert!(validate_depth(0).is_err());
        assert!(validate_depth(11).is_err());
        assert!(validate_depth(3).is_ok());
        assert!(validate_concurrent_limit(51).is_err());
        assert!(validate_match_count(0).is_err());
        assert!(validate_chunk_size(50).is_err());
        assert!(validate_chunk_size(60_000).is_err());
        assert!(validate_chunk_size(5000).is_ok());
    }

    #[test]
    fn query_validation() {
        assert!(validate_query("   ", 1).is_err());
        assert!(validate_query("hi", 1).is_ok());
    }

    #[test]
    fn source_filter_blank_collapses_to_none() {
        assert_eq!(validate_source_filter(Some("   ")), None);
        assert_eq!(validate_source_filter(Some("docs")), Some("docs".to_string()));
        assert_eq!(validate_source_filter(None), None);
    }
}
