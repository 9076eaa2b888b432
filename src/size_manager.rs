//! Size manager: word-boundary content truncation and token-budget
//! enforcement for retrieval responses (C12).
//!
//! Never raises: a caller with an oversized result set gets truncated
//! content and a dropped tail, not an error. The token estimate throughout
//! is `chars/4`, the same approximation [`crate::embedding`] uses for
//! batch sizing.

use crate::embedding::approx_tokens;

/// Hard cap on `max_response_tokens`, regardless of what a caller requests.
pub const MAX_RESPONSE_TOKENS_CAP: usize = 20_000;

/// Truncation threshold: content is chopped at the last word boundary at or
/// before this fraction of `max_content_length`.
const TRUNCATION_THRESHOLD: f64 = 0.8;

/// Token-budget and content-length limits for a single retrieval response.
#[derive(Debug, Clone)]
pub struct SizeConstraints {
    pub max_response_tokens: usize,
    pub max_content_length: usize,
    pub include_full_content: bool,
    pub reserved_tokens: usize,
}

impl SizeConstraints {
    /// `max_response_tokens` is clamped to [`MAX_RESPONSE_TOKENS_CAP`]
    /// regardless of what the caller asked for.
    pub fn new(
        max_response_tokens: usize,
        max_content_length: usize,
        include_full_content: bool,
        reserved_tokens: usize,
    ) -> Self {
        Self {
            max_response_tokens: max_response_tokens.min(MAX_RESPONSE_TOKENS_CAP),
            max_content_length,
            include_full_content,
            reserved_tokens,
        }
    }
}

/// Summary of what [`fit_results`] did, returned alongside the fitted list.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SizeDiagnostic {
    pub truncated: bool,
    pub original_count: usize,
    pub final_count: usize,
    pub content_truncated_count: usize,
    pub estimated_tokens: usize,
}

/// One input item carried through [`fit_results`] with its (possibly
/// truncated) content.
#[derive(Debug, Clone)]
pub struct FittedResult<T> {
    pub item: T,
    pub content: String,
    pub content_truncated: bool,
}

/// Truncate `content` on a word boundary at or before 80% of `max_len`,
/// appending `" ..."`. A no-op if `content` already fits within `max_len`.
pub fn truncate_content(content: &str, max_len: usize) -> (String, bool) {
    if content.len() <= max_len {
        return (content.to_string(), false);
    }

    let threshold = ((max_len as f64) * TRUNCATION_THRESHOLD) as usize;
    let mut cut = max_len.min(content.len());
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }

    let window = &content[..cut];
    let boundary = window.rfind(' ').filter(|&i| i >= threshold).unwrap_or(cut);

    let mut truncated = content[..boundary].trim_end().to_string();
    truncated.push_str(" ...");
    (truncated, true)
}

/// Fit a list of items into `constraints`, truncating each item's content
/// (via `content_of`) and stopping as soon as the running token budget —
/// seeded at `reserved_tokens` — would exceed `max_response_tokens`.
/// Returns the fitted prefix plus a diagnostic describing what happened.
pub fn fit_results<T, F>(
    items: Vec<T>,
    constraints: &SizeConstraints,
    content_of: F,
) -> (Vec<FittedResult<T>>, SizeDiagnostic)
where
    F: Fn(&T) -> &str,
{
    let original_count = items.len();
    let mut fitted = Vec::with_capacity(original_count);
    let mut budget = constraints.reserved_tokens;
    let max_tokens = constraints.max_response_tokens.min(MAX_RESPONSE_TOKENS_CAP);
    let mut content_truncated_count = 0usize;
    let mut dropped_tail = false;

    for item in items {
        let raw_content = content_of(&item).to_string();
        let (content, was_truncated) = if constraints.include_full_content {
            (raw_content, false)
        } else {
            truncate_content(&raw_content, constraints.max_content_length)
        };
        if was_truncated {
            content_truncated_count += 1;
        }

        let cost = approx_tokens(&content);
        if budget + cost > max_tokens {
            dropped_tail = true;
            break;
        }
        budget += cost;

        fitted.push(FittedResult {
            item,
            content,
            content_truncated: was_truncated,
        });
    }

    let final_count = fitted.len();
    let diagnostic = SizeDiagnostic {
        truncated: dropped_tail || final_count < original_count,
        original_count,
        final_count,
        content_truncated_count,
        estimated_tokens: budget,
    };
    (fitted, diagnostic)
}

/// A one-line human-readable warning, present only when results were
/// dropped to stay within the token budget; suggests pagination.
pub fn warning_for(diagnostic: &SizeDiagnostic) -> Option<String> {
    if diagnostic.final_count >= diagnostic.original_count {
        return None;
    }
    Some(format!(
        "response truncated to {} of {} results to stay within the token budget (~{} tokens used); use pagination (offset) to fetch the remainder",
        diagnostic.final_count, diagnostic.original_count, diagnostic.estimated_tokens
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_content_is_noop_when_already_short() {
        let (content, truncated) = truncate_content("short", 100);
        assert_eq!(content, "short");
        assert!(!truncated);
    }

    #[test]
    fn truncate_content_cuts_on_word_boundary_past_threshold() {
        let text = "aaaa bbbb cccc dddd eeee ffff gggg hhhh iiii jjjj";
        let (content, truncated) = truncate_content(text, 20);
        assert!(truncated);
        assert!(content.ends_with(" ..."));
        assert!(!content[..content.len() - 4].ends_with(' '));
    }

    #[test]
    fn fit_results_keeps_everything_under_budget() {
        let constraints = SizeConstraints::new(20_000, 1000, true, 0);
        let items = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let (fitted, diag) = fit_results(items, &constraints, |s| s.as_str());
        assert_eq!(fitted.len(), 3);
        assert!(!diag.truncated);
        assert_eq!(diag.final_count, diag.original_count);
    }

    #[test]
    fn fit_results_stops_once_budget_exhausted() {
        let constraints = SizeConstraints::new(5, 1000, true, 0);
        let items = vec!["a".repeat(40), "b".repeat(40), "c".repeat(40)];
        let (fitted, diag) = fit_results(items, &constraints, |s| s.as_str());
        assert!(fitted.len() < 3);
        assert!(diag.truncated);
        assert!(warning_for(&diag).is_some());
    }

    #[test]
    fn fit_results_truncates_content_when_full_content_disabled() {
        let constraints = SizeConstraints::new(20_000, 10, false, 0);
        let items = vec!["a very long piece of content indeed".to_string()];
        let (fitted, diag) = fit_results(items, &constraints, |s| s.as_str());
        assert_eq!(diag.content_truncated_count, 1);
        assert!(fitted[0].content_truncated);
    }

    #[test]
    fn max_response_tokens_is_capped() {
        let constraints = SizeConstraints::new(1_000_000, 1000, true, 0);
        assert_eq!(constraints.max_response_tokens, MAX_RESPONSE_TOKENS_CAP);
    }

    #[test]
    fn no_warning_when_nothing_dropped() {
        let constraints = SizeConstraints::new(20_000, 1000, true, 0);
        let items = vec!["one".to_string()];
        let (_, diag) = fit_results(items, &constraints, |s| s.as_str());
        assert!(warning_for(&diag).is_none());
    }
}
