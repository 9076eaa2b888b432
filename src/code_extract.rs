//! Fenced code block extraction.
//!
//! Parses consecutive pairs of ` ``` ` fences out of a markdown document,
//! recording surrounding context and an optional language tag. Unlike the
//! chunker, this pass is sequential and does not re-indent or otherwise
//! touch the code body — it is stored and embedded verbatim.

/// A single extracted code example with its surrounding prose context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Optional language tag taken from the opening fence line (e.g. `python`).
    pub language: Option<String>,
    /// The code body, verbatim, with no re-indentation.
    pub code: String,
    /// Up to `context_chars` of text immediately before the opening fence.
    pub context_before: String,
    /// Up to `context_chars` of text immediately after the closing fence.
    pub context_after: String,
}

/// Default minimum code body length (characters) to keep a block.
pub const DEFAULT_MIN_LENGTH: usize = 1000;
/// Default number of context characters captured on each side.
pub const DEFAULT_CONTEXT_CHARS: usize = 1000;

/// Extract fenced code blocks whose body is at least `min_length` characters,
/// each carrying up to `context_chars` characters of surrounding prose.
pub fn extract_code_blocks(
    markdown: &str,
    min_length: usize,
    context_chars: usize,
) -> Vec<CodeBlock> {
    let fence_positions = find_fence_lines(markdown);
    let mut blocks = Vec::new();

    let mut i = 0;
    while i + 1 < fence_positions.len() {
        let (open_start, open_end, lang_line) = fence_positions[i];
        let (close_start, _close_end, _) = fence_positions[i + 1];

        let code = markdown[open_end..close_start].trim_matches('\n');
        if code.len() >= min_length {
            let language = parse_language_tag(lang_line);
            let before_start = ceil_char_boundary(markdown, open_start.saturating_sub(context_chars));
            let context_before = markdown[before_start..open_start].to_string();

            let after_end = floor_char_boundary(
                markdown,
                (fence_positions[i + 1].1 + context_chars).min(markdown.len()),
            );
            let context_after = markdown[fence_positions[i + 1].1..after_end].to_string();

            blocks.push(CodeBlock {
                language,
                code: code.to_string(),
                context_before,
                context_after,
            });
        }

        // Consume this pair; the next pair starts looking after the closing fence.
        i += 2;
    }

    blocks
}

/// Parse an optional language token from a fence's opening line. Qualifies
/// only if the token is at most 20 characters and contains no whitespace.
fn parse_language_tag(opening_line: &str) -> Option<String> {
    let after_fence = opening_line.trim_start_matches('`').trim();
    if after_fence.is_empty() || after_fence.len() > 20 || after_fence.contains(char::is_whitespace)
    {
        None
    } else {
        Some(after_fence.to_string())
    }
}

/// The largest char-boundary offset `<= idx`, used when trimming a context
/// window's end down to an arbitrary `+ context_chars` byte offset.
fn floor_char_boundary(text: &str, idx: usize) -> usize {
    let mut i = idx.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// The smallest char-boundary offset `>= idx`, used when trimming a context
/// window's start up from an arbitrary `- context_chars` byte offset.
fn ceil_char_boundary(text: &str, idx: usize) -> usize {
    let mut i = idx.min(text.len());
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Locate every fence line (` ``` ` possibly followed by a language tag) in
/// the document. Returns `(line_start, line_end_inclusive_newline, line_text)`
/// for each fence line found, in order.
fn find_fence_lines(markdown: &str) -> Vec<(usize, usize, &str)> {
    let mut result = Vec::new();
    let mut offset = 0usize;
    for line in markdown.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n').trim();
        if trimmed.starts_with("```") {
            result.push((offset, offset + line.len(), trimmed));
        }
        offset += line.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_block_above_min_length() {
        let body = "x".repeat(1200);
        let md = format!("before text\n\n```python\n{body}\n```\n\nafter text");
        let blocks = extract_code_blocks(&md, 1000, 1000);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language.as_deref(), Some("python"));
        assert!(blocks[0].code.contains(&body));
        assert!(blocks[0].context_before.contains("before text"));
        assert!(blocks[0].context_after.contains("after text"));
    }

    #[test]
    fn drops_block_below_min_length() {
        let md = "```js\nconsole.log(1)\n```";
        let blocks = extract_code_blocks(md, 1000, 1000);
        assert!(blocks.is_empty());
    }

    #[test]
    fn language_tag_with_whitespace_is_rejected() {
        let body = "y".repeat(1200);
        let md = format!("```not a lang\n{body}\n```");
        let blocks = extract_code_blocks(&md, 1000, 1000);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, None);
    }

    #[test]
    fn preserves_code_verbatim_no_reindent() {
        let body = format!("  def f():\n      return 1\n{}", "z".repeat(1000));
        let md = format!("```python\n{body}\n```");
        let blocks = extract_code_blocks(&md, 1000, 1000);
        assert_eq!(blocks[0].code, body);
    }

    #[test]
    fn does_not_panic_on_multibyte_context() {
        // 3-byte CJK characters surrounding the fence make it very likely
        // that `open_start - context_chars` and `close_end + context_chars`
        // land mid-codepoint unless clamped to a char boundary.
        let body = "w".repeat(1200);
        let before = "文".repeat(50);
        let after = "語".repeat(50);
        let md = format!("{before}\n\n```python\n{body}\n```\n\n{after}");
        let blocks = extract_code_blocks(&md, 1000, 7);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].context_before.chars().all(|c| c == '文' || c == '\n'));
        assert!(blocks[0].context_after.chars().all(|c| c == '語' || c == '\n'));
    }

    #[test]
    fn multiple_pairs_handled_independently() {
        let a = "a".repeat(1100);
        let b = "b".repeat(1100);
        let md = format!("```\n{a}\n```\n\nmiddle\n\n```\n{b}\n```");
        let blocks = extract_code_blocks(&md, 1000, 1000);
        assert_eq!(blocks.len(), 2);
    }
}
