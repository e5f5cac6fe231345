//! Fit over-budget markdown into the content budget.
//!
//! The cut keeps a prefix of the document. It never drops more than half of
//! the content: a unit generated from half its material is more useful than a
//! unit that fails outright. When a markdown heading sits close enough before
//! the raw cut, the cut snaps back to it so the excerpt ends on a section
//! boundary.

use super::budget::estimate_tokens;

/// A heading boundary is adopted only if it keeps this percentage of the raw cut.
pub const BOUNDARY_MIN_PERCENT: usize = 70;

/// Appended after a cut so reviewers and the model know content is missing.
pub const TRUNCATION_NOTICE: &str = "\n\n[... content truncated to fit the model context window ...]";

/// Result of [`truncate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// The content to embed, including the notice when one was appended.
    pub content: String,
    /// Characters of the original kept (excluding the notice).
    pub kept_chars: usize,
    pub original_chars: usize,
    /// Whether a heading boundary was used for the cut.
    pub at_boundary: bool,
}

impl Truncation {
    pub fn was_truncated(&self) -> bool {
        self.kept_chars < self.original_chars
    }
}

/// Cut `content` so it approaches `available_tokens`.
///
/// Returns the content unchanged when it already fits. Otherwise keeps
/// `max(0.5, available / estimate * 0.9)` of the characters, preferring the
/// last heading start (`\n#`) when it keeps at least 70% of that cut and
/// stays above the 50% floor.
pub fn truncate(content: &str, available_tokens: i64) -> Truncation {
    let original_chars = content.chars().count();
    let estimated = estimate_tokens(content);

    if estimated as i64 <= available_tokens {
        return Truncation {
            content: content.to_string(),
            kept_chars: original_chars,
            original_chars,
            at_boundary: false,
        };
    }

    // keep_ratio = max(0.5, available / estimated * 0.9), in integer math
    let raw_cut = if available_tokens > 0 {
        (original_chars as u128 * available_tokens as u128 * 9 / (estimated as u128 * 10)) as usize
    } else {
        0
    };
    let floor_chars = original_chars.div_ceil(2);
    let cut_chars = raw_cut.max(floor_chars).min(original_chars);

    let cut_byte = byte_offset(content, cut_chars);
    let prefix = &content[..cut_byte];

    let mut kept_chars = cut_chars;
    let mut kept_byte = cut_byte;
    let mut at_boundary = false;

    if let Some(pos) = prefix.rfind("\n#") {
        let boundary_chars = prefix[..pos].chars().count();
        if boundary_chars * 100 >= cut_chars * BOUNDARY_MIN_PERCENT && boundary_chars >= floor_chars {
            kept_chars = boundary_chars;
            kept_byte = pos;
            at_boundary = true;
        }
    }

    let mut out = content[..kept_byte].to_string();
    let notice_chars = TRUNCATION_NOTICE.chars().count();
    if kept_chars + notice_chars <= original_chars {
        out.push_str(TRUNCATION_NOTICE);
    }

    Truncation {
        content: out,
        kept_chars,
        original_chars,
        at_boundary,
    }
}

/// Byte offset of the `n`th character (or the end of the string).
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(chars: usize) -> String {
        "a".repeat(chars)
    }

    #[test]
    fn within_budget_is_unchanged() {
        let content = plain(4000); // 1000 tokens
        let t = truncate(&content, 1000);
        assert_eq!(t.content, content);
        assert!(!t.was_truncated());
    }

    #[test]
    fn severe_overflow_keeps_exactly_half() {
        let content = plain(16_000); // 4000 tokens
        let t = truncate(&content, 1000);
        assert_eq!(t.kept_chars, 8_000);
        assert!(t.content.starts_with(&plain(8_000)));
        assert!(t.content.ends_with(TRUNCATION_NOTICE));
        assert!(!t.at_boundary);
    }

    #[test]
    fn zero_and_negative_budget_respect_floor() {
        let content = plain(1_000);
        for available in [0, -5_000] {
            let t = truncate(&content, available);
            assert_eq!(t.kept_chars, 500);
            assert!(t.content.chars().count() <= 1_000);
            assert!(t.content.chars().count() >= 500);
        }
    }

    #[test]
    fn mild_overflow_applies_safety_margin() {
        let content = plain(4_000); // 1000 tokens
        let t = truncate(&content, 800);
        // 800 / 1000 * 0.9 = 0.72
        assert_eq!(t.kept_chars, 2_880);
    }

    #[test]
    fn snaps_to_nearby_heading() {
        let mut content = plain(2_600);
        content.push_str("\n## Page 9\n");
        content.push_str(&plain(1_389));
        // 4000 chars = 1000 tokens, cut at 2880 chars; heading at 2600 (>= 70%)
        let t = truncate(&content, 800);
        assert!(t.at_boundary);
        assert_eq!(t.kept_chars, 2_600);
        assert!(!t.content.contains("## Page 9"));
    }

    #[test]
    fn ignores_heading_too_far_back() {
        let mut content = plain(1_000);
        content.push_str("\n## Page 2\n");
        content.push_str(&plain(2_989));
        let t = truncate(&content, 800);
        assert!(!t.at_boundary);
        assert_eq!(t.kept_chars, 2_880);
    }

    #[test]
    fn boundary_never_breaks_the_floor() {
        // Floor cut at 50%; a heading at 40% would keep 80% of the cut but
        // fall below half of the document.
        let mut content = plain(400);
        content.push_str("\n# Late\n");
        content.push_str(&plain(592));
        let t = truncate(&content, 0);
        assert!(!t.at_boundary);
        assert_eq!(t.kept_chars, 500);
    }

    #[test]
    fn never_longer_than_original_for_tiny_inputs() {
        let content = plain(20); // 5 tokens
        let t = truncate(&content, 1);
        assert_eq!(t.kept_chars, 10);
        assert!(t.content.chars().count() <= 20);
    }

    #[test]
    fn multibyte_content_cuts_on_char_boundary() {
        let content = "é".repeat(4_000);
        let t = truncate(&content, 100);
        assert_eq!(t.kept_chars, 2_000);
    }
}
