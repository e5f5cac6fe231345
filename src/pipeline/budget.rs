//! Token budget estimation.
//!
//! We never call a tokenizer: one token is approximated as four characters.
//! This over-counts for English prose, which is the safe direction when the
//! failure mode is a context overflow.

use serde::{Deserialize, Serialize};

/// Characters per approximated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Nominal output cost of one generated card.
pub const TOKENS_PER_CARD: usize = 100;

/// Output reserve margin, in percent of the nominal card cost.
pub const OUTPUT_MARGIN_PERCENT: usize = 120;

/// Prompt cost of one image summary line.
pub const TOKENS_PER_IMAGE: usize = 50;

/// Approximate token count: character count divided by four, floored.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Output tokens to reserve for `target_cards` cards: `ceil(target * 100 * 1.2)`.
pub fn output_reserve(target_cards: usize) -> usize {
    (target_cards * TOKENS_PER_CARD * OUTPUT_MARGIN_PERCENT).div_ceil(100)
}

/// How the context window is split for one generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub context_length: usize,
    pub overhead_tokens: usize,
    pub image_reserve: usize,
    pub output_reserve: usize,
    /// Tokens left for source content. Negative means the fixed costs alone
    /// exceed the window.
    pub available_for_content: i64,
}

impl ContextBudget {
    /// Whether any content at all can be sent.
    pub fn is_feasible(&self) -> bool {
        self.available_for_content > 0
    }
}

/// Split a context window between prompt overhead, images, output and content.
pub fn compute_budget(
    context_length: usize,
    overhead_tokens: usize,
    image_count: usize,
    target_cards: usize,
) -> ContextBudget {
    let image_reserve = image_count * TOKENS_PER_IMAGE;
    let output_reserve = output_reserve(target_cards);
    let available = context_length as i64
        - overhead_tokens as i64
        - image_reserve as i64
        - output_reserve as i64;

    ContextBudget {
        context_length,
        overhead_tokens,
        image_reserve,
        output_reserve,
        available_for_content: available,
    }
}

// ── Context usage report ─────────────────────────────────────────────────

/// Coarse verdict for a usage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageStatus {
    /// Under 70% of the window.
    Ok,
    /// 70% to 90%.
    Tight,
    /// 90% to 100%.
    VeryTight,
    /// Over the window; truncation will happen.
    Overflow,
}

impl std::fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Tight => "Tight",
            Self::VeryTight => "Very Tight",
            Self::Overflow => "OVERFLOW",
        };
        f.write_str(s)
    }
}

/// Full breakdown of a unit's context usage, as printed by `analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUsageReport {
    pub unit: String,
    pub target_cards: usize,
    pub content_tokens: usize,
    pub overhead_tokens: usize,
    pub image_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
    pub context_length: usize,
    pub utilization_percent: f64,
    pub status: UsageStatus,
    /// Tokens by which the request exceeds the window, zero when it fits.
    pub overflow_tokens: usize,
    pub available_for_content: i64,
}

impl ContextUsageReport {
    pub fn new(
        unit: impl Into<String>,
        content_tokens: usize,
        budget: &ContextBudget,
        target_cards: usize,
    ) -> Self {
        let total = content_tokens + budget.overhead_tokens + budget.image_reserve + budget.output_reserve;
        let utilization = if budget.context_length == 0 {
            f64::INFINITY
        } else {
            total as f64 / budget.context_length as f64 * 100.0
        };
        let status = if utilization < 70.0 {
            UsageStatus::Ok
        } else if utilization < 90.0 {
            UsageStatus::Tight
        } else if utilization <= 100.0 {
            UsageStatus::VeryTight
        } else {
            UsageStatus::Overflow
        };

        Self {
            unit: unit.into(),
            target_cards,
            content_tokens,
            overhead_tokens: budget.overhead_tokens,
            image_tokens: budget.image_reserve,
            output_tokens: budget.output_reserve,
            total_tokens: total,
            context_length: budget.context_length,
            utilization_percent: utilization,
            status,
            overflow_tokens: total.saturating_sub(budget.context_length),
            available_for_content: budget.available_for_content,
        }
    }

    /// Whether the content fits without truncation.
    pub fn fits(&self) -> bool {
        self.overflow_tokens == 0
    }
}

/// Page-scaled target used by `analyze --per-page`: 1.5 cards per page.
pub fn page_scaled_target(pages: usize) -> usize {
    pages * 3 / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_chars_div_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefghi"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn estimate_counts_characters_not_bytes() {
        // 4 characters, 8 bytes
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn output_reserve_rounds_up() {
        assert_eq!(output_reserve(60), 7200);
        assert_eq!(output_reserve(1), 120);
        assert_eq!(output_reserve(0), 0);
    }

    #[test]
    fn budget_subtracts_all_reserves() {
        let b = compute_budget(200_000, 1_500, 10, 60);
        assert_eq!(b.image_reserve, 500);
        assert_eq!(b.output_reserve, 7200);
        assert_eq!(b.available_for_content, 200_000 - 1_500 - 500 - 7200);
        assert!(b.is_feasible());
    }

    #[test]
    fn negative_budget_is_reported_not_clamped() {
        let b = compute_budget(8192, 1_200, 4, 60);
        assert_eq!(b.available_for_content, 8192 - 1_200 - 200 - 7200);
        assert!(b.available_for_content < 0);
        assert!(!b.is_feasible());
    }

    #[test]
    fn usage_report_statuses() {
        let b = compute_budget(10_000, 1_000, 0, 10);
        let ok = ContextUsageReport::new("u", 1_000, &b, 10);
        assert_eq!(ok.status, UsageStatus::Ok);
        assert!(ok.fits());

        let tight = ContextUsageReport::new("u", 6_000, &b, 10);
        assert_eq!(tight.status, UsageStatus::Tight);

        let over = ContextUsageReport::new("u", 9_500, &b, 10);
        assert_eq!(over.status, UsageStatus::Overflow);
        assert_eq!(over.overflow_tokens, 9_500 + 1_000 + 1_200 - 10_000);
        assert!(!over.fits());
    }

    #[test]
    fn page_scaled_target_is_one_and_a_half_per_page() {
        assert_eq!(page_scaled_target(40), 60);
        assert_eq!(page_scaled_target(3), 4);
    }
}
