//! Prompt compilation.
//!
//! [`compile`] is a pure function of its [`PromptRequest`]. Sections appear
//! in a fixed order so two runs over the same unit send byte-identical
//! prompts.

use crate::config::{CardDistribution, ExampleCard};
use crate::metadata::ImageMetadata;
use crate::prompts::{FINAL_INSTRUCTIONS, OUTPUT_FORMAT_CONTRACT};
use std::fmt::Write;

/// Everything a generation prompt is built from.
#[derive(Debug, Clone)]
pub struct PromptRequest<'a> {
    pub unit_name: &'a str,
    /// Markdown, already truncated to the budget.
    pub content: &'a str,
    pub images: &'a [ImageMetadata],
    pub target_cards: usize,
    pub distribution: &'a CardDistribution,
    pub quality_guidelines: &'a [String],
    pub example_cards: &'a [ExampleCard],
    pub subject_context: &'a str,
    /// Final cap on embedded content, in characters.
    pub max_content_chars: usize,
}

/// Assemble the generation prompt.
pub fn compile(req: &PromptRequest<'_>) -> String {
    let mut out = String::with_capacity(req.content.len().min(req.max_content_chars) + 4096);

    out.push_str(req.subject_context.trim());
    out.push_str("\n\n");
    let _ = writeln!(
        out,
        "Generate approximately {} Anki flashcards from the following lecture content ({}).",
        req.target_cards, req.unit_name
    );

    out.push_str("\n# Content Source\n\n");
    out.push_str(&cap_chars(req.content, req.max_content_chars));
    out.push('\n');

    let described: Vec<&ImageMetadata> = req.images.iter().filter(|m| m.is_described()).collect();
    if !described.is_empty() {
        out.push_str("\n## Available Images\n\n");
        for img in described {
            let _ = writeln!(
                out,
                "- **{}** (Page {}, Type: {})",
                img.filename,
                img.page,
                img.image_type.as_deref().unwrap_or("diagram")
            );
            let _ = writeln!(
                out,
                "  Description: {}\n",
                img.description.as_deref().unwrap_or_default().trim()
            );
        }
    }

    out.push('\n');
    out.push_str(OUTPUT_FORMAT_CONTRACT);
    out.push_str("\n\n# Card Quality Guidelines\n\n");
    out.push_str(&format_guidelines(req.quality_guidelines));

    out.push_str("\n# Card Type Distribution\n\nGenerate approximately:\n");
    out.push_str(&format_distribution(req.distribution, req.target_cards));

    out.push_str("\n# Example Cards\n\n");
    out.push_str(&format_examples(req.example_cards));

    let _ = write!(
        out,
        "\n# Your Task\n\n\
Generate exactly {} high-quality flashcards following these guidelines. \
Start with the required headers, then output one flashcard per line with \
tab-separated columns.\n\n",
        req.target_cards
    );
    out.push_str(FINAL_INSTRUCTIONS);
    out.push('\n');
    out
}

/// First `max` characters of `s`.
fn cap_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn format_guidelines(guidelines: &[String]) -> String {
    let mut out = String::new();
    for (i, g) in guidelines.iter().enumerate() {
        let _ = writeln!(out, "{}. **{}**", i + 1, g.trim());
    }
    out
}

fn format_distribution(distribution: &CardDistribution, target_cards: usize) -> String {
    let mut out = String::new();
    let counts = distribution.counts(target_cards);
    for ((category, weight), (_, count)) in distribution.entries().iter().zip(counts.iter()) {
        let (label, hint) = category.describe();
        let _ = writeln!(
            out,
            "- {}% {} ({}) ≈ {} cards",
            (weight * 100.0).round() as u32,
            label,
            hint,
            count
        );
    }
    out
}

fn format_examples(examples: &[ExampleCard]) -> String {
    let mut out = String::new();
    for (i, ex) in examples.iter().enumerate() {
        let _ = write!(
            out,
            "**Example {}:**\n```\nFront: {}\nBack: {}\nTags: {}\n```\n\n",
            i + 1,
            ex.front,
            ex.back,
            ex.tags
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptConfig;
    use crate::metadata::Dimensions;

    fn described_image() -> ImageMetadata {
        let mut img = ImageMetadata::extracted(
            "unit1_page03_img01.png",
            "unit1",
            3,
            "outputs/images/unit1_page03_img01.png",
            Dimensions {
                width: 800,
                height: 600,
            },
        );
        img.description = Some("A Bayesian network with four nodes.".into());
        img.image_type = Some("network".into());
        img
    }

    fn build(content: &str, images: &[ImageMetadata], max_content_chars: usize) -> String {
        let prompts = PromptConfig::default();
        let guidelines = prompts.quality_guidelines();
        let examples = prompts.example_cards();
        let distribution = CardDistribution::default();
        compile(&PromptRequest {
            unit_name: "unit1",
            content,
            images,
            target_cards: 60,
            distribution: &distribution,
            quality_guidelines: &guidelines,
            example_cards: &examples,
            subject_context: prompts.system_context(),
            max_content_chars,
        })
    }

    #[test]
    fn embeds_every_section_in_order() {
        let p = build("## Page 1\nMarkov chains.", &[described_image()], 20_000);
        let order = [
            "educational flashcards",
            "# Content Source",
            "Markov chains.",
            "## Available Images",
            "# Output Format Requirements",
            "# Card Quality Guidelines",
            "# Card Type Distribution",
            "# Example Cards",
            "# Your Task",
            "IMPORTANT:",
        ];
        let mut last = 0;
        for marker in order {
            let pos = p[last..].find(marker).map(|i| i + last);
            assert!(pos.is_some(), "missing or out of order: {marker}");
            last = pos.unwrap_or(last);
        }
    }

    #[test]
    fn image_summary_line_format() {
        let p = build("x", &[described_image()], 100);
        assert!(p.contains("- **unit1_page03_img01.png** (Page 3, Type: network)"));
        assert!(p.contains("  Description: A Bayesian network with four nodes."));
    }

    #[test]
    fn undescribed_images_are_omitted() {
        let mut img = described_image();
        img.description = None;
        let p = build("x", &[img], 100);
        assert!(!p.contains("## Available Images"));
    }

    #[test]
    fn content_is_capped_independently() {
        let content = "y".repeat(50);
        let p = build(&content, &[], 20);
        assert!(p.contains(&"y".repeat(20)));
        assert!(!p.contains(&"y".repeat(21)));
    }

    #[test]
    fn distribution_as_percentages_and_counts() {
        let p = build("x", &[], 100);
        assert!(p.contains("- 40% Conceptual Understanding"));
        assert!(p.contains("≈ 24 cards"));
        assert!(p.contains("- 10% Visual/Diagram-Based"));
    }

    #[test]
    fn guidelines_are_numbered() {
        let p = build("x", &[], 100);
        assert!(p.contains("1. **Test understanding, not memorization**"));
        assert!(p.contains("4. **Focus on concepts**"));
    }

    #[test]
    fn compile_is_deterministic() {
        let a = build("same", &[described_image()], 100);
        let b = build("same", &[described_image()], 100);
        assert_eq!(a, b);
    }

    #[test]
    fn contract_is_reproduced_verbatim() {
        let p = build("x", &[], 100);
        assert!(p.contains(OUTPUT_FORMAT_CONTRACT));
        assert!(p.contains("Generate exactly 60 high-quality flashcards"));
    }
}
