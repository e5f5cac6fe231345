//! Markdown rendering of extracted pages, and page lookups in that markdown.
//!
//! The rendered document is the source text for generation:
//!
//! ```text
//! # Unit 1 Intro
//!
//! > **Pages:** 12 | **Images:** 3
//!
//! ## Page 1
//!
//! <cleaned page text>
//!
//! ### Available Images
//!
//! ![unit_1_page01_img01.png](../images/unit_1_page01_img01.png)
//! **Description:** ... (Type: diagram, Math: no)
//!
//! ## Images Summary
//! ...
//! ```
//!
//! `## Page N` headings are the boundaries the truncator snaps to and the
//! anchors [`page_context`] looks up.

use crate::deck::CANONICAL_IMAGE_DIR;
use crate::metadata::ImageMetadata;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Text of one PDF page, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// Characters of an image description kept in the summary list.
const SUMMARY_DESCRIPTION_CHARS: usize = 80;

/// Default size of a [`page_context`] excerpt.
pub const PAGE_CONTEXT_CHARS: usize = 500;

/// Render a unit's pages and images to markdown.
///
/// Pages with blank text are skipped. Images are listed under the page they
/// came from and again in a closing summary.
pub fn render_markdown(title: &str, pages: &[PageText], images: &[ImageMetadata]) -> String {
    let mut by_page: BTreeMap<u32, Vec<&ImageMetadata>> = BTreeMap::new();
    for img in images {
        by_page.entry(img.page).or_default().push(img);
    }

    let mut parts = vec![
        format!("# {title}\n"),
        format!("> **Pages:** {} | **Images:** {}\n", pages.len(), images.len()),
    ];

    let mut body: Vec<String> = Vec::new();
    for page in pages {
        if page.text.trim().is_empty() {
            continue;
        }
        body.push(format!("## Page {}\n", page.page));
        body.push(format_page_text(&page.text));
        if let Some(imgs) = by_page.get(&page.page) {
            body.push(page_images(imgs));
        }
    }
    parts.push(body.join("\n\n"));

    if !images.is_empty() {
        parts.push(images_summary(images));
    }

    parts.join("\n\n")
}

static RE_MANY_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").unwrap());
static RE_MD_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[.*?\]\(.*?\)").unwrap());

/// Normalise raw PDF text: line endings, invisible characters, blank-line
/// runs and horizontal whitespace.
fn format_page_text(text: &str) -> String {
    let s = text.replace("\r\n", "\n").replace('\r', "\n");
    let s = s.replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'], "");
    let s = RE_MANY_NEWLINES.replace_all(&s, "\n\n");
    let s = RE_HSPACE.replace_all(&s, " ");
    s.trim().to_string()
}

fn page_images(images: &[&ImageMetadata]) -> String {
    let mut out = String::from("### Available Images");
    for img in images {
        let _ = write!(
            out,
            "\n\n![{0}]({1}{0})",
            img.filename, CANONICAL_IMAGE_DIR
        );
        if let Some(desc) = img.description.as_deref().filter(|d| !d.trim().is_empty()) {
            let _ = write!(
                out,
                "\n**Description:** {} (Type: {}, Math: {})",
                desc.trim(),
                img.image_type.as_deref().unwrap_or("diagram"),
                if img.contains_math.unwrap_or(false) { "yes" } else { "no" }
            );
        }
    }
    out
}

fn images_summary(images: &[ImageMetadata]) -> String {
    let mut out = String::from("## Images Summary\n\nAll images extracted from this PDF:\n");
    for img in images {
        let _ = write!(
            out,
            "\n- [{0}]({1}{0}) - Page {2} ({3}x{4})",
            img.filename, CANONICAL_IMAGE_DIR, img.page, img.dimensions.width, img.dimensions.height
        );
        if let Some(desc) = img.description.as_deref().filter(|d| !d.trim().is_empty()) {
            let short: String = if desc.chars().count() > SUMMARY_DESCRIPTION_CHARS {
                let head: String = desc.chars().take(SUMMARY_DESCRIPTION_CHARS).collect();
                format!("{head}...")
            } else {
                desc.to_string()
            };
            let _ = write!(out, "\n  - {short}");
        }
    }
    out
}

/// Cleaned text of page `page` in rendered markdown, at most `max_chars`
/// characters. `None` when the page has no section.
///
/// Image listings are removed. An over-long excerpt ends at the last
/// sentence or line break when that keeps more than 70% of `max_chars`,
/// otherwise it is cut hard and marked with `...`.
pub fn page_context(markdown: &str, page: u32, max_chars: usize) -> Option<String> {
    let marker = format!("## Page {page}\n");
    let start = markdown.find(&marker)? + marker.len();
    let rest = &markdown[start..];
    let end = next_page_heading(rest).unwrap_or(rest.len());
    Some(clean_context(&rest[..end], max_chars))
}

/// Offset of the `\n` starting the next `## Page <digit>` heading or the
/// images summary.
fn next_page_heading(s: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = s[from..].find("\n## ") {
        let at = from + rel;
        let after = &s[at + "\n## ".len()..];
        let is_page = after
            .strip_prefix("Page ")
            .is_some_and(|r| r.starts_with(|c: char| c.is_ascii_digit()));
        if is_page || after.starts_with("Images Summary") {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

fn strip_image_sections(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("### Available Images") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find("\n##") {
            Some(end) => rest = &tail[end..],
            None => rest = "",
        }
    }
    out.push_str(rest);
    out
}

fn clean_context(text: &str, max_chars: usize) -> String {
    let s = strip_image_sections(text);
    let s = RE_MD_IMAGE.replace_all(&s, "");
    let s = RE_MANY_NEWLINES.replace_all(&s, "\n\n");
    let s = RE_SPACES.replace_all(&s, " ");
    let s = s.trim();

    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    let boundary = head.rfind(['.', '\n']);
    match boundary {
        Some(b) if head[..b].chars().count() * 10 > max_chars * 7 => head[..=b].to_string(),
        _ => format!("{head}..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Dimensions;

    fn page(n: u32, text: &str) -> PageText {
        PageText {
            page: n,
            text: text.into(),
        }
    }

    fn image(page: u32, described: bool) -> ImageMetadata {
        let name = format!("unit_1_page{page:02}_img01.png");
        let mut m = ImageMetadata::extracted(
            name.clone(),
            "unit_1",
            page,
            format!("outputs/images/{name}"),
            Dimensions {
                width: 640,
                height: 480,
            },
        );
        if described {
            m.description = Some("A directed graph with three nodes.".into());
            m.image_type = Some("network".into());
            m.contains_math = Some(true);
        }
        m
    }

    #[test]
    fn renders_pages_and_images() {
        let md = render_markdown(
            "Unit 1",
            &[page(1, "Intro   text\n\n\n\nmore"), page(2, "  "), page(3, "Bayes rule.")],
            &[image(1, true)],
        );
        assert!(md.starts_with("# Unit 1\n"));
        assert!(md.contains("> **Pages:** 3 | **Images:** 1"));
        assert!(md.contains("## Page 1\n\n\nIntro text\n\nmore"));
        assert!(!md.contains("## Page 2"));
        assert!(md.contains("![unit_1_page01_img01.png](../images/unit_1_page01_img01.png)"));
        assert!(md.contains("**Description:** A directed graph with three nodes. (Type: network, Math: yes)"));
        assert!(md.contains("- [unit_1_page01_img01.png](../images/unit_1_page01_img01.png) - Page 1 (640x480)"));
    }

    #[test]
    fn page_context_stops_at_next_page() {
        let md = render_markdown("U", &[page(1, "First page."), page(10, "Tenth page.")], &[]);
        assert_eq!(page_context(&md, 1, 500).as_deref(), Some("First page."));
        assert_eq!(page_context(&md, 10, 500).as_deref(), Some("Tenth page."));
        assert_eq!(page_context(&md, 2, 500), None);
    }

    #[test]
    fn page_context_drops_image_listings() {
        let md = render_markdown("U", &[page(1, "Slide text."), page(2, "Next.")], &[image(1, true)]);
        let ctx = page_context(&md, 1, 500).unwrap();
        assert_eq!(ctx, "Slide text.");
    }

    #[test]
    fn long_context_snaps_to_sentence() {
        let text = format!("{}. {}", "a".repeat(80), "b".repeat(40));
        let md = render_markdown("U", &[page(1, &text)], &[]);
        let ctx = page_context(&md, 1, 100).unwrap();
        assert_eq!(ctx, format!("{}.", "a".repeat(80)));
    }

    #[test]
    fn long_context_without_boundary_is_cut_hard() {
        let md = render_markdown("U", &[page(1, &"x".repeat(300))], &[]);
        let ctx = page_context(&md, 1, 100).unwrap();
        assert_eq!(ctx, format!("{}...", "x".repeat(100)));
    }

    #[test]
    fn invisible_characters_are_removed() {
        assert_eq!(format_page_text("a\u{200B}b\r\nc"), "ab\nc");
    }
}
