//! Deck validation, repair, and tag normalization.
//!
//! [`validate`] only reports; it never edits. [`repair`] and
//! [`normalize_tags`] are separate, explicit edits the caller opts into.

use crate::deck::{
    header_block, is_column_header, tab_count, CardLine, CANONICAL_IMAGE_DIR, HEADER_LINES,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::warn;

static RE_IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(<img\b[^>]*?\bsrc\s*=\s*)(["'])([^"']*)(["'])"#).unwrap());

/// Which of the three fields of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardField {
    Front,
    Back,
    Tags,
}

impl fmt::Display for CardField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Front => "front",
            Self::Back => "back",
            Self::Tags => "tags",
        })
    }
}

/// A hard validation error. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    /// Fewer than the four header lines.
    TooShort { lines: usize },
    /// Header line `line` is not the expected directive.
    Header { line: usize, expected: String, found: String },
    /// A row does not split into exactly three fields.
    ColumnCount { line: usize, found: usize },
    /// A row has an empty field after trimming.
    EmptyField { line: usize, field: CardField },
    /// The header is fine but there is not a single valid row.
    NoCards,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { lines } => {
                write!(f, "Document too short: {lines} line(s), the header alone needs 4")
            }
            Self::Header { line, expected, found } => write!(
                f,
                "Line {line}: expected header {:?}, found {:?}",
                expected, found
            ),
            Self::ColumnCount { line, found } => {
                write!(f, "Line {line}: expected 3 columns, got {found}")
            }
            Self::EmptyField { line, field } => write!(f, "Line {line}: empty {field} field"),
            Self::NoCards => f.write_str("No valid card rows"),
        }
    }
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    /// Soft findings: non-canonical image paths, duplicate fronts.
    pub warnings: Vec<String>,
    /// Rows with three non-empty fields.
    pub card_count: usize,
}

/// Check a deck document against the contract.
///
/// Row errors are collected per line; checking continues past them.
pub fn validate(document: &str) -> ValidationReport {
    let lines: Vec<&str> = document.lines().collect();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if lines.len() < HEADER_LINES.len() {
        return ValidationReport {
            valid: false,
            errors: vec![ValidationError::TooShort { lines: lines.len() }],
            warnings,
            card_count: 0,
        };
    }

    // ── Header ──────────────────────────────────────────────────────────────
    for (i, expected) in HEADER_LINES.iter().take(3).enumerate() {
        if lines[i].trim() != *expected {
            errors.push(ValidationError::Header {
                line: i + 1,
                expected: expected.to_string(),
                found: lines[i].to_string(),
            });
        }
    }
    if !lines[3].starts_with(HEADER_LINES[3]) {
        errors.push(ValidationError::Header {
            line: 4,
            expected: HEADER_LINES[3].to_string(),
            found: lines[3].to_string(),
        });
    }
    let header_ok = errors.is_empty();

    // ── Rows ────────────────────────────────────────────────────────────────
    let mut card_count = 0;
    let mut fronts: HashSet<&str> = HashSet::new();
    for (idx, line) in lines.iter().enumerate().skip(4) {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 3 {
            errors.push(ValidationError::ColumnCount {
                line: line_no,
                found: parts.len(),
            });
            continue;
        }

        let mut row_ok = true;
        for (part, field) in parts.iter().zip([CardField::Front, CardField::Back, CardField::Tags]) {
            if part.trim().is_empty() {
                errors.push(ValidationError::EmptyField {
                    line: line_no,
                    field,
                });
                row_ok = false;
            }
        }
        if !row_ok {
            continue;
        }
        card_count += 1;

        let front = parts[0].trim();
        if !fronts.insert(front) {
            warnings.push(format!("Line {line_no}: duplicate front {front:?}"));
        }
        for src in image_sources(line) {
            if !src.starts_with(CANONICAL_IMAGE_DIR) {
                warnings.push(format!(
                    "Line {line_no}: image {src:?} is not under {CANONICAL_IMAGE_DIR}"
                ));
            }
        }
    }

    if header_ok && card_count == 0 {
        errors.push(ValidationError::NoCards);
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
        card_count,
    }
}

fn image_sources(line: &str) -> impl Iterator<Item = &str> {
    RE_IMG_SRC
        .captures_iter(line)
        .filter_map(|c| c.get(3).map(|m| m.as_str()))
}

// ── Repair ───────────────────────────────────────────────────────────────

/// Result of [`repair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repair {
    pub document: String,
    /// One entry per change made.
    pub warnings: Vec<String>,
    pub dropped_lines: usize,
    pub rewritten_images: usize,
}

/// Rebuild a document into canonical shape without guessing content.
///
/// * The canonical header block is emitted first; header lines found
///   anywhere in the input are consumed, other `#` directives are dropped.
/// * Rows that do not split into exactly three fields are dropped.
/// * Fields are trimmed; image `src` paths outside `../images/` are
///   rewritten to `../images/{basename}`.
/// * Blank lines are removed.
pub fn repair(document: &str) -> Repair {
    let lines: Vec<&str> = document.lines().collect();
    let mut warnings = Vec::new();
    let mut dropped_lines = 0;
    let mut rewritten_images = 0;
    let mut rows: Vec<String> = Vec::new();

    let canonical_header = lines.len() >= 4
        && lines[..4]
            .iter()
            .zip(HEADER_LINES.iter())
            .all(|(l, h)| l.trim_end() == *h);
    if !canonical_header {
        let found = lines
            .iter()
            .filter(|l| HEADER_LINES.contains(&l.trim_end()))
            .count();
        warnings.push(if found == 0 {
            "Header block missing; canonical header prepended".to_string()
        } else {
            "Header block incomplete or misplaced; canonical header rebuilt".to_string()
        });
    }

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() || HEADER_LINES.contains(&trimmed) || is_column_header(trimmed) {
            continue;
        }
        if trimmed.starts_with('#') && tab_count(trimmed) == 0 {
            warnings.push(format!("Line {line_no}: dropped unknown directive {trimmed:?}"));
            dropped_lines += 1;
            continue;
        }
        let Some(card) = CardLine::parse(trimmed) else {
            warnings.push(format!(
                "Line {line_no}: dropped, expected 3 columns, got {}",
                tab_count(trimmed) + 1
            ));
            dropped_lines += 1;
            continue;
        };

        let (front, n_front) = rewrite_image_paths(&card.front);
        let (back, n_back) = rewrite_image_paths(&card.back);
        if n_front + n_back > 0 {
            warnings.push(format!(
                "Line {line_no}: rewrote {} image path(s) under {CANONICAL_IMAGE_DIR}",
                n_front + n_back
            ));
            rewritten_images += n_front + n_back;
        }
        rows.push(
            CardLine {
                front,
                back,
                tags: card.tags,
            }
            .to_line(),
        );
    }

    for w in &warnings {
        warn!("repair: {}", w);
    }

    let mut out = header_block();
    for row in rows {
        out.push_str(&row);
        out.push('\n');
    }

    Repair {
        document: out,
        warnings,
        dropped_lines,
        rewritten_images,
    }
}

/// Rewrite every `<img src>` not already under the canonical directory.
///
/// Returns the new text and the number of rewritten references.
pub fn rewrite_image_paths(field: &str) -> (String, usize) {
    let mut count = 0;
    let out = RE_IMG_SRC.replace_all(field, |caps: &regex::Captures<'_>| {
        let src = &caps[3];
        if src.starts_with(CANONICAL_IMAGE_DIR) {
            caps[0].to_string()
        } else {
            count += 1;
            format!(
                "{}{}{}{}{}",
                &caps[1],
                &caps[2],
                CANONICAL_IMAGE_DIR,
                basename(src),
                &caps[4]
            )
        }
    });
    (out.into_owned(), count)
}

/// Final path component, accepting both separators.
pub(crate) fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

// ── Tags ─────────────────────────────────────────────────────────────────

/// Make `required_first_tag` the first tag of every row, exactly once, and
/// de-duplicate the rest preserving first occurrence. Header lines and
/// lines that are not three-field rows are left untouched. Idempotent.
pub fn normalize_tags(document: &str, required_first_tag: &str) -> String {
    let required = required_first_tag.trim();
    let lines: Vec<&str> = document.split('\n').collect();
    let header = crate::deck::header_len(&lines);

    let out: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if i < header || tab_count(line) != 2 {
                return line.to_string();
            }
            let (head, tags) = match line.rsplit_once('\t') {
                Some(split) => split,
                None => return line.to_string(),
            };
            let trailing_cr = tags.ends_with('\r');
            let mut seen: HashSet<&str> = HashSet::new();
            let mut ordered: Vec<&str> = Vec::new();
            if !required.is_empty() {
                seen.insert(required);
                ordered.push(required);
            }
            for tag in tags.split_whitespace() {
                if seen.insert(tag) {
                    ordered.push(tag);
                }
            }
            format!(
                "{head}\t{}{}",
                ordered.join(" "),
                if trailing_cr { "\r" } else { "" }
            )
        })
        .collect();
    out.join("\n")
}

// ── Statistics ───────────────────────────────────────────────────────────

/// Summary numbers for a deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeckStatistics {
    pub total_cards: usize,
    pub tag_counts: BTreeMap<String, usize>,
    pub avg_front_chars: f64,
    pub avg_back_chars: f64,
}

/// Count rows and tags over the three-field rows of a document.
pub fn deck_statistics(document: &str) -> DeckStatistics {
    let lines: Vec<&str> = document.lines().collect();
    let header = crate::deck::header_len(&lines);
    let cards: Vec<CardLine> = lines[header..]
        .iter()
        .filter_map(|l| CardLine::parse(l))
        .collect();

    let mut stats = DeckStatistics {
        total_cards: cards.len(),
        ..Default::default()
    };
    if cards.is_empty() {
        return stats;
    }
    for card in &cards {
        for tag in &card.tags {
            *stats.tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }
    let n = cards.len() as f64;
    stats.avg_front_chars = cards.iter().map(|c| c.front.chars().count()).sum::<usize>() as f64 / n;
    stats.avg_back_chars = cards.iter().map(|c| c.back.chars().count()).sum::<usize>() as f64 / n;
    stats
}
