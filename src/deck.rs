//! The deck document contract shared by every stage.
//!
//! A deck is a UTF-8, line-feed separated text file:
//!
//! ```text
//! #separator:tab
//! #html:true
//! #tags column:3
//! Front<TAB>Back<TAB>Tags
//! <front><TAB><back><TAB><tags>
//! ```
//!
//! Each data row has exactly three fields. `Back` may carry HTML and MathJax
//! delimiters; `Tags` is a space-separated token list.

use serde::{Deserialize, Serialize};

/// The four mandatory header lines, in order.
pub const HEADER_LINES: [&str; 4] = [
    "#separator:tab",
    "#html:true",
    "#tags column:3",
    COLUMN_HEADER,
];

/// The column header row closing the header block.
pub const COLUMN_HEADER: &str = "Front\tBack\tTags";

/// Relative directory every image reference must live under.
pub const CANONICAL_IMAGE_DIR: &str = "../images/";

/// Canonical header block, newline terminated.
pub fn header_block() -> String {
    let mut out = HEADER_LINES.join("\n");
    out.push('\n');
    out
}

/// One flashcard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardLine {
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
}

impl CardLine {
    /// Parse a row that splits into exactly three tab-separated fields.
    ///
    /// Fields are trimmed; tags are split on whitespace.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split('\t');
        let (front, back, tags) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            front: front.trim().to_string(),
            back: back.trim().to_string(),
            tags: tags.split_whitespace().map(str::to_string).collect(),
        })
    }

    /// Render back to a single tab-separated row (no trailing newline).
    pub fn to_line(&self) -> String {
        format!("{}\t{}\t{}", self.front, self.back, self.tags.join(" "))
    }
}

/// Count of tab characters in a line.
pub(crate) fn tab_count(line: &str) -> usize {
    line.bytes().filter(|b| *b == b'\t').count()
}

/// The "looks like a card row" heuristic: at least two tabs and not blank.
///
/// This also matches rows with extra fields; it is a progress signal, the
/// validator is what enforces the three-column contract.
pub fn is_candidate_card_line(line: &str) -> bool {
    tab_count(line) >= 2 && !line.trim().is_empty()
}

/// True for the literal column header row.
pub fn is_column_header(line: &str) -> bool {
    line.trim_end() == COLUMN_HEADER
}

/// Number of leading lines forming the header block: directive lines
/// starting with `#`, followed by the column header when present.
pub(crate) fn header_len(lines: &[&str]) -> usize {
    let mut n = lines.iter().take_while(|l| l.starts_with('#')).count();
    if lines.get(n).is_some_and(|l| is_column_header(l)) {
        n += 1;
    }
    n
}

/// Assemble a canonical document from card rows.
pub fn render_deck(cards: &[CardLine]) -> String {
    let mut out = header_block();
    for card in cards {
        out.push_str(&card.to_line());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_block_is_four_lines() {
        let block = header_block();
        assert_eq!(block.lines().count(), 4);
        assert!(block.ends_with("Front\tBack\tTags\n"));
    }

    #[test]
    fn parse_three_fields() {
        let card = CardLine::parse("Q?\t<strong>A</strong>\tunit_1 bayes").unwrap();
        assert_eq!(card.front, "Q?");
        assert_eq!(card.back, "<strong>A</strong>");
        assert_eq!(card.tags, vec!["unit_1", "bayes"]);
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        assert!(CardLine::parse("a\tb").is_none());
        assert!(CardLine::parse("a\tb\tc\td").is_none());
    }

    #[test]
    fn candidate_heuristic_counts_tabs() {
        assert!(is_candidate_card_line("a\tb\tc"));
        assert!(is_candidate_card_line("a\tb\tc\td"));
        assert!(!is_candidate_card_line("a\tb"));
        assert!(!is_candidate_card_line("\t\t  "));
    }

    #[test]
    fn header_len_stops_at_first_data_row() {
        let lines = ["#separator:tab", "#html:true", "Front\tBack\tTags", "q\ta\tt"];
        assert_eq!(header_len(&lines), 3);
        assert_eq!(header_len(&["q\ta\tt"]), 0);
    }

    #[test]
    fn render_round_trips_rows() {
        let cards = vec![CardLine {
            front: "Why?".into(),
            back: "Because.".into(),
            tags: vec!["unit_1".into()],
        }];
        let doc = render_deck(&cards);
        assert!(doc.ends_with("Why?\tBecause.\tunit_1\n"));
    }
}
