//! Cut raw generated text down to the header block plus the first N card rows.
//!
//! Normalization never patches the header: if the model skipped or garbled
//! it, the defect passes through and the validator reports it.

use crate::deck::{is_candidate_card_line, is_column_header};

/// Keep the header block and at most `target_cards` candidate card lines.
///
/// The header block is every line up to and including the first
/// `Front\tBack\tTags` line, verbatim. When no such line exists the header
/// block is empty and every line is a candidate. Candidates have at least two
/// tabs and are not blank; they keep their original order.
///
/// Stray carriage returns at line ends are dropped, so the output is
/// idempotent for a fixed `target_cards`.
pub fn normalize(raw: &str, target_cards: usize) -> String {
    let lines: Vec<&str> = raw.lines().map(|l| l.trim_end_matches('\r')).collect();
    let header_end = lines
        .iter()
        .position(|l| is_column_header(l))
        .map(|i| i + 1)
        .unwrap_or(0);

    let (header, body) = lines.split_at(header_end);
    let cards = body
        .iter()
        .filter(|l| is_candidate_card_line(l))
        .take(target_cards);

    let mut out: Vec<&str> = header.to_vec();
    out.extend(cards);

    let mut doc = out.join("\n");
    doc.push('\n');
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::header_block;

    fn card(i: usize) -> String {
        format!("Question {i}?\tAnswer {i}.\tunit_1 topic")
    }

    fn raw_with_cards(n: usize) -> String {
        let mut raw = header_block();
        for i in 1..=n {
            raw.push_str(&card(i));
            raw.push('\n');
        }
        raw
    }

    #[test]
    fn truncates_65_cards_to_60_in_order() {
        let out = normalize(&raw_with_cards(65), 60);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 64);
        assert_eq!(&lines[..4], &crate::deck::HEADER_LINES[..]);
        assert_eq!(lines[4], card(1));
        assert_eq!(lines[63], card(60));
        assert!(out.ends_with('\n') && !out.ends_with("\n\n"));
    }

    #[test]
    fn is_idempotent() {
        let raw = format!(
            "Sure! Here are your cards:\n{}\nnot a card\n\n{}\t\t\n",
            raw_with_cards(10),
            "x"
        );
        for n in [0, 3, 10, 50] {
            let once = normalize(&raw, n);
            assert_eq!(normalize(&once, n), once, "target {n}");
        }
    }

    #[test]
    fn preserves_preamble_in_header_block() {
        let raw = format!("Here you go:\n{}", raw_with_cards(2));
        let out = normalize(&raw, 5);
        assert!(out.starts_with("Here you go:\n#separator:tab\n"));
        assert_eq!(out.lines().count(), 7);
    }

    #[test]
    fn drops_non_candidate_lines() {
        let raw = format!(
            "{}\nsome commentary\nonly\tone tab\n   \n{}\n",
            header_block().trim_end(),
            card(1)
        );
        let out = normalize(&raw, 10);
        assert_eq!(out, format!("{}{}\n", header_block(), card(1)));
    }

    #[test]
    fn missing_header_is_not_patched() {
        let raw = format!("{}\n{}\n", card(1), card(2));
        let out = normalize(&raw, 10);
        assert!(!out.contains("#separator:tab"));
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn zero_target_keeps_only_header() {
        let out = normalize(&raw_with_cards(3), 0);
        assert_eq!(out, header_block());
    }

    #[test]
    fn handles_crlf_input() {
        let raw = raw_with_cards(2).replace('\n', "\r\n");
        let out = normalize(&raw, 2);
        assert_eq!(out, raw_with_cards(2));
    }

    #[test]
    fn stray_carriage_returns_are_dropped() {
        let cut = format!("{}q1\ta1\tt\r\nq2\ta2\tt\r", header_block().replace('\n', "\r\n"));
        let doubled = format!("unit_1\r\r\n{}", raw_with_cards(2).replace('\n', "\r\r\n"));
        for raw in [cut, doubled] {
            let once = normalize(&raw, 5);
            assert!(!once.contains('\r'), "{once:?}");
            assert_eq!(normalize(&once, 5), once);
        }
    }
}
