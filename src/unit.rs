//! Units: one lecture PDF and the deck generated from it.
//!
//! Units come from two places, merged by PDF file name:
//!
//! * PDFs found in `pdfs_dir` get a generated name, the default target and
//!   a single tag equal to the name.
//! * Entries in the `units` map of `config.yaml` override those values. An
//!   entry whose PDF is missing is still listed (with a warning) so decks
//!   generated earlier remain addressable.

use crate::config::ProjectConfig;
use crate::error::FlashdeckError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

static RE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-.]+").unwrap());
static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]").unwrap());

/// Where a unit's definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitSource {
    AutoDiscovered,
    Configured,
    ConfiguredOnly,
}

impl fmt::Display for UnitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AutoDiscovered => "auto-discovered",
            Self::Configured => "configured",
            Self::ConfiguredOnly => "configured-only",
        })
    }
}

/// A named body of source material with its generation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    pub name: String,
    pub pdf_file: String,
    pub target_cards: usize,
    pub tags: Vec<String>,
    pub source: UnitSource,
}

impl Unit {
    /// Tag every card of this unit carries first.
    pub fn base_tag(&self) -> &str {
        self.tags.first().map(String::as_str).unwrap_or(&self.name)
    }

    pub fn pdf_path(&self, config: &ProjectConfig) -> PathBuf {
        config.pdfs_dir.join(&self.pdf_file)
    }

    /// "Unit 1 Intro" for `unit_1_intro`.
    pub fn title(&self) -> String {
        self.name
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Derive a unit name from a PDF file name.
///
/// `"Unit 1.pdf"` → `unit_1`, `"lecture 3.pdf"` → `unit_lecture_3`,
/// `"Intro.pdf"` → `unit_intro`.
pub fn generate_unit_name(pdf_filename: &str) -> String {
    let stem = pdf_filename
        .strip_suffix(".pdf")
        .or_else(|| pdf_filename.strip_suffix(".PDF"))
        .unwrap_or(pdf_filename)
        .to_lowercase();
    let name = RE_SEPARATORS.replace_all(&stem, "_");
    let name = RE_NON_WORD.replace_all(&name, "");
    let name = name.trim_matches('_');
    if name.starts_with("unit") {
        name.to_string()
    } else {
        format!("unit_{name}")
    }
}

/// Every unit, discovered and configured, ordered by PDF file name.
pub fn all_units(config: &ProjectConfig) -> Vec<Unit> {
    let discovered = config.discover_pdfs();
    let default_target = config.defaults.target_cards;
    let mut units: BTreeMap<String, Unit> = discovered
        .iter()
        .map(|pdf| {
            let name = generate_unit_name(pdf);
            let unit = Unit {
                tags: vec![name.clone()],
                name,
                pdf_file: pdf.clone(),
                target_cards: default_target,
                source: UnitSource::AutoDiscovered,
            };
            (pdf.clone(), unit)
        })
        .collect();

    for (pdf, entry) in &config.units {
        let source = if units.contains_key(pdf) {
            UnitSource::Configured
        } else {
            warn!("PDF '{}' is configured but not found in {}", pdf, config.pdfs_dir.display());
            UnitSource::ConfiguredOnly
        };
        let tags = if entry.tags.is_empty() {
            vec![entry.unit_name.clone()]
        } else {
            entry.tags.clone()
        };
        units.insert(
            pdf.clone(),
            Unit {
                name: entry.unit_name.clone(),
                pdf_file: pdf.clone(),
                target_cards: entry.target_cards.unwrap_or(default_target),
                tags,
                source,
            },
        );
    }

    units.into_values().collect()
}

/// Look a unit up by name.
pub fn find_unit(config: &ProjectConfig, name: &str) -> Result<Unit, FlashdeckError> {
    let units = all_units(config);
    let available = units.iter().map(|u| u.name.as_str()).collect::<Vec<_>>().join(", ");
    units
        .iter()
        .find(|u| u.name == name)
        .cloned()
        .ok_or_else(|| FlashdeckError::UnitNotFound {
            unit: name.to_string(),
            available: if available.is_empty() {
                "(none)".into()
            } else {
                available
            },
        })
}

/// One unit by name, or all of them.
pub fn select_units(config: &ProjectConfig, name: Option<&str>) -> Result<Vec<Unit>, FlashdeckError> {
    match name {
        Some(n) => Ok(vec![find_unit(config, n)?]),
        None => Ok(all_units(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitEntry;

    #[test]
    fn unit_names_from_file_names() {
        assert_eq!(generate_unit_name("Intro.pdf"), "unit_intro");
        assert_eq!(generate_unit_name("Unit_1.pdf"), "unit_1");
        assert_eq!(generate_unit_name("lecture 3.pdf"), "unit_lecture_3");
        assert_eq!(generate_unit_name("Unit 1.pdf"), "unit_1");
        assert_eq!(generate_unit_name("Week-2 (Bayes).PDF"), "unit_week_2_bayes");
        assert_eq!(generate_unit_name("--notes--.pdf"), "unit_notes");
    }

    #[test]
    fn title_capitalises_words() {
        let unit = Unit {
            name: "unit_2_hidden_markov".into(),
            pdf_file: "x.pdf".into(),
            target_cards: 10,
            tags: vec![],
            source: UnitSource::AutoDiscovered,
        };
        assert_eq!(unit.title(), "Unit 2 Hidden Markov");
        assert_eq!(unit.base_tag(), "unit_2_hidden_markov");
    }

    fn project(dir: &std::path::Path) -> ProjectConfig {
        ProjectConfig {
            pdfs_dir: dir.to_path_buf(),
            ..ProjectConfig::default()
        }
    }

    #[test]
    fn discovered_and_configured_units_merge() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Unit 1.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("Unit 2.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let mut config = project(dir.path());
        config.units.insert(
            "Unit 2.pdf".into(),
            UnitEntry {
                unit_name: "unit2_markov".into(),
                target_cards: Some(70),
                tags: vec!["unit2".into(), "markov".into()],
            },
        );
        config.units.insert(
            "Unit 9.pdf".into(),
            UnitEntry {
                unit_name: "unit9".into(),
                target_cards: None,
                tags: vec![],
            },
        );

        let units = all_units(&config);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].name, "unit_1");
        assert_eq!(units[0].source, UnitSource::AutoDiscovered);
        assert_eq!(units[0].target_cards, 50);
        assert_eq!(units[1].name, "unit2_markov");
        assert_eq!(units[1].base_tag(), "unit2");
        assert_eq!(units[1].source, UnitSource::Configured);
        assert_eq!(units[2].source, UnitSource::ConfiguredOnly);
        assert_eq!(units[2].tags, vec!["unit9".to_string()]);
    }

    #[test]
    fn unknown_unit_lists_alternatives() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Intro.pdf"), b"%PDF").unwrap();
        let err = find_unit(&project(dir.path()), "unit_nope").unwrap_err();
        match err {
            FlashdeckError::UnitNotFound { available, .. } => assert_eq!(available, "unit_intro"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn select_all_when_no_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        assert_eq!(select_units(&project(dir.path()), None).unwrap().len(), 1);
    }
}
