//! Packaging a deck into an Anki archive.
//!
//! A deck document is first planned into a [`PackageManifest`]: deck name
//! and id, cards with image `src` values reduced to bare file names, and the
//! media files those cards reference. The manifest is kept next to the
//! archive as JSON, and [`crate::apkg::write_apkg`] turns it into the
//! `.apkg` itself.

use crate::apkg::{write_apkg, ApkgSummary};
use crate::config::ProjectConfig;
use crate::deck::{is_column_header, CardLine};
use crate::error::FlashdeckError;
use crate::output::write_atomic;
use crate::pipeline::validate::basename;
use crate::unit::Unit;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

static RE_IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(<img\b[^>]*?\bsrc\s*=\s*["'])([^"']*)(["'])"#).unwrap());

/// A deck document read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDeck {
    /// Value of a `#deck:` directive, if any.
    pub deck_name: Option<String>,
    pub cards: Vec<CardLine>,
    /// Non-header lines that were not three-field rows.
    pub skipped_lines: usize,
}

/// Parse a deck: `#` directives and the column header are skipped, blank
/// lines ignored, and only three-field rows kept.
pub fn parse_deck(document: &str) -> ParsedDeck {
    let mut deck = ParsedDeck {
        deck_name: None,
        cards: Vec::new(),
        skipped_lines: 0,
    };
    for line in document.lines() {
        if let Some(name) = line.strip_prefix("#deck:") {
            deck.deck_name = Some(name.trim().to_string());
            continue;
        }
        if line.starts_with('#') || is_column_header(line) || line.trim().is_empty() {
            continue;
        }
        match CardLine::parse(line) {
            Some(card) => deck.cards.push(card),
            None => deck.skipped_lines += 1,
        }
    }
    deck
}

/// Replace every image `src` with its bare file name.
///
/// Returns the new HTML and the referenced file names in order of first use.
pub fn strip_image_dirs(html: &str) -> (String, Vec<String>) {
    let mut names: Vec<String> = Vec::new();
    let out = RE_IMG_SRC.replace_all(html, |caps: &regex::Captures<'_>| {
        let name = basename(&caps[2]).to_string();
        if !names.contains(&name) {
            names.push(name.clone());
        }
        format!("{}{}{}", &caps[1], name, &caps[3])
    });
    (out.into_owned(), names)
}

/// Stable 31-bit id for a key (FNV-1a).
pub(crate) fn stable_id(key: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in key.bytes() {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash & 0x7fff_ffff
}

/// Stable deck id derived from the unit name.
pub fn deck_id(unit: &str) -> u32 {
    stable_id(unit)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedCard {
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
}

/// Everything the archive needs for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub unit: String,
    pub deck_name: String,
    pub deck_id: u32,
    /// Note model name; the subject name.
    pub model_name: String,
    pub cards: Vec<PackagedCard>,
    /// Media files found under the images directory.
    pub media: Vec<PathBuf>,
    /// Referenced file names with no file on disk.
    pub missing_media: Vec<String>,
    pub generated_at: String,
}

/// Build the manifest for a deck document without touching the disk
/// except to check which media exist.
pub fn plan_package(project: &ProjectConfig, unit: &Unit, document: &str) -> PackageManifest {
    let parsed = parse_deck(document);
    if parsed.skipped_lines > 0 {
        warn!("{}: {} malformed row(s) left out of the package", unit.name, parsed.skipped_lines);
    }
    let deck_name = parsed
        .deck_name
        .unwrap_or_else(|| format!("{} - {}", project.subject.short_name, unit.title()));

    let mut referenced: BTreeSet<String> = BTreeSet::new();
    let cards = parsed
        .cards
        .into_iter()
        .map(|card| {
            let (front, front_media) = strip_image_dirs(&card.front);
            let (back, back_media) = strip_image_dirs(&card.back);
            referenced.extend(front_media);
            referenced.extend(back_media);
            PackagedCard {
                front,
                back,
                tags: card.tags,
            }
        })
        .collect();

    let (media, missing_media) = resolve_media(&project.output.images_dir, referenced);
    PackageManifest {
        unit: unit.name.clone(),
        deck_name,
        deck_id: deck_id(&unit.name),
        model_name: project.subject.name.clone(),
        cards,
        media,
        missing_media,
        generated_at: Utc::now().to_rfc3339(),
    }
}

fn resolve_media(images_dir: &Path, names: BTreeSet<String>) -> (Vec<PathBuf>, Vec<String>) {
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for name in names {
        let path = images_dir.join(&name);
        if path.is_file() {
            found.push(path);
        } else {
            missing.push(name);
        }
    }
    (found, missing)
}

/// A packaged unit: the plan and the archive built from it.
#[derive(Debug, Clone, Serialize)]
pub struct PackageOutput {
    pub manifest: PackageManifest,
    pub archive: ApkgSummary,
}

/// Read a unit's deck, plan its package, write the manifest, and build the
/// `.apkg` at `{apkg_dir}/{unit}_anki.apkg`.
pub async fn package_unit(project: &ProjectConfig, unit: &Unit) -> Result<PackageOutput, FlashdeckError> {
    let deck_path = project.output.deck_path(&unit.name);
    let document = match tokio::fs::read_to_string(&deck_path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FlashdeckError::DeckNotFound {
                unit: unit.name.clone(),
                path: deck_path,
            })
        }
        Err(e) => {
            return Err(FlashdeckError::Internal(format!(
                "reading {}: {e}",
                deck_path.display()
            )))
        }
    };

    let manifest = plan_package(project, unit, &document);
    for name in &manifest.missing_media {
        warn!("{}: referenced image {} not found", unit.name, name);
    }
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| FlashdeckError::Internal(format!("serializing manifest: {e}")))?;
    write_atomic(&project.output.package_manifest_path(&unit.name), json).await?;

    let apkg_path = project.output.apkg_path(&unit.name);
    let plan = manifest.clone();
    let archive = tokio::task::spawn_blocking(move || write_apkg(&plan, &apkg_path))
        .await
        .map_err(|e| FlashdeckError::Internal(format!("Packaging task panicked: {e}")))??;
    info!(
        "{}: {} notes, {} media -> {}",
        unit.name,
        archive.notes,
        archive.media,
        archive.path.display()
    );
    Ok(PackageOutput { manifest, archive })
}
