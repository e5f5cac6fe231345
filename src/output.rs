//! Result types of generation runs, and the atomic file writer every
//! persisted artifact goes through.

use crate::error::FlashdeckError;
use crate::pipeline::controller::StreamOutcome;
use crate::pipeline::validate::{DeckStatistics, ValidationReport};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Outcome of generating one unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitOutput {
    pub unit: String,
    /// Where the deck was written.
    pub path: PathBuf,
    pub target_cards: usize,
    /// Card rows in the written deck.
    pub card_count: usize,
    pub outcome: StreamOutcome,
    /// Validation of the written deck.
    pub validation: ValidationReport,
    pub statistics: DeckStatistics,
    /// Whether the source content was truncated to fit.
    pub truncated: bool,
    pub context_length: usize,
    pub prompt_tokens: usize,
    /// Warnings produced by repair, when enabled.
    pub repair_warnings: Vec<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl UnitOutput {
    /// True when the generation was interrupted and the deck holds partial output.
    pub fn is_partial(&self) -> bool {
        self.outcome == StreamOutcome::Interrupted
    }
}

/// Per-unit results of a batch run, in unit order.
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<(String, Result<UnitOutput, FlashdeckError>)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &UnitOutput> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &FlashdeckError)> {
        self.results
            .iter()
            .filter_map(|(u, r)| r.as_ref().err().map(|e| (u.as_str(), e)))
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    /// Whether every unit succeeded. An empty batch counts as success.
    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Write `contents` to `path` via a temporary sibling file and rename, so a
/// killed process never leaves a half-written file behind.
pub async fn write_atomic(path: &Path, contents: impl Into<Vec<u8>>) -> Result<(), FlashdeckError> {
    let path = path.to_path_buf();
    let contents = contents.into();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &contents))
        .await
        .map_err(|e| FlashdeckError::Internal(format!("Write task panicked: {}", e)))?
}

fn write_atomic_blocking(path: &Path, contents: &[u8]) -> Result<(), FlashdeckError> {
    let fail = |source: std::io::Error| FlashdeckError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(fail)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(contents).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}
