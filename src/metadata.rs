//! Image metadata store.
//!
//! One JSON file shared by extraction, description, and generation:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "generated_at": "2026-03-01T10:00:00+00:00",
//!   "ollama_model": "llava",
//!   "images": {
//!     "unit1_page03_img01.png": {
//!       "unit": "unit1", "page": 3, "path": "outputs/images/unit1_page03_img01.png",
//!       "dimensions": {"width": 640, "height": 480},
//!       "extracted_at": "...", "description": "...", "type": "diagram",
//!       "contains_math": false, "described_at": "..."
//!     }
//!   }
//! }
//! ```
//!
//! `filename` is the key across the whole store. Records are only ever
//! inserted or updated. Reads take no lock; writes are read-modify-write
//! under an async mutex and land through [`crate::output::write_atomic`], so
//! a reader always sees a complete file (last writer wins across processes).

use crate::error::FlashdeckError;
use crate::output::write_atomic;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const SCHEMA_VERSION: &str = "1.0";

/// Pixel dimensions of an extracted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// One extracted image and its optional enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Filled from the map key when absent in the file.
    #[serde(default)]
    pub filename: String,
    pub unit: String,
    pub page: u32,
    pub path: String,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub extracted_at: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub image_type: Option<String>,
    #[serde(default)]
    pub contains_math: Option<bool>,
    #[serde(default)]
    pub described_at: Option<String>,
}

impl ImageMetadata {
    /// A fresh record for a just-extracted image.
    pub fn extracted(
        filename: impl Into<String>,
        unit: impl Into<String>,
        page: u32,
        path: impl Into<String>,
        dimensions: Dimensions,
    ) -> Self {
        Self {
            filename: filename.into(),
            unit: unit.into(),
            page,
            path: path.into(),
            dimensions,
            extracted_at: Some(now()),
            description: None,
            image_type: None,
            contains_math: None,
            described_at: None,
        }
    }

    pub fn is_described(&self) -> bool {
        self.description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
    }
}

/// The whole store file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub version: String,
    pub generated_at: String,
    #[serde(default)]
    pub ollama_model: Option<String>,
    #[serde(default)]
    pub images: BTreeMap<String, ImageMetadata>,
}

impl Default for MetadataDocument {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.into(),
            generated_at: now(),
            ollama_model: None,
            images: BTreeMap::new(),
        }
    }
}

impl MetadataDocument {
    /// Images of `unit`, ordered by page then filename.
    pub fn images_for_unit(&self, unit: &str) -> Vec<ImageMetadata> {
        let mut images: Vec<ImageMetadata> = self
            .images
            .values()
            .filter(|m| m.unit == unit)
            .cloned()
            .collect();
        images.sort_by(|a, b| a.page.cmp(&b.page).then_with(|| a.filename.cmp(&b.filename)));
        images
    }

    /// Insert a record, or refresh an existing one without losing its
    /// description fields.
    pub fn upsert(&mut self, record: ImageMetadata) {
        match self.images.get_mut(&record.filename) {
            Some(existing) => {
                existing.unit = record.unit;
                existing.page = record.page;
                existing.path = record.path;
                existing.dimensions = record.dimensions;
                existing.extracted_at = record.extracted_at.or(existing.extracted_at.take());
                if record.description.is_some() {
                    existing.description = record.description;
                    existing.image_type = record.image_type;
                    existing.contains_math = record.contains_math;
                    existing.described_at = record.described_at;
                }
            }
            None => {
                self.images.insert(record.filename.clone(), record);
            }
        }
    }

    /// Record a description. Returns false when the image is unknown.
    pub fn set_description(
        &mut self,
        filename: &str,
        description: String,
        image_type: String,
        contains_math: bool,
    ) -> bool {
        match self.images.get_mut(filename) {
            Some(record) => {
                record.description = Some(description);
                record.image_type = Some(image_type);
                record.contains_math = Some(contains_math);
                record.described_at = Some(now());
                true
            }
            None => false,
        }
    }
}

/// Handle on the JSON store file.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store. A missing file is an empty store.
    pub async fn load(&self) -> Result<MetadataDocument, FlashdeckError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No metadata store at {}", self.path.display());
                return Ok(MetadataDocument::default());
            }
            Err(e) => return Err(self.error(e.to_string())),
        };
        let mut doc: MetadataDocument =
            serde_json::from_str(&text).map_err(|e| self.error(format!("invalid JSON: {e}")))?;
        if doc.version != SCHEMA_VERSION {
            warn!(
                "Metadata store {} has version {}, expected {}",
                self.path.display(),
                doc.version,
                SCHEMA_VERSION
            );
        }
        for (key, record) in doc.images.iter_mut() {
            if record.filename.is_empty() {
                record.filename = key.clone();
            }
        }
        Ok(doc)
    }

    /// Read-modify-write under the store's write lock.
    ///
    /// Returns whatever `f` returns, after the file has been written.
    pub async fn update<F, T>(&self, f: F) -> Result<T, FlashdeckError>
    where
        F: FnOnce(&mut MetadataDocument) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        let out = f(&mut doc);
        doc.generated_at = now();
        let json = serde_json::to_string_pretty(&doc).map_err(|e| self.error(e.to_string()))?;
        write_atomic(&self.path, json).await?;
        Ok(out)
    }

    /// Insert or refresh a batch of extracted images.
    pub async fn record_images(&self, records: Vec<ImageMetadata>) -> Result<usize, FlashdeckError> {
        let count = records.len();
        self.update(|doc| {
            for record in records {
                doc.upsert(record);
            }
        })
        .await?;
        Ok(count)
    }

    fn error(&self, detail: String) -> FlashdeckError {
        FlashdeckError::MetadataStore {
            path: self.path.clone(),
            detail,
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}
