//! # flashdeck
//!
//! Turn lecture PDFs into Anki-importable flashcard decks with an LLM.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract   page text + embedded images via pdfium (spawn_blocking)
//!  ├─ 2. Describe  optional vision-model descriptions of the images
//!  ├─ 3. Render    per-unit markdown with `## Page N` sections
//!  ├─ 4. Budget    split the context window, truncate at a heading
//!  ├─ 5. Prompt    content + format contract + examples + distribution
//!  ├─ 6. Stream    generate, count card rows, stop at target + 2
//!  ├─ 7. Polish    normalize, validate, optional repair and tag fixing
//!  ├─ 8. Output    `{unit}_anki.txt`, written atomically
//!  └─ 9. Package   `{unit}_anki.apkg` with embedded media
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flashdeck::{generate_unit, find_unit, ProjectConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let project = ProjectConfig::load(Path::new("config.yaml"))?;
//!     let unit = find_unit(&project, "unit_1")?;
//!     let config = project.generation_config_builder().build()?;
//!     let output = generate_unit(&project, &unit, &config).await?;
//!     eprintln!("{} cards -> {}", output.card_count, output.path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `flashdeck` binary (clap + indicatif + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod apkg;
pub mod config;
pub mod deck;
pub mod describe;
pub mod error;
pub mod extract;
pub mod generate;
pub mod metadata;
pub mod output;
pub mod package;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod render;
pub mod unit;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{GenerationConfig, GenerationConfigBuilder, ProjectConfig};
pub use describe::{describe_unit_images, ImageDescriber};
pub use error::{FlashdeckError, ProviderError};
pub use extract::extract_unit;
pub use generate::{analyze_unit, generate_unit, generate_units};
pub use metadata::{ImageMetadata, MetadataStore};
pub use output::{BatchReport, UnitOutput};
pub use package::{package_unit, PackageOutput};
pub use pipeline::controller::{GenerationController, StreamOutcome};
pub use progress::{GenerationProgressCallback, NoopProgressCallback};
pub use provider::{resolve_provider, GenerationProvider};
pub use unit::{all_units, find_unit, Unit};
