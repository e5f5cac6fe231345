//! Image descriptions from a vision model.
//!
//! Descriptions are best-effort: a failed image is logged and skipped, and
//! every success is written to the metadata store immediately so an aborted
//! run keeps what it finished. Re-extracting the unit afterwards embeds the
//! descriptions in its markdown.

use crate::config::ProjectConfig;
use crate::error::{FlashdeckError, ProviderError};
use crate::metadata::{ImageMetadata, MetadataStore};
use crate::prompts::image_description_prompt;
use crate::render::{page_context, PAGE_CONTEXT_CHARS};
use crate::unit::Unit;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A model that can describe an image file.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    fn model(&self) -> &str;

    async fn check_availability(&self) -> bool;

    /// Free-text description of the image at `image_path`.
    async fn describe(&self, image_path: &Path, prompt: &str) -> Result<String, ProviderError>;
}

/// Keyword groups checked in order; the first hit wins.
const IMAGE_TYPES: &[(&str, &[&str])] = &[
    ("network", &["bayesian network", "network diagram", "network structure"]),
    ("algorithm", &["algorithm", "flowchart", "flow chart", "pseudocode"]),
    ("formula", &["formula", "equation", "mathematical expression"]),
    ("table", &["table", "comparison table", "matrix"]),
    ("graph", &["graph", "plot", "chart"]),
    ("example", &["example", "worked example", "problem"]),
];

/// Coarse image type from the words of a description. Defaults to `diagram`.
pub fn classify_image_type(description: &str) -> &'static str {
    let lower = description.to_lowercase();
    IMAGE_TYPES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(kind, _)| *kind)
        .unwrap_or("diagram")
}

/// Whether a description suggests mathematical content.
pub fn mentions_math(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("yes") || lower.contains("math")
}

/// Counts from one description pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DescribeSummary {
    pub unit: String,
    pub described: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Course context for description prompts.
pub fn subject_context(project: &ProjectConfig) -> String {
    project
        .vision
        .subject_context
        .clone()
        .unwrap_or_else(|| format!("lecture slides on {}", project.subject.name))
}

/// Describe every image of `unit`. Already described images are skipped
/// unless `force` is set.
pub async fn describe_unit_images(
    project: &ProjectConfig,
    unit: &Unit,
    describer: &dyn ImageDescriber,
    store: &MetadataStore,
    force: bool,
) -> Result<DescribeSummary, FlashdeckError> {
    let mut summary = DescribeSummary {
        unit: unit.name.clone(),
        ..DescribeSummary::default()
    };
    let images = store.load().await?.images_for_unit(&unit.name);
    if images.is_empty() {
        info!("{}: no extracted images to describe", unit.name);
        return Ok(summary);
    }

    if !describer.check_availability().await {
        return Err(FlashdeckError::ProviderUnavailable {
            provider: "vision".into(),
            model: describer.model().to_string(),
            hint: format!(
                "Start the server with `ollama serve` and pull the model with `ollama pull {}`.",
                describer.model()
            ),
        });
    }

    let markdown = tokio::fs::read_to_string(project.output.markdown_path(&unit.name))
        .await
        .ok();
    if markdown.is_none() {
        debug!("{}: no markdown, describing without page context", unit.name);
    }
    let context = subject_context(project);

    for image in &images {
        if image.is_described() && !force {
            summary.skipped += 1;
            continue;
        }
        let page_text = markdown
            .as_deref()
            .and_then(|md| page_context(md, image.page, PAGE_CONTEXT_CHARS));
        let prompt = image_description_prompt(Some(image.page), page_text.as_deref(), &context);
        let path = image_path(project, image);

        match describer.describe(&path, &prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                let image_type = classify_image_type(&text).to_string();
                let math = mentions_math(&text);
                let model = describer.model().to_string();
                let filename = image.filename.clone();
                store
                    .update(|doc| {
                        doc.ollama_model = Some(model);
                        doc.set_description(&filename, text, image_type, math)
                    })
                    .await?;
                debug!("Described {}", image.filename);
                summary.described += 1;
            }
            Ok(_) => {
                warn!("{}: empty description, skipped", image.filename);
                summary.failed += 1;
            }
            Err(e) => {
                warn!("{}: description failed: {}", image.filename, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "{}: described {}, skipped {}, failed {}",
        unit.name, summary.described, summary.skipped, summary.failed
    );
    Ok(summary)
}

/// The recorded path when it exists, else the file under `images_dir`.
fn image_path(project: &ProjectConfig, image: &ImageMetadata) -> PathBuf {
    let recorded = PathBuf::from(&image.path);
    if recorded.exists() {
        recorded
    } else {
        project.output.images_dir.join(&image.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Dimensions;
    use crate::unit::UnitSource;
    use std::sync::Mutex;

    struct FakeDescriber {
        available: bool,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageDescriber for FakeDescriber {
        fn model(&self) -> &str {
            "llava"
        }

        async fn check_availability(&self) -> bool {
            self.available
        }

        async fn describe(&self, image_path: &Path, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let name = image_path.file_name().unwrap().to_string_lossy().to_string();
            if name.contains("img02") {
                Err(ProviderError::Timeout { secs: 1 })
            } else {
                Ok("A flowchart of the forward algorithm.".into())
            }
        }
    }

    fn fake(available: bool) -> FakeDescriber {
        FakeDescriber {
            available,
            prompts: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn classifies_by_first_matching_group() {
        assert_eq!(classify_image_type("A Bayesian network with 4 nodes"), "network");
        assert_eq!(classify_image_type("Pseudocode for value iteration"), "algorithm");
        assert_eq!(classify_image_type("The equation for Bayes rule"), "formula");
        assert_eq!(classify_image_type("A comparison table"), "table");
        assert_eq!(classify_image_type("A bar chart"), "graph");
        assert_eq!(classify_image_type("A worked example"), "example");
        assert_eq!(classify_image_type("Three boxes and arrows"), "diagram");
        assert_eq!(classify_image_type("An algorithm plotted as a graph"), "algorithm");
    }

    #[test]
    fn math_detection_is_keyword_based() {
        assert!(mentions_math("Contains math: yes"));
        assert!(mentions_math("Mathematical notation"));
        assert!(!mentions_math("A photo of a robot"));
    }

    fn setup(dir: &Path) -> (ProjectConfig, Unit, MetadataStore) {
        let mut project = ProjectConfig::default();
        project.output.markdown_dir = dir.join("md");
        project.output.images_dir = dir.join("images");
        project.output.metadata_dir = dir.join("meta");
        let unit = Unit {
            name: "unit_1".into(),
            pdf_file: "Unit 1.pdf".into(),
            target_cards: 10,
            tags: vec!["unit_1".into()],
            source: UnitSource::AutoDiscovered,
        };
        let store = MetadataStore::new(project.output.metadata_path());
        (project, unit, store)
    }

    fn record(name: &str, page: u32) -> ImageMetadata {
        ImageMetadata::extracted(
            name.to_string(),
            "unit_1",
            page,
            format!("missing/{name}"),
            Dimensions {
                width: 200,
                height: 200,
            },
        )
    }

    #[tokio::test]
    async fn describes_and_records_with_page_context() {
        let dir = tempfile::tempdir().unwrap();
        let (project, unit, store) = setup(dir.path());
        std::fs::create_dir_all(&project.output.markdown_dir).unwrap();
        std::fs::write(
            project.output.markdown_path("unit_1"),
            "# Unit 1\n\n## Page 1\n\nThe forward algorithm sums over paths.\n\n## Page 2\n\nOther.",
        )
        .unwrap();
        store
            .record_images(vec![
                record("unit_1_page01_img01.png", 1),
                record("unit_1_page01_img02.png", 1),
            ])
            .await
            .unwrap();

        let describer = fake(true);
        let summary = describe_unit_images(&project, &unit, &describer, &store, false)
            .await
            .unwrap();
        assert_eq!(summary.described, 1);
        assert_eq!(summary.failed, 1);
        assert!(describer.prompts.lock().unwrap()[0].contains("forward algorithm sums over paths"));

        let doc = store.load().await.unwrap();
        assert_eq!(doc.ollama_model.as_deref(), Some("llava"));
        let described = &doc.images["unit_1_page01_img01.png"];
        assert_eq!(described.image_type.as_deref(), Some("algorithm"));
        assert!(!doc.images["unit_1_page01_img02.png"].is_described());

        let again = describe_unit_images(&project, &unit, &describer, &store, false)
            .await
            .unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(again.described, 0);
    }

    #[tokio::test]
    async fn unavailable_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (project, unit, store) = setup(dir.path());
        store
            .record_images(vec![record("unit_1_page01_img01.png", 1)])
            .await
            .unwrap();
        let err = describe_unit_images(&project, &unit, &fake(false), &store, false)
            .await
            .unwrap_err();
        assert!(matches!(err, FlashdeckError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn nothing_to_describe_skips_the_probe() {
        let dir = tempfile::tempdir().unwrap();
        let (project, unit, store) = setup(dir.path());
        let summary = describe_unit_images(&project, &unit, &fake(false), &store, false)
            .await
            .unwrap();
        assert_eq!(summary, DescribeSummary {
            unit: "unit_1".into(),
            ..DescribeSummary::default()
        });
    }
}
