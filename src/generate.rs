//! Unit generation entry points.
//!
//! One unit goes through a fixed sequence: load markdown and image records,
//! probe the provider, fit the content into the context budget, compile the
//! prompt, run the controller, normalize, validate (and optionally repair),
//! then write the deck once, atomically. Batch runs repeat this per unit with
//! bounded concurrency and report every unit's result separately.

use crate::config::{GenerationConfig, ProjectConfig};
use crate::error::FlashdeckError;
use crate::metadata::{ImageMetadata, MetadataStore};
use crate::output::{write_atomic, BatchReport, UnitOutput};
use crate::pipeline::budget::{compute_budget, estimate_tokens, page_scaled_target, ContextBudget, ContextUsageReport};
use crate::pipeline::controller::{ChunkCallback, GenerationController, StreamOutcome};
use crate::pipeline::normalize::normalize;
use crate::pipeline::prompt::{compile, PromptRequest};
use crate::pipeline::truncate::{truncate, Truncation};
use crate::pipeline::validate::{deck_statistics, normalize_tags, repair, validate};
use crate::provider::{resolve_provider, GenerationProvider};
use crate::unit::Unit;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Card target used by `analyze` when neither a target nor a page count is known.
pub const DEFAULT_ANALYZE_TARGET: usize = 60;

/// The provider a run uses: the pre-built one, or one resolved by name.
pub fn provider_for(
    project: &ProjectConfig,
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationProvider>, FlashdeckError> {
    match &config.provider {
        Some(p) => Ok(Arc::clone(p)),
        None => resolve_provider(
            project,
            config.provider_name.as_deref(),
            config.model.as_deref(),
            config.max_output_tokens,
        ),
    }
}

/// Generate and write the deck for one unit.
pub async fn generate_unit(
    project: &ProjectConfig,
    unit: &Unit,
    config: &GenerationConfig,
) -> Result<UnitOutput, FlashdeckError> {
    let provider = provider_for(project, config)?;
    run_unit(project, unit, provider, config).await
}

/// Generate every unit in `units`, isolating failures per unit.
///
/// Provider resolution happens once up front; a configuration error there
/// aborts the batch before any unit is attempted.
pub async fn generate_units(
    project: &ProjectConfig,
    units: &[Unit],
    config: &GenerationConfig,
) -> Result<BatchReport, FlashdeckError> {
    let provider = provider_for(project, config)?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(units.len());
    }

    let mut results: Vec<(usize, String, Result<UnitOutput, FlashdeckError>)> =
        stream::iter(units.iter().enumerate())
            .map(|(idx, unit)| {
                let provider = Arc::clone(&provider);
                async move {
                    let result = run_unit(project, unit, provider, config).await;
                    (idx, unit.name.clone(), result)
                }
            })
            .buffer_unordered(config.concurrency.max(1))
            .collect()
            .await;
    results.sort_by_key(|(idx, _, _)| *idx);

    let report = BatchReport {
        results: results.into_iter().map(|(_, name, r)| (name, r)).collect(),
    };
    info!(
        "Batch complete: {}/{} units succeeded",
        report.success_count(),
        report.results.len()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(report.results.len(), report.success_count());
    }
    Ok(report)
}

async fn run_unit(
    project: &ProjectConfig,
    unit: &Unit,
    provider: Arc<dyn GenerationProvider>,
    config: &GenerationConfig,
) -> Result<UnitOutput, FlashdeckError> {
    let result = if config.cancellation.is_cancelled() {
        Err(FlashdeckError::Interrupted)
    } else {
        generate_with_provider(project, unit, provider, config).await
    };
    if let Some(ref cb) = config.progress_callback {
        match &result {
            Ok(out) => cb.on_unit_complete(&unit.name, out.card_count, out.is_partial()),
            Err(e) => cb.on_unit_error(&unit.name, &e.to_string()),
        }
    }
    if let Err(ref e) = result {
        warn!("Unit {} failed: {}", unit.name, e);
    }
    result
}

/// The full single-unit pipeline against an already-resolved provider.
pub async fn generate_with_provider(
    project: &ProjectConfig,
    unit: &Unit,
    provider: Arc<dyn GenerationProvider>,
    config: &GenerationConfig,
) -> Result<UnitOutput, FlashdeckError> {
    let start = Instant::now();
    info!("Generating {} (~{} cards)", unit.name, unit.target_cards);

    // ── Step 1: Load inputs ──────────────────────────────────────────────
    let markdown = load_markdown(project, &unit.name).await?;
    let images = load_images(project, &unit.name).await?;

    // ── Step 2: Probe the provider ───────────────────────────────────────
    if !provider.check_availability().await {
        return Err(unavailable(provider.as_ref()));
    }

    // ── Step 3: Fit the content ──────────────────────────────────────────
    let context_length = match provider.context_length().await {
        Some(n) => n,
        None => {
            debug!(
                "{} reports no context length, assuming {}",
                provider.name(),
                config.context_length_fallback
            );
            config.context_length_fallback
        }
    };
    let plan = plan_prompt(project, unit, &markdown, &images, context_length, config)?;
    let prompt_tokens = estimate_tokens(&plan.prompt);

    // ── Step 4: Generate ─────────────────────────────────────────────────
    if let Some(ref cb) = config.progress_callback {
        cb.on_unit_start(&unit.name, unit.target_cards, prompt_tokens);
    }
    let controller = GenerationController::new(Arc::clone(&provider), config);
    let forward = |chunk: &str, card_lines: usize| {
        if let Some(ref cb) = config.progress_callback {
            cb.on_chunk(&unit.name, chunk, card_lines);
        }
    };
    let on_chunk: Option<ChunkCallback<'_>> = config
        .progress_callback
        .as_ref()
        .map(|_| &forward as ChunkCallback<'_>);
    let raw = controller.generate(&plan.prompt, unit.target_cards, on_chunk).await?;

    // ── Step 5: Normalize, validate, repair ──────────────────────────────
    let mut document = normalize(&raw.text, unit.target_cards);
    let mut repair_warnings = Vec::new();
    if config.auto_repair {
        let repaired = repair(&document);
        repair_warnings = repaired.warnings;
        document = normalize_tags(&repaired.document, unit.base_tag());
    }
    let validation = validate(&document);
    if !validation.valid {
        warn!(
            "{}: deck has {} format error(s); written anyway",
            unit.name,
            validation.errors.len()
        );
    }

    // ── Step 6: Persist ──────────────────────────────────────────────────
    let path = project.output.deck_path(&unit.name);
    write_atomic(&path, document.as_bytes()).await?;
    let statistics = deck_statistics(&document);
    info!(
        "{}: wrote {} cards to {}{}",
        unit.name,
        validation.card_count,
        path.display(),
        if raw.outcome == StreamOutcome::Interrupted {
            " (partial)"
        } else {
            ""
        }
    );

    Ok(UnitOutput {
        unit: unit.name.clone(),
        path,
        target_cards: unit.target_cards,
        card_count: validation.card_count,
        outcome: raw.outcome,
        validation,
        statistics,
        truncated: plan.truncation.was_truncated(),
        context_length,
        prompt_tokens,
        repair_warnings,
        attempts: raw.attempts,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Context usage of one unit without calling the provider.
///
/// `target_cards` defaults to 1.5 cards per page of the rendered markdown,
/// then to [`DEFAULT_ANALYZE_TARGET`].
pub async fn analyze_unit(
    project: &ProjectConfig,
    unit: &Unit,
    context_length: usize,
    target_cards: Option<usize>,
) -> Result<ContextUsageReport, FlashdeckError> {
    let markdown = load_markdown(project, &unit.name).await?;
    let images = load_images(project, &unit.name).await?;
    let pages = count_pages(&markdown);
    let target = target_cards.unwrap_or(if pages > 0 {
        page_scaled_target(pages)
    } else {
        DEFAULT_ANALYZE_TARGET
    });

    let material = PromptMaterial::new(project);
    let overhead = estimate_tokens(&compile(&material.request(unit, "", &[], target, usize::MAX)));
    let described = images.iter().filter(|m| m.is_described()).count();
    let budget = compute_budget(context_length, overhead, described, target);
    Ok(ContextUsageReport::new(&unit.name, estimate_tokens(&markdown), &budget, target))
}

/// Number of `## Page N` sections in rendered markdown.
pub fn count_pages(markdown: &str) -> usize {
    markdown
        .lines()
        .filter(|l| {
            l.strip_prefix("## Page ")
                .is_some_and(|n| !n.is_empty() && n.trim().chars().all(|c| c.is_ascii_digit()))
        })
        .count()
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn load_markdown(project: &ProjectConfig, unit: &str) -> Result<String, FlashdeckError> {
    let path = project.output.markdown_path(unit);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(FlashdeckError::MarkdownNotFound {
                unit: unit.to_string(),
                path,
            })
        }
        Err(e) => Err(FlashdeckError::Internal(format!("reading {}: {e}", path.display()))),
    }
}

async fn load_images(project: &ProjectConfig, unit: &str) -> Result<Vec<ImageMetadata>, FlashdeckError> {
    let store = MetadataStore::new(project.output.metadata_path());
    let images = store.load().await?.images_for_unit(unit);
    debug!(
        "{}: {} image(s), {} described",
        unit,
        images.len(),
        images.iter().filter(|m| m.is_described()).count()
    );
    Ok(images)
}

fn unavailable(provider: &dyn GenerationProvider) -> FlashdeckError {
    let hint = if provider.name() == "ollama" {
        format!(
            "Start the server with `ollama serve` and pull the model with `ollama pull {}`.",
            provider.model()
        )
    } else {
        "Check network access and the provider's API key.".to_string()
    };
    FlashdeckError::ProviderUnavailable {
        provider: provider.name().to_string(),
        model: provider.model().to_string(),
        hint,
    }
}

/// Owned prompt material borrowed by [`PromptRequest`]s.
struct PromptMaterial<'p> {
    project: &'p ProjectConfig,
    guidelines: Vec<String>,
    examples: Vec<crate::config::ExampleCard>,
}

impl<'p> PromptMaterial<'p> {
    fn new(project: &'p ProjectConfig) -> Self {
        Self {
            project,
            guidelines: project.prompts.quality_guidelines(),
            examples: project.prompts.example_cards(),
        }
    }

    fn request<'a>(
        &'a self,
        unit: &'a Unit,
        content: &'a str,
        images: &'a [ImageMetadata],
        target_cards: usize,
        max_content_chars: usize,
    ) -> PromptRequest<'a> {
        PromptRequest {
            unit_name: &unit.name,
            content,
            images,
            target_cards,
            distribution: &self.project.card_distribution,
            quality_guidelines: &self.guidelines,
            example_cards: &self.examples,
            subject_context: self.project.prompts.system_context(),
            max_content_chars,
        }
    }
}

struct PromptPlan {
    prompt: String,
    truncation: Truncation,
}

/// Budget the context window and compile the final prompt.
fn plan_prompt(
    project: &ProjectConfig,
    unit: &Unit,
    markdown: &str,
    images: &[ImageMetadata],
    context_length: usize,
    config: &GenerationConfig,
) -> Result<PromptPlan, FlashdeckError> {
    let material = PromptMaterial::new(project);
    let max_chars = config.max_prompt_content_chars;

    let overhead = estimate_tokens(&compile(&material.request(unit, "", &[], unit.target_cards, max_chars)));
    let described = images.iter().filter(|m| m.is_described()).count();
    let budget = compute_budget(context_length, overhead, described, unit.target_cards);
    debug!(
        "{}: context {} = overhead {} + images {} + output {} + content {}",
        unit.name,
        context_length,
        budget.overhead_tokens,
        budget.image_reserve,
        budget.output_reserve,
        budget.available_for_content
    );

    let content_tokens = estimate_tokens(markdown);
    if !budget.is_feasible() {
        return Err(overflow(unit, context_length, content_tokens, &budget));
    }

    let truncation = truncate(markdown, budget.available_for_content);
    if truncation.was_truncated() {
        warn!(
            "{}: content ~{} tokens exceeds {} available; kept {}/{} chars{}",
            unit.name,
            content_tokens,
            budget.available_for_content,
            truncation.kept_chars,
            truncation.original_chars,
            if truncation.at_boundary { " at a heading" } else { "" }
        );
        let kept_tokens = estimate_tokens(&truncation.content) as i64;
        if kept_tokens > budget.available_for_content {
            return Err(overflow(unit, context_length, kept_tokens as usize, &budget));
        }
    }

    let prompt = compile(&material.request(unit, &truncation.content, images, unit.target_cards, max_chars));
    Ok(PromptPlan { prompt, truncation })
}

fn overflow(unit: &Unit, context_length: usize, required: usize, budget: &ContextBudget) -> FlashdeckError {
    FlashdeckError::ContextOverflow {
        unit: unit.name.clone(),
        context_length,
        required,
        available: budget.available_for_content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitSource;

    fn unit(target: usize) -> Unit {
        Unit {
            name: "unit_1".into(),
            pdf_file: "Unit 1.pdf".into(),
            target_cards: target,
            tags: vec!["unit_1".into()],
            source: UnitSource::AutoDiscovered,
        }
    }

    fn config() -> GenerationConfig {
        GenerationConfig::default()
    }

    #[test]
    fn counts_page_sections() {
        let md = "# T\n\n## Page 1\n\nx\n\n## Page 12\n\ny\n\n## Pages of notes\n## Images Summary\n";
        assert_eq!(count_pages(md), 2);
    }

    #[test]
    fn small_content_is_embedded_whole() {
        let project = ProjectConfig::default();
        let md = "## Page 1\n\nBayes rule relates conditionals.";
        let plan = plan_prompt(&project, &unit(10), md, &[], 200_000, &config()).unwrap();
        assert!(!plan.truncation.was_truncated());
        assert!(plan.prompt.contains("Bayes rule relates conditionals."));
    }

    #[test]
    fn oversized_content_is_truncated_with_notice() {
        let project = ProjectConfig::default();
        let md = format!("## Page 1\n\n{}", "word ".repeat(32_000));
        let plan = plan_prompt(&project, &unit(20), &md, &[], 32_768, &config()).unwrap();
        assert!(plan.truncation.was_truncated());
        assert!(plan.truncation.content.contains("content truncated"));
    }

    #[test]
    fn no_room_for_content_is_overflow() {
        let project = ProjectConfig::default();
        let err = plan_prompt(&project, &unit(100), "text", &[], 8192, &config())
            .err()
            .unwrap();
        match err {
            FlashdeckError::ContextOverflow { available, .. } => assert!(available <= 0),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn floored_excerpt_over_budget_is_overflow() {
        let project = ProjectConfig::default();
        let md = "x".repeat(200_000);
        let err = plan_prompt(&project, &unit(20), &md, &[], 8192, &config()).err().unwrap();
        assert!(matches!(err, FlashdeckError::ContextOverflow { .. }));
    }

    #[tokio::test]
    async fn analyze_reports_overflow_without_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = ProjectConfig::default();
        project.output.markdown_dir = dir.path().join("md");
        project.output.metadata_dir = dir.path().join("meta");
        std::fs::create_dir_all(&project.output.markdown_dir).unwrap();
        let md = format!("# Unit 1\n\n## Page 1\n\n{}\n\n## Page 2\n\nmore", "z".repeat(40_000));
        std::fs::write(project.output.markdown_path("unit_1"), md).unwrap();

        let report = analyze_unit(&project, &unit(50), 8192, None).await.unwrap();
        assert_eq!(report.target_cards, 3);
        assert!(!report.fits());
        assert!(report.overflow_tokens > 0);

        let roomy = analyze_unit(&project, &unit(50), 200_000, Some(60)).await.unwrap();
        assert!(roomy.fits());
        assert_eq!(roomy.target_cards, 60);
    }

    #[tokio::test]
    async fn missing_markdown_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = ProjectConfig::default();
        project.output.markdown_dir = dir.path().to_path_buf();
        let err = analyze_unit(&project, &unit(10), 8192, None).await.unwrap_err();
        assert!(matches!(err, FlashdeckError::MarkdownNotFound { .. }));
    }
}
