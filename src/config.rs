//! Configuration types.
//!
//! Two layers:
//!
//! * [`ProjectConfig`]: the `config.yaml` a course project keeps next to its
//!   PDFs: subject, output directories, units, card distribution, prompt
//!   material, and provider settings. Parsed with `serde_yaml`; every section
//!   has defaults so a minimal file works.
//! * [`GenerationConfig`]: runtime knobs for one generation run (retry
//!   budget, timeouts, context fallback, concurrency), built through
//!   [`GenerationConfigBuilder`], which clamps and validates.

use crate::error::FlashdeckError;
use crate::progress::ProgressCallback;
use crate::provider::GenerationProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

// ── Card distribution ────────────────────────────────────────────────────

/// The five card categories a deck is balanced across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardCategory {
    Conceptual,
    WorkedExamples,
    Algorithm,
    PatternRecognition,
    Visual,
}

impl CardCategory {
    /// Label and one-line guidance used in the prompt.
    pub fn describe(&self) -> (&'static str, &'static str) {
        match self {
            Self::Conceptual => (
                "Conceptual Understanding",
                "Why does X work? What's the intuition?",
            ),
            Self::WorkedExamples => (
                "Simple Worked Examples",
                "Tiny scenarios, obvious answers",
            ),
            Self::Algorithm => (
                "Algorithm Comprehension",
                "What does this step do? Why avoid problem X?",
            ),
            Self::PatternRecognition => (
                "Pattern Recognition",
                "Identify reasoning patterns, independence structures",
            ),
            Self::Visual => ("Visual/Diagram-Based", "with images in the question"),
        }
    }
}

/// Weights over the five card categories. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardDistribution {
    pub conceptual: f64,
    pub worked_examples: f64,
    pub algorithm: f64,
    pub pattern_recognition: f64,
    pub visual: f64,
}

impl Default for CardDistribution {
    fn default() -> Self {
        Self {
            conceptual: 0.40,
            worked_examples: 0.20,
            algorithm: 0.20,
            pattern_recognition: 0.10,
            visual: 0.10,
        }
    }
}

impl CardDistribution {
    /// Categories with their weights, in prompt order.
    pub fn entries(&self) -> [(CardCategory, f64); 5] {
        [
            (CardCategory::Conceptual, self.conceptual),
            (CardCategory::WorkedExamples, self.worked_examples),
            (CardCategory::Algorithm, self.algorithm),
            (CardCategory::PatternRecognition, self.pattern_recognition),
            (CardCategory::Visual, self.visual),
        ]
    }

    /// `floor(target * weight)` per category. The counts may sum to less
    /// than `target`; the shortfall is left to the model.
    pub fn counts(&self, target_cards: usize) -> [(CardCategory, usize); 5] {
        self.entries()
            .map(|(cat, w)| (cat, (target_cards as f64 * w + 1e-9).floor() as usize))
    }

    pub fn validate(&self) -> Result<(), FlashdeckError> {
        if self.entries().iter().any(|(_, w)| !(0.0..=1.0).contains(w)) {
            return Err(FlashdeckError::InvalidConfig(
                "card_distribution weights must be within 0.0–1.0".into(),
            ));
        }
        let sum: f64 = self.entries().iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(FlashdeckError::InvalidConfig(format!(
                "card_distribution weights must sum to 1.0, got {sum:.3}"
            )));
        }
        Ok(())
    }
}

// ── Prompt material ──────────────────────────────────────────────────────

/// An example card shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleCard {
    pub front: String,
    pub back: String,
    pub tags: String,
}

/// Subject description used for deck names and prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectConfig {
    pub name: String,
    pub short_name: String,
    pub field: String,
    pub description: String,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            name: "Lecture Notes".into(),
            short_name: "Lectures".into(),
            field: "general".into(),
            description: String::new(),
        }
    }
}

/// Prompt material from the `prompts` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptConfig {
    pub system_context: Option<String>,
    pub card_quality_focus: Vec<String>,
    pub example_cards: Vec<ExampleCard>,
}

impl PromptConfig {
    pub const DEFAULT_SYSTEM_CONTEXT: &'static str =
        "You are generating educational flashcards from lecture materials.";

    pub fn system_context(&self) -> &str {
        self.system_context
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(Self::DEFAULT_SYSTEM_CONTEXT)
    }

    pub fn quality_guidelines(&self) -> Vec<String> {
        if self.card_quality_focus.is_empty() {
            [
                "Test understanding, not memorization",
                "Use concrete examples",
                "Keep calculations simple",
                "Focus on concepts",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        } else {
            self.card_quality_focus.clone()
        }
    }

    pub fn example_cards(&self) -> Vec<ExampleCard> {
        if self.example_cards.is_empty() {
            vec![ExampleCard {
                front: "Why does this algorithm avoid recomputing history?".into(),
                back: "It uses <strong>recursive computation</strong> that only needs the previous state.".into(),
                tags: "algorithm recursion".into(),
            }]
        } else {
            self.example_cards.clone()
        }
    }
}

// ── Project layout ───────────────────────────────────────────────────────

/// Output directory layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDirs {
    pub markdown_dir: PathBuf,
    pub images_dir: PathBuf,
    pub anki_dir: PathBuf,
    pub apkg_dir: PathBuf,
    pub metadata_dir: PathBuf,
}

impl Default for OutputDirs {
    fn default() -> Self {
        Self {
            markdown_dir: "outputs/markdown".into(),
            images_dir: "outputs/images".into(),
            anki_dir: "outputs/anki".into(),
            apkg_dir: "outputs/apkg".into(),
            metadata_dir: "outputs/metadata".into(),
        }
    }
}

impl OutputDirs {
    pub fn markdown_path(&self, unit: &str) -> PathBuf {
        self.markdown_dir.join(format!("{unit}.md"))
    }

    pub fn deck_path(&self, unit: &str) -> PathBuf {
        self.anki_dir.join(format!("{unit}_anki.txt"))
    }

    pub fn package_manifest_path(&self, unit: &str) -> PathBuf {
        self.apkg_dir.join(format!("{unit}_package.json"))
    }

    pub fn apkg_path(&self, unit: &str) -> PathBuf {
        self.apkg_dir.join(format!("{unit}_anki.apkg"))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.metadata_dir.join("image_descriptions.json")
    }
}

/// PDF processing options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub extract_images: bool,
    /// Images smaller than this (width, height) are skipped as decoration.
    pub min_image_size: [u32; 2],
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            extract_images: true,
            min_image_size: [100, 100],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub target_cards: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self { target_cards: 50 }
    }
}

/// One entry of the `units` map, keyed by PDF file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub unit_name: String,
    #[serde(default)]
    pub target_cards: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
}

// ── Providers ────────────────────────────────────────────────────────────

/// Hosted Messages API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: usize,
    pub base_url: String,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            max_tokens: 16_000,
            base_url: "https://api.anthropic.com".into(),
        }
    }
}

/// Local Ollama settings for generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Total attempts per request.
    pub max_retries: u32,
    pub temperature: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "ministral-3:14b".into(),
            timeout: 120,
            max_retries: 3,
            temperature: 0.7,
        }
    }
}

/// The `generation` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    /// `claude`, `ollama`, or any provider name known to `edgequake-llm`.
    pub provider: String,
    pub claude: ClaudeConfig,
    pub ollama: OllamaConfig,
    /// Context window assumed when the provider cannot report one.
    pub context_length_fallback: usize,
    pub max_prompt_content_chars: usize,
    pub concurrency: usize,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            provider: "claude".into(),
            claude: ClaudeConfig::default(),
            ollama: OllamaConfig::default(),
            context_length_fallback: 8192,
            max_prompt_content_chars: 20_000,
            concurrency: 1,
        }
    }
}

/// The `vision` section: image description model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: u64,
    /// Course context spliced into description prompts.
    pub subject_context: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llava".into(),
            timeout: 120,
            subject_context: None,
        }
    }
}

// ── ProjectConfig ────────────────────────────────────────────────────────

/// Parsed `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub subject: SubjectConfig,
    pub pdfs_dir: PathBuf,
    pub output: OutputDirs,
    pub processing: ProcessingConfig,
    pub defaults: DefaultsConfig,
    pub units: BTreeMap<String, UnitEntry>,
    pub card_distribution: CardDistribution,
    pub prompts: PromptConfig,
    pub generation: GenerationSection,
    pub vision: VisionConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            subject: SubjectConfig::default(),
            pdfs_dir: "pdfs".into(),
            output: OutputDirs::default(),
            processing: ProcessingConfig::default(),
            defaults: DefaultsConfig::default(),
            units: BTreeMap::new(),
            card_distribution: CardDistribution::default(),
            prompts: PromptConfig::default(),
            generation: GenerationSection::default(),
            vision: VisionConfig::default(),
        }
    }
}

impl ProjectConfig {
    /// Load and validate a YAML project file.
    pub fn load(path: &Path) -> Result<Self, FlashdeckError> {
        if !path.exists() {
            return Err(FlashdeckError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| FlashdeckError::ConfigParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let config = Self::from_yaml_str(&text).map_err(|e| match e {
            FlashdeckError::ConfigParse { detail, .. } => FlashdeckError::ConfigParse {
                path: path.to_path_buf(),
                detail,
            },
            other => other,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, FlashdeckError> {
        let config: Self = serde_yaml::from_str(text).map_err(|e| FlashdeckError::ConfigParse {
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, FlashdeckError> {
        serde_yaml::to_string(self).map_err(|e| FlashdeckError::Internal(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), FlashdeckError> {
        self.card_distribution.validate()?;
        if self.defaults.target_cards == 0 {
            return Err(FlashdeckError::InvalidConfig(
                "defaults.target_cards must be ≥ 1".into(),
            ));
        }
        for (pdf, entry) in &self.units {
            if entry.unit_name.trim().is_empty() {
                return Err(FlashdeckError::InvalidConfig(format!(
                    "units.{pdf}.unit_name must not be empty"
                )));
            }
            if entry.target_cards == Some(0) {
                return Err(FlashdeckError::InvalidConfig(format!(
                    "units.{pdf}.target_cards must be ≥ 1"
                )));
            }
        }
        if self.generation.concurrency == 0 {
            return Err(FlashdeckError::InvalidConfig(
                "generation.concurrency must be ≥ 1".into(),
            ));
        }
        Ok(())
    }

    /// PDF file names in `pdfs_dir`, sorted.
    pub fn discover_pdfs(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.pdfs_dir) {
            Ok(entries) => entries,
            Err(_) => {
                warn!("PDFs directory not found: {}", self.pdfs_dir.display());
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.to_ascii_lowercase().ends_with(".pdf"))
            .collect();
        names.sort();
        debug!("Discovered {} PDF files in {}", names.len(), self.pdfs_dir.display());
        names
    }

    /// Pre-filled [`GenerationConfigBuilder`] for the configured provider.
    pub fn generation_config_builder(&self) -> GenerationConfigBuilder {
        let g = &self.generation;
        let mut builder = GenerationConfig::builder()
            .provider_name(g.provider.clone())
            .context_length_fallback(g.context_length_fallback)
            .max_prompt_content_chars(g.max_prompt_content_chars)
            .concurrency(g.concurrency)
            .max_output_tokens(g.claude.max_tokens);
        if g.provider.eq_ignore_ascii_case("ollama") {
            builder = builder
                .temperature(g.ollama.temperature)
                .max_attempts(g.ollama.max_retries)
                .request_timeout_secs(g.ollama.timeout);
        }
        builder
    }
}

// ── GenerationConfig ─────────────────────────────────────────────────────

/// Runtime settings for one generation run.
///
/// # Example
/// ```rust
/// use flashdeck::GenerationConfig;
///
/// let config = GenerationConfig::builder()
///     .max_attempts(5)
///     .retry_backoff_ms(500)
///     .context_length_fallback(32_768)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Clone)]
pub struct GenerationConfig {
    /// Provider name override (`claude`, `ollama`, or an edgequake-llm name).
    pub provider_name: Option<String>,

    /// Model override for the selected provider.
    pub model: Option<String>,

    /// Pre-built provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn GenerationProvider>>,

    /// Sampling temperature. Default: 0.7.
    pub temperature: f32,

    /// Output token cap sent to providers that require one. Default: 16000.
    pub max_output_tokens: usize,

    /// Total attempts per generation before giving up. Default: 3.
    pub max_attempts: u32,

    /// First retry delay; doubles on each further attempt. Default: 1000 ms.
    pub retry_backoff_ms: u64,

    /// Bound on a provider call and on each wait for the next chunk. Default: 120 s.
    pub request_timeout_secs: u64,

    /// Context window assumed when the provider does not report one. Default: 8192.
    ///
    /// Directly controls truncation aggressiveness for local models.
    pub context_length_fallback: usize,

    /// Hard cap on embedded content, applied after truncation. Default: 20000 chars.
    pub max_prompt_content_chars: usize,

    /// Units generated concurrently in batch runs. Default: 1.
    pub concurrency: usize,

    /// Repair and re-tag the deck before writing. Default: false.
    pub auto_repair: bool,

    /// Stream even without a chunk consumer, enabling early stop. Default: true.
    pub stream: bool,

    /// Cancelled by the caller to interrupt in-flight generations.
    pub cancellation: CancellationToken,

    /// Progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider_name: None,
            model: None,
            provider: None,
            temperature: 0.7,
            max_output_tokens: 16_000,
            max_attempts: 3,
            retry_backoff_ms: 1_000,
            request_timeout_secs: 120,
            context_length_fallback: 8192,
            max_prompt_content_chars: 20_000,
            concurrency: 1,
            auto_repair: false,
            stream: true,
            cancellation: CancellationToken::new(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("context_length_fallback", &self.context_length_fallback)
            .field("max_prompt_content_chars", &self.max_prompt_content_chars)
            .field("concurrency", &self.concurrency)
            .field("auto_repair", &self.auto_repair)
            .field("stream", &self.stream)
            .finish()
    }
}

impl GenerationConfig {
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`GenerationConfig`].
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl GenerationConfigBuilder {
    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn context_length_fallback(mut self, tokens: usize) -> Self {
        self.config.context_length_fallback = tokens;
        self
    }

    pub fn max_prompt_content_chars(mut self, chars: usize) -> Self {
        self.config.max_prompt_content_chars = chars;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn auto_repair(mut self, v: bool) -> Self {
        self.config.auto_repair = v;
        self
    }

    pub fn stream(mut self, v: bool) -> Self {
        self.config.stream = v;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.config.cancellation = token;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GenerationConfig, FlashdeckError> {
        let c = &self.config;
        if c.context_length_fallback < 1024 {
            return Err(FlashdeckError::InvalidConfig(format!(
                "context_length_fallback must be ≥ 1024 tokens, got {}",
                c.context_length_fallback
            )));
        }
        if c.max_prompt_content_chars == 0 {
            return Err(FlashdeckError::InvalidConfig(
                "max_prompt_content_chars must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_distribution_is_valid() {
        let d = CardDistribution::default();
        assert!(d.validate().is_ok());
    }

    #[test]
    fn distribution_must_sum_to_one() {
        let d = CardDistribution {
            conceptual: 0.5,
            ..CardDistribution::default()
        };
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn counts_floor_and_may_undershoot() {
        let counts = CardDistribution::default().counts(7);
        let values: Vec<usize> = counts.iter().map(|(_, n)| *n).collect();
        // 2.8, 1.4, 1.4, 0.7, 0.7
        assert_eq!(values, vec![2, 1, 1, 0, 0]);
        assert!(values.iter().sum::<usize>() < 7);
    }

    #[test]
    fn counts_are_exact_for_round_targets() {
        let counts = CardDistribution::default().counts(60);
        let values: Vec<usize> = counts.iter().map(|(_, n)| *n).collect();
        assert_eq!(values, vec![24, 12, 12, 6, 6]);
    }

    #[test]
    fn prompt_defaults_apply_when_empty() {
        let p = PromptConfig::default();
        assert!(p.system_context().contains("educational flashcards"));
        assert_eq!(p.quality_guidelines().len(), 4);
        assert_eq!(p.example_cards().len(), 1);
    }

    #[test]
    fn minimal_yaml_uses_defaults() {
        let cfg = ProjectConfig::from_yaml_str("subject:\n  name: Probabilistic AI\n").unwrap();
        assert_eq!(cfg.subject.name, "Probabilistic AI");
        assert_eq!(cfg.defaults.target_cards, 50);
        assert_eq!(cfg.generation.provider, "claude");
        assert_eq!(cfg.generation.ollama.base_url, "http://localhost:11434");
        assert_eq!(cfg.processing.min_image_size, [100, 100]);
    }

    #[test]
    fn yaml_units_and_distribution_parse() {
        let yaml = r#"
units:
  "Unit 1.pdf":
    unit_name: unit1_intro
    target_cards: 40
    tags: [unit1, intro]
card_distribution:
  conceptual: 0.5
  worked_examples: 0.2
  algorithm: 0.1
  pattern_recognition: 0.1
  visual: 0.1
generation:
  provider: ollama
  ollama:
    model: qwen3:8b
    max_retries: 5
"#;
        let cfg = ProjectConfig::from_yaml_str(yaml).unwrap();
        let unit = &cfg.units["Unit 1.pdf"];
        assert_eq!(unit.unit_name, "unit1_intro");
        assert_eq!(unit.target_cards, Some(40));
        assert_eq!(cfg.generation.ollama.model, "qwen3:8b");

        let gen = cfg.generation_config_builder().build().unwrap();
        assert_eq!(gen.max_attempts, 5);
        assert_eq!(gen.provider_name.as_deref(), Some("ollama"));
    }

    #[test]
    fn invalid_distribution_in_yaml_is_rejected() {
        let yaml = "card_distribution:\n  conceptual: 0.9\n";
        let err = ProjectConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = ProjectConfig::from_yaml_str("units: [not, a, map]").unwrap_err();
        assert!(matches!(err, FlashdeckError::ConfigParse { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = ProjectConfig::load(Path::new("/definitely/missing/config.yaml")).unwrap_err();
        assert!(matches!(err, FlashdeckError::ConfigNotFound { .. }));
    }

    #[test]
    fn builder_clamps_values() {
        let c = GenerationConfig::builder()
            .temperature(5.0)
            .max_attempts(0)
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.max_attempts, 1);
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn builder_rejects_tiny_context_fallback() {
        let err = GenerationConfig::builder()
            .context_length_fallback(100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("context_length_fallback"));
    }

    #[test]
    fn output_paths_follow_layout() {
        let dirs = OutputDirs::default();
        assert_eq!(
            dirs.deck_path("unit_1"),
            PathBuf::from("outputs/anki/unit_1_anki.txt")
        );
        assert_eq!(
            dirs.metadata_path(),
            PathBuf::from("outputs/metadata/image_descriptions.json")
        );
    }
}
