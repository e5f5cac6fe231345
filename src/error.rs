//! Error types for the flashdeck library.
//!
//! Two error types reflect two distinct layers:
//!
//! * [`FlashdeckError`]: **Fatal for one unit**: the unit cannot be
//!   processed (missing markdown, provider down, context too small, failed
//!   write). Batch operations record it per unit and move on to siblings.
//!
//! * [`ProviderError`]: **A single provider call failed**: transport error,
//!   timeout, non-2xx status, or a stream that could not be decoded. The
//!   generation controller retries these and only wraps the last one in
//!   [`FlashdeckError::GenerationFailed`] once the attempt budget is spent.
//!
//! Format problems in generated decks are *not* errors: they are reported as
//! data in [`crate::pipeline::validate::ValidationReport`] so the generated
//! work is always kept.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the flashdeck library.
#[derive(Debug, Error)]
pub enum FlashdeckError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The project configuration file does not exist.
    #[error("Configuration file not found: '{path}'\nRun `flashdeck init` to create one.")]
    ConfigNotFound { path: PathBuf },

    /// The configuration file exists but is not valid YAML for our schema.
    #[error("Failed to parse configuration '{path}': {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    /// Builder or schema validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested unit is neither configured nor discoverable.
    #[error("Unit '{unit}' not found.\nAvailable units: {available}")]
    UnitNotFound { unit: String, available: String },

    // ── Resource errors ───────────────────────────────────────────────────
    /// Markdown for the unit has not been extracted yet.
    #[error("Markdown not found for unit '{unit}': '{path}'\nRun `flashdeck extract --unit {unit}` first.")]
    MarkdownNotFound { unit: String, path: PathBuf },

    /// A referenced image file is absent on disk.
    #[error("Image file not found: '{path}'")]
    ImageNotFound { path: PathBuf },

    /// Source PDF is missing.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    PdfNotFound { path: PathBuf },

    /// No generated deck exists for the unit.
    #[error("Deck not found for unit '{unit}': '{path}'\nRun `flashdeck generate --unit {unit}` first.")]
    DeckNotFound { unit: String, path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; lecture PDFs are expected to be unencrypted.
    #[error("PDF '{path}' is encrypted.\nDecrypt it first, e.g. qpdf --decrypt in.pdf out.pdf")]
    PasswordRequired { path: PathBuf },

    /// pdfium-render returned an error while reading a page.
    #[error("Extraction failed for page {page}: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
You can:\n\
  • Install pdfium system-wide (libpdfium on the loader path).\n\
  • Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Provider errors ───────────────────────────────────────────────────
    /// The provider cannot be constructed (missing API key, unknown name).
    #[error("Generation provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The cheap availability probe failed; nothing was sent.
    #[error("Generation provider '{provider}' (model '{model}') is not available.\n{hint}")]
    ProviderUnavailable {
        provider: String,
        model: String,
        hint: String,
    },

    /// Every attempt failed; carries the last underlying error.
    #[error("Generation failed after {attempts} attempt(s): {source}")]
    GenerationFailed {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// The unit cannot fit the model context even at the truncation floor.
    #[error(
        "Unit '{unit}' does not fit the {context_length}-token context window \
(content needs {required} tokens, {available} available after reserves).\n\
Split the unit or use a provider with a larger context window."
    )]
    ContextOverflow {
        unit: String,
        context_length: usize,
        required: usize,
        available: i64,
    },

    /// Interrupted before any output was produced.
    #[error("Generation interrupted before any output was received")]
    Interrupted,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `.apkg` archive could not be built.
    #[error("Failed to build archive '{path}': {detail}")]
    PackageFailed { path: PathBuf, detail: String },

    /// The image metadata store could not be read or written.
    #[error("Metadata store '{path}': {detail}")]
    MetadataStore { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlashdeckError {
    /// True for the configuration class, which aborts before any provider call.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigParse { .. }
                | Self::InvalidConfig(_)
                | Self::UnitNotFound { .. }
        )
    }
}

/// A failed call to a generation or vision provider.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ProviderError {
    /// Connection refused, DNS failure, reset mid-body.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response (or no next chunk) within the configured timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The API answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The body or stream could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The API reported an error inside an otherwise valid stream.
    #[error("API error: {0}")]
    Api(String),

    /// Credentials are missing; retrying cannot help.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

impl ProviderError {
    /// Whether another attempt may succeed.
    ///
    /// Client errors other than 408/429 and missing credentials are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::MissingCredentials(_) => false,
            _ => true,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout { secs: 0 }
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
