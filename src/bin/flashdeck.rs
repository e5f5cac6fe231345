//! CLI binary for flashdeck.
//!
//! A thin shim over the library crate: maps subcommands and flags to
//! library calls, renders progress, and turns per-unit failures into a
//! non-zero exit status.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use flashdeck::config::{SubjectConfig, DEFAULT_CONFIG_FILE};
use flashdeck::describe::DescribeSummary;
use flashdeck::extract::ExtractSummary;
use flashdeck::pipeline::budget::ContextUsageReport;
use flashdeck::progress::ProgressCallback;
use flashdeck::provider::OllamaProvider;
use flashdeck::{
    all_units, analyze_unit, describe_unit_images, extract_unit, generate_units, package_unit,
    resolve_provider, GenerationProgressCallback, MetadataStore, ProjectConfig, StreamOutcome,
    Unit, UnitOutput,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────

/// Unit-level progress bar with a live card counter in the message.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:36.green/238}] {pos:>2}/{len} units  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Generating");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_units: usize) {
        self.bar.set_length(total_units as u64);
    }

    fn on_unit_start(&self, unit: &str, target_cards: usize, prompt_tokens: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            dim("→"),
            unit,
            dim(&format!("target {target_cards}, prompt ~{prompt_tokens} tokens"))
        ));
        self.bar.set_message(format!("{unit}: 0 cards"));
    }

    fn on_chunk(&self, unit: &str, _chunk: &str, card_lines: usize) {
        self.bar.set_message(format!("{unit}: {card_lines} cards"));
    }

    fn on_unit_complete(&self, unit: &str, card_count: usize, partial: bool) {
        let mark = if partial { yellow("◐") } else { green("✓") };
        let note = if partial { yellow(" (partial)") } else { String::new() };
        self.bar
            .println(format!("  {mark} {unit}  {}{note}", dim(&format!("{card_count} cards"))));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, unit: &str, error: &str) {
        let first = error.lines().next().unwrap_or(error);
        self.bar.println(format!("  {} {unit}  {}", red("✗"), red(first)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_units: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Start a project in the current directory
  flashdeck init --subject "Artificial Intelligence" --short-name AI

  # Extract text and images from every PDF in pdfs/
  flashdeck extract

  # Describe extracted images with a local vision model
  flashdeck describe --unit unit_1

  # Generate one deck with a local model, repairing the output
  flashdeck generate --unit unit_1 --provider ollama --repair

  # Check context usage before generating
  flashdeck analyze --target 60

  # Build an .apkg archive for every deck
  flashdeck package --all

ENVIRONMENT VARIABLES:
  FLASHDECK_CONFIG     Project file (default: config.yaml)
  FLASHDECK_PROVIDER   Override generation.provider (claude, ollama, openai, ...)
  FLASHDECK_MODEL      Override the provider's model
  ANTHROPIC_API_KEY    Key for the claude provider (name configurable)
  PDFIUM_LIB_PATH      Directory or file of the pdfium shared library
  RUST_LOG             Log filter, e.g. flashdeck=debug
"#;

/// Turn lecture PDFs into flashcard decks.
#[derive(Parser, Debug)]
#[command(
    name = "flashdeck",
    version,
    about = "Turn lecture PDFs into Anki flashcard decks with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Project configuration file.
    #[arg(long, global = true, env = "FLASHDECK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FLASHDECK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FLASHDECK_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "FLASHDECK_NO_PROGRESS")]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a new config.yaml and create the project directories.
    Init {
        /// Full subject name.
        #[arg(long)]
        subject: String,
        /// Short name used in deck names.
        #[arg(long)]
        short_name: Option<String>,
        /// Field of study.
        #[arg(long, default_value = "Computer Science")]
        field: String,
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Extract text and images from PDFs into markdown.
    Extract {
        #[arg(long)]
        unit: Option<String>,
        /// Skip image extraction.
        #[arg(long)]
        no_images: bool,
    },
    /// Describe extracted images with the vision model.
    Describe {
        #[arg(long)]
        unit: Option<String>,
        /// Re-describe images that already have a description.
        #[arg(long)]
        force: bool,
    },
    /// Generate flashcard decks.
    Generate {
        #[arg(long)]
        unit: Option<String>,
        /// Provider name (claude, ollama, or any edgequake-llm provider).
        #[arg(long, env = "FLASHDECK_PROVIDER")]
        provider: Option<String>,
        /// Model ID for the provider.
        #[arg(long, env = "FLASHDECK_MODEL")]
        model: Option<String>,
        /// Repair the deck format and normalise tags before writing.
        #[arg(long)]
        repair: bool,
        /// Units generated at the same time.
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Attempts per unit on transient provider errors.
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Per-request timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Build .apkg archives from decks.
    #[command(group(ArgGroup::new("which").required(true).args(["unit", "all"])))]
    Package {
        #[arg(long)]
        unit: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// List units and their outputs.
    List {
        /// Show tags and output status.
        #[arg(long)]
        detailed: bool,
    },
    /// Report context-window usage without generating.
    Analyze {
        #[arg(long)]
        unit: Option<String>,
        /// Card target; defaults to 1.5 cards per page.
        #[arg(long)]
        target: Option<usize>,
        #[arg(long, env = "FLASHDECK_PROVIDER")]
        provider: Option<String>,
        #[arg(long, env = "FLASHDECK_MODEL")]
        model: Option<String>,
    },
    /// Show or validate the configuration.
    Config {
        /// Only validate; print nothing on success.
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    if let Command::Init {
        subject,
        short_name,
        field,
        force,
    } = &cli.command
    {
        return init(&cli.config, subject, short_name.as_deref(), field, *force).await;
    }

    let project = ProjectConfig::load(&cli.config).context("Failed to load configuration")?;

    match cli.command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Extract { unit, no_images } => extract(&project, unit.as_deref(), !no_images, cli.quiet).await,
        Command::Describe { unit, force } => describe(&project, unit.as_deref(), force, cli.quiet).await,
        Command::Generate {
            unit,
            provider,
            model,
            repair,
            concurrency,
            max_attempts,
            timeout,
            json,
        } => {
            let units = flashdeck::unit::select_units(&project, unit.as_deref())?;
            let mut builder = project.generation_config_builder().auto_repair(repair);
            if let Some(p) = provider {
                builder = builder.provider_name(p);
            }
            if let Some(m) = model {
                builder = builder.model(m);
            }
            if let Some(n) = concurrency {
                builder = builder.concurrency(n);
            }
            if let Some(n) = max_attempts {
                builder = builder.max_attempts(n);
            }
            if let Some(secs) = timeout {
                builder = builder.request_timeout_secs(secs);
            }
            if show_progress && !json {
                builder = builder.progress_callback(CliProgressCallback::new() as ProgressCallback);
            }
            let cancel = CancellationToken::new();
            builder = builder.cancellation(cancel.clone());
            let config = builder.build().context("Invalid generation settings")?;

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\n{} interrupted, keeping partial output", yellow("⚠"));
                    cancel.cancel();
                }
            });

            let report = generate_units(&project, &units, &config).await?;
            if json {
                let outputs: Vec<&UnitOutput> = report.succeeded().collect();
                println!("{}", serde_json::to_string_pretty(&outputs).context("Failed to serialise output")?);
            } else if !cli.quiet {
                for out in report.succeeded() {
                    print_generation(out);
                }
            }
            let failed: Vec<_> = report.failed().collect();
            for (unit, err) in &failed {
                eprintln!("{} {}: {}", red("✗"), bold(unit), err);
            }
            if !failed.is_empty() {
                bail!("{} of {} unit(s) failed", failed.len(), report.results.len());
            }
            Ok(())
        }
        Command::Package { unit, all } => {
            let units = if all {
                all_units(&project)
            } else {
                flashdeck::unit::select_units(&project, unit.as_deref())?
            };
            let mut failures = 0;
            for unit in &units {
                match package_unit(&project, unit).await {
                    Ok(p) if !cli.quiet => {
                        let m = &p.manifest;
                        println!(
                            "{} {}  {} cards, {} images{}  {}",
                            green("✓"),
                            m.deck_name,
                            p.archive.notes,
                            p.archive.media,
                            if m.missing_media.is_empty() {
                                String::new()
                            } else {
                                yellow(&format!(", {} missing", m.missing_media.len()))
                            },
                            dim(&p.archive.path.display().to_string())
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failures += 1;
                        eprintln!("{} {}: {}", red("✗"), bold(&unit.name), e);
                    }
                }
            }
            if failures > 0 {
                bail!("{failures} of {} unit(s) failed", units.len());
            }
            Ok(())
        }
        Command::List { detailed } => {
            list(&project, detailed);
            Ok(())
        }
        Command::Analyze {
            unit,
            target,
            provider,
            model,
        } => analyze(&project, unit.as_deref(), target, provider.as_deref(), model.as_deref()).await,
        Command::Config { validate } => {
            // `load` already validated.
            if !validate {
                print!("{}", project.to_yaml()?);
            } else if !cli.quiet {
                eprintln!("{} {} is valid", green("✔"), cli.config.display());
            }
            Ok(())
        }
    }
}

async fn init(path: &Path, subject: &str, short_name: Option<&str>, field: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    let project = ProjectConfig {
        subject: SubjectConfig {
            name: subject.to_string(),
            short_name: short_name
                .map(str::to_string)
                .unwrap_or_else(|| subject.split_whitespace().filter_map(|w| w.chars().next()).collect()),
            field: field.to_string(),
            description: format!("Lecture notes on {subject}"),
        },
        ..ProjectConfig::default()
    };
    let yaml = project.to_yaml()?;
    flashdeck::output::write_atomic(path, yaml)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("{} Created {}", green("✓"), path.display());

    let o = &project.output;
    for dir in [&project.pdfs_dir, &o.markdown_dir, &o.images_dir, &o.anki_dir, &o.apkg_dir, &o.metadata_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    eprintln!("\n{}", bold("Next steps:"));
    eprintln!("  1. Put lecture PDFs in {}/", project.pdfs_dir.display());
    eprintln!("  2. flashdeck extract");
    eprintln!("  3. flashdeck generate");
    eprintln!("  4. flashdeck package --all");
    Ok(())
}

fn spinner(prefix: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix(prefix.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

async fn extract(project: &ProjectConfig, unit: Option<&str>, with_images: bool, quiet: bool) -> Result<()> {
    let units = flashdeck::unit::select_units(project, unit)?;
    let store = MetadataStore::new(project.output.metadata_path());
    let bar = spinner("Extracting", quiet);
    let mut failures = 0;
    for unit in &units {
        bar.set_message(unit.name.clone());
        match extract_unit(project, unit, &store, with_images).await {
            Ok(ExtractSummary {
                pages,
                images,
                markdown_chars,
                ..
            }) => bar.println(format!(
                "  {} {}  {}",
                green("✓"),
                unit.name,
                dim(&format!("{pages} pages, {images} images, {markdown_chars} chars"))
            )),
            Err(e) => {
                failures += 1;
                bar.println(format!("  {} {}  {}", red("✗"), unit.name, red(&e.to_string())));
            }
        }
    }
    bar.finish_and_clear();
    if failures > 0 {
        bail!("{failures} of {} unit(s) failed", units.len());
    }
    Ok(())
}

async fn describe(project: &ProjectConfig, unit: Option<&str>, force: bool, quiet: bool) -> Result<()> {
    let units = flashdeck::unit::select_units(project, unit)?;
    let store = MetadataStore::new(project.output.metadata_path());
    let vision = OllamaProvider::new(&project.vision.base_url, &project.vision.model)?
        .with_request_timeout(project.vision.timeout);
    let bar = spinner("Describing", quiet);
    let mut failures = 0;
    for unit in &units {
        bar.set_message(unit.name.clone());
        match describe_unit_images(project, unit, &vision, &store, force).await {
            Ok(DescribeSummary {
                described,
                skipped,
                failed,
                ..
            }) => bar.println(format!(
                "  {} {}  {}",
                if failed == 0 { green("✓") } else { yellow("◐") },
                unit.name,
                dim(&format!("{described} described, {skipped} skipped, {failed} failed"))
            )),
            Err(e) => {
                failures += 1;
                bar.println(format!("  {} {}  {}", red("✗"), unit.name, red(&e.to_string())));
            }
        }
    }
    bar.finish_and_clear();
    if failures > 0 {
        bail!("{failures} of {} unit(s) failed", units.len());
    }
    Ok(())
}

fn print_generation(out: &UnitOutput) {
    let outcome = match out.outcome {
        StreamOutcome::Completed => "completed",
        StreamOutcome::StoppedEarly => "stopped early",
        StreamOutcome::Interrupted => "interrupted",
    };
    println!(
        "{} {}  {}/{} cards  {}  {}ms  →  {}",
        if out.validation.valid { green("✔") } else { yellow("⚠") },
        bold(&out.unit),
        out.card_count,
        out.target_cards,
        dim(outcome),
        out.duration_ms,
        out.path.display()
    );
    if out.truncated {
        println!("   {}", yellow("source truncated to fit the context window"));
    }
    for err in &out.validation.errors {
        println!("   {} {}", red("error:"), err);
    }
    for warning in out.validation.warnings.iter().chain(&out.repair_warnings) {
        println!("   {} {}", dim("warning:"), warning);
    }
    let s = &out.statistics;
    let mut tags: Vec<_> = s.tag_counts.iter().collect();
    tags.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    let top: Vec<String> = tags.iter().take(5).map(|(t, n)| format!("{t}({n})")).collect();
    println!(
        "   {}",
        dim(&format!(
            "avg front {:.0} / back {:.0} chars; tags: {}",
            s.avg_front_chars,
            s.avg_back_chars,
            top.join(" ")
        ))
    );
}

fn list(project: &ProjectConfig, detailed: bool) {
    let units = all_units(project);
    if units.is_empty() {
        println!("No units. Put PDFs in {}/", project.pdfs_dir.display());
        return;
    }
    let tick = |p: PathBuf| if p.exists() { green("✓") } else { dim("·") };
    for (i, unit) in units.iter().enumerate() {
        print!(
            "{:>3}  {:<32} {:<28} {:>4}",
            i + 1,
            unit.name,
            dim(&unit.pdf_file),
            unit.target_cards
        );
        if detailed {
            print!(
                "  md {}  deck {}  pkg {}  {}  {}",
                tick(project.output.markdown_path(&unit.name)),
                tick(project.output.deck_path(&unit.name)),
                tick(project.output.apkg_path(&unit.name)),
                dim(&unit.source.to_string()),
                unit.tags.join(" ")
            );
        }
        println!();
    }
    let total: usize = units.iter().map(|u| u.target_cards).sum();
    println!("\n{} units, {} target cards", units.len(), total);
}

async fn analyze(
    project: &ProjectConfig,
    unit: Option<&str>,
    target: Option<usize>,
    provider: Option<&str>,
    model: Option<&str>,
) -> Result<()> {
    let units = flashdeck::unit::select_units(project, unit)?;
    let context_length = match resolve_provider(project, provider, model, project.generation.claude.max_tokens) {
        Ok(p) => p.context_length().await,
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    }
    .unwrap_or(project.generation.context_length_fallback);

    let mut failures = 0;
    for unit in &units {
        match analyze_unit(project, unit, context_length, target).await {
            Ok(report) => print_usage(unit, &report),
            Err(e) => {
                failures += 1;
                eprintln!("{} {}: {}", red("✗"), bold(&unit.name), e);
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} unit(s) failed", units.len());
    }
    Ok(())
}

fn print_usage(unit: &Unit, r: &ContextUsageReport) {
    let status = if r.fits() {
        green(&r.status.to_string())
    } else {
        red(&r.status.to_string())
    };
    println!(
        "{}  {:>6.1}%  {}  {}",
        bold(&unit.name),
        r.utilization_percent,
        status,
        dim(&format!(
            "content {} + prompt {} + images {} + output {} = {} / {} tokens ({} cards)",
            r.content_tokens,
            r.overhead_tokens,
            r.image_tokens,
            r.output_tokens,
            r.total_tokens,
            r.context_length,
            r.target_cards
        ))
    );
    if !r.fits() {
        println!(
            "   {}",
            yellow(&format!("over by {} tokens; content will be truncated", r.overflow_tokens))
        );
    }
}
