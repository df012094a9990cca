//! CLI binary for edgequake-urdu2roman.
//!
//! A thin shim over the library crate: maps CLI flags to `PipelineConfig`,
//! runs the pipeline with a progress bar, and turns Ctrl-C into a pause that
//! saves a recovery snapshot.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_urdu2roman::{
    inspect, open_source, write_output, PageRange, Pipeline, PipelineConfig,
    PipelineProgressCallback, ProgressReport, RunSignal, RunState, TranslitError,
};
use edgequake_urdu2roman::pipeline::batch::BatchRange;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar for committed positions, one log line per
/// committed batch.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Characters received for the batch in flight.
    live_chars: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening source…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            live_chars: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total: u64, cursor: u64) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {percent:>3}%  {msg}  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total);
        self.bar.set_position(cursor);
        self.bar.set_prefix("Transliterating");
        self.bar.reset_eta();
        if cursor > 0 {
            self.bar.println(format!(
                "{} {}",
                cyan("◆"),
                bold(&format!("Resuming at {cursor}/{total}"))
            ));
        }
    }

    fn on_batch_start(&self, range: &BatchRange, previews: &[String]) {
        self.live_chars.store(0, Ordering::SeqCst);
        let (first, last) = range.display_bounds();
        self.bar
            .set_message(format!("{first}–{last} ({} units)", previews.len()));
    }

    fn on_fragment(&self, _fragment: &str, live: &str) {
        let chars = live.chars().count();
        self.live_chars.store(chars, Ordering::SeqCst);
        self.bar.set_message(format!("streaming {chars} chars"));
    }

    fn on_batch_committed(&self, report: &ProgressReport) {
        let chars = self.live_chars.swap(0, Ordering::SeqCst);
        self.bar.set_position(report.processed);
        if chars > 0 {
            self.bar.println(format!(
                "  {} {:>9}/{:<9}  {}",
                green("✓"),
                report.processed,
                report.total,
                dim(&format!("{chars:>6} chars")),
            ));
        }
    }

    fn on_run_finished(&self, state: RunState, error: Option<&TranslitError>) {
        self.bar.finish_and_clear();
        match state {
            RunState::Completed => eprintln!("{} Transliteration complete", green("✔")),
            RunState::Paused => eprintln!("{} Paused", cyan("⏸")),
            RunState::Error => eprintln!(
                "{} {}",
                red("✘"),
                red(&error.map(|e| e.to_string()).unwrap_or_default())
            ),
            RunState::Idle | RunState::Processing => {}
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text file to stdout
  urdu2roman ghazal.txt

  # Scanned book, two pages per request, to a file
  urdu2roman --batch-size 2 kitaab.pdf -o kitaab.txt

  # Pages 3 to 7 from the PDF text layer (no OCR)
  urdu2roman --no-ocr --pages 3-7 kitaab.pdf

  # Resume after Ctrl-C or an error
  urdu2roman kitaab.pdf --resume kitaab.pdf.progress.json -o kitaab.txt

PAUSE AND RESUME:
  Ctrl-C pauses at the next fragment boundary and writes a recovery
  snapshot (default: <input name>.progress.json). A failed run writes one
  too. Pass it back with --resume to continue from the last committed batch.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (native streaming backend)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Transliterate Urdu text, PDFs and images to Roman Urdu.
#[derive(Parser, Debug)]
#[command(
    name = "urdu2roman",
    version,
    about = "Transliterate Urdu documents (text, PDF, images) to Roman Urdu",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or HTTP/HTTPS URL.
    input: String,

    /// Write the transliteration to this file instead of stdout.
    #[arg(short, long, env = "URDU2ROMAN_OUTPUT")]
    output: Option<PathBuf>,

    /// Model ID (e.g. gemini-2.5-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Work units per request (1–10).
    #[arg(short, long, env = "URDU2ROMAN_BATCH_SIZE", default_value_t = 1,
          value_parser = clap::value_parser!(u64).range(1..=10))]
    batch_size: u64,

    /// Send the PDF text layer instead of page images.
    #[arg(long, env = "URDU2ROMAN_NO_OCR")]
    no_ocr: bool,

    /// Page range for PDFs: 5 or 3-7.
    #[arg(long, env = "URDU2ROMAN_PAGES")]
    pages: Option<String>,

    /// Resume from a recovery snapshot.
    #[arg(long, env = "URDU2ROMAN_RESUME")]
    resume: Option<PathBuf>,

    /// Where to write the recovery snapshot on pause or error.
    #[arg(long, env = "URDU2ROMAN_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "URDU2ROMAN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max output tokens per request.
    #[arg(long, env = "URDU2ROMAN_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Temperature (0.0–2.0).
    #[arg(long, env = "URDU2ROMAN_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries when a request cannot be opened.
    #[arg(long, env = "URDU2ROMAN_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Fail a batch when no fragment arrives within this many seconds.
    #[arg(long, env = "URDU2ROMAN_FRAGMENT_TIMEOUT")]
    fragment_timeout: Option<u64>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "URDU2ROMAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "URDU2ROMAN_NO_PROGRESS")]
    no_progress: bool,

    /// Print source kind and size only.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "URDU2ROMAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "URDU2ROMAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let summary = inspect(&cli.input).await.context("Failed to inspect input")?;
        println!("File:    {}", summary.identity.name);
        println!("Kind:    {:?}", summary.kind);
        println!("Size:    {} bytes", summary.identity.size);
        println!("Units:   {}", summary.units);
        if let Some(ref digest) = summary.identity.digest {
            println!("SHA-256: {}", digest);
        }
        return Ok(());
    }

    // ── Load source and build pipeline ───────────────────────────────────
    let progress: Option<Arc<dyn PipelineProgressCallback>> = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };
    let config = build_config(&cli, progress).await?;

    let source = open_source(&cli.input, cli.download_timeout)
        .await
        .context("Failed to load input")?;
    let snapshot_path = cli
        .snapshot
        .clone()
        .unwrap_or_else(|| default_snapshot_path(&source.document().identity().name));

    let mut pipeline =
        Pipeline::new(source.document().clone(), config).context("Failed to set up pipeline")?;

    if let Some(ref path) = cli.resume {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot {:?}", path))?;
        pipeline
            .import_snapshot(&text)
            .await
            .with_context(|| format!("Cannot resume from {:?}", path))?;
    }

    // ── Run, pausing on Ctrl-C ───────────────────────────────────────────
    let signal = RunSignal::new();
    let ctrl_c = {
        let signal = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal.pause();
            }
        })
    };

    let state = pipeline.run(&signal).await;
    ctrl_c.abort();

    match state {
        RunState::Completed => {}
        RunState::Paused => {
            save_snapshot(&pipeline, &snapshot_path).await?;
            let report = pipeline.progress();
            eprintln!(
                "Paused at {}/{}. Resume with: --resume {}",
                report.processed,
                report.total,
                snapshot_path.display()
            );
            drop(pipeline);
            drop(source);
            std::process::exit(130);
        }
        RunState::Error => {
            save_snapshot(&pipeline, &snapshot_path).await?;
            let err = pipeline
                .take_last_error()
                .map(anyhow::Error::new)
                .unwrap_or_else(|| anyhow::anyhow!("run failed"));
            return Err(err.context(format!(
                "Transliteration failed; progress saved to {}",
                snapshot_path.display()
            )));
        }
        RunState::Idle | RunState::Processing => {
            anyhow::bail!("Run ended unexpectedly in state {:?}", state);
        }
    }

    // ── Write result ─────────────────────────────────────────────────────
    let text = pipeline.output();
    let report = pipeline.progress();

    if let Some(ref output_path) = cli.output {
        write_output(output_path, &text)
            .await
            .context("Failed to write output")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} segments  {:.1}s  →  {}",
                green("✔"),
                report.segments,
                report.elapsed.as_secs_f64(),
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
        if !text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<Arc<dyn PipelineProgressCallback>>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .batch_size(cli.batch_size as usize)
        .use_ocr(!cli.no_ocr)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref pages) = cli.pages {
        builder = builder.page_range(parse_pages(pages)?);
    }
    if let Some(secs) = cli.fragment_timeout {
        builder = builder.fragment_timeout_secs(secs);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` (`5` or `3-7`) into a `PageRange`.
fn parse_pages(s: &str) -> Result<PageRange> {
    let s = s.trim();
    let range = match s.split_once('-') {
        Some((start, end)) => PageRange::new(
            start.trim().parse().context("Invalid start page in range")?,
            end.trim().parse().context("Invalid end page in range")?,
        ),
        None => {
            let page: u64 = s.parse().context("Invalid page number")?;
            PageRange::new(page, page)
        }
    };
    range.validate()?;
    Ok(range)
}

fn default_snapshot_path(source_name: &str) -> PathBuf {
    PathBuf::from(format!("{source_name}.progress.json"))
}

async fn save_snapshot(pipeline: &Pipeline, path: &Path) -> Result<()> {
    let snapshot = pipeline
        .export_snapshot()
        .context("Failed to encode snapshot")?;
    write_output(path, &snapshot)
        .await
        .with_context(|| format!("Failed to write snapshot {:?}", path))?;
    eprintln!("{} Snapshot saved to {}", dim("•"), path.display());
    Ok(())
}
