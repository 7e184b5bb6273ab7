//! CLI binary for pdfocr.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ProcessingConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdfocr::output::write_json;
use pdfocr::{
    dry_run, extract_info, find_documents, process, run_batch, CommandDetector, ProcessingConfig,
    ProcessingProgressCallback, ProcessingStage, ProgressCallback, TextDetector,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one percent-driven bar anchored at the
/// bottom, per-page log lines printed above it so the two never
/// interleave.
struct CliProgressCallback {
    /// The single progress bar, length 100 (overall percent).
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Count of pages that errored out.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);

        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.set_message("opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_document_start(&self, total_pages: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_pages} pages…"))
        ));
    }

    fn on_stage_change(&self, stage: ProcessingStage, percent: u8) {
        self.bar.set_position(percent as u64);
        self.bar.set_message(stage.to_string());
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
    }

    fn on_page_complete(&self, page_num: usize, total: usize, region_count: usize) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{region_count:>4} regions")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: String) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages, on a char boundary.
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}…")
        } else {
            error
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        let detector_errors = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            let detail = if detector_errors > 0 {
                format!("{failed} produced no text, {detector_errors} detector errors")
            } else {
                format!("{failed} produced no text")
            };
            eprintln!(
                "{} {}/{} pages extracted  ({})",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&detail),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR a scan with tesseract, page text to stdout
  pdfocr process scan.pdf

  # Pick the engine explicitly ({} expands to the page image path)
  pdfocr process scan.pdf --detector 'tesseract {} stdout --psm 6'

  # Full JSON result to a file
  pdfocr process scan.pdf -o scan.json

  # Faster pass for clean digital-born PDFs
  pdfocr process doc.pdf --dpi 150 --no-preprocess

  # Keep the rendered page images for inspection
  pdfocr process scan.pdf --keep-images --images-dir ./pages

  # Encrypted document
  pdfocr process locked.pdf --password hunter2

  # Whole directory, four documents at a time
  pdfocr batch ./inbox -o report.json --workers 4

  # Check a directory before committing hours of OCR time to it
  pdfocr batch ./inbox --dry-run

  # Document facts only, no OCR
  pdfocr info scan.pdf

DETECTOR COMMANDS:
  --detector takes a command line, split on whitespace; `{}` expands to
  the page image path and is appended when absent. Stdout may be plain
  text or JSON — paired description/geometry lists, span triples, keyed
  records, and line arrays all normalise to the same region list.

    tesseract {} stdout              plain text (the default)
    tesseract {} stdout --psm 6     uniform-block page layout
    my-ocr --image {} --json         any JSON-speaking engine

ENVIRONMENT VARIABLES:
  PDFOCR_DETECTOR   Default detector command
  PDFOCR_OUTPUT     Default output path for JSON results
  PDFOCR_DPI        Default rendering DPI
  PDFOCR_WORKERS    Default batch worker count
  RUST_LOG          Log filter (tracing-subscriber EnvFilter syntax)

  Rasterisation needs the pdfium shared library at runtime: install
  libpdfium for your platform, or place it on the loader search path
  (e.g. LD_LIBRARY_PATH).
"#;

/// Turn scanned PDFs into structured, searchable text.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "Turn scanned PDFs into structured, searchable text",
    long_about = "Rasterise PDF pages, clean the images up, run any OCR engine over them, and \
emit canonical text regions with confidences, bounding boxes, extracted entities, and \
per-document summaries.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFOCR_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFOCR_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR one PDF document.
    Process {
        /// Local PDF file path.
        input: PathBuf,

        #[command(flatten)]
        opts: ProcessOpts,

        /// Print the full JSON result to stdout instead of page text.
        #[arg(long)]
        json: bool,

        /// Disable the progress bar.
        #[arg(long, env = "PDFOCR_NO_PROGRESS")]
        no_progress: bool,
    },

    /// OCR every PDF under a directory.
    Batch {
        /// Directory searched recursively for *.pdf.
        dir: PathBuf,

        #[command(flatten)]
        opts: ProcessOpts,

        /// Documents processed concurrently.
        #[arg(short, long, env = "PDFOCR_WORKERS")]
        workers: Option<usize>,

        /// Validate the discovered documents and exit without running OCR.
        #[arg(long)]
        dry_run: bool,

        /// Print the full JSON batch summary to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Print document facts (pages, encryption, metadata) without OCR.
    Info {
        /// Local PDF file path.
        input: PathBuf,

        /// PDF user password for encrypted documents.
        #[arg(long, env = "PDFOCR_PASSWORD")]
        password: Option<String>,

        /// Print JSON instead of the key/value listing.
        #[arg(long)]
        json: bool,
    },
}

/// Flags shared by `process` and `batch`.
#[derive(Args, Debug)]
struct ProcessOpts {
    /// Detector command line; `{}` expands to the page image path.
    #[arg(long, env = "PDFOCR_DETECTOR", default_value = "tesseract {} stdout")]
    detector: String,

    /// Write the full JSON result (document or batch summary) to this file.
    #[arg(short, long, env = "PDFOCR_OUTPUT")]
    output: Option<PathBuf>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PDFOCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Skip the image enhancement chain.
    #[arg(long)]
    no_preprocess: bool,

    /// Skip text postprocessing and document summaries.
    #[arg(long)]
    no_postprocess: bool,

    /// Drop regions whose confidence falls below this (0.0–1.0).
    #[arg(long, default_value_t = 0.0)]
    threshold: f32,

    /// Keep rendered page images after the run.
    #[arg(long)]
    keep_images: bool,

    /// Directory for rendered page images (implies they survive the run).
    #[arg(long, env = "PDFOCR_IMAGES_DIR")]
    images_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFOCR_PASSWORD")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet
        && matches!(
            &cli.command,
            Command::Process {
                json: false,
                no_progress: false,
                ..
            }
        );
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

    match cli.command {
        Command::Process {
            input,
            opts,
            json,
            no_progress: _,
        } => run_process(input, opts, json, show_progress, cli.quiet).await,
        Command::Batch {
            dir,
            opts,
            workers,
            dry_run,
            json,
        } => run_batch_command(dir, opts, workers, dry_run, json, cli.quiet).await,
        Command::Info {
            input,
            password,
            json,
        } => run_info(input, password, json).await,
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────────

async fn run_process(
    input: PathBuf,
    opts: ProcessOpts,
    json: bool,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let detector = parse_detector(&opts.detector)?;
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ProcessingProgressCallback>)
    } else {
        None
    };
    let config = build_config(&opts, progress)?;

    let result = process(&input, detector, &config)
        .await
        .context("Processing failed")?;

    if let Some(ref output_path) = opts.output {
        write_json(&result, output_path).context("Failed to write result")?;

        // Summary line (callback already printed the per-page log).
        if !quiet {
            let s = &result.processing_summary;
            eprintln!(
                "{}  {}/{} pages  {}ms  →  {}",
                if s.successful_pages == s.total_pages {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                s.successful_pages,
                s.total_pages,
                s.duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else if json {
        let out = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{out}");
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        for page in &result.pages {
            // Prefer corrected text when postprocessing ran.
            let text = page
                .processed
                .as_ref()
                .map(|p| p.corrected_text.as_str())
                .unwrap_or(page.combined_text.as_str());
            writeln!(handle, "── page {} ──", page.page_number)
                .context("Failed to write to stdout")?;
            writeln!(handle, "{text}").context("Failed to write to stdout")?;
        }

        // Only print inline stats when the progress callback is disabled;
        // otherwise the callback already printed the final tick.
        if !quiet && !show_progress {
            let s = &result.processing_summary;
            eprintln!(
                "Extracted {}/{} pages in {}ms",
                s.successful_pages, s.total_pages, s.duration_ms
            );
        }
    }

    Ok(())
}

async fn run_batch_command(
    dir: PathBuf,
    opts: ProcessOpts,
    workers: Option<usize>,
    dry: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let documents = find_documents(&dir).context("Document discovery failed")?;
    if documents.is_empty() {
        eprintln!("No PDF documents under '{}'", dir.display());
        return Ok(());
    }

    // ── Dry run: validate without OCR ────────────────────────────────────
    if dry {
        let reports = dry_run(&documents, opts.password.as_deref()).await;
        if json {
            let rows: Vec<serde_json::Value> = reports
                .iter()
                .map(|(p, r)| serde_json::json!({ "path": p, "report": r }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            for (path, report) in &reports {
                let verdict = if report.is_valid() { green("✓") } else { red("✗") };
                let detail = match (&report.error, report.page_count) {
                    (Some(e), _) => e.clone(),
                    (None, Some(n)) => format!(
                        "{n} pages{}",
                        if report.is_encrypted { ", encrypted" } else { "" }
                    ),
                    (None, None) => String::new(),
                };
                println!("{verdict} {}  {}", path.display(), dim(&detail));
            }
            let ok = reports.iter().filter(|(_, r)| r.is_valid()).count();
            eprintln!("{ok}/{} documents ready", reports.len());
        }
        return Ok(());
    }

    // ── Full batch ───────────────────────────────────────────────────────
    let detector = parse_detector(&opts.detector)?;
    let mut config = build_config(&opts, None)?;
    if let Some(n) = workers {
        config.worker_count = n.max(1);
    }

    if !quiet {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Processing {} documents with {} workers…",
                documents.len(),
                config.worker_count
            ))
        );
    }

    let summary = run_batch(&documents, detector, &config).await;

    if let Some(ref output_path) = opts.output {
        write_json(&summary, output_path).context("Failed to write batch summary")?;
    }

    if json && opts.output.is_none() {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !quiet {
        for outcome in &summary.outcomes {
            match (&outcome.result, &outcome.error) {
                (Some(r), _) => println!(
                    "{} {}  {}",
                    green("✓"),
                    outcome.path.display(),
                    dim(&format!(
                        "{}/{} pages, {} chars",
                        r.processing_summary.successful_pages,
                        r.processing_summary.total_pages,
                        r.processing_summary.total_characters
                    ))
                ),
                (None, Some(e)) => {
                    println!("{} {}  {}", red("✗"), outcome.path.display(), red(e))
                }
                (None, None) => {}
            }
        }
        eprintln!(
            "{}  {}/{} documents ({}%)  {} pages, {} chars in {}ms",
            if summary.failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            summary.successful,
            summary.total_documents,
            summary.success_rate,
            summary.total_pages,
            summary.total_characters,
            summary.duration_ms
        );
    }

    Ok(())
}

async fn run_info(input: PathBuf, password: Option<String>, json: bool) -> Result<()> {
    let info = extract_info(&input, password.as_deref())
        .await
        .context("Failed to read document facts")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File:         {}", info.path.display());
    if let Some(ref t) = info.title {
        println!("Title:        {t}");
    }
    if let Some(ref a) = info.author {
        println!("Author:       {a}");
    }
    if let Some(ref s) = info.subject {
        println!("Subject:      {s}");
    }
    println!("Pages:        {}", info.page_count);
    println!("Size:         {} bytes", info.file_size);
    if let Some(ref v) = info.pdf_version {
        println!("PDF version:  {v}");
    }
    println!("Encrypted:    {}", info.encrypted);
    if let Some(ref p) = info.producer {
        println!("Producer:     {p}");
    }
    if let Some(ref c) = info.creator {
        println!("Creator:      {c}");
    }

    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Split a detector command line on whitespace: program first, args after.
fn parse_detector(command: &str) -> Result<Arc<dyn TextDetector>> {
    let mut parts = command.split_whitespace();
    let program = parts.next().context("Detector command is empty")?;
    Ok(Arc::new(CommandDetector::new(program).args(parts)))
}

/// Map CLI flags to `ProcessingConfig`.
fn build_config(opts: &ProcessOpts, progress: Option<ProgressCallback>) -> Result<ProcessingConfig> {
    let mut builder = ProcessingConfig::builder()
        .dpi(opts.dpi)
        .preprocess(!opts.no_preprocess)
        .postprocess(!opts.no_postprocess)
        .confidence_threshold(opts.threshold)
        .keep_images(opts.keep_images);

    if let Some(dir) = opts.images_dir.clone() {
        builder = builder.output_dir(dir);
    }
    if let Some(pwd) = opts.password.clone() {
        builder = builder.password(pwd);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
