//! CLI binary for doc-assembly.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AssemblyConfig`, builds a `Submission` from `CATEGORY=PATH` pairs and
//! prints the report.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doc_assembly::{
    Assembler, AssemblyConfig, AssemblyProgressCallback, Category, PageSize, ProgressCallback,
    SourceError, SourceFile, Submission, SubmissionReport,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar ticking per finished category, with a
/// log line per category and per rejected file. Categories finish out of
/// order when they run concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos}/{len} categories  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Assembling");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl AssemblyProgressCallback for CliProgressCallback {
    fn on_submission_start(&self, categories: usize) {
        self.bar.set_length(categories as u64);
    }

    fn on_category_start(&self, category: Category, files: usize) {
        self.bar.set_message(format!("{category} ({files} file(s))"));
    }

    fn on_file_rejected(&self, category: Category, error: &SourceError) {
        self.bar.println(format!(
            "  {} {:<24} {}",
            yellow("!"),
            category.slug(),
            dim(&error.to_string())
        ));
    }

    fn on_category_complete(&self, category: Category, total_pages: usize, pages_added: usize) {
        self.bar.println(format!(
            "  {} {:<24} {} page(s) {}",
            green("✓"),
            category.slug(),
            total_pages,
            dim(&format!("(+{pages_added})"))
        ));
        self.bar.inc(1);
    }

    fn on_category_error(&self, category: Category, error: &str) {
        self.bar.println(format!(
            "  {} {:<24} {}",
            red("✗"),
            category.slug(),
            red(error)
        ));
        self.bar.inc(1);
    }

    fn on_submission_complete(&self, _categories: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Add two scans and a PDF statement for client 1042 of owner maria
  docasm submit --root /srv/uploads --owner maria --client 1042 \
      --file documentos_pessoais=rg-frente.jpg \
      --file documentos_pessoais=rg-verso.png \
      --file extrato_bancario=extrato-marco.pdf

  # Machine-readable report
  docasm submit --owner maria --client 1042 --file extrato_bancario=x.pdf --json

  # Drop quarantined files older than 7 days
  docasm purge --owner maria --client 1042 --retention-days 7

CATEGORIES:
  documentos_pessoais      personal documents
  extrato_bancario         bank statements
  documentos_dependentes   dependents' documents
  documentos_conjuge       spouse's documents

LAYOUT:
  <root>/<owner>/<client>/<category>/<category>.pdf   canonical artifact
  <root>/<owner>/<client>/deletar/                     quarantine
"#;

/// Assemble client uploads into one PDF per document category.
#[derive(Parser, Debug)]
#[command(
    name = "docasm",
    version,
    about = "Assemble client uploads into one append-only PDF per document category",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCASM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCASM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge files into the client's category artifacts.
    Submit(SubmitArgs),
    /// Remove expired files from a client's quarantine directory.
    Purge(PurgeArgs),
}

#[derive(Args, Debug)]
struct Target {
    /// Upload root holding `<owner>/<client>/` directories.
    #[arg(long, env = "DOCASM_ROOT", default_value = "uploads")]
    root: PathBuf,

    /// Owner (account) identifier.
    #[arg(long, env = "DOCASM_OWNER")]
    owner: String,

    /// Client identifier.
    #[arg(long, env = "DOCASM_CLIENT")]
    client: String,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    #[command(flatten)]
    target: Target,

    /// File to add, as CATEGORY=PATH. Repeat for several files; order is kept.
    #[arg(long = "file", value_name = "CATEGORY=PATH", required = true, value_parser = parse_file_arg)]
    files: Vec<(Category, PathBuf)>,

    /// Consume the given files directly instead of working on copies.
    /// Consumed files are deleted (or quarantined) once merged.
    #[arg(long, env = "DOCASM_CONSUME")]
    consume: bool,

    /// Page size for image pages: a4 or letter.
    #[arg(long, env = "DOCASM_PAGE_SIZE", default_value = "a4", value_parser = parse_page_size)]
    page_size: PageSize,

    /// Largest fraction of the page an image may cover (0.1–1.0).
    #[arg(long, env = "DOCASM_MAX_FILL", default_value_t = 0.9)]
    max_fill: f64,

    /// JPEG quality for re-encoded images (1–100).
    #[arg(long, env = "DOCASM_JPEG_QUALITY", default_value_t = 90)]
    jpeg_quality: u8,

    /// Per-file conversion timeout in seconds.
    #[arg(long, env = "DOCASM_FILE_TIMEOUT", default_value_t = 60)]
    file_timeout: u64,

    /// Per-category timeout in seconds.
    #[arg(long, env = "DOCASM_CATEGORY_TIMEOUT", default_value_t = 300)]
    category_timeout: u64,

    /// Process categories one after another.
    #[arg(long, env = "DOCASM_SEQUENTIAL")]
    sequential: bool,

    /// Output the report as JSON.
    #[arg(long, env = "DOCASM_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCASM_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct PurgeArgs {
    #[command(flatten)]
    target: Target,

    /// Keep quarantined files for this many days.
    #[arg(long, env = "DOCASM_RETENTION_DAYS", default_value_t = 30)]
    retention_days: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs unless --verbose.
    let show_progress = match &cli.command {
        Command::Submit(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Purge(_) => false,
    };
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
        Command::Submit(args) => submit(args, cli.quiet, show_progress).await,
        Command::Purge(args) => purge(args, cli.quiet).await,
    }
}

async fn submit(args: SubmitArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AssemblyProgressCallback>)
    } else {
        None
    };

    let mut builder = AssemblyConfig::builder()
        .upload_root(&args.target.root)
        .page_size(args.page_size)
        .max_fill_ratio(args.max_fill)
        .jpeg_quality(args.jpeg_quality)
        .file_timeout_secs(args.file_timeout)
        .category_timeout_secs(args.category_timeout)
        .concurrent_categories(!args.sequential);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let mut submission = Submission::new(&args.target.owner, &args.target.client);
    submission.validate().context("Invalid submission")?;

    let intake = args
        .target
        .root
        .join(&args.target.owner)
        .join(&args.target.client)
        .join(".intake");
    for (category, path) in &args.files {
        let temporary_path = if args.consume {
            path.clone()
        } else {
            copy_to_intake(path, &intake).await?
        };
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        submission = submission.with_file(SourceFile::new(
            temporary_path,
            *category,
            guess_mime(path),
            original_name,
        ));
    }

    let report = Assembler::new(config)
        .assemble(&submission)
        .await
        .context("Assembly failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !quiet {
        print_summary(&report, show_progress);
    }

    let failed = report.failed().count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} categories failed", report.categories.len());
    }
    Ok(())
}

async fn purge(args: PurgeArgs, quiet: bool) -> Result<()> {
    let config = AssemblyConfig::builder()
        .upload_root(&args.target.root)
        .quarantine_retention(Some(Duration::from_secs(args.retention_days * 24 * 60 * 60)))
        .build()
        .context("Invalid configuration")?;
    let purged = Assembler::new(config)
        .purge_quarantine(&args.target.owner, &args.target.client)
        .await
        .context("Purge failed")?;
    if !quiet {
        eprintln!(
            "{} purged {} file(s) older than {} day(s)",
            green("✔"),
            bold(&purged.to_string()),
            args.retention_days
        );
    }
    Ok(())
}

fn print_summary(report: &SubmissionReport, progress_shown: bool) {
    // The progress callback already printed one line per category.
    if !progress_shown {
        for c in &report.categories {
            match &c.error {
                None => eprintln!(
                    "  {} {:<24} {} page(s) {}",
                    green("✓"),
                    c.category.slug(),
                    c.total_pages,
                    dim(&format!("(+{})", c.pages_added))
                ),
                Some(e) => eprintln!("  {} {:<24} {}", red("✗"), c.category.slug(), red(e)),
            }
        }
    }
    for (category, path) in report.artifact_paths() {
        println!("{category}\t{path}");
    }
    let quarantined: usize = report
        .categories
        .iter()
        .flat_map(|c| &c.cleanup)
        .filter(|r| !matches!(r.outcome, doc_assembly::CleanupOutcome::Deleted))
        .count();
    eprintln!(
        "{}  {}/{} categories  {}ms{}",
        if report.failed().count() == 0 {
            green("✔")
        } else {
            red("✘")
        },
        report.succeeded().count(),
        report.categories.len(),
        report.duration_ms,
        if quarantined > 0 {
            yellow(&format!("  ({quarantined} file(s) quarantined)"))
        } else {
            String::new()
        }
    );
}

/// Copy `path` to a fresh file in `intake` so the original survives cleanup.
async fn copy_to_intake(path: &Path, intake: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(intake)
        .await
        .with_context(|| format!("Failed to create intake directory {}", intake.display()))?;
    let target = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(intake)
        .context("Failed to create intake file")?
        .into_temp_path()
        .keep()
        .context("Failed to keep intake file")?;
    tokio::fs::copy(path, &target)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(target)
}

/// Parse `CATEGORY=PATH`.
fn parse_file_arg(s: &str) -> Result<(Category, PathBuf), String> {
    let (category, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CATEGORY=PATH, got '{s}'"))?;
    let category = category.trim().parse::<Category>()?;
    if path.is_empty() {
        return Err(format!("missing path after '{category}='"));
    }
    Ok((category, PathBuf::from(path)))
}

fn parse_page_size(s: &str) -> Result<PageSize, String> {
    match s.to_lowercase().as_str() {
        "a4" => Ok(PageSize::A4),
        "letter" => Ok(PageSize::LETTER),
        other => Err(format!("unknown page size '{other}' (expected a4 or letter)")),
    }
}

/// Declared mime type from the file extension. Content probing has the final word.
fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
