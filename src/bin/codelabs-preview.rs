//! CLI binary for codelabs-preview.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PublishConfig`, wires up a source and an object store, and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codelabs_preview::{
    ApiEnvelope, DirectorySource, FsObjectStore, HttpSource, MemorySource, PublishConfig,
    PublishError, PublishObserver, PublishOutcome, PublishReport, Publisher, ReadError,
    SourceStore, Stage, WriteFailure,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner while the document is exported, parsed and
/// its images fetched, then a bar over the write fan-out. Writes complete
/// out of order, so the bar only counts.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PublishObserver for CliObserver {
    fn on_stage(&self, file_id: &str, stage: Stage) {
        self.bar.set_message(format!("{file_id}: {stage}"));
    }

    fn on_image_fetched(&self, _file_id: &str, url: &str, filename: &str, bytes: usize) {
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            filename,
            dim(&format!("{bytes:>8} bytes")),
            dim(url),
        ));
    }

    fn on_image_failed(&self, _file_id: &str, url: &str, error: &str) {
        self.bar
            .println(format!("  {} {}  {}", red("✗"), url, red(error)));
    }

    fn on_write_start(&self, _file_id: &str, revision: u32, total_writes: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} objects  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_length(total_writes as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(format!("Revision {revision}"));
    }

    fn on_write_complete(&self, _file_id: &str, _path: &str, _bytes: u64) {
        self.bar.inc(1);
    }

    fn on_write_failed(&self, _file_id: &str, path: &str, error: &str) {
        self.bar
            .println(format!("  {} {}  {}", red("✗"), path, red(error)));
        self.bar.inc(1);
    }

    fn on_publish_complete(&self, _file_id: &str, _revision: u32, _failed: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Preview an exported document with images inlined
  codelabs-preview --source-dir docs/ preview my-lab -o my-lab.html

  # Publish the next revision into a local tree
  codelabs-preview --source-dir docs/ --output-dir out/ publish my-lab

  # Read back what was published
  codelabs-preview --output-dir out/ view my-lab --revision latest
  codelabs-preview --output-dir out/ meta my-lab --revision 3 --json
  codelabs-preview --output-dir out/ media my-lab 995dc9bbdf1939fa.png -o image.png

  # Export from a document-store endpoint
  codelabs-preview \
    --source-url 'https://www.googleapis.com/drive/v3/files/{file_id}/export?mimeType={mime_type}' \
    --source-token "$TOKEN" --export-mime-type text/markdown publish 1AbC

SOURCE DOCUMENTS:
  A header block of `key: value` lines (id, summary, authors, categories,
  tags, status, feedback link, analytics account), a `# Title`, and one
  `## Step` heading per step. A step may open with `Duration: M:SS`.

LAYOUT:
  <storage-path>/<file-id>/latest/{index.html,meta.json,img/...}
  <storage-path>/<file-id>/<revision>/{index.html,meta.json,img/...}
"#;

/// Preview and publish codelabs from exported documents.
#[derive(Parser, Debug)]
#[command(
    name = "codelabs-preview",
    version,
    about = "Preview and publish codelabs from exported documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding exported documents as `<file-id>.<ext>`.
    #[arg(long, env = "CP_SOURCE_DIR", global = true, conflicts_with = "source_url")]
    source_dir: Option<PathBuf>,

    /// Extension of documents in --source-dir.
    #[arg(long, env = "CP_SOURCE_EXT", global = true, default_value = "md")]
    source_ext: String,

    /// Export URL template with `{file_id}` and `{mime_type}` placeholders.
    #[arg(long, env = "CP_SOURCE_URL", global = true)]
    source_url: Option<String>,

    /// Bearer token sent with --source-url requests.
    #[arg(long, env = "CP_SOURCE_TOKEN", global = true, hide_env_values = true)]
    source_token: Option<String>,

    /// MIME type requested from the source store.
    #[arg(long, env = "CP_EXPORT_MIME_TYPE", global = true, default_value = "text/markdown")]
    export_mime_type: String,

    /// Root directory of the object tree.
    #[arg(long, env = "CP_OUTPUT_DIR", global = true, default_value = "out")]
    output_dir: PathBuf,

    /// Leading path segment inside the object tree.
    #[arg(long, env = "CP_STORAGE_PATH", global = true, default_value = "files-dev")]
    storage_path: String,

    /// Page template file (MiniJinja) replacing the built-in one.
    #[arg(long, env = "CP_TEMPLATE", global = true)]
    template: Option<PathBuf>,

    /// Value of the `env` template variable.
    #[arg(long, env = "CP_ENVIRONMENT", global = true, default_value = "web")]
    environment: String,

    /// URL prefix for the codelab web components.
    #[arg(long, env = "CP_PREFIX", global = true, default_value = "https://storage.googleapis.com")]
    prefix: String,

    /// Site-wide analytics id.
    #[arg(long, env = "CP_GLOBAL_GA", global = true)]
    global_ga: Option<String>,

    /// Retries per image on transient failures.
    #[arg(long, env = "CP_MAX_RETRIES", global = true, default_value_t = 2)]
    max_retries: u32,

    /// Base backoff between retries, in milliseconds.
    #[arg(long, env = "CP_RETRY_BACKOFF_MS", global = true, default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Per-request timeout for image and source fetches, in seconds.
    #[arg(long, env = "CP_FETCH_TIMEOUT", global = true, default_value_t = 60)]
    fetch_timeout: u64,

    /// Concurrent image fetches.
    #[arg(long, env = "CP_FETCH_CONCURRENCY", global = true, default_value_t = 16)]
    fetch_concurrency: usize,

    /// Concurrent object writes.
    #[arg(long, env = "CP_WRITE_CONCURRENCY", global = true, default_value_t = 16)]
    write_concurrency: usize,

    /// Print a JSON envelope `{code, message, data}` instead of text.
    #[arg(long, env = "CP_JSON", global = true)]
    json: bool,

    /// Disable progress output.
    #[arg(long, env = "CP_NO_PROGRESS", global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CP_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CP_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render and write the next revision plus the `latest` pointer.
    Publish {
        file_id: String,
    },
    /// Render without writing anything.
    Preview {
        file_id: String,
        /// Keep remote image URLs instead of inlining fetched images.
        #[arg(long)]
        remote_images: bool,
        /// Write the page here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a published page.
    View {
        file_id: String,
        /// `latest`, `0` or a revision number.
        #[arg(long, default_value = "latest")]
        revision: String,
    },
    /// Print a published metadata record.
    Meta {
        file_id: String,
        #[arg(long, default_value = "latest")]
        revision: String,
    },
    /// Fetch a published image.
    Media {
        file_id: String,
        filename: String,
        #[arg(long, default_value = "latest")]
        revision: String,
        /// Write the image here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// JSON body of a publish: the report plus any failed writes.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishSummary<'a> {
    #[serde(flatten)]
    report: &'a PublishReport,
    complete: bool,
    failures: &'a [WriteFailure],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs during publish.
    let show_progress = !cli.quiet
        && !cli.no_progress
        && !cli.json
        && matches!(cli.command, Command::Publish { .. });
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

    let observer = show_progress.then(CliObserver::new);
    let publisher = build_publisher(&cli, observer.clone()).await?;

    match &cli.command {
        Command::Publish { file_id } => run_publish(&cli, &publisher, file_id, observer).await,
        Command::Preview {
            file_id,
            remote_images,
            output,
        } => {
            let result = if *remote_images {
                publisher.preview_remote(file_id).await
            } else {
                publisher.preview(file_id).await
            };
            let html = match result {
                Ok(html) => html,
                Err(e) => return fail_publish(&cli, e, "Preview failed"),
            };
            if cli.json {
                print_json(&ApiEnvelope::ok(html))
            } else {
                write_output(output.as_ref(), html.as_bytes(), true).await
            }
        }
        Command::View { file_id, revision } => match publisher.view(file_id, revision).await {
            Ok(html) if cli.json => print_json(&ApiEnvelope::ok(html)),
            Ok(html) => write_output(None, html.as_bytes(), true).await,
            Err(e) => fail_read(&cli, e),
        },
        Command::Meta { file_id, revision } => match publisher.meta(file_id, revision).await {
            Ok(meta) if cli.json => print_json(&ApiEnvelope::ok(meta)),
            Ok(meta) => {
                println!("File id:      {}", meta.file_id);
                println!("Revision:     {}", meta.revision);
                println!("Exported:     {}", meta.exported_date);
                println!("Codelab id:   {}", meta.meta.document.id);
                println!("Title:        {}", meta.meta.document.title);
                println!("Chapters:     {}", meta.meta.total_chapters);
                if meta.meta.document.duration > 0 {
                    println!("Duration:     {} min", meta.meta.document.duration);
                }
                if !meta.meta.document.authors.is_empty() {
                    println!("Authors:      {}", meta.meta.document.authors.join(", "));
                }
                Ok(())
            }
            Err(e) => fail_read(&cli, e),
        },
        Command::Media {
            file_id,
            filename,
            revision,
            output,
        } => match publisher.media(file_id, revision, filename).await {
            Ok((content_type, bytes)) => {
                if !cli.quiet {
                    eprintln!("{}  {} bytes", dim(content_type), bytes.len());
                }
                write_output(output.as_ref(), &bytes, false).await
            }
            Err(e) => fail_read(&cli, e),
        },
    }
}

async fn run_publish(
    cli: &Cli,
    publisher: &Publisher,
    file_id: &str,
    observer: Option<Arc<CliObserver>>,
) -> Result<()> {
    let outcome = match publisher.publish(file_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(ref o) = observer {
                o.bar.finish_and_clear();
            }
            return fail_publish(cli, e, "Publish failed");
        }
    };

    if cli.json {
        let summary = PublishSummary {
            report: outcome.report(),
            complete: outcome.is_complete(),
            failures: outcome.failures(),
        };
        print_json(&ApiEnvelope::ok(summary))?;
    } else if !cli.quiet {
        let report = outcome.report();
        match &outcome {
            PublishOutcome::Complete(_) => eprintln!(
                "{} {} revision {}  {}",
                green("✔"),
                bold(file_id),
                bold(&report.meta.revision.to_string()),
                dim(&format!("{} objects", report.written.len())),
            ),
            PublishOutcome::Partial { failures, .. } => {
                eprintln!(
                    "{} {} revision {}  {}/{} objects written",
                    cyan("⚠"),
                    bold(file_id),
                    bold(&report.meta.revision.to_string()),
                    report.written.len(),
                    report.written.len() + failures.len(),
                );
                for failure in failures {
                    eprintln!("  {} {}", red("✗"), failure);
                }
            }
        }
        if let codelabs_preview::RevisionBasis::CorruptMetadata { ref detail } =
            report.revision_basis
        {
            eprintln!(
                "  {} previous metadata was corrupt ({}); numbering restarted",
                cyan("⚠"),
                detail
            );
        }
    }

    if !outcome.is_complete() {
        std::process::exit(2);
    }
    Ok(())
}

/// Map CLI args to a `Publisher`.
async fn build_publisher(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<Publisher> {
    let mut builder = PublishConfig::builder()
        .storage_path(cli.storage_path.clone())
        .export_mime_type(cli.export_mime_type.clone())
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .fetch_timeout_secs(cli.fetch_timeout)
        .fetch_concurrency(cli.fetch_concurrency)
        .write_concurrency(cli.write_concurrency);

    let mut render = PublishConfig::default().render;
    render.environment = cli.environment.clone();
    render.prefix = cli.prefix.trim_end_matches('/').to_string();
    render.global_ga = cli.global_ga.clone();
    builder = builder.render(render);

    if let Some(ref path) = cli.template {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read template from {:?}", path))?;
        builder = builder.template(template);
    }
    if let Some(o) = observer {
        builder = builder.observer(o as Arc<dyn PublishObserver>);
    }
    let config = builder.build().context("Invalid configuration")?;

    let source: Arc<dyn SourceStore> = match (&cli.source_dir, &cli.source_url) {
        (Some(dir), _) => Arc::new(DirectorySource::new(dir).with_extension(cli.source_ext.clone())),
        (None, Some(url)) => {
            let mut source = HttpSource::new(url.clone(), cli.fetch_timeout)
                .context("Failed to build HTTP source")?;
            if let Some(ref token) = cli.source_token {
                source = source.with_bearer_token(token.clone());
            }
            Arc::new(source)
        }
        // Read paths never export; publish and preview report the missing
        // document as an export error.
        (None, None) => Arc::new(MemorySource::new()),
    };
    let objects = Arc::new(FsObjectStore::new(&cli.output_dir));

    Publisher::with_http_fetcher(source, objects, config).context("Failed to set up publisher")
}

fn fail_publish(cli: &Cli, err: PublishError, context: &str) -> Result<()> {
    if cli.json {
        print_json(&ApiEnvelope::<()>::from_publish_error(&err))?;
        std::process::exit(1);
    }
    Err(anyhow::Error::new(err).context(context.to_string()))
}

fn fail_read(cli: &Cli, err: ReadError) -> Result<()> {
    if cli.json {
        print_json(&ApiEnvelope::<()>::from_read_error(&err))?;
        std::process::exit(1);
    }
    Err(anyhow::anyhow!("{} ({})", err, err.status_code()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

async fn write_output(path: Option<&PathBuf>, bytes: &[u8], text: bool) -> Result<()> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create {:?}", parent))?;
                }
            }
            tokio::fs::write(path, bytes)
                .await
                .with_context(|| format!("Failed to write {:?}", path))
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(bytes)
                .context("Failed to write to stdout")?;
            // Ensure a trailing newline on stdout for text.
            if text && !bytes.ends_with(b"\n") {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}
