//! CLI binary for factura-extract.
//!
//! A thin shim over the library crate: reads one invoice file, runs the
//! pipeline and prints the extracted record and what was stored.

use anyhow::{Context, Result};
use clap::Parser;
use factura_extract::document::MIME_PDF;
use factura_extract::{
    read_document, DatabaseConfig, ExtractionConfig, Invoice, InvoiceStore, LlmBackend,
    MemoryStore, PagePolicy, PgStore, Pipeline, PipelineError, PipelineOutput, PipelineProgress,
    ProgressCallback, Stage, UploadedDocument,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
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

/// Spinner that names the running stage and leaves one line per finished stage.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Normalization => "Reading document",
        Stage::Extraction => "Asking the model",
        Stage::Parsing => "Parsing reply",
        Stage::Persistence => "Saving rows",
    }
}

impl PipelineProgress for CliProgress {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(stage_label(stage));
        self.bar.set_message("…");
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.bar.println(format!("  {} {}", green("✓"), stage));
    }

    fn on_stage_error(&self, stage: Stage, error: &str) {
        // Keep the spinner line short; the full error is printed on exit.
        let msg = match error.char_indices().nth(79) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar.println(format!("  {} {}  {}", red("✗"), stage, red(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract and store an invoice photo
  factura factura-001.jpg

  # Scanned PDF, read every page instead of the first
  factura --all-pages scan.pdf

  # Look at the extraction without touching the database
  factura --no-store --json factura.pdf

  # First run against a fresh database, or one whose table predates the
  # unique index (saving is refused until this has run once)
  factura --init-schema factura.png

  # Use a specific provider and model
  factura --provider openai --model gpt-4.1-mini factura.pdf

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (preferred when set)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  DB_HOST / DB_PORT       PostgreSQL server (default localhost:5432)
  DB_USER / DB_PASSWORD   PostgreSQL credentials
  DB_NAME                 Database holding the `facturas` table
  PDFIUM_LIB_PATH         Path to an existing libpdfium; skips auto-download

Re-running the same invoice is safe: line items already stored under the
same invoice number and product code are skipped.
"#;

/// Extract invoice data from images and PDFs and store it in PostgreSQL.
#[derive(Parser, Debug)]
#[command(
    name = "factura",
    version,
    about = "Extract invoice data from images and PDFs with an LLM and store it in PostgreSQL",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Invoice file: PNG, JPEG or PDF.
    input: PathBuf,

    /// MIME type of the input. Guessed from the extension when omitted.
    #[arg(long, env = "FACTURA_MIME")]
    mime: Option<String>,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FACTURA_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "FACTURA_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM call timeout in seconds.
    #[arg(long, env = "FACTURA_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to a text file replacing the built-in extraction instruction.
    #[arg(long, env = "FACTURA_INSTRUCTION")]
    instruction: Option<PathBuf>,

    /// Send every page of a scanned PDF instead of only the first.
    #[arg(long, env = "FACTURA_ALL_PAGES")]
    all_pages: bool,

    /// Longest edge in pixels for rendered PDF pages.
    #[arg(long, env = "FACTURA_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// PostgreSQL host.
    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    db_host: String,

    /// PostgreSQL port.
    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    db_port: u16,

    /// PostgreSQL user.
    #[arg(long, env = "DB_USER", default_value = "postgres")]
    db_user: String,

    /// PostgreSQL password.
    #[arg(long, env = "DB_PASSWORD", default_value = "", hide_env_values = true)]
    db_password: String,

    /// PostgreSQL database name.
    #[arg(long, env = "DB_NAME", default_value = "facturas")]
    db_name: String,

    /// Database connect timeout in seconds.
    #[arg(long, env = "DB_CONNECT_TIMEOUT", default_value_t = 10)]
    db_timeout: u64,

    /// Do not write to the database; keep rows in memory for this run only.
    #[arg(long, env = "FACTURA_NO_STORE")]
    no_store: bool,

    /// Create the `facturas` table and its unique index before saving.
    /// Also upgrades a table created without them.
    #[arg(long, conflicts_with = "no_store")]
    init_schema: bool,

    /// Output the full result (record, outcome, warnings, stats) as JSON.
    #[arg(long, env = "FACTURA_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "FACTURA_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FACTURA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except the record and errors.
    #[arg(short, long, env = "FACTURA_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Load the upload ──────────────────────────────────────────────────
    let document = match read_document(&cli.input, cli.mime.as_deref()).await {
        Ok(doc) => doc,
        Err(e) => {
            report(&PipelineError::new(Stage::Normalization, e));
            return Ok(ExitCode::FAILURE);
        }
    };

    if document.essence() == MIME_PDF {
        ensure_pdf_engine(cli.quiet)?;
    }

    // ── Build config and backend ─────────────────────────────────────────
    let progress = show_progress.then(CliProgress::new);
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback)).await?;
    let backend = LlmBackend::from_config(&config).context("Failed to set up the LLM provider")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let outcome = if cli.no_store {
        execute(backend, MemoryStore::new(), config, document).await
    } else {
        let store = match connect(&cli).await {
            Ok(store) => store,
            Err(e) => {
                if let Some(ref p) = progress {
                    p.finish();
                }
                report(&e);
                return Ok(ExitCode::FAILURE);
            }
        };
        let outcome = execute(backend, store.clone(), config, document).await;
        store.close().await;
        outcome
    };

    if let Some(ref p) = progress {
        p.finish();
    }

    match outcome {
        Ok(output) => {
            print_output(&cli, &output)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            // The record was read correctly; show it even though it was not saved.
            if let Some(ref invoice) = e.invoice {
                print_invoice(&cli, invoice)?;
            }
            report(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn execute<S: InvoiceStore>(
    backend: LlmBackend,
    store: S,
    config: ExtractionConfig,
    document: UploadedDocument,
) -> Result<PipelineOutput, PipelineError> {
    Pipeline::new(backend, store, config).run(document).await
}

async fn connect(cli: &Cli) -> Result<PgStore, PipelineError> {
    let db = DatabaseConfig {
        host: cli.db_host.clone(),
        port: cli.db_port,
        user: cli.db_user.clone(),
        password: cli.db_password.clone(),
        database: cli.db_name.clone(),
        connect_timeout_secs: cli.db_timeout,
        ..DatabaseConfig::default()
    };

    let store = PgStore::connect(&db)
        .await
        .map_err(|e| PipelineError::new(Stage::Persistence, e))?;
    if cli.init_schema {
        store
            .ensure_schema()
            .await
            .map_err(|e| PipelineError::new(Stage::Persistence, e))?;
    }
    Ok(store)
}

/// Make sure a pdfium library is available before the first PDF is opened.
///
/// On the very first run the library (~30 MB) is downloaded and cached;
/// later runs only check the cache.
fn ensure_pdf_engine(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }

    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {bytes}/{total_bytes}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                bar.set_length(t);
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_and_clear();
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .max_rendered_pixels(cli.max_pixels)
        .page_policy(if cli.all_pages {
            PagePolicy::AllPages
        } else {
            PagePolicy::FirstPage
        });

    if let Some(ref path) = cli.instruction {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instruction from {:?}", path))?;
        builder = builder.instruction(text);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_output(cli: &Cli, output: &PipelineOutput) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    print_invoice(cli, &output.invoice)?;
    if cli.quiet {
        return Ok(());
    }

    for warning in &output.warnings {
        eprintln!("{} {}", yellow("⚠"), warning);
    }
    if let Some(outcome) = output.persisted {
        let target = if cli.no_store { "in memory" } else { "in facturas" };
        eprintln!(
            "{} {} rows inserted, {} skipped {}",
            green("✔"),
            bold(&outcome.inserted.to_string()),
            outcome.skipped,
            dim(target),
        );
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out  —  {}ms total",
        dim(&output.stats.input_tokens.to_string()),
        dim(&output.stats.output_tokens.to_string()),
        output.stats.total_duration_ms,
    );
    Ok(())
}

fn print_invoice(cli: &Cli, invoice: &Invoice) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(invoice).context("Failed to serialise invoice")?;
        println!("{json}");
        return Ok(());
    }

    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "—".to_string());
    println!("Invoice:   {}", field(&invoice.invoice_number));
    println!("Date:      {}", field(&invoice.date));
    println!("Client:    {}", field(&invoice.client_name));
    println!("Supplier:  {}", field(&invoice.provider_name));
    println!("Total:     {}", field(&invoice.total));
    if !invoice.line_items.is_empty() {
        println!();
        println!("{:<16} {:>8}  Description", "Code", "Qty");
        for item in &invoice.line_items {
            println!(
                "{:<16} {:>8}  {}",
                field(&item.product_code),
                field(&item.quantity),
                field(&item.description)
            );
        }
    }
    Ok(())
}

fn report(error: &PipelineError) {
    eprintln!("{} {}", red("✘"), error);
}
