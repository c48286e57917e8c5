//! # factura-extract
//!
//! Read invoices (photos, scans, PDFs) with a generative model and store
//! their header and line items in PostgreSQL.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Normalize  image passes through; PDF → text layer, or rendered pages
//!  ├─ 2. Extract    instruction + content → model reply (gemini / openai / …)
//!  ├─ 3. Parse      first '{' … last '}' → validated Invoice
//!  └─ 4. Persist    one row per line item into `facturas`, existing keys skipped
//! ```
//!
//! Any stage failure ends the run with a [`PipelineError`] naming the stage.
//! Re-running the same document never duplicates rows: the store keys rows on
//! `(invoice number, product code)`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use factura_extract::{DatabaseConfig, ExtractionConfig, LlmBackend, PgStore, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let backend = LlmBackend::from_config(&config)?;
//!     let store = PgStore::connect(&DatabaseConfig::from_env()).await?;
//!
//!     let pipeline = Pipeline::new(backend, store, config);
//!     let output = pipeline.run_file("factura.pdf").await?;
//!     println!("{}", serde_json::to_string_pretty(&output.invoice)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `factura` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! factura-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod invoice;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DatabaseConfig, ExtractionConfig, ExtractionConfigBuilder, PagePolicy};
pub use document::{CanonicalContent, ContentKind, PageImage, UploadedDocument};
pub use error::{FacturaError, PipelineError, Stage};
pub use invoice::{FacturaRow, Invoice, LineItem, PersistOutcome};
pub use output::{PipelineOutput, PipelineStats, Warning};
pub use pipeline::extract::{
    ExtractionClient, ExtractionRequest, LlmBackend, ModelBackend, ModelReply, RequestBody,
};
pub use pipeline::normalize::normalize;
pub use pipeline::parse::parse;
pub use pipeline::persist::{persist, InvoiceStore};
pub use process::{read_document, Pipeline};
pub use progress::{NoopProgress, PipelineProgress, ProgressCallback};
pub use store::{MemoryStore, PgStore};
