//! Error types for the factura-extract library.
//!
//! Two types reflect two levels of reporting:
//!
//! * [`FacturaError`]: what went wrong inside one component (the upload is
//!   not a PDF, the model timed out, the reply had no JSON, the database
//!   refused a row). Every component function returns it.
//!
//! * [`PipelineError`]: the single outcome the presentation shell sees. It
//!   tags a [`FacturaError`] with the [`Stage`] it came from, so the shell can
//!   print one message without matching on internals. A persistence failure
//!   also carries the invoice that was extracted but not saved.

use crate::invoice::Invoice;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors raised by the pipeline components.
#[derive(Debug, Error)]
pub enum FacturaError {
    // ── Normalization errors ──────────────────────────────────────────────
    /// The MIME type is neither `image/*` nor `application/pdf`.
    #[error("Unsupported document type '{mime_type}'\nUpload a PNG, JPEG or PDF file.")]
    UnsupportedFormat { mime_type: String },

    /// The bytes cannot be decoded as the declared type.
    #[error("Document declared as '{mime_type}' could not be decoded: {detail}")]
    CorruptDocument { mime_type: String, detail: String },

    /// The input file could not be read from disk.
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first use.\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Transport, authentication, model-side failure or timeout.
    #[error("Model service error: {message}")]
    ServiceError { message: String },

    /// The service answered but the reply held no text.
    #[error("Model service returned an empty reply")]
    EmptyReply,

    // ── Parsing errors ────────────────────────────────────────────────────
    /// The reply contains no `{` ... `}` pair.
    #[error("No JSON object found in the model reply")]
    NoJsonFound,

    /// The text between the first `{` and the last `}` is not valid JSON.
    #[error("Model reply contains malformed JSON: {source}")]
    MalformedJson {
        #[source]
        source: serde_json::Error,
    },

    /// The JSON decoded but does not have the invoice shape.
    #[error("Model reply does not match the invoice shape: {detail}")]
    SchemaMismatch { detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// The destination store is unreachable.
    #[error("Database connection error: {detail}")]
    ConnectionError { detail: String },

    /// A write failed; the invoice's transaction was rolled back.
    #[error("Failed to save line item {line} of invoice '{invoice_number}': {detail}")]
    PersistenceError {
        invoice_number: String,
        line: usize,
        detail: String,
    },

    /// Rows are keyed on the invoice number, so an invoice without one
    /// cannot be stored idempotently.
    #[error("Invoice has no invoice number; refusing to store rows that cannot be deduplicated")]
    MissingInvoiceNumber,

    /// Creating the `facturas` table or its unique index failed.
    #[error("Schema setup failed: {detail}\nRemove duplicate (invoice_number, product_code) rows before adding the unique index.")]
    SchemaSetupFailed { detail: String },

    /// `facturas` lacks the unique index, so `ON CONFLICT` cannot skip
    /// stored line items and a re-run would duplicate them.
    #[error(
        "Table 'facturas' has no unique index on (invoice_number, product_code); \
re-running an invoice would duplicate its rows.\n\
Run `factura --init-schema` once (or call PgStore::ensure_schema) to add it."
    )]
    MissingUniqueIndex,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The pipeline step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Normalization,
    Extraction,
    Parsing,
    Persistence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Normalization => "normalization",
            Stage::Extraction => "extraction",
            Stage::Parsing => "parsing",
            Stage::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

/// The single failure outcome of [`crate::Pipeline::run`].
#[derive(Debug, Error)]
#[error("{stage} failed: {cause}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub cause: FacturaError,
    /// Set only for [`Stage::Persistence`]: the record was read correctly
    /// but not saved.
    pub invoice: Option<Box<Invoice>>,
}

impl PipelineError {
    pub fn new(stage: Stage, cause: FacturaError) -> Self {
        Self {
            stage,
            cause,
            invoice: None,
        }
    }

    /// A persistence failure that keeps the extracted invoice for display.
    pub fn unsaved(invoice: Invoice, cause: FacturaError) -> Self {
        Self {
            stage: Stage::Persistence,
            cause,
            invoice: Some(Box::new(invoice)),
        }
    }

    /// `true` when extraction succeeded and only the save failed.
    pub fn is_unsaved(&self) -> bool {
        self.stage == Stage::Persistence && self.invoice.is_some()
    }
}
