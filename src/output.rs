//! Output types returned by [`crate::Pipeline::run`].

use crate::document::ContentKind;
use crate::invoice::{Invoice, PersistOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// The extracted record, as parsed.
    pub invoice: Invoice,

    /// Rows inserted and skipped. `None` when persistence was not attempted
    /// (see [`Warning::NoLineItems`]).
    pub persisted: Option<PersistOutcome>,

    /// What the model was shown.
    pub content: ContentKind,

    /// Conditions that did not fail the run but deserve attention.
    pub warnings: Vec<Warning>,

    pub stats: PipelineStats,
}

impl PipelineOutput {
    /// `true` when at least one row was written by this run.
    pub fn wrote_rows(&self) -> bool {
        self.persisted.is_some_and(|p| p.inserted > 0)
    }
}

/// A flagged, non-fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    /// The reply parsed but listed no products, so nothing was stored.
    NoLineItems,
    /// Only the first `sent` of `total` rendered pages reached the model.
    PagesNotSent { sent: usize, total: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::NoLineItems => {
                f.write_str("the invoice has no line items; nothing was stored")
            }
            Warning::PagesNotSent { sent, total } => write!(
                f,
                "only {sent} of {total} pages were sent to the model; re-run with --all-pages to include the rest"
            ),
        }
    }
}

/// Aggregate statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Tokens in the model request, as reported by the provider.
    pub input_tokens: usize,
    /// Tokens in the model reply.
    pub output_tokens: usize,
    pub normalize_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub parse_duration_ms: u64,
    /// Zero when persistence was skipped.
    pub persist_duration_ms: u64,
    pub total_duration_ms: u64,
}
