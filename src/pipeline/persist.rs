//! Idempotent persistence: [`Invoice`] → rows in `facturas`.
//!
//! Each line item becomes one denormalised row keyed on
//! `(invoice_number, product_code)`. A store inserts the rows it does not
//! hold yet and reports, per row, whether it inserted or skipped. Stores
//! write an invoice all-or-nothing: if any row fails, none are kept.

use crate::error::FacturaError;
use crate::invoice::{FacturaRow, Invoice, PersistOutcome};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// A destination for invoice rows.
pub trait InvoiceStore: Send + Sync {
    /// Insert every row whose key is not stored yet, in order, as one
    /// atomic batch. Returns one flag per row: `true` if inserted, `false`
    /// if an equal key already existed (earlier rows of the same batch
    /// included).
    fn insert_new(
        &self,
        rows: &[FacturaRow],
    ) -> impl Future<Output = Result<Vec<bool>, FacturaError>> + Send;
}

impl<S: InvoiceStore> InvoiceStore for Arc<S> {
    fn insert_new(
        &self,
        rows: &[FacturaRow],
    ) -> impl Future<Output = Result<Vec<bool>, FacturaError>> + Send {
        (**self).insert_new(rows)
    }
}

/// Save `invoice` into `store`, skipping line items already present.
///
/// # Errors
/// - [`FacturaError::MissingInvoiceNumber`] when the invoice number is blank
/// - [`FacturaError::ConnectionError`] / [`FacturaError::PersistenceError`] from the store
/// - [`FacturaError::MissingUniqueIndex`] when a postgres table cannot deduplicate
pub async fn persist<S: InvoiceStore>(store: &S, invoice: &Invoice) -> Result<PersistOutcome, FacturaError> {
    let number = invoice
        .invoice_number
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(FacturaError::MissingInvoiceNumber)?;

    let rows = invoice.rows();
    let flags = store.insert_new(&rows).await?;

    let inserted = flags.iter().filter(|inserted| **inserted).count();
    let outcome = PersistOutcome {
        inserted,
        skipped: flags.len() - inserted,
    };
    info!(
        "Invoice {}: {} rows inserted, {} skipped",
        number, outcome.inserted, outcome.skipped
    );
    Ok(outcome)
}
