//! The extracted invoice record and its stored-row form.
//!
//! Serde names follow the JSON keys the model is asked to emit, so a record
//! serialised for display looks exactly like what the model was told to
//! produce.

use serde::{Deserialize, Serialize};

/// JSON keys of the extraction template.
pub mod keys {
    pub const INVOICE_NUMBER: &str = "Número de Factura";
    pub const DATE: &str = "Fecha";
    pub const CLIENT_NAME: &str = "Nombre del Cliente";
    pub const PROVIDER_NAME: &str = "Nombre del Proveedor";
    pub const TOTAL: &str = "Total";
    pub const LINE_ITEMS: &str = "Detalles de Productos";

    pub const PRODUCT_CODE: &str = "Codigo Producto";
    pub const DESCRIPTION: &str = "Descripcion producto";
    pub const QUANTITY: &str = "Cantidad";

    /// Header keys in template order.
    pub const HEADER: [&str; 5] = [INVOICE_NUMBER, DATE, CLIENT_NAME, PROVIDER_NAME, TOTAL];
}

/// A parsed invoice. `None` is the null sentinel for a field the model
/// could not determine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(rename = "Número de Factura")]
    pub invoice_number: Option<String>,
    #[serde(rename = "Fecha")]
    pub date: Option<String>,
    #[serde(rename = "Nombre del Cliente")]
    pub client_name: Option<String>,
    #[serde(rename = "Nombre del Proveedor")]
    pub provider_name: Option<String>,
    /// Kept as text so currency symbols and separators survive verbatim.
    #[serde(rename = "Total")]
    pub total: Option<String>,
    #[serde(rename = "Detalles de Productos", default)]
    pub line_items: Vec<LineItem>,
}

/// One product line of an invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(rename = "Codigo Producto")]
    pub product_code: Option<String>,
    #[serde(rename = "Descripcion producto")]
    pub description: Option<String>,
    #[serde(rename = "Cantidad")]
    pub quantity: Option<String>,
}

impl Invoice {
    /// Denormalise into one stored row per line item, header repeated.
    ///
    /// The invoice number is stored trimmed, since it is half of the
    /// uniqueness key and models are loose with surrounding whitespace.
    pub fn rows(&self) -> Vec<FacturaRow> {
        let number = self.invoice_number.as_deref().map(str::trim).unwrap_or_default();
        self.line_items
            .iter()
            .map(|item| FacturaRow {
                invoice_number: number.to_string(),
                date: self.date.clone(),
                client_name: self.client_name.clone(),
                provider_name: self.provider_name.clone(),
                total: self.total.clone(),
                product_code: item.product_code.clone(),
                product_description: item.description.clone(),
                product_quantity: item.quantity.clone(),
            })
            .collect()
    }
}

/// One row of the `facturas` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FacturaRow {
    pub invoice_number: String,
    pub date: Option<String>,
    pub client_name: Option<String>,
    pub provider_name: Option<String>,
    pub total: Option<String>,
    pub product_code: Option<String>,
    pub product_description: Option<String>,
    pub product_quantity: Option<String>,
}

impl FacturaRow {
    /// The uniqueness key. A missing product code dedupes as the empty code,
    /// matching the `COALESCE` in the table's unique index.
    pub fn dedup_key(&self) -> (&str, &str) {
        (
            self.invoice_number.as_str(),
            self.product_code.as_deref().unwrap_or(""),
        )
    }
}

/// Counts reported by the persistence gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Invoice {
        Invoice {
            invoice_number: Some("001".into()),
            date: Some("2024-03-01".into()),
            client_name: Some("ACME".into()),
            provider_name: None,
            total: Some("$150.00".into()),
            line_items: vec![
                LineItem {
                    product_code: Some("P1".into()),
                    description: Some("Widget".into()),
                    quantity: Some("3".into()),
                },
                LineItem {
                    product_code: None,
                    description: Some("Freight".into()),
                    quantity: Some("1".into()),
                },
            ],
        }
    }

    #[test]
    fn rows_repeat_header_on_every_line() {
        let rows = sample().rows();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.invoice_number, "001");
            assert_eq!(row.total.as_deref(), Some("$150.00"));
            assert_eq!(row.provider_name, None);
        }
        assert_eq!(rows[0].product_description.as_deref(), Some("Widget"));
    }

    #[test]
    fn rows_store_trimmed_invoice_number() {
        let mut invoice = sample();
        invoice.invoice_number = Some("  001\n".into());
        assert!(invoice.rows().iter().all(|r| r.invoice_number == "001"));
    }

    #[test]
    fn missing_product_code_dedupes_as_empty() {
        let rows = sample().rows();
        assert_eq!(rows[0].dedup_key(), ("001", "P1"));
        assert_eq!(rows[1].dedup_key(), ("001", ""));
    }

    #[test]
    fn serialises_with_template_keys() {
        let json = serde_json::to_value(sample()).expect("serialise");
        assert_eq!(json[keys::INVOICE_NUMBER], "001");
        assert!(json[keys::PROVIDER_NAME].is_null());
        assert_eq!(json[keys::LINE_ITEMS][0][keys::PRODUCT_CODE], "P1");
    }
}
