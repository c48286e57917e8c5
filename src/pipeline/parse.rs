//! Reply parsing: model text → validated [`Invoice`].
//!
//! The JSON payload is taken from the first `{` to the last `}` of the
//! reply, which drops preambles and code fences without a brace matcher.
//! The slice is decoded as an untyped [`Value`] and then checked field by
//! field, since nothing guarantees the model honoured the template.

use crate::error::FacturaError;
use crate::invoice::{keys, Invoice, LineItem};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Parse a model reply into an [`Invoice`].
///
/// # Errors
/// - [`FacturaError::NoJsonFound`] when there is no `{` before a `}`
/// - [`FacturaError::MalformedJson`] when the slice does not decode
/// - [`FacturaError::SchemaMismatch`] when the value lacks the invoice shape
pub fn parse(reply: &str) -> Result<Invoice, FacturaError> {
    let slice = json_slice(reply).ok_or(FacturaError::NoJsonFound)?;
    debug!("JSON slice: {} of {} bytes", slice.len(), reply.len());

    let value: Value =
        serde_json::from_str(slice).map_err(|source| FacturaError::MalformedJson { source })?;

    let object = value.as_object().ok_or_else(|| FacturaError::SchemaMismatch {
        detail: format!("expected a JSON object, got {}", type_name(&value)),
    })?;

    invoice_from_object(object)
}

/// The text from the first `{` to the last `}` inclusive.
pub fn json_slice(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&reply[start..=end])
}

fn invoice_from_object(object: &Map<String, Value>) -> Result<Invoice, FacturaError> {
    if !keys::HEADER.iter().any(|k| object.contains_key(*k)) {
        return Err(FacturaError::SchemaMismatch {
            detail: format!("none of the header fields are present ({})", keys::HEADER.join(", ")),
        });
    }

    let invoice = Invoice {
        invoice_number: text_field(object, keys::INVOICE_NUMBER)?,
        date: text_field(object, keys::DATE)?,
        client_name: text_field(object, keys::CLIENT_NAME)?,
        provider_name: text_field(object, keys::PROVIDER_NAME)?,
        total: text_field(object, keys::TOTAL)?,
        line_items: line_items(object)?,
    };

    let missing: Vec<&str> = keys::HEADER
        .iter()
        .copied()
        .filter(|k| !object.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        warn!("Reply is missing header fields: {}", missing.join(", "));
    }

    Ok(invoice)
}

fn line_items(object: &Map<String, Value>) -> Result<Vec<LineItem>, FacturaError> {
    let items = match object.get(keys::LINE_ITEMS) {
        None => {
            return Err(FacturaError::SchemaMismatch {
                detail: format!("missing \"{}\"", keys::LINE_ITEMS),
            })
        }
        Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(FacturaError::SchemaMismatch {
                detail: format!("\"{}\" must be a list, got {}", keys::LINE_ITEMS, type_name(other)),
            })
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let fields = item.as_object().ok_or_else(|| FacturaError::SchemaMismatch {
                detail: format!("line item {} must be an object, got {}", idx + 1, type_name(item)),
            })?;
            Ok(LineItem {
                product_code: text_field(fields, keys::PRODUCT_CODE)?,
                description: text_field(fields, keys::DESCRIPTION)?,
                quantity: text_field(fields, keys::QUANTITY)?,
            })
        })
        .collect()
}

/// A scalar field as text. Absent and `null` are the null sentinel; numbers
/// and booleans keep their JSON spelling.
fn text_field(object: &Map<String, Value>, key: &str) -> Result<Option<String>, FacturaError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(FacturaError::SchemaMismatch {
            detail: format!("\"{}\" must be text, got {}", key, type_name(other)),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{"Número de Factura":"001","Fecha":"2024-03-01","Nombre del Cliente":"ACME S.A.","Nombre del Proveedor":"Widgets SRL","Total":"150.00","Detalles de Productos":[{"Codigo Producto":"P1","Descripcion producto":"Widget","Cantidad":"3"}]}"#;

    #[test]
    fn parses_template_shape() {
        let invoice = parse(FULL).unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("001"));
        assert_eq!(invoice.client_name.as_deref(), Some("ACME S.A."));
        assert_eq!(invoice.total.as_deref(), Some("150.00"));
        assert_eq!(
            invoice.line_items,
            vec![LineItem {
                product_code: Some("P1".into()),
                description: Some("Widget".into()),
                quantity: Some("3".into()),
            }]
        );
    }

    #[test]
    fn ignores_noise_around_payload() {
        let reply = format!("noise ```json\n{FULL}\n``` trailing");
        assert_eq!(parse(&reply).unwrap(), parse(FULL).unwrap());
    }

    #[test]
    fn slice_spans_first_open_to_last_close() {
        assert_eq!(json_slice("a {x} b {y} c"), Some("{x} b {y}"));
        assert_eq!(json_slice("} backwards {"), None);
    }

    #[test]
    fn no_braces_is_no_json_found() {
        for reply in ["Sorry, I cannot process this.", "only { open", "only } close", ""] {
            assert!(matches!(parse(reply), Err(FacturaError::NoJsonFound)), "reply: {reply:?}");
        }
    }

    #[test]
    fn broken_json_is_malformed() {
        let err = parse(r#"{"Número de Factura": "001",}"#).unwrap_err();
        assert!(matches!(err, FacturaError::MalformedJson { .. }), "got {err:?}");
    }

    #[test]
    fn no_header_fields_is_schema_mismatch() {
        let err = parse(r#"{"invoice": "001", "Detalles de Productos": []}"#).unwrap_err();
        assert!(matches!(err, FacturaError::SchemaMismatch { .. }), "got {err:?}");
    }

    #[test]
    fn missing_line_items_key_is_schema_mismatch() {
        let err = parse(r#"{"Número de Factura": "001"}"#).unwrap_err();
        match err {
            FacturaError::SchemaMismatch { detail } => assert!(detail.contains("Detalles de Productos")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn absent_and_null_headers_are_sentinels() {
        let invoice = parse(r#"{"Número de Factura": "9", "Fecha": null, "Detalles de Productos": null}"#).unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("9"));
        assert_eq!(invoice.date, None);
        assert_eq!(invoice.client_name, None);
        assert!(invoice.line_items.is_empty());
    }

    #[test]
    fn numbers_keep_json_spelling() {
        let invoice = parse(
            r#"{"Total": 150.5, "Detalles de Productos": [{"Codigo Producto": 7, "Cantidad": 3}]}"#,
        )
        .unwrap();
        assert_eq!(invoice.total.as_deref(), Some("150.5"));
        assert_eq!(invoice.line_items[0].product_code.as_deref(), Some("7"));
        assert_eq!(invoice.line_items[0].quantity.as_deref(), Some("3"));
        assert_eq!(invoice.line_items[0].description, None);
    }

    #[test]
    fn nested_value_in_scalar_field_is_schema_mismatch() {
        let err = parse(r#"{"Total": {"amount": 1}, "Detalles de Productos": []}"#).unwrap_err();
        assert!(matches!(err, FacturaError::SchemaMismatch { .. }));
    }

    #[test]
    fn non_object_line_item_is_schema_mismatch() {
        let err = parse(r#"{"Total": "1", "Detalles de Productos": ["P1"]}"#).unwrap_err();
        match err {
            FacturaError::SchemaMismatch { detail } => assert!(detail.contains("line item 1")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn currency_text_survives_verbatim() {
        let invoice = parse(r#"{"Total": "$ 1.234,56 MXN", "Detalles de Productos": []}"#).unwrap();
        assert_eq!(invoice.total.as_deref(), Some("$ 1.234,56 MXN"));
    }
}
