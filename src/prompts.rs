//! Instruction template sent with every extraction request.
//!
//! Kept here so tests can check the template against the key set the parser
//! expects without calling a model. Callers can override it via
//! [`crate::config::ExtractionConfig::instruction`].

/// Default instruction. Demands a single JSON object with the keys in
/// [`crate::invoice::keys`], using `null` for anything the model cannot read.
pub const INVOICE_INSTRUCTION: &str = r#"Extract the following data from the invoice in JSON format:
{
  "Número de Factura": "Value",
  "Fecha": "Value",
  "Nombre del Cliente": "Value",
  "Nombre del Proveedor": "Value",
  "Total": "Value",
  "Detalles de Productos": [
    {
      "Codigo Producto": "Value",
      "Descripcion producto": "Value",
      "Cantidad": "Value"
    }
  ]
}
Use `null` for missing data.
Copy every value exactly as printed, including currency symbols and separators.
Reply with the JSON object only."#;
