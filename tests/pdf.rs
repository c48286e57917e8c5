//! PDF normalisation against a real pdfium library.
//!
//! The documents are generated on the fly with pdfium itself, so no fixture
//! files are needed, but the pdfium shared library must be available (or
//! downloadable). Gated behind `FACTURA_PDF_TESTS`.
//!
//! Run with:
//!   FACTURA_PDF_TESTS=1 cargo test --test pdf -- --nocapture

use factura_extract::{
    normalize, CanonicalContent, ContentKind, ExtractionConfig, ExtractionRequest, FacturaError,
    MemoryStore, ModelBackend, ModelReply, Pipeline, RequestBody, UploadedDocument,
};
use pdfium_render::prelude::*;
use std::sync::{Arc, Mutex};
use tokio_test::assert_ok;

macro_rules! pdf_skip_unless_enabled {
    () => {
        if std::env::var("FACTURA_PDF_TESTS").is_err() {
            println!("SKIP — set FACTURA_PDF_TESTS=1 to run PDF tests");
            return;
        }
    };
}

const REPLY: &str = r#"{
  "Número de Factura": "PDF-1",
  "Fecha": "2024-05-02",
  "Nombre del Cliente": "ACME S.A.",
  "Nombre del Proveedor": "Widgets SRL",
  "Total": "99.00",
  "Detalles de Productos": [
    {"Codigo Producto": "P1", "Descripcion producto": "Widget", "Cantidad": "1"}
  ]
}"#;

/// Answers every request with [`REPLY`] and keeps what it was sent.
#[derive(Default)]
struct RecordingModel {
    requests: Mutex<Vec<ExtractionRequest>>,
}

impl ModelBackend for RecordingModel {
    async fn complete(&self, request: &ExtractionRequest) -> Result<ModelReply, FacturaError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ModelReply {
            text: REPLY.to_string(),
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

/// Build a PDF with one A4 page per entry; `Some(text)` writes that text on
/// the page, `None` leaves it blank.
fn build_pdf(pdfium: &Pdfium, pages: &[Option<&str>]) -> Vec<u8> {
    let mut document = pdfium.create_new_pdf().unwrap();
    let font = document.fonts_mut().helvetica();

    for text in pages {
        let mut page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::a4())
            .unwrap();
        if let Some(text) = text {
            page.objects_mut()
                .create_text_object(
                    PdfPoints::new(72.0),
                    PdfPoints::new(720.0),
                    *text,
                    font,
                    PdfPoints::new(14.0),
                )
                .unwrap();
        }
    }

    document.save_to_bytes().unwrap()
}

fn pdf(bytes: &[u8]) -> UploadedDocument {
    UploadedDocument::new("application/pdf", bytes.to_vec())
}

// Kept in one test: each normalise call binds pdfium on its own, and the
// generator binding must be released before that happens.
#[tokio::test]
async fn pdf_text_layer_and_scanned_pages() {
    pdf_skip_unless_enabled!();

    let (with_text, scanned) = {
        let pdfium = pdfium_auto::bind_pdfium_silent().expect("pdfium available");
        (
            build_pdf(&pdfium, &[None, Some("Factura 001")]),
            build_pdf(&pdfium, &[None, None, None]),
        )
    };

    // A blank first page does not hide the text layer of the second.
    match assert_ok!(normalize(pdf(&with_text), 1000).await) {
        CanonicalContent::Text(text) => {
            assert!(text.contains("Factura 001"), "got: {text:?}");
        }
        other => panic!("expected text, got {:?}", other.kind()),
    }

    // No text anywhere: every page is rendered, in order.
    match assert_ok!(normalize(pdf(&scanned), 200).await) {
        CanonicalContent::ImagePages(pages) => {
            assert_eq!(pages.len(), 3);
            for page in &pages {
                assert_eq!(page.mime_type, "image/png");
                assert!(page.bytes.starts_with(b"\x89PNG"));
            }
        }
        other => panic!("expected rendered pages, got {:?}", other.kind()),
    }

    // Through the whole pipeline the model sees the extracted text.
    let model = Arc::new(RecordingModel::default());
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(model.clone(), store.clone(), ExtractionConfig::default());

    let output = assert_ok!(pipeline.run(pdf(&with_text)).await);
    assert!(matches!(output.content, ContentKind::Text { .. }));
    assert_eq!(store.rows().len(), 1);

    let requests = model.requests.lock().unwrap();
    match &requests[0].body {
        RequestBody::Text(text) => assert!(text.contains("Factura 001")),
        other => panic!("expected text body, got {other:?}"),
    }
}
