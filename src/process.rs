//! The pipeline orchestrator: upload → normalise → extract → parse → persist.
//!
//! Each stage runs once, in order. The first failing stage ends the run and
//! is reported as a [`PipelineError`] tagged with that stage, so the shell
//! shows one message and never matches on component errors. Nothing is
//! written unless parsing succeeded.

use crate::config::{ExtractionConfig, PagePolicy};
use crate::document::{mime_from_path, CanonicalContent, UploadedDocument};
use crate::error::{FacturaError, PipelineError, Stage};
use crate::output::{PipelineOutput, PipelineStats, Warning};
use crate::pipeline::extract::{ExtractionClient, ModelBackend};
use crate::pipeline::normalize::normalize;
use crate::pipeline::parse::parse;
use crate::pipeline::persist::{persist, InvoiceStore};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One configured pipeline: a model backend, a store, and the settings that
/// drive normalisation. Build once and call [`Pipeline::run`] per upload.
pub struct Pipeline<B, S> {
    client: ExtractionClient<B>,
    store: S,
    config: ExtractionConfig,
}

impl<B: ModelBackend, S: InvoiceStore> Pipeline<B, S> {
    pub fn new(backend: B, store: S, config: ExtractionConfig) -> Self {
        Self {
            client: ExtractionClient::new(backend, &config),
            store,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every stage on one uploaded document.
    ///
    /// # Errors
    /// Returns a [`PipelineError`] naming the first stage that failed. For a
    /// persistence failure the error also carries the extracted invoice.
    pub async fn run(&self, document: UploadedDocument) -> Result<PipelineOutput, PipelineError> {
        let total_start = Instant::now();
        info!(
            "Starting extraction: {} ({} bytes)",
            document.mime_type,
            document.bytes.len()
        );
        let mut warnings = Vec::new();

        // ── Step 1: Normalise ────────────────────────────────────────────
        self.stage_start(Stage::Normalization);
        let step = Instant::now();
        let content = normalize(document, self.config.max_rendered_pixels)
            .await
            .map_err(|e| self.fail(Stage::Normalization, e))?;
        let normalize_duration_ms = step.elapsed().as_millis() as u64;
        self.stage_complete(Stage::Normalization);

        let kind = content.kind();
        debug!("Canonical content: {:?}", kind);
        if let Some(warning) = pages_not_sent(&content, self.client.page_policy()) {
            warn!("{}", warning);
            warnings.push(warning);
        }

        // ── Step 2: Extract ──────────────────────────────────────────────
        self.stage_start(Stage::Extraction);
        let step = Instant::now();
        let reply = self
            .client
            .extract(&content)
            .await
            .map_err(|e| self.fail(Stage::Extraction, e))?;
        let extract_duration_ms = step.elapsed().as_millis() as u64;
        self.stage_complete(Stage::Extraction);
        drop(content);

        // ── Step 3: Parse ────────────────────────────────────────────────
        self.stage_start(Stage::Parsing);
        let step = Instant::now();
        let invoice = parse(&reply.text).map_err(|e| self.fail(Stage::Parsing, e))?;
        let parse_duration_ms = step.elapsed().as_millis() as u64;
        self.stage_complete(Stage::Parsing);
        info!(
            "Parsed invoice {} with {} line item(s)",
            invoice.invoice_number.as_deref().unwrap_or("<none>"),
            invoice.line_items.len()
        );

        // ── Step 4: Persist ──────────────────────────────────────────────
        let mut persist_duration_ms = 0;
        let persisted = if invoice.line_items.is_empty() {
            warn!("{}", Warning::NoLineItems);
            warnings.push(Warning::NoLineItems);
            None
        } else {
            self.stage_start(Stage::Persistence);
            let step = Instant::now();
            match persist(&self.store, &invoice).await {
                Ok(outcome) => {
                    persist_duration_ms = step.elapsed().as_millis() as u64;
                    self.stage_complete(Stage::Persistence);
                    Some(outcome)
                }
                Err(e) => {
                    self.report_error(Stage::Persistence, &e);
                    return Err(PipelineError::unsaved(invoice, e));
                }
            }
        };

        let stats = PipelineStats {
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            normalize_duration_ms,
            extract_duration_ms,
            parse_duration_ms,
            persist_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!("Extraction complete in {}ms", stats.total_duration_ms);

        Ok(PipelineOutput {
            invoice,
            persisted,
            content: kind,
            warnings,
            stats,
        })
    }

    /// Read `path` and run it, with the MIME type guessed from the extension.
    ///
    /// Read failures and unknown extensions are normalisation failures.
    pub async fn run_file(&self, path: impl AsRef<Path>) -> Result<PipelineOutput, PipelineError> {
        let document = read_document(path.as_ref(), None)
            .await
            .map_err(|e| self.fail(Stage::Normalization, e))?;
        self.run(document).await
    }

    /// Synchronous wrapper around [`Pipeline::run`].
    ///
    /// Creates a temporary tokio runtime internally, so it must not be
    /// called from inside one.
    pub fn run_sync(&self, document: UploadedDocument) -> Result<PipelineOutput, PipelineError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| {
                PipelineError::new(
                    Stage::Normalization,
                    FacturaError::Internal(format!("Failed to create tokio runtime: {}", e)),
                )
            })?
            .block_on(self.run(document))
    }

    // ── Progress plumbing ────────────────────────────────────────────────

    fn stage_start(&self, stage: Stage) {
        debug!("Stage {} started", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(stage);
        }
    }

    fn stage_complete(&self, stage: Stage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(stage);
        }
    }

    fn report_error(&self, stage: Stage, error: &FacturaError) {
        warn!("Stage {} failed: {}", stage, error);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_error(stage, &error.to_string());
        }
    }

    fn fail(&self, stage: Stage, error: FacturaError) -> PipelineError {
        self.report_error(stage, &error);
        PipelineError::new(stage, error)
    }
}

/// Load a file as an upload. `mime_type` overrides the extension guess.
pub async fn read_document(path: &Path, mime_type: Option<&str>) -> Result<UploadedDocument, FacturaError> {
    let mime = match mime_type {
        Some(m) => m.to_string(),
        None => mime_from_path(path)
            .ok_or_else(|| FacturaError::UnsupportedFormat {
                mime_type: format!(
                    "unknown (extension {:?})",
                    path.extension().and_then(|e| e.to_str()).unwrap_or("")
                ),
            })?
            .to_string(),
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| FacturaError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(UploadedDocument::new(mime, bytes))
}

fn pages_not_sent(content: &CanonicalContent, policy: PagePolicy) -> Option<Warning> {
    match (content, policy) {
        (CanonicalContent::ImagePages(pages), PagePolicy::FirstPage) if pages.len() > 1 => {
            Some(Warning::PagesNotSent {
                sent: 1,
                total: pages.len(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PageImage, MIME_PNG};
    use crate::invoice::{FacturaRow, PersistOutcome};
    use crate::pipeline::extract::{ExtractionRequest, ModelReply};
    use crate::progress::PipelineProgress;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const REPLY: &str = r#"Here you go:
```json
{"Número de Factura":"001","Fecha":"2024-03-01","Nombre del Cliente":"ACME S.A.",
 "Nombre del Proveedor":"Widgets SRL","Total":"150.00",
 "Detalles de Productos":[{"Codigo Producto":"P1","Descripcion producto":"Widget","Cantidad":"3"}]}
```"#;

    struct Scripted {
        reply: String,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ModelBackend for Scripted {
        async fn complete(&self, _request: &ExtractionRequest) -> Result<ModelReply, FacturaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ModelReply {
                text: self.reply.clone(),
                input_tokens: 120,
                output_tokens: 40,
            })
        }
    }

    struct Unreachable;

    impl InvoiceStore for Unreachable {
        async fn insert_new(&self, _rows: &[FacturaRow]) -> Result<Vec<bool>, FacturaError> {
            Err(FacturaError::ConnectionError {
                detail: "connection refused".into(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PipelineProgress for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("start {stage}"));
        }
        fn on_stage_complete(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("done {stage}"));
        }
        fn on_stage_error(&self, stage: Stage, _error: &str) {
            self.events.lock().unwrap().push(format!("error {stage}"));
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(4, 4);
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn pipeline(reply: &str) -> Pipeline<Scripted, MemoryStore> {
        Pipeline::new(Scripted::new(reply), MemoryStore::new(), ExtractionConfig::default())
    }

    #[tokio::test]
    async fn image_upload_is_extracted_and_stored() {
        let pipeline = pipeline(REPLY);
        let output = pipeline
            .run(UploadedDocument::new(MIME_PNG, png_bytes()))
            .await
            .unwrap();

        assert_eq!(output.invoice.invoice_number.as_deref(), Some("001"));
        assert_eq!(output.persisted, Some(PersistOutcome { inserted: 1, skipped: 0 }));
        assert_eq!(output.content, crate::document::ContentKind::Images { pages: 1 });
        assert_eq!(output.stats.input_tokens, 120);
        assert_eq!(output.stats.output_tokens, 40);
        assert!(output.warnings.is_empty());
        assert_eq!(pipeline.store().len(), 1);
    }

    #[tokio::test]
    async fn rerun_skips_stored_rows() {
        let pipeline = pipeline(REPLY);
        pipeline.run(UploadedDocument::new(MIME_PNG, png_bytes())).await.unwrap();
        let again = pipeline.run(UploadedDocument::new(MIME_PNG, png_bytes())).await.unwrap();
        assert_eq!(again.persisted, Some(PersistOutcome { inserted: 0, skipped: 1 }));
        assert!(!again.wrote_rows());
        assert_eq!(pipeline.store().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_type_fails_before_model_call() {
        let pipeline = pipeline(REPLY);
        let err = pipeline
            .run(UploadedDocument::new("text/plain", b"hello".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Normalization);
        assert!(matches!(err.cause, FacturaError::UnsupportedFormat { .. }));
        assert_eq!(pipeline.client.backend_calls(), 0);
    }

    #[tokio::test]
    async fn malformed_reply_is_parsing_failure_and_writes_nothing() {
        let pipeline = pipeline("Sorry, I can't read this invoice.");
        let err = pipeline
            .run(UploadedDocument::new(MIME_PNG, png_bytes()))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Parsing);
        assert!(matches!(err.cause, FacturaError::NoJsonFound));
        assert!(err.invoice.is_none());
        assert!(pipeline.store().is_empty());
    }

    #[tokio::test]
    async fn empty_line_items_skip_persistence_with_warning() {
        let pipeline = pipeline(r#"{"Número de Factura":"002","Total":"0","Detalles de Productos":[]}"#);
        let output = pipeline
            .run(UploadedDocument::new(MIME_PNG, png_bytes()))
            .await
            .unwrap();
        assert_eq!(output.persisted, None);
        assert_eq!(output.warnings, vec![Warning::NoLineItems]);
        assert_eq!(output.stats.persist_duration_ms, 0);
        assert!(pipeline.store().is_empty());
    }

    #[tokio::test]
    async fn store_failure_keeps_invoice() {
        let pipeline = Pipeline::new(Scripted::new(REPLY), Unreachable, ExtractionConfig::default());
        let err = pipeline
            .run(UploadedDocument::new(MIME_PNG, png_bytes()))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Persistence);
        assert!(err.is_unsaved());
        let invoice = err.invoice.unwrap();
        assert_eq!(invoice.total.as_deref(), Some("150.00"));
    }

    #[tokio::test]
    async fn missing_invoice_number_is_persistence_failure() {
        let pipeline = pipeline(
            r#"{"Número de Factura":null,"Detalles de Productos":[{"Codigo Producto":"P1"}]}"#,
        );
        let err = pipeline
            .run(UploadedDocument::new(MIME_PNG, png_bytes()))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Persistence);
        assert!(matches!(err.cause, FacturaError::MissingInvoiceNumber));
        assert!(pipeline.store().is_empty());
    }

    #[tokio::test]
    async fn progress_events_follow_stage_order() {
        let recorder = Arc::new(Recorder::default());
        let config = ExtractionConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let pipeline = Pipeline::new(Scripted::new("no json"), MemoryStore::new(), config);
        let _ = pipeline.run(UploadedDocument::new(MIME_PNG, png_bytes())).await;

        let events = recorder.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "start normalization",
                "done normalization",
                "start extraction",
                "done extraction",
                "start parsing",
                "error parsing",
            ]
        );
    }

    #[tokio::test]
    async fn run_file_reports_missing_file_as_normalization() {
        let pipeline = pipeline(REPLY);
        let err = pipeline.run_file("/nonexistent/factura.png").await.unwrap_err();
        assert_eq!(err.stage, Stage::Normalization);
        assert!(matches!(err.cause, FacturaError::FileRead { .. }));
    }

    #[tokio::test]
    async fn read_document_honours_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.bin");
        std::fs::write(&path, png_bytes()).unwrap();

        assert!(matches!(
            read_document(&path, None).await,
            Err(FacturaError::UnsupportedFormat { .. })
        ));
        let doc = read_document(&path, Some(MIME_PNG)).await.unwrap();
        assert_eq!(doc.mime_type, MIME_PNG);
    }

    #[test]
    fn run_sync_drives_the_pipeline() {
        let pipeline = pipeline(REPLY);
        let output = pipeline
            .run_sync(UploadedDocument::new(MIME_PNG, png_bytes()))
            .unwrap();
        assert_eq!(output.persisted.map(|p| p.inserted), Some(1));
    }

    #[test]
    fn first_page_policy_flags_dropped_pages() {
        let page = PageImage {
            mime_type: MIME_PNG.into(),
            bytes: vec![1],
        };
        let three = CanonicalContent::ImagePages(vec![page.clone(), page.clone(), page]);
        assert_eq!(
            pages_not_sent(&three, PagePolicy::FirstPage),
            Some(Warning::PagesNotSent { sent: 1, total: 3 })
        );
        assert_eq!(pages_not_sent(&three, PagePolicy::AllPages), None);
        assert_eq!(
            pages_not_sent(&CanonicalContent::Text("x".into()), PagePolicy::FirstPage),
            None
        );
    }

    impl ExtractionClient<Scripted> {
        fn backend_calls(&self) -> usize {
            self.backend().calls.load(Ordering::SeqCst)
        }
    }
}
