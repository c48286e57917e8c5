//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineProgress>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to hear about
//! each stage as the pipeline moves through it. The CLI uses this to drive a
//! spinner; a web shell could forward the events over a socket instead.
//!
//! # Example
//!
//! ```rust
//! use factura_extract::{ExtractionConfig, PipelineProgress, Stage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Recorder {
//!     seen: Mutex<Vec<Stage>>,
//! }
//!
//! impl PipelineProgress for Recorder {
//!     fn on_stage_complete(&self, stage: Stage) {
//!         self.seen.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Recorder::default()) as Arc<dyn PipelineProgress>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use std::sync::Arc;

/// Called by [`crate::Pipeline::run`] around each stage.
///
/// All methods default to no-ops so callers only override what they need.
pub trait PipelineProgress: Send + Sync {
    /// Called just before a stage starts.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage fails. The run ends after this call.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }
}

/// Shared handle stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgress>;

/// A callback that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}
