//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements exactly one step; [`crate::process::Pipeline`]
//! chains them.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ normalize ──▶ extract ──▶ parse ──▶ persist
//! (bytes)    (pdfium)      (model)     (JSON)    (facturas)
//! ```
//!
//! 1. [`normalize`] : turn an image or PDF into text or page images; PDF
//!    work runs in `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]    : PNG-encode rendered pages and base64-wrap images for
//!    the multimodal request body
//! 3. [`extract`]   : the model call; the only stage with network I/O
//!    besides persistence
//! 4. [`parse`]     : pull the JSON object out of the reply and check its shape
//! 5. [`persist`]   : write one row per line item, skipping stored keys

pub mod encode;
pub mod extract;
pub mod normalize;
pub mod parse;
pub mod persist;
