//! Document normalisation: upload → [`CanonicalContent`].
//!
//! Images pass straight through as a single page. PDFs are opened with
//! pdfium; if any page carries a text layer the whole document goes to the
//! model as text, otherwise every page is rasterised to PNG. The choice is
//! made once per document, so a PDF mixing a scanned page with a typed page
//! is sent as text rather than paying for lossy image extraction.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and no async story.
//! Text extraction and rendering are CPU-bound, so both run on the blocking
//! pool to keep the Tokio workers free.

use crate::document::{CanonicalContent, PageImage, UploadedDocument, MIME_PDF};
use crate::error::FacturaError;
use crate::pipeline::encode;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::{debug, info};

/// Normalise an uploaded document.
///
/// # Errors
/// - [`FacturaError::UnsupportedFormat`] for anything but `image/*` and `application/pdf`
/// - [`FacturaError::CorruptDocument`] when the bytes do not decode as the declared type
/// - [`FacturaError::PdfiumBindingFailed`] when no pdfium library can be loaded
pub async fn normalize(
    document: UploadedDocument,
    max_rendered_pixels: u32,
) -> Result<CanonicalContent, FacturaError> {
    let mime = document.essence();
    info!("Normalising {} ({} bytes)", mime, document.bytes.len());

    if mime == MIME_PDF {
        check_pdf_magic(&mime, &document.bytes)?;
        let bytes = document.bytes;
        return tokio::task::spawn_blocking(move || normalize_pdf_blocking(&bytes, max_rendered_pixels))
            .await
            .map_err(|e| FacturaError::Internal(format!("PDF task panicked: {}", e)))?;
    }

    if mime.starts_with("image/") {
        check_image(&mime, &document.bytes)?;
        return Ok(CanonicalContent::ImagePages(vec![PageImage {
            mime_type: mime,
            bytes: document.bytes,
        }]));
    }

    Err(FacturaError::UnsupportedFormat {
        mime_type: document.mime_type,
    })
}

/// Pick the canonical form from per-page text layers.
///
/// `render` is only invoked when the concatenated text is blank.
pub fn select_content<F>(page_texts: &[String], render: F) -> Result<CanonicalContent, FacturaError>
where
    F: FnOnce() -> Result<Vec<PageImage>, FacturaError>,
{
    let text = page_texts.concat();
    if !text.trim().is_empty() {
        debug!("Text layer found: {} chars", text.chars().count());
        return Ok(CanonicalContent::Text(text));
    }

    debug!("No text layer in {} pages; rendering", page_texts.len());
    let pages = render()?;
    if pages.is_empty() {
        return Err(FacturaError::CorruptDocument {
            mime_type: MIME_PDF.to_string(),
            detail: "document has no pages".to_string(),
        });
    }
    Ok(CanonicalContent::ImagePages(pages))
}

fn check_pdf_magic(mime: &str, bytes: &[u8]) -> Result<(), FacturaError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(FacturaError::CorruptDocument {
            mime_type: mime.to_string(),
            detail: format!("missing %PDF header, first bytes: {:?}", magic),
        });
    }
    Ok(())
}

/// Check an image upload against its declared type.
///
/// Formats the `image` crate knows are matched against their magic bytes;
/// PNG and JPEG headers are also parsed. Unknown `image/*` subtypes are
/// forwarded unchecked and left to the model service.
fn check_image(mime: &str, bytes: &[u8]) -> Result<(), FacturaError> {
    let corrupt = |detail: String| FacturaError::CorruptDocument {
        mime_type: mime.to_string(),
        detail,
    };

    if bytes.is_empty() {
        return Err(corrupt("file is empty".to_string()));
    }

    let declared = match ImageFormat::from_mime_type(mime) {
        Some(format) => format,
        None => {
            debug!("No decoder for {}; forwarding unchecked", mime);
            return Ok(());
        }
    };

    let actual = image::guess_format(bytes).map_err(|e| corrupt(e.to_string()))?;
    if actual != declared {
        return Err(corrupt(format!(
            "content is {:?}, not {:?}",
            actual, declared
        )));
    }

    if matches!(declared, ImageFormat::Png | ImageFormat::Jpeg) {
        let (w, h) = image::ImageReader::with_format(Cursor::new(bytes), declared)
            .into_dimensions()
            .map_err(|e| corrupt(e.to_string()))?;
        debug!("Image upload {}x{} px", w, h);
    }

    Ok(())
}

/// Blocking PDF path: read text layers, render only if they are all blank.
fn normalize_pdf_blocking(bytes: &[u8], max_pixels: u32) -> Result<CanonicalContent, FacturaError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| FacturaError::PdfiumBindingFailed(e.to_string()))?;

    let corrupt = |detail: String| FacturaError::CorruptDocument {
        mime_type: MIME_PDF.to_string(),
        detail,
    };

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| corrupt(format!("{:?}", e)))?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut texts = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let text = page
            .text()
            .map_err(|e| corrupt(format!("page {}: {:?}", idx + 1, e)))?
            .all();
        texts.push(text);
    }

    select_content(&texts, || {
        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut rendered = Vec::with_capacity(texts.len());
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| corrupt(format!("rendering page {}: {:?}", idx + 1, e)))?;
            let image = bitmap.as_image();
            debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());

            let png = encode::encode_png(&image)
                .map_err(|e| corrupt(format!("encoding page {}: {}", idx + 1, e)))?;
            rendered.push(png);
        }
        Ok(rendered)
    })
}
