//! Input documents and the canonical content they normalise to.

use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";

/// Raw upload handed over by the presentation shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Lower-cased MIME type without parameters (`image/PNG; q=1` → `image/png`).
    pub fn essence(&self) -> String {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }
}

/// Guess a MIME type from a file extension, as a browser upload would.
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "png" => Some(MIME_PNG),
        "jpg" | "jpeg" => Some(MIME_JPEG),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// One image sent to the model: an uploaded photo or a rendered PDF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// What the model is shown.
///
/// `Text` is only produced when the extracted text is non-empty after
/// trimming; `ImagePages` always holds at least one page, in page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalContent {
    Text(String),
    ImagePages(Vec<PageImage>),
}

impl CanonicalContent {
    /// Short label for logs and stats.
    pub fn kind(&self) -> ContentKind {
        match self {
            CanonicalContent::Text(text) => ContentKind::Text { chars: text.chars().count() },
            CanonicalContent::ImagePages(pages) => ContentKind::Images { pages: pages.len() },
        }
    }
}

/// Summary of the canonical content of a run, kept after the bytes are gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContentKind {
    Text { chars: usize },
    Images { pages: usize },
}
