//! Image encoding: rendered pages → PNG bytes, and page bytes → `ImageData`.
//!
//! Multimodal APIs take images as base64 strings inside the JSON request
//! body. Rendered PDF pages are encoded as PNG because it is lossless; small
//! print on an invoice (quantities, product codes) does not survive JPEG
//! artefacts well. Uploaded photos are forwarded in their original format.

use crate::document::{PageImage, MIME_PNG};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<PageImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} bytes PNG", img.width(), img.height(), buf.len());

    Ok(PageImage {
        mime_type: MIME_PNG.to_string(),
        bytes: buf,
    })
}

/// Wrap page bytes as base64 `ImageData` for the model request.
///
/// `detail: "high"` keeps fine print legible for providers that tile images.
pub fn to_image_data(page: &PageImage) -> ImageData {
    let b64 = STANDARD.encode(&page.bytes);
    debug!("Attached {} image → {} bytes base64", page.mime_type, b64.len());
    ImageData::new(b64, page.mime_type.as_str()).with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let page = encode_png(&img).expect("encode should succeed");
        assert_eq!(page.mime_type, "image/png");
        assert_eq!(&page.bytes[1..4], b"PNG");
    }

    #[test]
    fn image_data_round_trips_bytes() {
        let page = PageImage {
            mime_type: "image/jpeg".into(),
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
        };
        let data = to_image_data(&page);
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, page.bytes);
    }
}
