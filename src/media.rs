use std::io::Cursor;

use image::ImageReader;
use tracing::debug;
use uuid::Uuid;

/// Encoded image bytes plus the facts the pipeline needs about them.
///
/// The core never decodes pixels; `width`/`height` come from the ingestion
/// side and are only used for aspect-ratio resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub data: Vec<u8>,
    pub media_type: String,
    pub width: u32,
    pub height: u32,
}

impl MediaDescriptor {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            data,
            media_type: media_type.into(),
            width,
            height,
        }
    }

    /// Builds a descriptor from raw file bytes, sniffing the media type and
    /// reading dimensions from the encoded header.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let media_type = detect_mime_type(&data).unwrap_or_else(|| "image/png".to_string());
        let (width, height) = read_dimensions(&data).unwrap_or((0, 0));
        Self {
            data,
            media_type: normalize_image_mime_type(&media_type),
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A garment reference image plus the description produced by analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GarmentItem {
    pub id: String,
    pub media: MediaDescriptor,
    pub description: Option<String>,
}

impl GarmentItem {
    pub fn new(media: MediaDescriptor) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            media,
            description: None,
        }
    }

    pub fn with_id(id: impl Into<String>, media: MediaDescriptor) -> Self {
        Self {
            id: id.into(),
            media,
            description: None,
        }
    }

    pub fn description_or_empty(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_image_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        "" => "image/png".to_string(),
        _ => lowered,
    }
}

/// Reads width and height from the image header without decoding pixels.
pub fn read_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;
    match reader.into_dimensions() {
        Ok(dims) => Some(dims),
        Err(err) => {
            debug!("Could not read image dimensions: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn sniffs_png_and_reads_header_dimensions() {
        let media = MediaDescriptor::from_bytes(PNG_1X1.to_vec());
        assert_eq!(media.media_type, "image/png");
        assert_eq!((media.width, media.height), (1, 1));
    }

    #[test]
    fn unknown_bytes_fall_back_to_png_without_dimensions() {
        let media = MediaDescriptor::from_bytes(vec![1, 2, 3]);
        assert_eq!(media.media_type, "image/png");
        assert_eq!((media.width, media.height), (0, 0));
    }

    #[test]
    fn normalizes_jpg_alias() {
        assert_eq!(normalize_image_mime_type(" Image/JPG "), "image/jpeg");
    }

    #[test]
    fn garments_get_distinct_ids() {
        let media = MediaDescriptor::new(vec![0], "image/png", 1, 1);
        let a = GarmentItem::new(media.clone());
        let b = GarmentItem::new(media);
        assert_ne!(a.id, b.id);
        assert_eq!(a.description_or_empty(), "");
    }
}
