//! Cover art: extraction, size normalization and embedding.
//!
//! Only JPEG and PNG are accepted for embedding. Oversized images are
//! scaled down so their longest side equals the configured maximum and are
//! re-encoded in their own encoding.

use crate::tags::TagSet;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fmt;
use std::io::Cursor;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("unsupported image encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("image could not be decoded: {0}")]
    Decode(String),

    #[error("image could not be re-encoded: {0}")]
    Encode(String),

    #[error("maximum cover dimension must be positive")]
    InvalidLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Jpeg,
    Png,
}

impl ImageEncoding {
    /// Sniff the encoding from the image bytes themselves.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match infer::get(data)?.mime_type() {
            "image/jpeg" => Some(ImageEncoding::Jpeg),
            "image/png" => Some(ImageEncoding::Png),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "image/jpeg",
            ImageEncoding::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "jpg",
            ImageEncoding::Png => "png",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            ImageEncoding::Jpeg => ImageFormat::Jpeg,
            ImageEncoding::Png => ImageFormat::Png,
        }
    }
}

/// An image payload with its declared MIME type.
///
/// Pixel dimensions come from the container when it records them and are
/// otherwise read lazily from the image header.
#[derive(Clone)]
pub struct CoverArt {
    data: Vec<u8>,
    mime_type: String,
    dimensions: OnceLock<Option<(u32, u32)>>,
}

impl CoverArt {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            dimensions: OnceLock::new(),
        }
    }

    /// Build from raw bytes, taking the MIME type from the content.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mime = infer::get(&data)
            .map(|k| k.mime_type())
            .unwrap_or("application/octet-stream");
        Self::new(data, mime)
    }

    pub fn with_dimensions(self, width: u32, height: u32) -> Self {
        Self {
            dimensions: OnceLock::from(Some((width, height))),
            ..self
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn encoding(&self) -> Option<ImageEncoding> {
        ImageEncoding::sniff(&self.data)
    }

    /// `(width, height)` in pixels, if the image header can be read.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        *self.dimensions.get_or_init(|| {
            ImageReader::new(Cursor::new(&self.data))
                .with_guessed_format()
                .ok()?
                .into_dimensions()
                .ok()
        })
    }
}

impl PartialEq for CoverArt {
    fn eq(&self, other: &Self) -> bool {
        self.mime_type == other.mime_type && self.data == other.data
    }
}

impl fmt::Debug for CoverArt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverArt")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .field("dimensions", &self.dimensions.get())
            .finish()
    }
}

/// Owned copy of the primary image, MIME type normalized from its bytes.
pub fn extract(tags: &TagSet) -> Option<CoverArt> {
    let cover = tags.cover()?.clone();
    match cover.encoding() {
        Some(encoding) if encoding.mime_type() != cover.mime_type() => {
            debug!(
                "Normalizing cover MIME type {} -> {}",
                cover.mime_type(),
                encoding.mime_type()
            );
            let dims = cover.dimensions.get().copied().flatten();
            let normalized = CoverArt::new(cover.into_data(), encoding.mime_type());
            Some(match dims {
                Some((w, h)) => normalized.with_dimensions(w, h),
                None => normalized,
            })
        }
        _ => Some(cover),
    }
}

/// Validate and downscale an image for embedding.
pub fn prepare(cover: CoverArt, max_dimension: u32) -> Result<CoverArt, CoverError> {
    if max_dimension == 0 {
        return Err(CoverError::InvalidLimit);
    }
    let encoding = cover
        .encoding()
        .ok_or_else(|| CoverError::UnsupportedEncoding(cover.mime_type().to_string()))?;

    let image = image::load_from_memory_with_format(cover.data(), encoding.image_format())
        .map_err(|e| CoverError::Decode(e.to_string()))?;
    let (width, height) = (image.width(), image.height());

    if width.max(height) <= max_dimension {
        return Ok(CoverArt::new(cover.into_data(), encoding.mime_type())
            .with_dimensions(width, height));
    }

    let resized = image.resize(max_dimension, max_dimension, FilterType::Triangle);
    let data = encode_image(&resized, encoding)?;
    info!(
        "Resized {} cover {}x{} -> {}x{}",
        encoding.mime_type(),
        width,
        height,
        resized.width(),
        resized.height()
    );
    Ok(CoverArt::new(data, encoding.mime_type())
        .with_dimensions(resized.width(), resized.height()))
}

/// Replace the primary image of `tags` with `cover`, resized to fit.
pub fn embed(tags: &mut TagSet, cover: CoverArt, max_dimension: u32) -> Result<(), CoverError> {
    let prepared = prepare(cover, max_dimension)?;
    debug!(
        "Embedding {} byte cover into {} tag set",
        prepared.data().len(),
        tags.format()
    );
    tags.set_cover(Some(prepared));
    Ok(())
}

/// Clear the primary image. Secondary images stay in the container.
pub fn remove(tags: &mut TagSet) {
    tags.set_cover(None);
}

fn encode_image(image: &DynamicImage, encoding: ImageEncoding) -> Result<Vec<u8>, CoverError> {
    let image = match encoding {
        // The JPEG encoder rejects alpha channels.
        ImageEncoding::Jpeg if image.color().has_alpha() => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image.clone(),
    };
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), encoding.image_format())
        .map_err(|e| CoverError::Encode(e.to_string()))?;
    Ok(out)
}
