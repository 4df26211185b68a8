// Raster encode/decode at the compositor boundary.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use tessera_common::aspect::{EncodingKind, PixelSize};
use tessera_common::error::{PipelineError, Result};

/// Concrete output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Lossy; alpha is dropped.
    Jpeg { quality: u8 },
    Png,
}

impl Encoding {
    pub fn for_kind(kind: EncodingKind, quality: u8) -> Self {
        match kind {
            EncodingKind::Lossy => Self::Jpeg { quality: quality.clamp(1, 100) },
            EncodingKind::Lossless => Self::Png,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg { .. } => "jpg",
            Self::Png => "png",
        }
    }
}

pub fn encode(raster: &RgbaImage, encoding: Encoding) -> Result<Vec<u8>> {
    let (width, height) = raster.dimensions();
    let mut bytes = Vec::new();
    match encoding {
        Encoding::Jpeg { quality } => {
            let rgb = DynamicImage::ImageRgba8(raster.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, quality)
                .encode(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| PipelineError::encode(format!("JPEG encode error: {e}")))?;
        }
        Encoding::Png => {
            PngEncoder::new(Cursor::new(&mut bytes))
                .write_image(raster.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(|e| PipelineError::encode(format!("PNG encode error: {e}")))?;
        }
    }
    Ok(bytes)
}

/// Decode any supported raster into RGBA8.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::encode(format!("failed to decode image: {e}")))?;
    Ok(image.to_rgba8())
}

pub fn size_of(raster: &RgbaImage) -> PixelSize {
    let (width, height) = raster.dimensions();
    PixelSize::new(width, height)
}
