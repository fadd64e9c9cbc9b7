use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageError, ImageFormat, imageops::FilterType};
use thiserror::Error;

use crate::cache::TransformParams;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("requested {width:?}x{height:?} exceeds the maximum dimension of {max}px")]
    TooLarge {
        width: Option<u32>,
        height: Option<u32>,
        max: u32,
    },
    #[error("failed to decode image")]
    Decode(#[source] ImageError),
    #[error("failed to encode image")]
    Encode(#[source] ImageError),
}

/// Shrinks raster images into a requested bounding box, keeping aspect ratio.
#[derive(Debug, Clone, Copy)]
pub struct ImageResizer {
    max_dimension: u32,
}

impl ImageResizer {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Reject requests for either dimension above the maximum.
    pub fn check(&self, params: &TransformParams) -> Result<(), ResizeError> {
        let too_large = |value: Option<u32>| value.is_some_and(|v| v > self.max_dimension);
        if too_large(params.width) || too_large(params.height) {
            return Err(ResizeError::TooLarge {
                width: params.width,
                height: params.height,
                max: self.max_dimension,
            });
        }
        Ok(())
    }

    /// Resize `body` so it fits the requested box. Images that already fit
    /// are returned untouched; images are never enlarged.
    pub fn resize(
        &self,
        body: Bytes,
        format: ImageFormat,
        params: &TransformParams,
    ) -> Result<Bytes, ResizeError> {
        self.check(params)?;
        if params.is_empty() {
            return Ok(body);
        }

        let image = image::load_from_memory_with_format(&body, format).map_err(ResizeError::Decode)?;
        let box_width = params.width.unwrap_or(u32::MAX);
        let box_height = params.height.unwrap_or(u32::MAX);
        if image.width() <= box_width && image.height() <= box_height {
            return Ok(body);
        }

        let resized = image.resize(box_width, box_height, FilterType::Lanczos3);
        let resized = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
            _ => resized,
        };

        let mut out = Vec::new();
        resized
            .write_to(&mut Cursor::new(&mut out), format)
            .map_err(ResizeError::Encode)?;
        Ok(Bytes::from(out))
    }
}
