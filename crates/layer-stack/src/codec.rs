//! Layer payload codecs.
//!
//! A layer keeps its image compressed and only decodes it on demand. The
//! codec is chosen by the format adapter that produced the payload; the
//! store treats the bytes as opaque.

use crate::error::{LayerError, LayerResult};
use image::{GrayImage, ImageFormat};
use std::fmt::Debug;

/// Converts between a compressed payload and an 8-bit grayscale grid.
pub trait LayerCodec: Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decode a payload into a grayscale image.
    fn decode(&self, bytes: &[u8]) -> LayerResult<GrayImage>;

    /// Encode a grayscale image into a payload.
    fn encode(&self, image: &GrayImage) -> LayerResult<Vec<u8>>;
}

/// 8-bit grayscale PNG, the most common layer container in slice archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl LayerCodec for PngCodec {
    fn name(&self) -> &'static str {
        "png"
    }

    fn decode(&self, bytes: &[u8]) -> LayerResult<GrayImage> {
        if bytes.is_empty() {
            return Err(LayerError::decode(None, "payload is empty"));
        }
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|e| LayerError::decode(None, e.to_string()))?;
        Ok(img.to_luma8())
    }

    fn encode(&self, image: &GrayImage) -> LayerResult<Vec<u8>> {
        let mut out = Vec::with_capacity(image.as_raw().len() / 8 + 64);
        {
            let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_compression(png::Compression::Fast);
            let mut writer = encoder
                .write_header()
                .map_err(|e| LayerError::encode(e.to_string()))?;
            writer
                .write_image_data(image.as_raw())
                .map_err(|e| LayerError::encode(e.to_string()))?;
            writer
                .finish()
                .map_err(|e| LayerError::encode(e.to_string()))?;
        }
        Ok(out)
    }
}

/// Uncompressed row-major bytes with a fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCodec {
    pub width: u32,
    pub height: u32,
}

impl RawCodec {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl LayerCodec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn decode(&self, bytes: &[u8]) -> LayerResult<GrayImage> {
        let expected = self.width as usize * self.height as usize;
        if bytes.len() != expected {
            return Err(LayerError::decode(
                None,
                format!("expected {} bytes, got {}", expected, bytes.len()),
            ));
        }
        GrayImage::from_raw(self.width, self.height, bytes.to_vec())
            .ok_or_else(|| LayerError::decode(None, "buffer does not match resolution"))
    }

    fn encode(&self, image: &GrayImage) -> LayerResult<Vec<u8>> {
        if image.width() != self.width || image.height() != self.height {
            return Err(LayerError::encode(format!(
                "image is {}x{}, codec expects {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }
        Ok(image.as_raw().clone())
    }
}
