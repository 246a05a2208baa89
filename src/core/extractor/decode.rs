//! Image decoding capability.
//!
//! The engine only needs one thing from an image library: turn file bytes
//! into a pixel grid, or say it can't. `StandardDecoder` uses zune-jpeg for
//! JPEG (1.5-2x faster) and the image crate for everything else.

use image::DynamicImage;
use thiserror::Error;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

/// Decoder could not produce pixels from the given bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeFailure(pub String);

/// A decoded, 8-bit, interleaved pixel grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl PixelGrid {
    /// Wrap raw pixels. `channels` is 1 (gray), 2 (gray + alpha),
    /// 3 (RGB) or 4 (RGBA); the buffer length must match exactly.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if !(1..=4).contains(&channels) || data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Channel values of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * c;
        &self.data[start..start + c]
    }
}

/// The one capability consumed from an image library
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<PixelGrid, DecodeFailure>;
}

/// Default decoder: zune-jpeg for JPEG, image crate fallback
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardDecoder;

impl StandardDecoder {
    pub fn new() -> Self {
        Self
    }

    fn is_jpeg(bytes: &[u8]) -> bool {
        bytes.starts_with(&[0xFF, 0xD8, 0xFF])
    }

    fn decode_jpeg(bytes: &[u8]) -> Result<PixelGrid, DecodeFailure> {
        let options = DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGB);
        let mut decoder = JpegDecoder::new_with_options(bytes, options);

        let pixels = decoder
            .decode()
            .map_err(|e| DecodeFailure(format!("zune-jpeg decode failed: {:?}", e)))?;

        let info = decoder
            .info()
            .ok_or_else(|| DecodeFailure("JPEG has no frame header".to_string()))?;

        let channels = match decoder.get_output_colorspace().unwrap_or(ColorSpace::RGB) {
            ColorSpace::RGB => 3,
            ColorSpace::RGBA => 4,
            ColorSpace::Luma => 1,
            other => {
                return Err(DecodeFailure(format!(
                    "unsupported JPEG colorspace {:?}",
                    other
                )))
            }
        };

        PixelGrid::new(info.width as u32, info.height as u32, channels, pixels)
            .ok_or_else(|| DecodeFailure("JPEG pixel buffer has wrong length".to_string()))
    }

    fn decode_fallback(bytes: &[u8]) -> Result<PixelGrid, DecodeFailure> {
        let image = image::load_from_memory(bytes).map_err(|e| DecodeFailure(e.to_string()))?;
        Ok(Self::from_dynamic(image))
    }

    fn from_dynamic(image: DynamicImage) -> PixelGrid {
        let (width, height) = (image.width(), image.height());
        let (channels, data) = match image {
            DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (2, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (3, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (4, buf.into_raw()),
            other => (4, other.to_rgba8().into_raw()),
        };
        PixelGrid {
            width,
            height,
            channels,
            data,
        }
    }
}

impl ImageDecoder for StandardDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<PixelGrid, DecodeFailure> {
        let grid = if Self::is_jpeg(bytes) {
            Self::decode_jpeg(bytes).or_else(|_| Self::decode_fallback(bytes))?
        } else {
            Self::decode_fallback(bytes)?
        };

        if grid.is_empty() {
            return Err(DecodeFailure("image has no pixels".to_string()));
        }
        Ok(grid)
    }
}
