use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, Rgb, Rgba};
use std::time::SystemTime;

/// JPEG bytes plus the size of the image they encode, which may be smaller
/// than the source frame.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A single captured camera frame in packed 8-bit RGB or RGBA.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        let size = (width * height * channels) as usize;
        Self {
            data: vec![0u8; size],
            width,
            height,
            channels,
            captured_at: SystemTime::now(),
        }
    }

    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            channels: 3,
            captured_at: SystemTime::now(),
        })
    }

    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self {
            data: rgb.into_raw(),
            width,
            height,
            channels: 3,
            captured_at: SystemTime::now(),
        }
    }

    pub fn to_image(&self) -> Result<DynamicImage> {
        match self.channels {
            3 => {
                let buffer = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(
                    self.width,
                    self.height,
                    self.data.clone(),
                )
                .ok_or_else(|| anyhow!("Failed to create image buffer"))?;
                Ok(DynamicImage::ImageRgb8(buffer))
            }
            4 => {
                let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(
                    self.width,
                    self.height,
                    self.data.clone(),
                )
                .ok_or_else(|| anyhow!("Failed to create image buffer"))?;
                Ok(DynamicImage::ImageRgba8(buffer))
            }
            other => Err(anyhow!("Unsupported channel count: {}", other)),
        }
    }

    /// Encode as JPEG, downscaling so neither side exceeds `max_dimension`.
    pub fn encode_jpeg(&self, max_dimension: u32, quality: u8) -> Result<EncodedFrame> {
        let mut image = self.to_image()?;
        if self.width > max_dimension || self.height > max_dimension {
            image = image.resize(
                max_dimension,
                max_dimension,
                image::imageops::FilterType::Triangle,
            );
        }

        let rgb = image.to_rgb8();
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|e| anyhow!("Failed to encode frame as JPEG: {}", e))?;
        Ok(EncodedFrame {
            bytes: buffer,
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}
