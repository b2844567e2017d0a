//! Frames as they move through the pipeline: a pixel buffer tagged with its
//! channel layout, read and written through the `image` codecs.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb, Rgba};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ResizeFactor;

/// Quality used for JPEG frames, which are encoded once per pass.
pub const JPEG_QUALITY: u8 = 95;

/// Suffix of the temporary file a frame is encoded into before it is renamed.
pub const PARTIAL_SUFFIX: &str = ".part";

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Channel layout of a frame, fixed when the frame is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageMode {
    Grayscale,
    Rgb,
    Rgba,
}

impl ImageMode {
    pub fn channels(self) -> usize {
        match self {
            Self::Grayscale => 1,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

/// Numeric range written back after inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleRange {
    /// 0..=255, one byte per sample.
    #[default]
    Standard,
    /// 0..=65535, for models and sources with more than 8 bits of precision.
    Extended,
}

impl SampleRange {
    pub fn max_value(self) -> f32 {
        match self {
            Self::Standard => 255.0,
            Self::Extended => 65535.0,
        }
    }
}

/// A decoded image plus its layout.
#[derive(Debug, Clone)]
pub struct Frame {
    mode: ImageMode,
    image: DynamicImage,
}

impl Frame {
    /// Normalizes whatever the codec produced into one of the three layouts.
    /// Luma+alpha is widened to RGBA and float buffers are narrowed to 16 bits.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (mode, image) = match image {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => (ImageMode::Grayscale, image),
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgb16(_) => (ImageMode::Rgb, image),
            DynamicImage::ImageRgba8(_) | DynamicImage::ImageRgba16(_) => (ImageMode::Rgba, image),
            DynamicImage::ImageLumaA8(_) => (ImageMode::Rgba, DynamicImage::ImageRgba8(image.to_rgba8())),
            DynamicImage::ImageRgb32F(_) => (ImageMode::Rgb, DynamicImage::ImageRgb16(image.to_rgb16())),
            _ => (ImageMode::Rgba, DynamicImage::ImageRgba16(image.to_rgba16())),
        };
        Self { mode, image }
    }

    /// Wraps a tightly packed RGB24 buffer, as produced by a raw video pipe.
    pub fn from_rgb8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let buffer = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self { mode: ImageMode::Rgb, image: DynamicImage::ImageRgb8(buffer) })
    }

    /// Builds a frame from interleaved samples in `[0, 1]`.
    pub fn from_normalized(mode: ImageMode, width: u32, height: u32, samples: &[f32], range: SampleRange) -> Result<Self> {
        let expected = width as usize * height as usize * mode.channels();
        if samples.len() != expected {
            return Err(anyhow!("expected {} samples for {}x{} {:?}, got {}", expected, width, height, mode, samples.len()));
        }
        let max = range.max_value();
        let image = match range {
            SampleRange::Standard => {
                let raw: Vec<u8> = samples.iter().map(|s| (s.clamp(0.0, 1.0) * max) as u8).collect();
                match mode {
                    ImageMode::Grayscale => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
                    ImageMode::Rgb => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
                    ImageMode::Rgba => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, raw).map(DynamicImage::ImageRgba8),
                }
            }
            SampleRange::Extended => {
                let raw: Vec<u16> = samples.iter().map(|s| (s.clamp(0.0, 1.0) * max).round() as u16).collect();
                match mode {
                    ImageMode::Grayscale => ImageBuffer::<Luma<u16>, _>::from_raw(width, height, raw).map(DynamicImage::ImageLuma16),
                    ImageMode::Rgb => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, raw).map(DynamicImage::ImageRgb16),
                    ImageMode::Rgba => ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, raw).map(DynamicImage::ImageRgba16),
                }
            }
        };
        let image = image.ok_or_else(|| anyhow!("sample buffer rejected for {}x{}", width, height))?;
        Ok(Self { mode, image })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Self::from_dynamic(image))
    }

    /// Encodes the frame with the codec implied by the file extension.
    /// JPEG and BMP cannot carry every layout, so the frame is narrowed first.
    ///
    /// The frame is encoded into a hidden sibling and renamed over `path`, so
    /// a file under the final name is always complete.
    pub fn save(&self, path: &Path) -> Result<()> {
        let format = ImageFormat::from_path(path).with_context(|| format!("writing {}", path.display()))?;
        let narrowed = match (format, self.mode) {
            (ImageFormat::Jpeg, ImageMode::Grayscale) => Some(DynamicImage::ImageLuma8(self.image.to_luma8())),
            (ImageFormat::Jpeg, _) => Some(DynamicImage::ImageRgb8(self.image.to_rgb8())),
            (ImageFormat::Bmp, ImageMode::Grayscale) => Some(DynamicImage::ImageLuma8(self.image.to_luma8())),
            (ImageFormat::Bmp, ImageMode::Rgb) => Some(DynamicImage::ImageRgb8(self.image.to_rgb8())),
            (ImageFormat::Bmp, ImageMode::Rgba) => Some(DynamicImage::ImageRgba8(self.image.to_rgba8())),
            _ => None,
        };
        let image = narrowed.as_ref().unwrap_or(&self.image);

        let partial = partial_path(path);
        let written = encode_to(image, format, &partial)
            .and_then(|()| fs::rename(&partial, path).context("moving frame into place"));
        if written.is_err() {
            let _ = fs::remove_file(&partial);
        }
        written.with_context(|| format!("writing {}", path.display()))
    }

    pub fn mode(&self) -> ImageMode {
        self.mode
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Whether the buffer holds more than 8 bits per sample.
    pub fn is_extended(&self) -> bool {
        matches!(
            self.image,
            DynamicImage::ImageLuma16(_) | DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_)
        )
    }

    /// Interleaved (HWC) samples scaled to `[0, 1]`.
    pub fn normalized_samples(&self) -> Vec<f32> {
        match &self.image {
            DynamicImage::ImageLuma8(b) => scale_u8(b.as_raw()),
            DynamicImage::ImageRgb8(b) => scale_u8(b.as_raw()),
            DynamicImage::ImageRgba8(b) => scale_u8(b.as_raw()),
            DynamicImage::ImageLuma16(b) => scale_u16(b.as_raw()),
            DynamicImage::ImageRgb16(b) => scale_u16(b.as_raw()),
            DynamicImage::ImageRgba16(b) => scale_u16(b.as_raw()),
            other => scale_u16(other.to_rgba16().as_raw()),
        }
    }

    /// Rescales by `factor`: cubic when enlarging, area averaging when
    /// shrinking, untouched at 1.
    pub fn resize(&self, factor: ResizeFactor) -> Frame {
        let f = factor.fraction();
        if f == 1.0 {
            return self.clone();
        }
        let (w, h) = scaled_dimensions(self.width(), self.height(), factor);
        let image = if f > 1.0 {
            self.image.resize_exact(w, h, FilterType::CatmullRom)
        } else {
            self.image.thumbnail_exact(w, h)
        };
        Frame { mode: self.mode, image }
    }
}

/// Hidden, uniquely named sibling of `path` that no frame listing matches.
pub fn partial_path(path: &Path) -> PathBuf {
    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = format!(".framegen-{}-{}{}", std::process::id(), seq, PARTIAL_SUFFIX);
    path.with_file_name(name)
}

fn encode_to(image: &DynamicImage, format: ImageFormat, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    match format {
        ImageFormat::Jpeg => image.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?,
        other => image.write_to(&mut out, other)?,
    }
    out.flush()?;
    Ok(())
}

fn scale_u8(raw: &[u8]) -> Vec<f32> {
    raw.iter().map(|v| f32::from(*v) / 255.0).collect()
}

fn scale_u16(raw: &[u16]) -> Vec<f32> {
    raw.iter().map(|v| f32::from(*v) / 65535.0).collect()
}

/// Target size for a resize: each side is scaled, truncated, and bumped to the
/// next even number. Never smaller than 2.
pub fn scaled_dimensions(width: u32, height: u32, factor: ResizeFactor) -> (u32, u32) {
    let f = factor.fraction();
    (even_side(width, f), even_side(height, f))
}

fn even_side(side: u32, factor: f64) -> u32 {
    let scaled = (side as f64 * factor) as u32;
    let even = if scaled % 2 == 0 { scaled } else { scaled + 1 };
    even.max(2)
}
