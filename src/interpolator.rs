//! One interpolation call: two frames in, their temporal midpoint out.
//!
//! The model itself lives behind [`InferenceBackend`]. This module only
//! prepares its input tensor and turns its output back into a [`Frame`]:
//!
//! ```text
//! A, B (HWC, 0..255)  ->  [1, 2C, H, W] in [0, 1]  ->  backend
//!                     ->  [1, C, H, W]  -> clip -> HWC, 0..255 (or 0..65535)
//! ```

use anyhow::{Context, Result};
use ndarray::{concatenate, s, Array3, Array4, Axis};
use tracing::{debug, info};

use crate::config::{Device, GenerationConfig};
use crate::error::InferenceError;
use crate::frame::{Frame, SampleRange};

/// An accelerator-backed model that computes the midpoint of two stacked frames.
///
/// Input is `[1, channels * 2, height, width]` (first frame's channels, then
/// the second's), output is `[1, channels, height, width]`. Values are `f32`
/// in `[0, 1]`. A loaded backend is reused for every pair of a batch.
pub trait InferenceBackend: Send {
    fn name(&self) -> &str;
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>, InferenceError>;
}

/// Reference backend: the per-sample mean of both frames.
///
/// Needs no model weights or accelerator, so a full batch can run anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearBlendBackend;

impl InferenceBackend for LinearBlendBackend {
    fn name(&self) -> &str {
        "linear-blend"
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>, InferenceError> {
        let stacked = input.shape()[1];
        if stacked % 2 != 0 {
            return Err(InferenceError::Backend(format!("expected an even channel count, got {}", stacked)));
        }
        let c = stacked / 2;
        let first = input.slice(s![.., ..c, .., ..]);
        let second = input.slice(s![.., c.., .., ..]);
        Ok((&first + &second) * 0.5)
    }
}

/// Opens the backend for `config.model` on `config.device`.
pub fn load_backend(config: &GenerationConfig) -> Result<Box<dyn InferenceBackend>> {
    let device = match config.device {
        Device::Auto => "auto".to_string(),
        Device::Gpu(_) => format!("device {}", config.device.device_index().unwrap_or(0)),
    };
    info!(model = %config.model, %device, "loading interpolation backend");
    // Only the blend backend ships with the crate; model-specific runtimes
    // plug in through `InferenceBackend`.
    Ok(Box::new(LinearBlendBackend))
}

/// Wraps a backend with the pixel-format conversions around each call.
pub struct PairwiseInterpolator {
    backend: Box<dyn InferenceBackend>,
    output_range: Option<SampleRange>,
}

impl PairwiseInterpolator {
    /// Output uses the input's range: 8-bit frames stay 8-bit, 16-bit frames stay 16-bit.
    pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
        Self { backend, output_range: None }
    }

    /// Forces the output range, for models whose native range differs from the source.
    pub fn with_output_range(mut self, range: SampleRange) -> Self {
        self.output_range = Some(range);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn interpolate(&self, a: &Frame, b: &Frame) -> Result<Frame> {
        let shape_a = (a.width(), a.height(), a.mode().channels());
        let shape_b = (b.width(), b.height(), b.mode().channels());
        if shape_a != shape_b || a.mode() != b.mode() {
            return Err(InferenceError::ShapeMismatch { left: shape_a, right: shape_b }.into());
        }
        let (width, height, channels) = shape_a;
        let (w, h) = (width as usize, height as usize);

        let input = stack_pair(a, b, h, w, channels)?;
        let output = self.backend.infer(&input)?;

        let expected = [1, channels, h, w];
        if output.shape() != expected {
            return Err(InferenceError::BadOutputShape { got: output.shape().to_vec(), expected }.into());
        }

        let samples: Vec<f32> = output
            .index_axis(Axis(0), 0)
            .permuted_axes([1, 2, 0])
            .iter()
            .map(|v| v.clamp(0.0, 1.0))
            .collect();

        let range = self.output_range.unwrap_or(if a.is_extended() { SampleRange::Extended } else { SampleRange::Standard });
        debug!(width, height, channels, backend = self.backend.name(), "interpolated pair");
        Frame::from_normalized(a.mode(), width, height, &samples, range)
    }
}

/// `[1, 2C, H, W]` with `a`'s channels first.
fn stack_pair(a: &Frame, b: &Frame, h: usize, w: usize, c: usize) -> Result<Array4<f32>> {
    let planar = |frame: &Frame| -> Result<Array3<f32>> {
        let hwc = Array3::from_shape_vec((h, w, c), frame.normalized_samples()).context("frame samples do not match its shape")?;
        Ok(hwc.permuted_axes([2, 0, 1]))
    };
    let first = planar(a)?;
    let second = planar(b)?;
    let stacked = concatenate(Axis(0), &[first.view(), second.view()]).context("stacking frame pair")?;
    Ok(stacked.insert_axis(Axis(0)))
}
