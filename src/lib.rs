//! # framegen - Video Frame Generation Library
//!
//! `framegen` raises the frame rate of videos, or turns them into slow motion,
//! by synthesizing frames between every pair of original frames.
//!
//! ## Features
//!
//! - Frame extraction and encoding through ffmpeg
//! - x2, x4 and x8 generation by recursive midpoint interpolation
//! - Pluggable inference backends
//! - Resumable jobs: finished frames are never computed twice
//! - Parallel frame writes
//! - Status reporting from an isolated worker process
//!
//! ## Example
//!
//! ```no_run
//! use framegen::{GenerationConfig, GenerationFactor, Orchestrator, ProgressChannel, ProgressMessage};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = GenerationConfig::default()
//!     .with_factor(GenerationFactor::X4)
//!     .with_keep_frames(true);
//! let channel = Arc::new(ProgressChannel::new());
//! let mut orchestrator = Orchestrator::with_ffmpeg(config, channel.clone())?;
//!
//! match orchestrator.run_batch(&[PathBuf::from("video.mp4")]) {
//!     ProgressMessage::Completed => println!("Done!"),
//!     other => println!("{}", other),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Worker Process
//!
//! The CLI runs batches in a child process so they can be killed at any
//! point; see [`worker`]:
//!
//! ```no_run
//! use framegen::{GenerationConfig, WorkerProcess, WorkerRequest};
//! use std::path::{Path, PathBuf};
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let request = WorkerRequest {
//!     config: GenerationConfig::default(),
//!     files: vec![PathBuf::from("video.mp4")],
//! };
//! let worker = WorkerProcess::spawn(Path::new("framegen"), &request)?;
//! let last = worker.watch(Duration::from_secs(1), |status| println!("{}", status));
//! worker.finish()?;
//! println!("finished with {}", last);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encode;
pub mod error;
pub mod extract;
pub mod frame;
pub mod generate;
pub mod interpolator;
pub mod orchestrator;
pub mod paths;
pub mod progress;
pub mod resize;
pub mod resume;
pub mod save;
pub mod scheduler;
pub mod video;
pub mod worker;

pub use config::{
    Device, FfmpegConfig, GenerationConfig, GenerationFactor, ImageExtension, Preferences, ResizeFactor, VideoCodec,
    VideoExtension,
};
pub use error::{DecodeError, EncodingError, InferenceError, ValidationError};
pub use frame::{Frame, ImageMode, SampleRange};
pub use interpolator::{InferenceBackend, LinearBlendBackend, PairwiseInterpolator};
pub use orchestrator::{JobReport, JobState, Orchestrator};
pub use paths::VideoJob;
pub use progress::{ProgressChannel, ProgressMessage, StatusSink};
pub use scheduler::InterpolationScheduler;
pub use video::{Ffmpeg, FrameSource, VideoDecoder, VideoEncoder};
pub use worker::{WorkerProcess, WorkerRequest};
