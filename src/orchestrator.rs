//! Runs a batch of videos through every stage, one file at a time.
//!
//! ```text
//! NotStarted -> Extracting | Resuming -> Generating -> Resizing -> Encoding
//!            -> (CleaningUp) -> Done
//! ```
//!
//! Any stage error moves the job to `Error` and ends the whole batch; the
//! watcher sees it as a single [`ProgressMessage::Error`].

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::GenerationConfig;
use crate::encode::{encode_video, EncodeOutcome};
use crate::error::ValidationError;
use crate::extract::extract_frames;
use crate::generate::{generate_frames, GenerationReport};
use crate::interpolator::{load_backend, PairwiseInterpolator};
use crate::paths::{total_frame_sequence, VideoJob};
use crate::progress::{ProgressMessage, StatusSink};
use crate::resize::resize_frames;
use crate::resume::{can_resume, recover_originals};
use crate::save::SavePool;
use crate::video::{Ffmpeg, VideoDecoder, VideoEncoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Extracting,
    Resuming,
    Generating,
    Resizing,
    Encoding,
    CleaningUp,
    Done,
    Error,
    /// Only reached when the worker process is killed from outside.
    Stopped,
}

impl JobState {
    /// Final state implied by a batch's terminal message.
    pub fn after(message: &ProgressMessage) -> Option<Self> {
        match message {
            ProgressMessage::Status(_) => None,
            ProgressMessage::Completed => Some(Self::Done),
            ProgressMessage::Stopped => Some(Self::Stopped),
            ProgressMessage::Error(_) => Some(Self::Error),
        }
    }
}

/// Summary of one finished video.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub source: PathBuf,
    pub output_video: PathBuf,
    pub resumed: bool,
    pub total_frames: usize,
    pub generation: GenerationReport,
    pub encode: EncodeOutcome,
}

pub struct Orchestrator {
    config: GenerationConfig,
    interpolator: PairwiseInterpolator,
    decoder: Box<dyn VideoDecoder>,
    encoder: Box<dyn VideoEncoder>,
    sink: Arc<dyn StatusSink>,
    pool: SavePool,
    state: JobState,
}

impl Orchestrator {
    pub fn new(
        config: GenerationConfig,
        interpolator: PairwiseInterpolator,
        decoder: Box<dyn VideoDecoder>,
        encoder: Box<dyn VideoEncoder>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        let pool = SavePool::new(config.threads)?;
        Ok(Self { config, interpolator, decoder, encoder, sink, pool, state: JobState::NotStarted })
    }

    /// Loads the configured backend and uses ffmpeg for decoding and encoding.
    pub fn with_ffmpeg(config: GenerationConfig, sink: Arc<dyn StatusSink>) -> Result<Self> {
        let interpolator = PairwiseInterpolator::new(load_backend(&config)?);
        let ffmpeg = Ffmpeg::new(config.tools.clone());
        Self::new(config, interpolator, Box::new(ffmpeg.clone()), Box::new(ffmpeg), sink)
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn enter(&mut self, state: JobState) {
        debug!(from = ?self.state, to = ?state, "job state");
        self.state = state;
    }

    /// Runs every stage for one video.
    pub fn run_job(&mut self, job: &VideoJob) -> Result<JobReport> {
        self.enter(JobState::NotStarted);
        info!(source = %job.source.display(), ordinal = job.ordinal, "starting job");
        let resumed = can_resume(&job.work_dir, &self.config.model, self.config.image_extension);
        let originals = if resumed {
            self.enter(JobState::Resuming);
            self.sink.publish(ProgressMessage::resuming(job.ordinal));
            recover_originals(&job.work_dir, &self.config.model, self.config.image_extension)?
        } else {
            self.enter(JobState::Extracting);
            self.sink.publish(ProgressMessage::extraction_started(job.ordinal));
            extract_frames(job, &self.config, self.decoder.as_ref(), &self.pool, self.sink.as_ref())?
        };
        let total = total_frame_sequence(&originals, &self.config.model, self.config.image_extension, self.config.factor);

        self.enter(JobState::Generating);
        self.sink.publish(ProgressMessage::generation_started(job.ordinal));
        let generation = generate_frames(job, &self.config, &originals, &self.interpolator, &self.pool, self.sink.as_ref())?;

        self.enter(JobState::Resizing);
        resize_frames(job, &self.config, &total, &self.pool, self.sink.as_ref())?;

        self.enter(JobState::Encoding);
        self.sink.publish(ProgressMessage::encoding(job.ordinal));
        let encode = encode_video(job, &self.config, &total, self.decoder.as_ref(), self.encoder.as_ref())?;

        if !self.config.keep_frames {
            self.enter(JobState::CleaningUp);
            if job.work_dir.exists() {
                fs::remove_dir_all(&job.work_dir)
                    .with_context(|| format!("removing work directory {}", job.work_dir.display()))?;
            }
        }
        self.enter(JobState::Done);
        info!(output = %job.output_video.display(), frames = total.len(), resumed, "finished job");

        Ok(JobReport {
            source: job.source.clone(),
            output_video: job.output_video.clone(),
            resumed,
            total_frames: total.len(),
            generation,
            encode,
        })
    }

    /// Runs `files` in order and publishes the batch's terminal message,
    /// which is also returned. The first failing file ends the batch.
    pub fn run_batch(&mut self, files: &[PathBuf]) -> ProgressMessage {
        let message = match self.try_batch(files) {
            Ok(reports) => {
                info!(videos = reports.len(), "batch completed");
                ProgressMessage::Completed
            }
            Err(e) => {
                self.enter(JobState::Error);
                error!("batch failed: {:#}", e);
                ProgressMessage::Error(format!("{:#}", e))
            }
        };
        self.sink.publish(message.clone());
        message
    }

    fn try_batch(&mut self, files: &[PathBuf]) -> Result<Vec<JobReport>> {
        if files.is_empty() {
            return Err(ValidationError::NoFiles.into());
        }
        VideoJob::batch(files, &self.config)
            .iter()
            .map(|job| self.run_job(job))
            .collect()
    }
}

/// Entry point of the worker process: loads the model, then runs the batch.
/// A failure to load is reported like any other batch error.
pub fn process_batch(config: GenerationConfig, files: &[PathBuf], sink: Arc<dyn StatusSink>) -> ProgressMessage {
    sink.publish(ProgressMessage::loading_model());
    match Orchestrator::with_ffmpeg(config, sink.clone()) {
        Ok(mut orchestrator) => orchestrator.run_batch(files),
        Err(e) => {
            error!("could not start batch: {:#}", e);
            let message = ProgressMessage::Error(format!("{:#}", e));
            sink.publish(message.clone());
            message
        }
    }
}
