//! Decoding a source video into numbered frame files.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::GenerationConfig;
use crate::frame::Frame;
use crate::paths::{original_frame_path, VideoJob};
use crate::progress::{ProgressMessage, StatusSink};
use crate::save::{PendingFrame, SavePool};
use crate::video::VideoDecoder;

/// Writes every decoded frame of `job.source` into a fresh `job.work_dir`,
/// resized by the input factor, and returns their paths in order.
///
/// Frames are held in memory only until a batch of
/// [`GenerationConfig::extraction_batch_size`] is full; each batch is written
/// by the pool and joined before decoding continues. A decoder that stops
/// early leaves a shorter sequence rather than an error.
pub fn extract_frames(
    job: &VideoJob,
    config: &GenerationConfig,
    decoder: &dyn VideoDecoder,
    pool: &SavePool,
    sink: &dyn StatusSink,
) -> Result<Vec<PathBuf>> {
    if job.work_dir.exists() {
        fs::remove_dir_all(&job.work_dir)
            .with_context(|| format!("removing stale work directory {}", job.work_dir.display()))?;
    }
    fs::create_dir_all(&job.work_dir)
        .with_context(|| format!("creating work directory {}", job.work_dir.display()))?;

    let mut source = decoder.open(&job.source)?;
    let expected = source.frame_count();
    let batch_size = config.extraction_batch_size().max(1);

    let mut written = Vec::with_capacity(expected);
    let mut batch: Vec<PendingFrame> = Vec::with_capacity(batch_size);
    let mut index = 0;
    loop {
        if expected > 0 && index >= expected {
            break;
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(frame = index, "decoding stopped: {:#}", e);
                break;
            }
        };
        let path = original_frame_path(&job.work_dir, index, config.image_extension);
        batch.push((path, resize_input(frame, config)));

        if batch.len() == batch_size {
            let percent = if expected > 0 { index as f64 / expected as f64 * 100.0 } else { 0.0 };
            sink.publish(ProgressMessage::extracting(job.ordinal, percent));
            pool.write_all(&batch)?;
            written.extend(batch.drain(..).map(|(path, _)| path));
        }
        index += 1;
    }
    if !batch.is_empty() {
        pool.write_all(&batch)?;
        written.extend(batch.drain(..).map(|(path, _)| path));
    }

    if written.is_empty() {
        return Err(anyhow!("no frames could be decoded from {}", job.source.display()));
    }
    if expected > 0 && written.len() < expected {
        warn!(decoded = written.len(), expected, "source ended early");
    }
    info!(frames = written.len(), dir = %job.work_dir.display(), "extracted frames");
    Ok(written)
}

fn resize_input(frame: Frame, config: &GenerationConfig) -> Frame {
    if config.input_resize.fraction() == 1.0 {
        frame
    } else {
        frame.resize(config.input_resize)
    }
}
