//! The frame generation pass over every adjacent pair of originals.

use anyhow::Result;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::GenerationConfig;
use crate::frame::Frame;
use crate::interpolator::PairwiseInterpolator;
use crate::paths::{generated_frame_paths, VideoJob};
use crate::progress::{ProgressMessage, ProgressWindow, StatusSink, REPORT_EVERY_PAIRS, WINDOW_RESET_PAIRS};
use crate::save::{SaveBuffer, SavePool};
use crate::scheduler::InterpolationScheduler;

/// What a generation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub pairs: usize,
    /// Pairs whose frames were computed in this pass.
    pub computed: usize,
    /// Pairs whose frames were already on disk.
    pub skipped: usize,
}

/// Generates the in-between frames for each pair `(originals[i], originals[i + 1])`.
///
/// A pair whose generated files all exist is skipped, which makes the pass
/// safe to rerun over a partially finished work directory. Results go to the
/// pool in batches; the pass returns after the last write lands.
pub fn generate_frames(
    job: &VideoJob,
    config: &GenerationConfig,
    originals: &[PathBuf],
    interpolator: &PairwiseInterpolator,
    pool: &SavePool,
    sink: &dyn StatusSink,
) -> Result<GenerationReport> {
    let scheduler = InterpolationScheduler::new(interpolator, config.factor);
    let frame_total = originals.len();

    let report = pool.scope(|scope| {
        let mut report = GenerationReport::default();
        let mut buffer = SaveBuffer::new(scope);
        let mut window = ProgressWindow::new();
        // The right frame of one pair is the left frame of the next.
        let mut carried: Option<(usize, Frame)> = None;

        for (index, pair) in originals.windows(2).enumerate() {
            report.pairs += 1;
            let targets = generated_frame_paths(&pair[0], &config.model, config.image_extension, config.factor);
            if targets.iter().all(|p| p.exists()) {
                report.skipped += 1;
                continue;
            }

            let started = Instant::now();
            let left = match carried.take() {
                Some((at, frame)) if at == index => frame,
                _ => Frame::open(&pair[0])?,
            };
            let right = Frame::open(&pair[1])?;
            let generated = scheduler.generate(&left, &right)?;
            buffer.extend(targets.into_iter().zip(generated));
            carried = Some((index + 1, right));

            report.computed += 1;
            if let Some(status) = pair_status(&mut window, job.ordinal, index, frame_total, started.elapsed()) {
                sink.publish(status);
            }
        }
        buffer.flush();
        Ok(report)
    })?;

    debug!(?report, "generation pass finished");
    info!(computed = report.computed, skipped = report.skipped, backend = interpolator.backend_name(), "generated frames");
    Ok(report)
}

/// Records one computed pair and returns the ETA status when one is due:
/// every [`REPORT_EVERY_PAIRS`] pairs, once the estimate is non-empty. The
/// timing window restarts every [`WINDOW_RESET_PAIRS`] pairs.
fn pair_status(
    window: &mut ProgressWindow,
    ordinal: usize,
    index: usize,
    frame_total: usize,
    elapsed: Duration,
) -> Option<ProgressMessage> {
    window.record(elapsed);
    let mut status = None;
    if (index + 1) % REPORT_EVERY_PAIRS == 0 {
        let remaining = window.remaining(frame_total - index);
        if !remaining.is_empty() {
            let percent = (index + 1) as f64 / frame_total as f64 * 100.0;
            status = Some(ProgressMessage::generating(ordinal, percent, &remaining));
        }
    }
    if (index + 1) % WINDOW_RESET_PAIRS == 0 {
        window.clear();
    }
    status
}
