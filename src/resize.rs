//! Final pass bringing every frame to the output resolution.

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::config::GenerationConfig;
use crate::frame::Frame;
use crate::paths::VideoJob;
use crate::progress::{ProgressMessage, StatusSink};
use crate::save::{SaveBuffer, SavePool};

/// Reads each frame of `total`, applies the output resize factor and
/// rewrites it in place. Runs even at factor 1, so every frame has been
/// through the same image codec before encoding.
pub fn resize_frames(
    job: &VideoJob,
    config: &GenerationConfig,
    total: &[PathBuf],
    pool: &SavePool,
    sink: &dyn StatusSink,
) -> Result<()> {
    sink.publish(ProgressMessage::finalizing(job.ordinal));
    pool.scope(|scope| {
        let mut buffer = SaveBuffer::new(scope);
        for path in total {
            let frame = Frame::open(path)?;
            buffer.push(path.clone(), frame.resize(config.output_resize));
        }
        buffer.flush();
        Ok(())
    })?;
    info!(frames = total.len(), factor = config.output_resize.fraction(), "resized frames for output");
    Ok(())
}
