//! Assembling the frame sequence into the output video.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::paths::VideoJob;
use crate::video::{EncodeRequest, VideoDecoder, VideoEncoder};

/// What the encoding pass did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOutcome {
    pub fps: f64,
    pub audio_attempted: bool,
    /// False when the output carries no audio track from the source.
    pub audio_copied: bool,
}

/// `<output stem>.txt`, beside the output video.
pub fn manifest_path(output: &Path) -> PathBuf {
    output.with_extension("txt")
}

/// `<output stem>_no_audio<ext>`.
pub fn silent_path(output: &Path) -> PathBuf {
    let mut name: OsString = output.with_extension("").into_os_string();
    name.push("_no_audio");
    if let Some(ext) = output.extension() {
        name.push(".");
        name.push(ext);
    }
    PathBuf::from(name)
}

/// One `file '<path>'` line per frame, in the concat demuxer's quoting.
pub fn write_manifest(path: &Path, frames: &[PathBuf]) -> Result<()> {
    let mut file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    for frame in frames {
        let absolute = std::path::absolute(frame).with_context(|| format!("resolving {}", frame.display()))?;
        let quoted = absolute.to_string_lossy().replace('\'', r"'\''");
        writeln!(file, "file '{}'", quoted).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}

fn replace_with(from: &Path, to: &Path) -> Result<()> {
    remove_if_exists(to)?;
    fs::rename(from, to).with_context(|| format!("moving {} to {}", from.display(), to.display()))
}

/// Encodes `total` into `job.output_video`.
///
/// The silent pass runs at `source fps * factor`, or at the source rate in
/// slow motion. A failed silent pass is returned as an
/// [`EncodingError`](crate::error::EncodingError) and leaves the frames in
/// place. Slow motion drops audio and renames the silent file; otherwise the
/// source audio is copied in, and if that fails the silent file becomes the
/// output.
pub fn encode_video(
    job: &VideoJob,
    config: &GenerationConfig,
    total: &[PathBuf],
    decoder: &dyn VideoDecoder,
    encoder: &dyn VideoEncoder,
) -> Result<EncodeOutcome> {
    let output = &job.output_video;
    let manifest = manifest_path(output);
    let silent = silent_path(output);
    remove_if_exists(&silent)?;
    remove_if_exists(&manifest)?;
    write_manifest(&manifest, total)?;

    let fps = config.output_fps(decoder.frame_rate(&job.source)?);
    let codec = config.codec.ffmpeg_name();
    info!(frames = total.len(), fps, codec, output = %output.display(), "encoding video");
    encoder.encode_silent(&EncodeRequest { manifest: &manifest, fps, codec, output: &silent })?;
    remove_if_exists(&manifest)?;

    let mut outcome = EncodeOutcome { fps, audio_attempted: false, audio_copied: false };
    if config.slow_motion {
        replace_with(&silent, output)?;
    } else {
        outcome.audio_attempted = true;
        match encoder.remux_audio(&job.source, &silent, output) {
            Ok(()) => {
                outcome.audio_copied = true;
                remove_if_exists(&silent)?;
            }
            Err(e) => {
                warn!("audio passthrough failed, keeping video without audio: {:#}", e);
                replace_with(&silent, output)?;
            }
        }
    }

    if let Err(e) = encoder.copy_metadata(&job.source, output) {
        debug!("metadata not copied: {:#}", e);
    }
    Ok(outcome)
}
