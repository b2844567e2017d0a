//! Deterministic naming of everything a job writes.
//!
//! The work directory and output video are pure functions of the source path
//! and the [`GenerationConfig`], and every frame has a fixed name derived from
//! its position. A rerun with the same inputs therefore finds the files a
//! previous run left behind.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::{GenerationConfig, GenerationFactor, ImageExtension};

/// Source containers accepted for frame generation.
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "webm", "mkv", "flv", "gif", "m4v", "avi", "mov", "qt", "3gp", "mpg", "mpeg", "vob",
];

pub fn is_supported_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUPPORTED_VIDEO_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
}

/// Keeps only files whose extension is a supported video container.
pub fn filter_supported(files: &[PathBuf]) -> Vec<PathBuf> {
    files.iter().filter(|p| is_supported_video(p)).cloned().collect()
}

/// One source file scheduled in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJob {
    pub source: PathBuf,
    pub output_video: PathBuf,
    pub work_dir: PathBuf,
    /// 1-based position in the batch, only used in status text.
    pub ordinal: usize,
}

impl VideoJob {
    pub fn new(source: &Path, ordinal: usize, config: &GenerationConfig) -> Self {
        Self {
            source: source.to_path_buf(),
            output_video: output_video_for(source, config),
            work_dir: work_dir_for(source, config),
            ordinal,
        }
    }

    /// Jobs for a whole selection, numbered from 1.
    pub fn batch(sources: &[PathBuf], config: &GenerationConfig) -> Vec<Self> {
        sources
            .iter()
            .enumerate()
            .map(|(i, source)| Self::new(source, i + 1, config))
            .collect()
    }
}

/// `<stem>_<model>x<factor>[_slowmo]_InputR-<pct>_OutputR-<pct>`, beside the
/// source or inside the configured output directory.
fn output_stem(source: &Path, config: &GenerationConfig) -> PathBuf {
    let base = match &config.output_dir {
        None => source.with_extension(""),
        Some(dir) => dir.join(source.file_stem().unwrap_or(source.as_os_str())),
    };

    let mut suffix = format!("_{}x{}", config.model, config.factor);
    if config.slow_motion {
        suffix.push_str("_slowmo");
    }
    suffix.push_str(&format!("_InputR-{}", config.input_resize.percent()));
    suffix.push_str(&format!("_OutputR-{}", config.output_resize.percent()));

    append(base, &suffix)
}

pub fn work_dir_for(source: &Path, config: &GenerationConfig) -> PathBuf {
    output_stem(source, config)
}

pub fn output_video_for(source: &Path, config: &GenerationConfig) -> PathBuf {
    append(output_stem(source, config), config.video_extension.as_str())
}

fn append(path: PathBuf, suffix: &str) -> PathBuf {
    let mut s: OsString = path.into_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// `frame_<index>` with at least three digits.
pub fn original_frame_path(work_dir: &Path, index: usize, ext: ImageExtension) -> PathBuf {
    work_dir.join(format!("frame_{:03}{}", index, ext.as_str()))
}

/// The `factor - 1` frames generated after `original`, in temporal order.
pub fn generated_frame_paths(original: &Path, model: &str, ext: ImageExtension, factor: GenerationFactor) -> Vec<PathBuf> {
    let base = original.with_extension("");
    (0..factor.generated_per_pair())
        .map(|slot| append(base.clone(), &format!("_{}_{}{}", model, slot, ext.as_str())))
        .collect()
}

/// Originals interleaved with their generated frames, in playback order.
/// For `n` originals this is `(n - 1) * factor + 1` paths.
pub fn total_frame_sequence(originals: &[PathBuf], model: &str, ext: ImageExtension, factor: GenerationFactor) -> Vec<PathBuf> {
    let Some((last, leading)) = originals.split_last() else {
        return Vec::new();
    };
    let mut total = Vec::with_capacity(leading.len() * factor.value() + 1);
    for original in leading {
        total.push(original.clone());
        total.extend(generated_frame_paths(original, model, ext, factor));
    }
    total.push(last.clone());
    total
}
