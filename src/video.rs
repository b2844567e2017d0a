//! Video decoding and encoding through the ffmpeg command-line tools.
//!
//! The pipeline only sees the [`VideoDecoder`] and [`VideoEncoder`] traits;
//! [`Ffmpeg`] implements both by spawning `ffprobe`/`ffmpeg`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command as ProcCommand, Stdio};
use tracing::{debug, warn};

use crate::config::FfmpegConfig;
use crate::error::{DecodeError, EncodingError};
use crate::frame::Frame;

/// Decoded frames of one source, in presentation order.
pub trait FrameSource {
    /// Expected number of frames, 0 when the container does not say.
    fn frame_count(&self) -> usize;
    /// `None` once the stream ends or the decoder stops producing frames.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

pub trait VideoDecoder: Send + Sync {
    fn frame_rate(&self, source: &Path) -> Result<f64>;
    fn open(&self, source: &Path) -> Result<Box<dyn FrameSource>>;
}

/// One silent encode from a concat manifest.
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    pub manifest: &'a Path,
    pub fps: f64,
    /// ffmpeg encoder name, e.g. `libx264`.
    pub codec: &'a str,
    pub output: &'a Path,
}

pub trait VideoEncoder: Send + Sync {
    /// Fails with [`EncodingError`] when the encoder exits unsuccessfully.
    fn encode_silent(&self, request: &EncodeRequest<'_>) -> Result<()>;
    /// Copies the video stream of `silent` and any audio of `source` into `output`.
    fn remux_audio(&self, source: &Path, silent: &Path, output: &Path) -> Result<()>;
    /// Best-effort copy of container metadata.
    fn copy_metadata(&self, _source: &Path, _output: &Path) -> Result<()> {
        Ok(())
    }
}

/// Stream properties reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: usize,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy tag.
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|s| s.rotation)
            .or_else(|| self.tags.as_ref().and_then(|t| t.rotate.as_deref()).and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// `"30000/1001"` or `"25"` as frames per second; `None` for `0/0`.
pub fn parse_rate(text: &str) -> Option<f64> {
    let rate = match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => text.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_probe(path: &Path, json: &str) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_str(json).context("parsing ffprobe output")?;
    let stream = probe.streams.first().ok_or_else(|| DecodeError::Probe {
        path: path.to_path_buf(),
        detail: "no video stream".to_string(),
    })?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(DecodeError::Probe { path: path.to_path_buf(), detail: "missing frame size".to_string() }.into()),
    };
    // ffmpeg autorotates, so quarter turns come out of the pipe transposed.
    let (width, height) = if (stream.rotation().round() as i64).rem_euclid(180) == 90 {
        (height, width)
    } else {
        (width, height)
    };
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| DecodeError::Probe { path: path.to_path_buf(), detail: "missing frame rate".to_string() })?;
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<usize>().ok())
        .or_else(|| {
            probe
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(|d| d.parse::<f64>().ok())
                .map(|d| (d * fps).round() as usize)
        })
        .unwrap_or(0);
    Ok(VideoInfo { width, height, fps, frame_count })
}

/// ffmpeg/ffprobe/exiftool driven through child processes.
#[derive(Debug, Clone, Default)]
pub struct Ffmpeg {
    config: FfmpegConfig,
}

impl Ffmpeg {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    pub fn probe(&self, source: &Path) -> Result<VideoInfo> {
        let output = ProcCommand::new(self.config.ffprobe_cmd())
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames:stream_side_data=rotation:stream_tags=rotate:format=duration"])
            .args(["-of", "json"])
            .arg(source)
            .output()
            .context("running ffprobe")?;
        if !output.status.success() {
            return Err(DecodeError::Probe {
                path: source.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        parse_probe(source, &String::from_utf8_lossy(&output.stdout))
    }

    fn run(&self, args: &[OsString], stage: &'static str, output: &Path) -> Result<()> {
        debug!(?args, "running ffmpeg");
        let result = ProcCommand::new(self.config.ffmpeg_cmd())
            .args(args)
            .output()
            .with_context(|| format!("running ffmpeg for {}", stage))?;
        if !result.status.success() {
            return Err(EncodingError {
                stage,
                output: output.to_path_buf(),
                detail: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Arguments of the silent concat encode.
pub fn encode_args(request: &EncodeRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-loglevel", "error", "-f", "concat", "-safe", "0", "-r"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(request.fps.to_string().into());
    args.push("-i".into());
    args.push(request.manifest.into());
    for a in [
        "-c:v",
        request.codec,
        "-vf",
        "scale=in_range=full:out_range=limited,format=yuv420p",
        "-color_range",
        "tv",
        "-b:v",
        "12000k",
    ] {
        args.push(a.into());
    }
    args.push(request.output.into());
    args
}

/// Arguments of the audio passthrough: video from `silent`, audio (if any) from `source`.
pub fn remux_args(source: &Path, silent: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-loglevel".into(), "error".into(), "-i".into(), source.into(), "-i".into(), silent.into()];
    for a in ["-c:v", "copy", "-map", "1:v:0", "-map", "0:a?", "-c:a", "copy"] {
        args.push(a.into());
    }
    args.push(output.into());
    args
}

impl VideoDecoder for Ffmpeg {
    fn frame_rate(&self, source: &Path) -> Result<f64> {
        Ok(self.probe(source)?.fps)
    }

    fn open(&self, source: &Path) -> Result<Box<dyn FrameSource>> {
        let info = self.probe(source)?;
        let mut child = ProcCommand::new(self.config.ffmpeg_cmd())
            .args(["-loglevel", "error", "-i"])
            .arg(source)
            .args(["-vsync", "0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("running ffmpeg for frame decoding")?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("ffmpeg stdout was not captured"))?;
        Ok(Box::new(RawVideoPipe { child, stdout, info }))
    }
}

impl VideoEncoder for Ffmpeg {
    fn encode_silent(&self, request: &EncodeRequest<'_>) -> Result<()> {
        self.run(&encode_args(request), "video encoding", request.output)
    }

    fn remux_audio(&self, source: &Path, silent: &Path, output: &Path) -> Result<()> {
        self.run(&remux_args(source, silent, output), "audio passthrough", output)
    }

    fn copy_metadata(&self, source: &Path, output: &Path) -> Result<()> {
        let status = ProcCommand::new(self.config.exiftool_cmd())
            .args(["-fast", "-TagsFromFile"])
            .arg(source)
            .args(["-overwrite_original", "-all:all", "-unsafe", "-largetags"])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("running exiftool")?;
        if !status.success() {
            return Err(anyhow!("exiftool exited with {}", status));
        }
        Ok(())
    }
}

/// RGB24 frames read from an ffmpeg child's stdout.
struct RawVideoPipe {
    child: Child,
    stdout: ChildStdout,
    info: VideoInfo,
}

impl FrameSource for RawVideoPipe {
    fn frame_count(&self) -> usize {
        self.info.frame_count
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let len = self.info.width as usize * self.info.height as usize * 3;
        let mut buf = vec![0u8; len];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => Frame::from_rgb8(self.info.width, self.info.height, buf).map(Some),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => {
                warn!("frame decoding stopped early: {}", e);
                Ok(None)
            }
        }
    }
}

impl Drop for RawVideoPipe {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
