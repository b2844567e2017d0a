//! Generation settings, persisted preferences and external tool locations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ValidationError;

/// Models the tool knows how to name output for.
pub const MODEL_NAMES: &[&str] = &["RIFE", "RIFE_Lite"];

/// How many frames each original frame becomes in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum GenerationFactor {
    X2,
    X4,
    X8,
}

impl GenerationFactor {
    pub fn value(self) -> usize {
        match self {
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
        }
    }

    /// Frames synthesized between two originals.
    pub fn generated_per_pair(self) -> usize {
        self.value() - 1
    }

    /// Label used in the persisted preferences ("x4", "Slowmotion x4").
    pub fn option_label(self, slow_motion: bool) -> String {
        if slow_motion {
            format!("Slowmotion x{}", self.value())
        } else {
            format!("x{}", self.value())
        }
    }

    /// Parses a generation option label back into factor and slow-motion flag.
    pub fn parse_option(label: &str) -> Result<(Self, bool), ValidationError> {
        let slow_motion = label.to_ascii_lowercase().contains("slowmotion");
        let factor = if label.contains('8') {
            Self::X8
        } else if label.contains('4') {
            Self::X4
        } else if label.contains('2') {
            Self::X2
        } else {
            return Err(ValidationError::Unknown { kind: "generation option", value: label.to_string() });
        };
        Ok((factor, slow_motion))
    }
}

impl TryFrom<u32> for GenerationFactor {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::X2),
            4 => Ok(Self::X4),
            8 => Ok(Self::X8),
            other => Err(ValidationError::UnsupportedFactor(other)),
        }
    }
}

impl From<GenerationFactor> for u32 {
    fn from(factor: GenerationFactor) -> Self {
        factor.value() as u32
    }
}

impl fmt::Display for GenerationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// A strictly positive scale applied to frame dimensions (0.5 = half size).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ResizeFactor(f64);

impl ResizeFactor {
    pub const IDENTITY: ResizeFactor = ResizeFactor(1.0);

    pub fn new(fraction: f64) -> Result<Self, ValidationError> {
        if fraction.is_finite() && fraction > 0.0 {
            Ok(Self(fraction))
        } else {
            Err(ValidationError::NotPositive { field: "resize factor", value: fraction })
        }
    }

    /// Parses a percentage as typed by the user. Fractions of a percent are
    /// truncated, so "50.7" means 50 %.
    pub fn parse_percent(field: &'static str, text: &str) -> Result<Self, ValidationError> {
        let parsed: f64 = text
            .trim()
            .trim_end_matches('%')
            .parse()
            .map_err(|_| ValidationError::NotANumber { field, value: text.to_string() })?;
        let percent = parsed.trunc();
        if !(percent > 0.0) {
            return Err(ValidationError::NotPositive { field, value: percent });
        }
        Ok(Self(percent / 100.0))
    }

    pub fn fraction(self) -> f64 {
        self.0
    }

    /// Whole percentage, as embedded in output names.
    pub fn percent(self) -> u32 {
        (self.0 * 100.0).round() as u32
    }
}

impl TryFrom<f64> for ResizeFactor {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResizeFactor> for f64 {
    fn from(factor: ResizeFactor) -> Self {
        factor.0
    }
}

/// Image container used for every intermediate frame on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageExtension {
    Png,
    Jpg,
    Bmp,
    Tiff,
}

impl ImageExtension {
    /// Extension including the leading dot.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => ".png",
            Self::Jpg => ".jpg",
            Self::Bmp => ".bmp",
            Self::Tiff => ".tiff",
        }
    }
}

impl FromStr for ImageExtension {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "bmp" => Ok(Self::Bmp),
            "tif" | "tiff" => Ok(Self::Tiff),
            _ => Err(ValidationError::Unknown { kind: "image extension", value: s.to_string() }),
        }
    }
}

impl fmt::Display for ImageExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container of the final video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoExtension {
    Mp4,
    Mkv,
    Avi,
    Mov,
}

impl VideoExtension {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp4 => ".mp4",
            Self::Mkv => ".mkv",
            Self::Avi => ".avi",
            Self::Mov => ".mov",
        }
    }
}

impl FromStr for VideoExtension {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "mkv" => Ok(Self::Mkv),
            "avi" => Ok(Self::Avi),
            "mov" => Ok(Self::Mov),
            _ => Err(ValidationError::Unknown { kind: "video extension", value: s.to_string() }),
        }
    }
}

impl fmt::Display for VideoExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec names accepted on the command line.
pub const VIDEO_CODECS: &[&str] = &[
    "x264", "x265", "h264_nvenc", "hevc_nvenc", "h264_amf", "hevc_amf", "h264_qsv", "hevc_qsv",
];

/// Video codec selection, stored as the user-facing name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoCodec(String);

impl VideoCodec {
    /// Encoder name passed to ffmpeg's `-c:v`.
    pub fn ffmpeg_name(&self) -> &str {
        if self.0.contains("x264") {
            "libx264"
        } else if self.0.contains("x265") {
            "libx265"
        } else {
            &self.0
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoCodec {
    fn default() -> Self {
        Self("x264".to_string())
    }
}

impl FromStr for VideoCodec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if VIDEO_CODECS.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            Ok(Self(name.to_ascii_lowercase()))
        } else {
            Err(ValidationError::Unknown { kind: "video codec", value: s.to_string() })
        }
    }
}

impl TryFrom<String> for VideoCodec {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VideoCodec> for String {
    fn from(codec: VideoCodec) -> Self {
        codec.0
    }
}

/// Which accelerator the inference backend should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Auto,
    /// 1-based GPU number as shown to the user.
    Gpu(u8),
}

impl Device {
    /// 0-based device index for the backend, `None` for automatic selection.
    pub fn device_index(self) -> Option<u32> {
        match self {
            Self::Auto => None,
            Self::Gpu(n) => Some(u32::from(n) - 1),
        }
    }
}

impl FromStr for Device {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "auto" {
            return Ok(Self::Auto);
        }
        let digits = lower.trim_start_matches("gpu").trim();
        match digits.parse::<u8>() {
            Ok(n @ 1..=4) => Ok(Self::Gpu(n)),
            _ => Err(ValidationError::Unknown { kind: "device", value: s.to_string() }),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("Auto"),
            Self::Gpu(n) => write!(f, "GPU {}", n),
        }
    }
}

/// Locations of the ffmpeg tools; bare names are looked up on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfmpegConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub exiftool_path: Option<PathBuf>,
}

impl FfmpegConfig {
    pub fn ffmpeg_cmd(&self) -> &Path {
        self.ffmpeg_path.as_deref().unwrap_or(Path::new("ffmpeg"))
    }

    pub fn ffprobe_cmd(&self) -> &Path {
        self.ffprobe_path.as_deref().unwrap_or(Path::new("ffprobe"))
    }

    pub fn exiftool_cmd(&self) -> &Path {
        self.exiftool_path.as_deref().unwrap_or(Path::new("exiftool"))
    }
}

/// Everything a batch needs to know, fixed at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub factor: GenerationFactor,
    pub slow_motion: bool,
    pub input_resize: ResizeFactor,
    pub output_resize: ResizeFactor,
    pub image_extension: ImageExtension,
    pub video_extension: VideoExtension,
    pub codec: VideoCodec,
    pub device: Device,
    pub keep_frames: bool,
    /// `None` writes results next to each source file.
    pub output_dir: Option<PathBuf>,
    /// Size of the disk writer pools.
    pub threads: usize,
    #[serde(default)]
    pub tools: FfmpegConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: MODEL_NAMES[0].to_string(),
            factor: GenerationFactor::X2,
            slow_motion: false,
            input_resize: ResizeFactor(0.5),
            output_resize: ResizeFactor::IDENTITY,
            image_extension: ImageExtension::Png,
            video_extension: VideoExtension::Mp4,
            codec: VideoCodec::default(),
            device: Device::Auto,
            keep_frames: false,
            output_dir: None,
            threads: default_threads(),
            tools: FfmpegConfig::default(),
        }
    }
}

impl GenerationConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_factor(mut self, factor: GenerationFactor) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_slow_motion(mut self, slow_motion: bool) -> Self {
        self.slow_motion = slow_motion;
        self
    }

    pub fn with_input_resize(mut self, factor: ResizeFactor) -> Self {
        self.input_resize = factor;
        self
    }

    pub fn with_output_resize(mut self, factor: ResizeFactor) -> Self {
        self.output_resize = factor;
        self
    }

    pub fn with_image_extension(mut self, ext: ImageExtension) -> Self {
        self.image_extension = ext;
        self
    }

    pub fn with_video_extension(mut self, ext: VideoExtension) -> Self {
        self.video_extension = ext;
        self
    }

    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_keep_frames(mut self, keep_frames: bool) -> Self {
        self.keep_frames = keep_frames;
        self
    }

    pub fn with_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_dir = dir;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_tools(mut self, tools: FfmpegConfig) -> Self {
        self.tools = tools;
        self
    }

    /// Output frame rate for a source playing at `source_fps`.
    pub fn output_fps(&self, source_fps: f64) -> f64 {
        if self.slow_motion {
            source_fps
        } else {
            source_fps * self.factor.value() as f64
        }
    }

    /// Frames held in memory before an extraction batch is flushed.
    pub fn extraction_batch_size(&self) -> usize {
        self.threads * EXTRACTION_FRAMES_PER_THREAD
    }
}

/// Extraction buffers this many decoded frames per writer thread.
pub const EXTRACTION_FRAMES_PER_THREAD: usize = 30;

/// Half the logical cores, never less than one.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

fn default_model() -> String {
    MODEL_NAMES[0].to_string()
}
fn default_generation_option() -> String {
    "x2".to_string()
}
fn default_device() -> String {
    "Auto".to_string()
}
fn default_image_extension() -> String {
    ".png".to_string()
}
fn default_video_extension() -> String {
    ".mp4".to_string()
}
fn default_codec() -> String {
    "x264".to_string()
}
fn default_input_resize() -> String {
    "50".to_string()
}
fn default_output_resize() -> String {
    "100".to_string()
}

/// Last-used selections, stored as a flat JSON record between runs.
///
/// Values are kept as the user typed them; they are only validated when
/// turned into a [`GenerationConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_generation_option")]
    pub generation_option: String,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub keep_frames: bool,
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
    #[serde(default = "default_video_extension")]
    pub video_extension: String,
    #[serde(default = "default_codec")]
    pub video_codec: String,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default = "default_input_resize")]
    pub input_resize_percent: String,
    #[serde(default = "default_output_resize")]
    pub output_resize_percent: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            model: default_model(),
            generation_option: default_generation_option(),
            device: default_device(),
            keep_frames: false,
            image_extension: default_image_extension(),
            video_extension: default_video_extension(),
            video_codec: default_codec(),
            output_path: None,
            input_resize_percent: default_input_resize(),
            output_resize_percent: default_output_resize(),
        }
    }
}

impl Preferences {
    /// Default location inside the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("framegen").join("preferences.json"))
    }

    /// Looks in the config directory, then the current directory, then falls
    /// back to built-in defaults.
    pub fn load() -> Result<Self> {
        let mut tried: Vec<PathBuf> = Vec::new();
        if let Some(p) = Self::default_path() {
            tried.push(p);
        }
        tried.push(PathBuf::from("framegen.json"));

        for p in &tried {
            if p.exists() {
                return Self::load_from(p);
            }
        }
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading preferences {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing preferences {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing preferences")?;
        fs::write(path, json).with_context(|| format!("writing preferences {}", path.display()))
    }

    /// Builds a validated configuration from these values.
    pub fn to_config(&self) -> Result<GenerationConfig, ValidationError> {
        let model = MODEL_NAMES
            .iter()
            .find(|m| m.eq_ignore_ascii_case(self.model.trim()))
            .ok_or_else(|| ValidationError::Unknown { kind: "model", value: self.model.clone() })?;
        let (factor, slow_motion) = GenerationFactor::parse_option(&self.generation_option)?;
        Ok(GenerationConfig {
            model: model.to_string(),
            factor,
            slow_motion,
            input_resize: ResizeFactor::parse_percent("input resolution %", &self.input_resize_percent)?,
            output_resize: ResizeFactor::parse_percent("output resolution %", &self.output_resize_percent)?,
            image_extension: self.image_extension.parse()?,
            video_extension: self.video_extension.parse()?,
            codec: self.video_codec.parse()?,
            device: self.device.parse()?,
            keep_frames: self.keep_frames,
            output_dir: self.output_path.clone(),
            threads: default_threads(),
            tools: FfmpegConfig::default(),
        })
    }

    /// Records the selections of a submitted configuration.
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            generation_option: config.factor.option_label(config.slow_motion),
            device: config.device.to_string(),
            keep_frames: config.keep_frames,
            image_extension: config.image_extension.as_str().to_string(),
            video_extension: config.video_extension.as_str().to_string(),
            video_codec: config.codec.as_str().to_string(),
            output_path: config.output_dir.clone(),
            input_resize_percent: config.input_resize.percent().to_string(),
            output_resize_percent: config.output_resize.percent().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_only_accepts_powers_of_two_up_to_eight() {
        assert_eq!(GenerationFactor::try_from(4).unwrap(), GenerationFactor::X4);
        assert_eq!(GenerationFactor::try_from(3), Err(ValidationError::UnsupportedFactor(3)));
        assert_eq!(GenerationFactor::X8.generated_per_pair(), 7);
    }

    #[test]
    fn generation_option_labels_parse_back() {
        assert_eq!(GenerationFactor::parse_option("Slowmotion x8").unwrap(), (GenerationFactor::X8, true));
        assert_eq!(GenerationFactor::parse_option("x4").unwrap(), (GenerationFactor::X4, false));
        assert_eq!(GenerationFactor::X2.option_label(true), "Slowmotion x2");
        assert!(GenerationFactor::parse_option("fast").is_err());
    }

    #[test]
    fn resize_percent_must_be_positive_number() {
        assert_eq!(ResizeFactor::parse_percent("input", "50").unwrap().fraction(), 0.5);
        assert_eq!(ResizeFactor::parse_percent("input", "150%").unwrap().percent(), 150);
        assert!(matches!(
            ResizeFactor::parse_percent("input", "0"),
            Err(ValidationError::NotPositive { .. })
        ));
        assert!(matches!(
            ResizeFactor::parse_percent("input", "-20"),
            Err(ValidationError::NotPositive { .. })
        ));
        assert!(matches!(
            ResizeFactor::parse_percent("input", "half"),
            Err(ValidationError::NotANumber { .. })
        ));
        assert!(ResizeFactor::new(0.0).is_err());
    }

    #[test]
    fn codec_aliases_map_to_ffmpeg_encoders() {
        assert_eq!("x264".parse::<VideoCodec>().unwrap().ffmpeg_name(), "libx264");
        assert_eq!("x265".parse::<VideoCodec>().unwrap().ffmpeg_name(), "libx265");
        assert_eq!("h264_nvenc".parse::<VideoCodec>().unwrap().ffmpeg_name(), "h264_nvenc");
        assert!("divx".parse::<VideoCodec>().is_err());
    }

    #[test]
    fn device_names() {
        assert_eq!("Auto".parse::<Device>().unwrap(), Device::Auto);
        assert_eq!("GPU 2".parse::<Device>().unwrap().device_index(), Some(1));
        assert_eq!("gpu4".parse::<Device>().unwrap(), Device::Gpu(4));
        assert!("GPU 9".parse::<Device>().is_err());
    }

    #[test]
    fn output_fps_follows_mode() {
        let config = GenerationConfig::default().with_factor(GenerationFactor::X4);
        assert_eq!(config.output_fps(30.0), 120.0);
        assert_eq!(config.with_slow_motion(true).output_fps(30.0), 30.0);
    }

    #[test]
    fn preferences_fill_missing_keys_and_round_trip_through_config() {
        let prefs: Preferences = serde_json::from_str(r#"{"generation_option": "Slowmotion x4"}"#).unwrap();
        assert_eq!(prefs.video_codec, "x264");

        let config = prefs.to_config().unwrap();
        assert_eq!(config.factor, GenerationFactor::X4);
        assert!(config.slow_motion);
        assert_eq!(config.input_resize.percent(), 50);
        assert_eq!(Preferences::from_config(&config), prefs);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let prefs = Preferences { model: "DAIN".to_string(), ..Preferences::default() };
        assert_eq!(prefs.to_config(), Err(ValidationError::Unknown { kind: "model", value: "DAIN".to_string() }));
        let lower = Preferences { model: "rife_lite".to_string(), ..Preferences::default() };
        assert_eq!(lower.to_config().unwrap().model, "RIFE_Lite");
    }

    #[test]
    fn preferences_persist_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");
        let prefs = Preferences { keep_frames: true, ..Preferences::default() };
        prefs.save_to(&path).unwrap();
        assert_eq!(Preferences::load_from(&path).unwrap(), prefs);
    }
}
