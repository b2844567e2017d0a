use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::FuzzySelect;
use framegen::config::{default_threads, FfmpegConfig, GenerationFactor, Preferences};
use framegen::error::ValidationError;
use framegen::orchestrator::JobState;
use framegen::paths::{filter_supported, is_supported_video, VideoJob};
use framegen::progress::ProgressMessage;
use framegen::worker::{run_worker, WorkerProcess, WorkerRequest};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a batch read as JSON from stdin, reporting status on stdout
    #[command(hide = true)]
    Worker,
}

#[derive(Parser, Debug)]
#[command(version, about = "Frame generation and slow motion for videos.")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Input video files
    inputs: Vec<PathBuf>,

    /// Directory for outputs (default: beside each input)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Interpolation model (RIFE, RIFE_Lite)
    #[arg(long)]
    model: Option<String>,

    /// Frame generation factor: 2, 4 or 8
    #[arg(long)]
    factor: Option<u32>,

    /// Keep the source frame rate, stretching the video instead
    #[arg(long, default_value_t = false)]
    slowmo: bool,

    /// Input resolution in percent, applied before generation
    #[arg(long)]
    input_resize: Option<String>,

    /// Output resolution in percent, applied after generation
    #[arg(long)]
    output_resize: Option<String>,

    /// Frame image format (.png, .jpg, .bmp, .tiff)
    #[arg(long)]
    image_ext: Option<String>,

    /// Output container (.mp4, .mkv, .avi, .mov)
    #[arg(long)]
    video_ext: Option<String>,

    /// Video codec (x264, x265, h264_nvenc, hevc_nvenc, h264_amf, hevc_amf, h264_qsv, hevc_qsv)
    #[arg(long)]
    codec: Option<String>,

    /// Inference device (Auto, GPU 1-4)
    #[arg(long)]
    device: Option<String>,

    /// Keep the frames directory after encoding
    #[arg(long, default_value_t = false)]
    keep_frames: bool,

    /// Frame writer threads (default: half the CPU cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Path to the ffmpeg executable
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Path to the ffprobe executable
    #[arg(long)]
    ffprobe: Option<PathBuf>,

    /// Do not remember these settings for the next run
    #[arg(long, default_value_t = false)]
    no_save_preferences: bool,
}

fn main() -> Result<()> {
    // stdout belongs to the worker protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Some(Command::Worker) = &args.cmd {
        let last = run_worker(io::stdin().lock(), io::stdout())?;
        info!(%last, "worker finished");
        return Ok(());
    }

    let mut prefs = Preferences::load()?;
    apply_overrides(&mut prefs, &args)?;
    let config = prefs
        .to_config()?
        .with_threads(args.threads.unwrap_or_else(default_threads))
        .with_tools(FfmpegConfig {
            ffmpeg_path: args.ffmpeg.clone(),
            ffprobe_path: args.ffprobe.clone(),
            exiftool_path: None,
        });

    let files = select_files(&args.inputs)?;

    if !args.no_save_preferences {
        if let Some(path) = Preferences::default_path() {
            if let Err(e) = Preferences::from_config(&config).save_to(&path) {
                warn!("could not save preferences: {:#}", e);
            }
        }
    }

    for job in VideoJob::batch(&files, &config) {
        println!("{}. {} -> {}", job.ordinal, job.source.display(), job.output_video.display());
    }

    let exe = std::env::current_exe().context("locating framegen executable")?;
    let worker = Arc::new(WorkerProcess::spawn(&exe, &WorkerRequest { config, files })?);

    if io::stdin().is_terminal() {
        println!("Type 'stop' and press Enter to cancel.");
        let worker = worker.clone();
        thread::spawn(move || {
            for line in io::stdin().lock().lines().map_while(Result::ok) {
                if line.trim().eq_ignore_ascii_case("stop") {
                    if let Err(e) = worker.stop() {
                        warn!("could not stop worker: {:#}", e);
                    }
                    break;
                }
            }
        });
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("Starting");

    let last = worker.watch(Duration::from_secs(1), |message| spinner.set_message(message.to_string()));
    spinner.finish_and_clear();
    if last != ProgressMessage::Stopped {
        worker.finish()?;
    }

    match (JobState::after(&last), last) {
        (Some(JobState::Done), _) => {
            println!("Frame generation complete.");
            Ok(())
        }
        (Some(JobState::Stopped), _) => {
            println!("Frame generation stopped.");
            Ok(())
        }
        (_, ProgressMessage::Error(detail)) => Err(anyhow!("Frame generation failed: {}", detail)),
        (_, other) => Err(anyhow!("unexpected final status: {}", other)),
    }
}

/// Command-line values take precedence over the remembered ones.
fn apply_overrides(prefs: &mut Preferences, args: &Args) -> Result<()> {
    if let Some(model) = &args.model {
        prefs.model = model.clone();
    }
    match args.factor {
        Some(factor) => {
            let factor = GenerationFactor::try_from(factor)?;
            prefs.generation_option = factor.option_label(args.slowmo);
        }
        None if args.slowmo => {
            let (factor, _) = GenerationFactor::parse_option(&prefs.generation_option)?;
            prefs.generation_option = factor.option_label(true);
        }
        None => {}
    }
    if let Some(percent) = &args.input_resize {
        prefs.input_resize_percent = percent.clone();
    }
    if let Some(percent) = &args.output_resize {
        prefs.output_resize_percent = percent.clone();
    }
    if let Some(ext) = &args.image_ext {
        prefs.image_extension = ext.clone();
    }
    if let Some(ext) = &args.video_ext {
        prefs.video_extension = ext.clone();
    }
    if let Some(codec) = &args.codec {
        prefs.video_codec = codec.clone();
    }
    if let Some(device) = &args.device {
        prefs.device = device.clone();
    }
    if args.keep_frames {
        prefs.keep_frames = true;
    }
    if let Some(dir) = &args.output_dir {
        prefs.output_path = Some(dir.clone());
    }
    Ok(())
}

/// Supported videos among `inputs`, or one picked interactively from the
/// current directory when none were given.
fn select_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if inputs.is_empty() {
        if !io::stdin().is_terminal() {
            return Err(ValidationError::NoFiles.into());
        }
        let files = find_video_files();
        if files.is_empty() {
            return Err(anyhow!("No video files found in current directory."));
        }
        let items: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
        let selection = FuzzySelect::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("Choose a video")
            .default(0)
            .items(&items)
            .interact()?;
        return Ok(vec![files[selection].clone()]);
    }

    let supported = filter_supported(inputs);
    for dropped in inputs.iter().filter(|p| !is_supported_video(p)) {
        warn!("skipping unsupported file {}", dropped.display());
    }
    if supported.is_empty() {
        return Err(ValidationError::NoFiles.into());
    }
    Ok(supported)
}

fn find_video_files() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(".")
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file() && is_supported_video(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}
