use anyhow::Result;
use framegen::error::{EncodingError, InferenceError};
use framegen::orchestrator::{JobState, Orchestrator};
use framegen::video::EncodeRequest;
use framegen::{
    Frame, FrameSource, GenerationConfig, GenerationFactor, InferenceBackend, LinearBlendBackend, PairwiseInterpolator,
    ProgressChannel, ProgressMessage, VideoDecoder, VideoEncoder, VideoJob,
};
use ndarray::Array4;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Ramp {
    next: usize,
    count: usize,
}

impl FrameSource for Ramp {
    fn frame_count(&self) -> usize {
        self.count
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next == self.count {
            return Ok(None);
        }
        let value = (self.next * 20) as u8;
        self.next += 1;
        Ok(Some(Frame::from_rgb8(8, 6, vec![value; 8 * 6 * 3])?))
    }
}

/// Ten 8x6 frames at 30 fps for any source.
#[derive(Clone, Default)]
struct FakeDecoder {
    opened: Arc<AtomicUsize>,
}

impl VideoDecoder for FakeDecoder {
    fn frame_rate(&self, _source: &Path) -> Result<f64> {
        Ok(30.0)
    }

    fn open(&self, _source: &Path) -> Result<Box<dyn FrameSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Ramp { next: 0, count: 10 }))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Encoded {
    fps: f64,
    codec: String,
    manifest_lines: usize,
}

#[derive(Clone, Default)]
struct FakeEncoder {
    encoded: Arc<Mutex<Vec<Encoded>>>,
    manifests: Arc<Mutex<Vec<String>>>,
    remuxed: Arc<AtomicUsize>,
    fail_encode: bool,
    fail_remux: bool,
}

impl VideoEncoder for FakeEncoder {
    fn encode_silent(&self, request: &EncodeRequest<'_>) -> Result<()> {
        if self.fail_encode {
            return Err(EncodingError {
                stage: "video encoding",
                output: request.output.to_path_buf(),
                detail: "codec not available".to_string(),
            }
            .into());
        }
        let manifest = fs::read_to_string(request.manifest)?;
        assert!(manifest.lines().all(|l| l.starts_with("file '")));
        self.encoded.lock().unwrap().push(Encoded {
            fps: request.fps,
            codec: request.codec.to_string(),
            manifest_lines: manifest.lines().count(),
        });
        self.manifests.lock().unwrap().push(manifest);
        fs::write(request.output, b"silent")?;
        Ok(())
    }

    fn remux_audio(&self, _source: &Path, silent: &Path, output: &Path) -> Result<()> {
        self.remuxed.fetch_add(1, Ordering::SeqCst);
        if self.fail_remux {
            anyhow::bail!("no audio stream");
        }
        assert!(silent.is_file());
        fs::write(output, b"with audio")?;
        Ok(())
    }
}

struct Counting {
    calls: Arc<AtomicUsize>,
}

impl InferenceBackend for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LinearBlendBackend.infer(input)
    }
}

struct Harness {
    dir: tempfile::TempDir,
    decoder: FakeDecoder,
    encoder: FakeEncoder,
    calls: Arc<AtomicUsize>,
    channel: Arc<ProgressChannel>,
}

impl Harness {
    fn new(encoder: FakeEncoder) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            decoder: FakeDecoder::default(),
            encoder,
            calls: Arc::new(AtomicUsize::new(0)),
            channel: Arc::new(ProgressChannel::new()),
        }
    }

    fn source(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, b"not really a video").unwrap();
        path
    }

    fn orchestrator(&self, config: GenerationConfig) -> Orchestrator {
        let interpolator = PairwiseInterpolator::new(Box::new(Counting { calls: self.calls.clone() }));
        Orchestrator::new(
            config.with_threads(2),
            interpolator,
            Box::new(self.decoder.clone()),
            Box::new(self.encoder.clone()),
            self.channel.clone(),
        )
        .unwrap()
    }

    fn encoded(&self) -> Vec<Encoded> {
        self.encoder.encoded.lock().unwrap().clone()
    }

    fn manifests(&self) -> Vec<String> {
        self.encoder.manifests.lock().unwrap().clone()
    }
}

#[test]
fn four_times_frame_rate() {
    let h = Harness::new(FakeEncoder::default());
    let source = h.source("clip.mp4");
    let config = GenerationConfig::default().with_factor(GenerationFactor::X4);
    let job = VideoJob::new(&source, 1, &config);
    let mut orchestrator = h.orchestrator(config);

    let report = orchestrator.run_job(&job).unwrap();
    assert_eq!(report.total_frames, 37);
    assert!(!report.resumed);
    assert_eq!(report.encode.fps, 120.0);
    assert!(report.encode.audio_attempted);
    assert_eq!(h.calls.load(Ordering::SeqCst), 9 * 3);
    assert_eq!(
        h.encoded(),
        vec![Encoded { fps: 120.0, codec: "libx264".to_string(), manifest_lines: 37 }]
    );
    assert_eq!(h.encoder.remuxed.load(Ordering::SeqCst), 1);

    assert_eq!(fs::read(&job.output_video).unwrap(), b"with audio");
    assert!(!framegen::encode::silent_path(&job.output_video).exists());
    assert!(!framegen::encode::manifest_path(&job.output_video).exists());
    assert!(!job.work_dir.exists());
    assert_eq!(orchestrator.state(), JobState::Done);
}

#[test]
fn eight_times_slow_motion_keeps_rate_and_drops_audio() {
    let h = Harness::new(FakeEncoder::default());
    let source = h.source("clip.mov");
    let config = GenerationConfig::default().with_factor(GenerationFactor::X8).with_slow_motion(true);
    let job = VideoJob::new(&source, 1, &config);
    let mut orchestrator = h.orchestrator(config);

    let report = orchestrator.run_job(&job).unwrap();
    assert_eq!(report.total_frames, 73);
    assert_eq!(report.encode.fps, 30.0);
    assert!(!report.encode.audio_attempted);
    assert_eq!(h.encoded()[0].manifest_lines, 73);
    assert_eq!(h.encoder.remuxed.load(Ordering::SeqCst), 0);
    assert_eq!(fs::read(&job.output_video).unwrap(), b"silent");
    assert!(!framegen::encode::silent_path(&job.output_video).exists());
}

#[test]
fn rerun_with_kept_frames_resumes_without_inference() {
    let h = Harness::new(FakeEncoder::default());
    let source = h.source("clip.mkv");
    let config = GenerationConfig::default().with_factor(GenerationFactor::X4).with_keep_frames(true);
    let job = VideoJob::new(&source, 1, &config);

    let first = h.orchestrator(config.clone()).run_job(&job).unwrap();
    assert!(job.work_dir.is_dir());
    let calls = h.calls.load(Ordering::SeqCst);
    assert_eq!(calls, 27);

    let second = h.orchestrator(config).run_job(&job).unwrap();
    assert!(second.resumed);
    assert_eq!(second.total_frames, first.total_frames);
    assert_eq!(second.generation.computed, 0);
    assert_eq!(second.generation.skipped, 9);
    assert_eq!(h.calls.load(Ordering::SeqCst), calls);
    assert_eq!(h.decoder.opened.load(Ordering::SeqCst), 1);
    // Same frames, same order.
    let manifests = h.manifests();
    assert_eq!(manifests.len(), 2);
    assert_eq!(manifests[0].lines().count(), 37);
    assert_eq!(manifests[1], manifests[0]);
}

#[test]
fn interrupted_write_does_not_block_resume() {
    let h = Harness::new(FakeEncoder::default());
    let source = h.source("clip.mp4");
    let config = GenerationConfig::default().with_keep_frames(true);
    let job = VideoJob::new(&source, 1, &config);
    h.orchestrator(config.clone()).run_job(&job).unwrap();

    // A kill mid-write leaves only the hidden partial file behind.
    let originals = framegen::resume::recover_originals(&job.work_dir, &config.model, config.image_extension).unwrap();
    assert_eq!(originals.len(), 10);
    let lost = framegen::paths::generated_frame_paths(&originals[1], &config.model, config.image_extension, config.factor);
    let partial = framegen::frame::partial_path(&lost[0]);
    fs::rename(&lost[0], &partial).unwrap();
    fs::write(&partial, &fs::read(&partial).unwrap()[..20]).unwrap();

    let report = h.orchestrator(config.clone()).run_job(&job).unwrap();
    assert!(report.resumed);
    assert_eq!(report.generation.computed, 1);
    assert!(Frame::open(&lost[0]).is_ok());
    assert_eq!(
        framegen::resume::recover_originals(&job.work_dir, &config.model, config.image_extension).unwrap(),
        originals
    );
    let manifests = h.manifests();
    assert_eq!(manifests[1], manifests[0]);
}

#[test]
fn batch_reports_completion() {
    let h = Harness::new(FakeEncoder::default());
    let files = vec![h.source("a.mp4"), h.source("b.mp4")];
    let mut orchestrator = h.orchestrator(GenerationConfig::default());

    assert_eq!(orchestrator.run_batch(&files), ProgressMessage::Completed);
    assert_eq!(h.channel.take(), Some(ProgressMessage::Completed));
    assert_eq!(h.decoder.opened.load(Ordering::SeqCst), 2);
    assert_eq!(h.encoded().len(), 2);
}

#[test]
fn failed_encode_aborts_batch_and_keeps_frames() {
    let h = Harness::new(FakeEncoder { fail_encode: true, ..FakeEncoder::default() });
    let files = vec![h.source("a.mp4"), h.source("b.mp4")];
    let config = GenerationConfig::default();
    let first_job = VideoJob::new(&files[0], 1, &config);
    let mut orchestrator = h.orchestrator(config);

    let last = orchestrator.run_batch(&files);
    match &last {
        ProgressMessage::Error(detail) => assert!(detail.contains("codec not available"), "{}", detail),
        other => panic!("expected an error, got {:?}", other),
    }
    assert_eq!(h.channel.latest(), Some(last));
    assert_eq!(orchestrator.state(), JobState::Error);
    // The second file is never started.
    assert_eq!(h.decoder.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.encoder.remuxed.load(Ordering::SeqCst), 0);
    assert!(first_job.work_dir.is_dir());
    assert!(!first_job.output_video.exists());
}

#[test]
fn failed_audio_pass_keeps_silent_video() {
    let h = Harness::new(FakeEncoder { fail_remux: true, ..FakeEncoder::default() });
    let source = h.source("clip.mp4");
    let config = GenerationConfig::default();
    let job = VideoJob::new(&source, 1, &config);

    let report = h.orchestrator(config).run_job(&job).unwrap();
    assert!(report.encode.audio_attempted);
    assert!(!report.encode.audio_copied);
    assert_eq!(fs::read(&job.output_video).unwrap(), b"silent");
}

#[test]
fn empty_selection_is_an_error() {
    let h = Harness::new(FakeEncoder::default());
    let last = h.orchestrator(GenerationConfig::default()).run_batch(&[]);
    assert!(matches!(last, ProgressMessage::Error(_)));
    assert_eq!(h.decoder.opened.load(Ordering::SeqCst), 0);
}
