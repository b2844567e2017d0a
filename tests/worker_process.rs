use framegen::{GenerationConfig, ProgressMessage, WorkerProcess, WorkerRequest};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn request(files: Vec<PathBuf>) -> WorkerRequest {
    WorkerRequest { config: GenerationConfig::default().with_threads(1), files }
}

#[test]
fn unreadable_source_ends_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.mp4");
    let worker = WorkerProcess::spawn(Path::new(env!("CARGO_BIN_EXE_framegen")), &request(vec![missing])).unwrap();

    let mut seen = Vec::new();
    let last = worker.watch(Duration::from_millis(20), |m| seen.push(m.clone()));
    worker.finish().unwrap();

    assert!(matches!(last, ProgressMessage::Error(_)), "{:?}", last);
    assert!(seen.iter().all(|m| !m.is_terminal() || m == &last));
}

#[test]
fn empty_selection_ends_in_error() {
    let worker = WorkerProcess::spawn(Path::new(env!("CARGO_BIN_EXE_framegen")), &request(Vec::new())).unwrap();
    let last = worker.watch(Duration::from_millis(20), |_| {});
    worker.finish().unwrap();
    assert!(matches!(last, ProgressMessage::Error(detail) if detail.contains("no supported video file")));
}

#[cfg(unix)]
#[test]
fn silent_exit_is_reported_as_error() {
    // `true worker` exits at once without writing a status line.
    let worker = WorkerProcess::spawn(Path::new("true"), &request(Vec::new())).unwrap();
    let last = worker.watch(Duration::from_millis(20), |_| {});
    worker.finish().unwrap();
    assert!(matches!(last, ProgressMessage::Error(_)));
}

#[cfg(unix)]
#[test]
fn stop_kills_a_running_worker() {
    // `yes worker` never ends and never writes a valid status line.
    let worker = WorkerProcess::spawn(Path::new("yes"), &request(Vec::new())).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    worker.stop().unwrap();
    let last = worker.watch(Duration::from_millis(20), |_| {});
    assert_eq!(last, ProgressMessage::Stopped);
    assert_eq!(worker.channel().latest(), None);
}
