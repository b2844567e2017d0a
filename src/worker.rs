//! The batch runs in a child process so it can be stopped at any point.
//!
//! The parent starts `<exe> worker`, writes one JSON [`WorkerRequest`] to its
//! stdin and closes it. The child answers with one JSON [`ProgressMessage`]
//! per line on stdout, the last one terminal. Stopping kills the child.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command as ProcCommand, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::orchestrator::process_batch;
use crate::progress::{self, JsonLineSink, ProgressChannel, ProgressMessage};

/// Name of the hidden subcommand the child runs.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Everything the child needs to run a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub config: GenerationConfig,
    pub files: Vec<PathBuf>,
}

/// Child side: reads the request from `input` and reports on `output`.
pub fn run_worker<R, W>(input: R, output: W) -> Result<ProgressMessage>
where
    R: Read,
    W: Write + Send + 'static,
{
    let request: WorkerRequest = serde_json::from_reader(input).context("reading worker request")?;
    info!(files = request.files.len(), "worker started");
    let sink = Arc::new(JsonLineSink::new(output));
    Ok(process_batch(request.config, &request.files, sink))
}

/// Parent side handle on a running worker.
pub struct WorkerProcess {
    child: Mutex<Child>,
    channel: Arc<ProgressChannel>,
    /// Set once stop was requested; guards the channel against late lines.
    stopped: Arc<Mutex<bool>>,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerProcess {
    /// Starts `program worker` and sends it `request`.
    pub fn spawn(program: &Path, request: &WorkerRequest) -> Result<Self> {
        let mut child = ProcCommand::new(program)
            .arg(WORKER_SUBCOMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("starting worker {}", program.display()))?;
        debug!(pid = child.id(), "worker spawned");

        let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("worker stdin was not captured"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("worker stdout was not captured"))?;
        let payload = serde_json::to_vec(request).context("serializing worker request")?;
        match stdin.write_all(&payload).and_then(|()| stdin.flush()) {
            Ok(()) => {}
            // The child already exited; the relay reports it.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => debug!("worker closed stdin early"),
            Err(e) => return Err(e).context("sending worker request"),
        }
        drop(stdin);

        let channel = Arc::new(ProgressChannel::new());
        let stopped = Arc::new(Mutex::new(false));
        let relay = {
            let channel = channel.clone();
            let stopped = stopped.clone();
            thread::Builder::new()
                .name("framegen-status".to_string())
                .spawn(move || relay_status(stdout, &channel, &stopped))
                .context("starting status relay")?
        };

        Ok(Self { child: Mutex::new(child), channel, stopped, relay: Mutex::new(Some(relay)) })
    }

    pub fn channel(&self) -> Arc<ProgressChannel> {
        self.channel.clone()
    }

    /// Polls the status channel every `interval` until the batch ends.
    pub fn watch<F>(&self, interval: Duration, on_message: F) -> ProgressMessage
    where
        F: FnMut(&ProgressMessage),
    {
        progress::watch(&self.channel, interval, on_message)
    }

    /// Kills the worker and publishes [`ProgressMessage::Stopped`].
    pub fn stop(&self) -> Result<()> {
        let mut stopped = self.stopped.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *stopped {
            return Ok(());
        }
        *stopped = true;
        let mut child = self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if child.try_wait().context("checking worker")?.is_none() {
            child.kill().context("killing worker")?;
            child.wait().context("waiting for worker")?;
        }
        info!("worker stopped");
        self.channel.set(ProgressMessage::Stopped);
        Ok(())
    }

    /// Waits for the child to exit and the relay to drain its output.
    pub fn finish(&self) -> Result<()> {
        let status = self
            .child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .wait()
            .context("waiting for worker")?;
        debug!(%status, "worker exited");
        let relay = self.relay.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(handle) = relay {
            handle.join().map_err(|_| anyhow!("status relay panicked"))?;
        }
        Ok(())
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let child = self.child.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Copies status lines into `channel` until the child closes stdout. A
/// worker that ends without a terminal message is reported as an error.
fn relay_status(stdout: ChildStdout, channel: &ProgressChannel, stopped: &Mutex<bool>) {
    let mut finished = false;
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("reading worker output: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<ProgressMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(%line, "ignoring malformed status line: {}", e);
                continue;
            }
        };
        let stopped = stopped.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *stopped {
            return;
        }
        finished |= message.is_terminal();
        channel.set(message);
    }

    let stopped = stopped.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if !finished && !*stopped {
        channel.set(ProgressMessage::Error("worker process exited without reporting a result".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationFactor;

    #[test]
    fn request_round_trips_through_json() {
        let request = WorkerRequest {
            config: GenerationConfig::default().with_factor(GenerationFactor::X8).with_slow_motion(true),
            files: vec![PathBuf::from("a.mp4"), PathBuf::from("b c.mkv")],
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: WorkerRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn bad_request_is_an_error() {
        assert!(run_worker(&b"not json"[..], Vec::new()).is_err());
    }

    #[test]
    fn empty_selection_reports_error_line() {
        let request = WorkerRequest { config: GenerationConfig::default(), files: Vec::new() };
        let json = serde_json::to_vec(&request).unwrap();
        let out = SharedBuffer::default();
        let last = run_worker(&json[..], out.clone()).unwrap();
        assert!(matches!(last, ProgressMessage::Error(_)));

        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<ProgressMessage> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.first(), Some(&ProgressMessage::loading_model()));
        assert_eq!(lines.last(), Some(&last));
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
