//! Status reporting from the pipeline to whoever is watching it.
//!
//! Stages publish [`ProgressMessage`]s into a [`StatusSink`]. Inside the
//! worker process the sink is a [`JsonLineSink`] on stdout; on the watching
//! side each line lands in a [`ProgressChannel`], which keeps only the most
//! recent message.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// A status line, or one of the three messages that end a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProgressMessage {
    Status(String),
    Completed,
    Stopped,
    Error(String),
}

impl ProgressMessage {
    pub fn status(text: impl Into<String>) -> Self {
        Self::Status(text.into())
    }

    pub fn loading_model() -> Self {
        Self::status("Loading AI model")
    }

    pub fn extraction_started(ordinal: usize) -> Self {
        Self::Status(format!("{}. Extracting video frames", ordinal))
    }

    pub fn extracting(ordinal: usize, percent: f64) -> Self {
        Self::Status(format!("{}. Extracting video frames ({:.2}%)", ordinal, percent))
    }

    pub fn resuming(ordinal: usize) -> Self {
        Self::Status(format!("{}. Resume frame generation", ordinal))
    }

    pub fn generation_started(ordinal: usize) -> Self {
        Self::Status(format!("{}. Video frame generation", ordinal))
    }

    pub fn generating(ordinal: usize, percent: f64, remaining: &str) -> Self {
        Self::Status(format!("{}. Generating frames {:.2}% ({})", ordinal, percent, remaining))
    }

    pub fn finalizing(ordinal: usize) -> Self {
        Self::Status(format!("{}. Finalizing frame generation", ordinal))
    }

    pub fn encoding(ordinal: usize) -> Self {
        Self::Status(format!("{}. Encoding frame-generated video", ordinal))
    }

    /// Completed, Stopped and Error end the batch; the watcher stops on them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Status(_))
    }
}

impl fmt::Display for ProgressMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(text) => f.write_str(text),
            Self::Completed => f.write_str("Completed"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Error(detail) => write!(f, "Error: {}", detail),
        }
    }
}

/// Where pipeline stages send their status.
pub trait StatusSink: Send + Sync {
    fn publish(&self, message: ProgressMessage);
}

/// Single-slot cell holding the latest unread message.
///
/// A write replaces whatever has not been read yet, so a slow reader only
/// ever sees the newest status.
#[derive(Debug, Default)]
pub struct ProgressChannel {
    slot: Mutex<Option<ProgressMessage>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressMessage>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, message: ProgressMessage) {
        *self.lock() = Some(message);
    }

    /// Reads and clears the slot.
    pub fn take(&self) -> Option<ProgressMessage> {
        self.lock().take()
    }

    /// Reads without clearing.
    pub fn latest(&self) -> Option<ProgressMessage> {
        self.lock().clone()
    }
}

impl StatusSink for ProgressChannel {
    fn publish(&self, message: ProgressMessage) {
        self.set(message);
    }
}

/// Writes each message as one JSON object per line.
pub struct JsonLineSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> StatusSink for JsonLineSink<W> {
    fn publish(&self, message: ProgressMessage) {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("could not serialize status: {}", e);
                return;
            }
        };
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
            warn!("could not write status line: {}", e);
        }
    }
}

/// Polls `channel` every `interval` until a terminal message arrives.
/// Every message read, terminal or not, is passed to `on_message` first.
pub fn watch<F>(channel: &ProgressChannel, interval: Duration, mut on_message: F) -> ProgressMessage
where
    F: FnMut(&ProgressMessage),
{
    loop {
        if let Some(message) = channel.take() {
            on_message(&message);
            if message.is_terminal() {
                return message;
            }
        }
        thread::sleep(interval);
    }
}

/// Compact remaining time such as `01h02m03s`; zero units are left out, so
/// anything under half a second is the empty string.
pub fn format_remaining(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds.round() as u64 } else { 0 };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut text = String::new();
    if hours > 0 {
        text.push_str(&format!("{:02}h", hours));
    }
    if minutes > 0 {
        text.push_str(&format!("{:02}m", minutes));
    }
    if secs > 0 {
        text.push_str(&format!("{:02}s", secs));
    }
    text
}

/// Computed pairs between two generation status messages.
pub const REPORT_EVERY_PAIRS: usize = 8;
/// The timing window starts over every this many pairs.
pub const WINDOW_RESET_PAIRS: usize = 100;

/// Recent per-pair compute times, used for the remaining-time estimate.
#[derive(Debug, Default, Clone)]
pub struct ProgressWindow {
    samples: Vec<Duration>,
}

impl ProgressWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.samples.push(elapsed);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    /// Window mean times `remaining` pairs, formatted; empty when unknown.
    pub fn remaining(&self, remaining: usize) -> String {
        self.mean()
            .map(|mean| format_remaining(mean.as_secs_f64() * remaining as f64))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn channel_keeps_only_latest() {
        let channel = ProgressChannel::new();
        assert_eq!(channel.take(), None);
        channel.set(ProgressMessage::status("a"));
        channel.set(ProgressMessage::status("b"));
        assert_eq!(channel.latest(), Some(ProgressMessage::status("b")));
        assert_eq!(channel.take(), Some(ProgressMessage::status("b")));
        assert_eq!(channel.take(), None);
    }

    #[test]
    fn status_text() {
        assert_eq!(ProgressMessage::extracting(2, 40.0).to_string(), "2. Extracting video frames (40.00%)");
        assert_eq!(ProgressMessage::generating(1, 12.5, "05s").to_string(), "1. Generating frames 12.50% (05s)");
        assert_eq!(ProgressMessage::encoding(3).to_string(), "3. Encoding frame-generated video");
        assert!(!ProgressMessage::loading_model().is_terminal());
        assert!(ProgressMessage::Completed.is_terminal());
        assert!(ProgressMessage::Error("x".into()).is_terminal());
    }

    #[test]
    fn remaining_time_format() {
        assert_eq!(format_remaining(3723.0), "01h02m03s");
        assert_eq!(format_remaining(65.0), "01m05s");
        assert_eq!(format_remaining(3600.0), "01h");
        assert_eq!(format_remaining(0.2), "");
        assert_eq!(format_remaining(f64::NAN), "");
    }

    #[test]
    fn window_mean_and_reset() {
        let mut window = ProgressWindow::new();
        assert_eq!(window.remaining(10), "");
        window.record(Duration::from_secs(1));
        window.record(Duration::from_secs(3));
        assert_eq!(window.mean(), Some(Duration::from_secs(2)));
        assert_eq!(window.remaining(30), "01m");
        assert_eq!(window.len(), 2);
        window.clear();
        assert!(window.is_empty());
    }

    #[test]
    fn json_lines_round_trip() {
        let sink = JsonLineSink::new(Vec::new());
        sink.publish(ProgressMessage::status("1. Video frame generation"));
        sink.publish(ProgressMessage::Completed);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let parsed: Vec<ProgressMessage> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(parsed, vec![ProgressMessage::status("1. Video frame generation"), ProgressMessage::Completed]);
    }

    #[test]
    fn watch_returns_terminal() {
        let channel = Arc::new(ProgressChannel::new());
        let writer = channel.clone();
        let handle = thread::spawn(move || {
            writer.set(ProgressMessage::status("working"));
            thread::sleep(Duration::from_millis(30));
            writer.set(ProgressMessage::Stopped);
        });
        let mut seen = Vec::new();
        let last = watch(&channel, Duration::from_millis(5), |m| seen.push(m.clone()));
        handle.join().unwrap();
        assert_eq!(last, ProgressMessage::Stopped);
        assert_eq!(seen.last(), Some(&ProgressMessage::Stopped));
    }
}
