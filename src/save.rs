//! Background frame writes.
//!
//! Encoding an image is slower than producing the next one, so stages hand
//! finished frames to a rayon pool and keep going. A stage opens a
//! [`SavePool::scope`] around its loop; the scope does not return until every
//! submitted write has finished, so the next stage never reads a half-written
//! directory. At most two batches per writer thread are in flight; `submit`
//! blocks the producer until one drains.

use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::{Scope, ThreadPool, ThreadPoolBuilder};
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use tracing::debug;

use crate::frame::Frame;

/// Generated or resized frames buffered before a background write is started.
pub const SAVE_BATCH: usize = 8;

/// Queued batches allowed per writer thread.
pub const BATCHES_PER_THREAD: usize = 2;

pub type PendingFrame = (PathBuf, Frame);

pub struct SavePool {
    pool: ThreadPool,
}

impl SavePool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("framegen-save-{}", i))
            .build()
            .context("starting frame writer pool")?;
        Ok(Self { pool })
    }

    /// Writes `frames` in parallel and waits for all of them.
    pub fn write_all(&self, frames: &[PendingFrame]) -> Result<()> {
        self.pool
            .install(|| frames.par_iter().try_for_each(|(path, frame)| frame.save(path)))
    }

    /// Runs `body` on the calling thread with a handle for background writes.
    ///
    /// Returns once `body` is done and every submitted batch is on disk. An
    /// error from `body` wins; otherwise the first failed write is returned.
    pub fn scope<R, F>(&self, body: F) -> Result<R>
    where
        F: for<'a, 's> FnOnce(&SaveScope<'a, 's>) -> Result<R>,
    {
        let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);
        let in_flight = InFlight::new(self.pool.current_num_threads() * BATCHES_PER_THREAD);
        let result = self.pool.in_place_scope(|scope| {
            body(&SaveScope { scope, first_error: &first_error, in_flight: &in_flight })
        });
        let write_error = first_error.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        let value = result?;
        match write_error {
            Some(e) => Err(e),
            None => Ok(value),
        }
    }
}

/// Handle for submitting writes inside [`SavePool::scope`].
pub struct SaveScope<'a, 's> {
    scope: &'a Scope<'s>,
    first_error: &'s Mutex<Option<anyhow::Error>>,
    in_flight: &'s InFlight,
}

impl SaveScope<'_, '_> {
    /// Starts writing `batch` on the pool. Waits only while the queue is full.
    pub fn submit(&self, batch: Vec<PendingFrame>) {
        if batch.is_empty() {
            return;
        }
        let first_error = self.first_error;
        let in_flight = self.in_flight;
        in_flight.acquire();
        self.scope.spawn(move |_| {
            debug!(frames = batch.len(), "writing frame batch");
            let written = batch.iter().try_for_each(|(path, frame)| frame.save(path));
            drop(batch);
            in_flight.release();
            if let Err(e) = written {
                let mut slot = first_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                slot.get_or_insert(e);
            }
        });
    }
}

/// Counting gate over queued batches.
struct InFlight {
    count: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

impl InFlight {
    fn new(limit: usize) -> Self {
        Self { count: Mutex::new(0), freed: Condvar::new(), limit: limit.max(1) }
    }

    fn acquire(&self) {
        let mut count = self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while *count >= self.limit {
            count = self.freed.wait(count).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *count += 1;
    }

    fn release(&self) {
        let mut count = self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *count = count.saturating_sub(1);
        self.freed.notify_one();
    }
}

/// Collects frames and submits them in batches of [`SAVE_BATCH`].
pub struct SaveBuffer<'a, 'b, 's> {
    scope: &'a SaveScope<'b, 's>,
    pending: Vec<PendingFrame>,
}

impl<'a, 'b, 's> SaveBuffer<'a, 'b, 's> {
    pub fn new(scope: &'a SaveScope<'b, 's>) -> Self {
        Self { scope, pending: Vec::with_capacity(SAVE_BATCH) }
    }

    pub fn push(&mut self, path: PathBuf, frame: Frame) {
        self.pending.push((path, frame));
        if self.pending.len() >= SAVE_BATCH {
            self.scope.submit(std::mem::take(&mut self.pending));
        }
    }

    pub fn extend(&mut self, frames: impl IntoIterator<Item = PendingFrame>) {
        for (path, frame) in frames {
            self.push(path, frame);
        }
    }

    /// Submits whatever is left.
    pub fn flush(&mut self) {
        self.scope.submit(std::mem::take(&mut self.pending));
    }
}

impl Drop for SaveBuffer<'_, '_, '_> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageExtension;
    use crate::paths::original_frame_path;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn ensure_written(paths: &[PathBuf]) -> Result<()> {
        match paths.iter().find(|p| !p.is_file()) {
            Some(missing) => Err(anyhow::anyhow!("frame {} was not written", missing.display())),
            None => Ok(()),
        }
    }

    fn frame(value: u8) -> Frame {
        Frame::from_rgb8(4, 4, vec![value; 48]).unwrap()
    }

    #[test]
    fn scope_waits_for_every_batch() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SavePool::new(2).unwrap();
        let paths: Vec<PathBuf> = (0..21).map(|i| original_frame_path(dir.path(), i, ImageExtension::Png)).collect();
        let expected = paths.clone();
        pool.scope(|scope| {
            let mut buffer = SaveBuffer::new(scope);
            for (i, path) in paths.into_iter().enumerate() {
                buffer.push(path, frame(i as u8));
            }
            Ok(())
        })
        .unwrap();
        ensure_written(&expected).unwrap();
        assert_eq!(Frame::open(&expected[20]).unwrap().image().as_bytes()[0], 20);
    }

    #[test]
    fn first_write_error_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SavePool::new(2).unwrap();
        let missing = dir.path().join("no-such-dir").join("frame_000.png");
        let err = pool
            .scope(|scope| {
                scope.submit(vec![(missing.clone(), frame(1))]);
                Ok(())
            })
            .unwrap_err();
        assert!(format!("{:#}", err).contains("frame_000.png"));
    }

    #[test]
    fn write_all_is_joined() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SavePool::new(3).unwrap();
        let frames: Vec<PendingFrame> = (0..5)
            .map(|i| (original_frame_path(dir.path(), i, ImageExtension::Bmp), frame(9)))
            .collect();
        pool.write_all(&frames).unwrap();
        let paths: Vec<PathBuf> = frames.into_iter().map(|(p, _)| p).collect();
        ensure_written(&paths).unwrap();
        assert!(ensure_written(&[dir.path().join("absent.png")]).is_err());
    }

    #[test]
    fn gate_blocks_past_its_limit() {
        let gate = Arc::new(InFlight::new(2));
        gate.acquire();
        gate.acquire();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                gate.acquire();
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        gate.release();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn many_batches_through_a_single_writer() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SavePool::new(1).unwrap();
        let paths: Vec<PathBuf> = (0..100).map(|i| original_frame_path(dir.path(), i, ImageExtension::Png)).collect();
        let expected = paths.clone();
        pool.scope(|scope| {
            for chunk in paths.chunks(SAVE_BATCH) {
                scope.submit(chunk.iter().map(|p| (p.clone(), frame(3))).collect());
            }
            Ok(())
        })
        .unwrap();
        ensure_written(&expected).unwrap();
    }
}
