//! The follower: an async reader over a file that keeps growing and rotating.

use crate::error::{Error, ErrorSlot, Result};
use crate::file::{SharedFile, TrackedFile, resolve_path};
use crate::options::{Options, Strategy};
use crate::{polling, watcher};
use futures::Stream;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};

/// Follows one file, surviving remove, rename and truncate rotations.
///
/// Reading waits until bytes are available, the follower is closed, or a
/// background error is pending. It never completes with zero bytes for a
/// non-empty buffer unless the follower is closed, which makes it safe to
/// drive from `read_exact`-style loops.
///
/// Implements [`AsyncRead`] for byte-level reads and [`Stream`] for chunks.
pub struct Follower {
    shared: SharedFile,
    errors: mpsc::Receiver<Error>,
    shutdown_tx: broadcast::Sender<()>,
    _task_handles: Vec<JoinHandle<()>>,
    path: PathBuf,
    strategy: Strategy,
    poll_interval: Duration,
    wait: Option<Pin<Box<Sleep>>>,
    closed: bool,
}

impl Follower {
    /// Opens `path` and starts following it with the given options.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        options.validate()?;
        let path = resolve_path(path.as_ref())?;

        let open_path = path.clone();
        let start = options.start;
        let capacity = options.buffer_capacity;
        let tracked =
            tokio::task::spawn_blocking(move || TrackedFile::open(open_path, start, capacity))
                .await??;
        let shared: SharedFile = Arc::new(Mutex::new(tracked));

        let (errors_tx, errors_rx) = ErrorSlot::channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let task_handles = match options.strategy {
            Strategy::Poll => polling::spawn(
                &shared,
                &errors_tx,
                options.fast_interval,
                options.slow_interval,
                &shutdown_tx,
            ),
            Strategy::Notify => watcher::spawn(
                &shared,
                &path,
                &errors_tx,
                options.fast_interval,
                options.slow_interval,
                &shutdown_tx,
            )?,
        };
        tracing::debug!(path = %path.display(), strategy = %options.strategy, "following file");

        Ok(Self::new(
            shared,
            errors_rx,
            shutdown_tx,
            task_handles,
            path,
            options,
        ))
    }

    fn new(
        shared: SharedFile,
        errors: mpsc::Receiver<Error>,
        shutdown_tx: broadcast::Sender<()>,
        task_handles: Vec<JoinHandle<()>>,
        path: PathBuf,
        options: Options,
    ) -> Self {
        Self {
            shared,
            errors,
            shutdown_tx,
            _task_handles: task_handles,
            path,
            strategy: options.strategy,
            poll_interval: options.fast_interval,
            wait: None,
            closed: false,
        }
    }

    /// The absolute path being followed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stops following and releases the file.
    ///
    /// Buffered bytes that were not read yet are discarded; every later read
    /// reports end-of-stream. Background tasks notice on their next wake-up.
    /// Calling this more than once is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.wait = None;
        // No receivers left means every task already stopped.
        let _ = self.shutdown_tx.send(());

        let mut tracked = self.shared.lock().map_err(|_| Error::Poisoned)?;
        tracked.close();
        tracing::debug!(path = %self.path.display(), "closed follower");
        Ok(())
    }

    /// Waits until there is something to hand out.
    ///
    /// Ready with `Ok(true)` when bytes are buffered, `Ok(false)` once closed,
    /// or the pending background error. Otherwise re-checks every poll
    /// interval instead of spinning.
    fn poll_available(&mut self, cx: &mut Context<'_>) -> Poll<Result<bool>> {
        loop {
            if self.closed {
                return Poll::Ready(Ok(false));
            }
            if let Ok(error) = self.errors.try_recv() {
                self.wait = None;
                return Poll::Ready(Err(error));
            }

            let buffered = self.shared.lock().map_err(|_| Error::Poisoned)?.buffered();
            if buffered > 0 {
                self.wait = None;
                return Poll::Ready(Ok(true));
            }

            let interval = self.poll_interval;
            let wait = self
                .wait
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(interval)));
            ready!(wait.as_mut().poll(cx));
            wait.as_mut().reset(Instant::now() + interval);
        }
    }

    fn take_buffered(&self, dst: &mut [u8]) -> Result<usize> {
        let mut tracked = self.shared.lock().map_err(|_| Error::Poisoned)?;
        Ok(tracked.read_buffered(dst))
    }
}

impl AsyncRead for Follower {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        match ready!(this.poll_available(cx)) {
            Ok(true) => {
                let n = this.take_buffered(buf.initialize_unfilled())?;
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            // End-of-stream: nothing filled.
            Ok(false) => Poll::Ready(Ok(())),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}

impl Stream for Follower {
    type Item = Result<Vec<u8>>;

    /// Yields everything buffered at the time as one chunk; ends after close.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match ready!(this.poll_available(cx)) {
            Ok(true) => {
                let result = this.shared.lock().map_err(|_| Error::Poisoned).map(|mut tracked| {
                    let mut chunk = vec![0u8; tracked.buffered()];
                    let n = tracked.read_buffered(&mut chunk);
                    chunk.truncate(n);
                    chunk
                });
                Poll::Ready(Some(result))
            }
            Ok(false) => Poll::Ready(None),
            Err(e) => Poll::Ready(Some(Err(e))),
        }
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
