//! Notification-driven change detection using the notify crate.

use crate::error::{Error, ErrorSlot, Result};
use crate::file::{FileId, SharedFile, TrackedFile, path_identity, with_file};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// What a subscription ended up covering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchScope {
    /// The containing directory; creates and renames of the path are visible.
    Directory,
    /// Only the file's current inode; renames of the path are not visible.
    File,
}

/// What to do with the followed file in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileAction {
    /// A new file appeared under the path.
    Reopen,
    /// The file was written; check for truncation, then fill.
    Fill,
    Ignore,
}

/// A watcher on the followed file or its directory.
pub(crate) struct FileWatcher {
    watcher: Arc<Mutex<RecommendedWatcher>>,
    receiver: mpsc::UnboundedReceiver<notify::Result<Event>>,
    file_path: PathBuf,
}

impl FileWatcher {
    /// Creates a new watcher for the specified path without subscribing yet.
    pub(crate) fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();

        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;

        Ok(Self {
            watcher: Arc::new(Mutex::new(watcher)),
            receiver: rx,
            file_path,
        })
    }

    /// Subscribes to the parent directory, or to the file itself when the
    /// directory cannot be watched. Fails only if neither works.
    pub(crate) fn start_watching(&mut self) -> Result<WatchScope> {
        if let Some(dir) = self.file_path.parent() {
            let mut watcher = self.watcher.lock().map_err(|_| Error::Poisoned)?;
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => return Ok(WatchScope::Directory),
                Err(e) => {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %e,
                        "cannot watch directory, watching the file instead"
                    );
                }
            }
        }

        self.watch_file()
    }

    /// Subscribes to the file's current inode only.
    pub(crate) fn watch_file(&mut self) -> Result<WatchScope> {
        let mut watcher = self.watcher.lock().map_err(|_| Error::Poisoned)?;
        watcher.watch(&self.file_path, RecursiveMode::NonRecursive)?;
        Ok(WatchScope::File)
    }

    /// Returns the next file system event.
    pub(crate) async fn next_event(&mut self) -> Option<notify::Result<Event>> {
        self.receiver.recv().await
    }

    /// Handle for re-subscribing from another task.
    pub(crate) fn rewatcher(&self) -> Rewatcher {
        Rewatcher {
            watcher: Arc::clone(&self.watcher),
            file_path: self.file_path.clone(),
        }
    }

    #[cfg(test)]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// Moves a file-level subscription to whatever file now sits at the path.
#[derive(Clone)]
pub(crate) struct Rewatcher {
    watcher: Arc<Mutex<RecommendedWatcher>>,
    file_path: PathBuf,
}

impl Rewatcher {
    pub(crate) fn rewatch(&self) -> Result<()> {
        let mut watcher = self.watcher.lock().map_err(|_| Error::Poisoned)?;
        // The old inode may already be gone, taking its watch with it.
        let _ = watcher.unwatch(&self.file_path);
        watcher.watch(&self.file_path, RecursiveMode::NonRecursive)?;
        Ok(())
    }
}

/// Check if a notify event touches exactly the followed path.
pub(crate) fn is_event_relevant_to_file(event: &Event, target: &Path) -> bool {
    event.paths.iter().any(|path| path == target)
}

/// Maps an event on the followed path to an action.
///
/// Event kinds with no defined meaning are errors rather than being skipped.
pub(crate) fn classify_event(event: &Event, target: &Path) -> Result<FileAction> {
    match event.kind {
        EventKind::Create(_) => Ok(FileAction::Reopen),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Ok(FileAction::Reopen),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths = [from, to]; only a rename onto our path brings a new file.
            if event.paths.last().is_some_and(|to| to == target) {
                Ok(FileAction::Reopen)
            } else {
                Ok(FileAction::Ignore)
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => Ok(FileAction::Ignore),
        EventKind::Modify(ModifyKind::Metadata(_)) => Ok(FileAction::Ignore),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => {
            Ok(FileAction::Fill)
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Ok(FileAction::Fill),
        EventKind::Access(_) => Ok(FileAction::Ignore),
        EventKind::Remove(_) => Ok(FileAction::Ignore),
        EventKind::Any | EventKind::Other => Err(Error::UnrecognizedEvent {
            kind: format!("{:?}", event.kind),
        }),
    }
}

/// Applies `action` to the tracked file. Returns whether bytes were left on
/// disk because the ring buffer filled up.
fn apply(file: &mut TrackedFile, action: FileAction) -> Result<bool> {
    match action {
        FileAction::Reopen => {
            file.reopen()?;
            file.fill()?;
        }
        FileAction::Fill => {
            file.reopen_if_truncated()?;
            file.fill()?;
        }
        FileAction::Ignore => {}
    }
    Ok(file.is_backlogged())
}

/// Subscribes to changes of `shared`'s path and spawns the loops that act on
/// them. Subscription failures are returned before anything is spawned.
pub(crate) fn spawn(
    shared: &SharedFile,
    path: &Path,
    errors: &ErrorSlot,
    fast: Duration,
    slow: Duration,
    shutdown: &broadcast::Sender<()>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut watcher = FileWatcher::new(path)?;
    let scope = watcher.start_watching()?;
    tracing::debug!(path = %path.display(), ?scope, "watching for changes");

    let mut handles = Vec::with_capacity(2);
    if scope == WatchScope::File {
        let baseline = shared.lock().map_err(|_| Error::Poisoned)?.identity();
        handles.push(tokio::spawn(rewatch_loop(
            watcher.rewatcher(),
            shared.clone(),
            errors.clone(),
            baseline,
            slow,
            shutdown.subscribe(),
        )));
    }
    handles.push(tokio::spawn(event_loop(
        watcher,
        shared.clone(),
        errors.clone(),
        fast,
        shutdown.subscribe(),
    )));
    Ok(handles)
}

/// Dispatches events for the followed path until shutdown. Dropping the
/// watcher on exit ends the subscription.
///
/// Starts with one fill so content present before the subscription is not
/// held back. No event announces that the reader made room in a full buffer,
/// so while bytes are left behind the loop also refills every `fast` interval.
pub(crate) async fn event_loop(
    mut watcher: FileWatcher,
    shared: SharedFile,
    errors: ErrorSlot,
    fast: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let target = watcher.file_path.clone();
    let mut ticker = time::interval(fast);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut backlogged = false;

    // Bytes already on disk when the subscription started produce no event.
    match with_file(&shared, |file| apply(file, FileAction::Fill)).await {
        Ok(more) => backlogged = more,
        Err(e) => errors.report(e),
    }

    loop {
        let action = tokio::select! {
            _ = shutdown.recv() => break,

            _ = ticker.tick(), if backlogged => FileAction::Fill,

            event = watcher.next_event() => {
                match event {
                    Some(Ok(event)) => {
                        if !is_event_relevant_to_file(&event, &target) {
                            continue;
                        }
                        match classify_event(&event, &target) {
                            Ok(FileAction::Ignore) => continue,
                            Ok(action) => {
                                tracing::trace!(kind = ?event.kind, ?action, "file event");
                                action
                            }
                            Err(e) => {
                                errors.report(e);
                                continue;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        errors.report(Error::Watcher(e));
                        continue;
                    }
                    None => break,
                }
            }
        };

        match with_file(&shared, move |file| apply(file, action)).await {
            Ok(more) => backlogged = more,
            Err(e) => errors.report(e),
        }
    }
}

/// With only the file watched, a rename of the path goes unseen. Polls the
/// path's identity and moves the watch onto the replacement.
pub(crate) async fn rewatch_loop(
    rewatcher: Rewatcher,
    shared: SharedFile,
    errors: ErrorSlot,
    mut last_seen: Option<FileId>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        let path = rewatcher.file_path.clone();
        let current = match tokio::task::spawn_blocking(move || path_identity(&path)).await {
            Ok(Ok(Some(current))) => current,
            // Missing for now.
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => {
                errors.report(e.into());
                continue;
            }
            Err(e) => {
                errors.report(e.into());
                continue;
            }
        };
        if Some(current) == last_seen {
            continue;
        }

        tracing::debug!(path = %rewatcher.file_path.display(), "file replaced, moving watch");
        if let Err(e) = rewatcher.rewatch() {
            errors.report(e);
        }
        if let Err(e) = with_file(&shared, |file| apply(file, FileAction::Reopen)).await {
            errors.report(e);
        }
        last_seen = Some(current);
    }
}
