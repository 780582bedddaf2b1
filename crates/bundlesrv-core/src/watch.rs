//! Dependency watcher for development rebuilds.
//!
//! Polls the files that went into the last successful build. Until a build
//! has succeeded there is no module list, so the whole base directory is
//! watched instead.

use notify::{
    event::{MetadataKind, ModifyKind},
    Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher as NotifyWatcher,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Poll interval for dependency changes.
pub const POLL_INTERVAL_MS: u64 = 500;

/// Event coalescing window.
pub const COALESCE_WINDOW_MS: u64 = 50;

/// Watcher error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Invalid watch root: {0}")]
    InvalidRoot(String),
    #[error("Watcher failed: {0}")]
    WatcherFailed(String),
}

/// What is currently being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// Whole base directory, recursively.
    Root(PathBuf),
    /// Exactly these module files.
    Modules(BTreeSet<PathBuf>),
}

/// Watches a bundle's dependency graph and reports changed paths.
pub struct DependencyWatcher {
    watcher: PollWatcher,
    target: WatchTarget,
}

impl std::fmt::Debug for DependencyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyWatcher")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl DependencyWatcher {
    /// Start watching `basedir`; changed paths are sent on `tx`.
    ///
    /// # Errors
    /// Fails if `basedir` is not a directory or the watcher cannot start.
    pub fn start(basedir: &Path, tx: mpsc::UnboundedSender<Vec<PathBuf>>) -> Result<Self, WatchError> {
        if !basedir.is_dir() {
            return Err(WatchError::InvalidRoot(basedir.display().to_string()));
        }

        let mut watcher = PollWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if should_process_event(&event) && tx.send(event.paths).is_err() {
                        debug!("Dependency watcher receiver dropped");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Watch error");
                }
            },
            Config::default().with_poll_interval(Duration::from_millis(POLL_INTERVAL_MS)),
        )
        .map_err(|e| WatchError::WatcherFailed(e.to_string()))?;

        watcher
            .watch(basedir, RecursiveMode::Recursive)
            .map_err(|e| WatchError::WatcherFailed(e.to_string()))?;

        Ok(Self {
            watcher,
            target: WatchTarget::Root(basedir.to_path_buf()),
        })
    }

    #[must_use]
    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Narrow the watch to exactly `modules`. An empty list keeps the
    /// current target.
    pub fn retarget<I>(&mut self, modules: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let wanted: BTreeSet<PathBuf> = modules.into_iter().filter(|p| p.is_file()).collect();
        if wanted.is_empty() {
            return;
        }

        let previous = std::mem::replace(&mut self.target, WatchTarget::Modules(BTreeSet::new()));
        match previous {
            WatchTarget::Root(root) => {
                if let Err(e) = self.watcher.unwatch(&root) {
                    warn!(root = %root.display(), error = %e, "Failed to unwatch directory");
                }
                for path in &wanted {
                    watch_file(&mut self.watcher, path);
                }
            }
            WatchTarget::Modules(current) => {
                for stale in current.difference(&wanted) {
                    let _ = self.watcher.unwatch(stale);
                }
                for added in wanted.difference(&current) {
                    watch_file(&mut self.watcher, added);
                }
            }
        }

        debug!(count = wanted.len(), "Watching bundle dependencies");
        self.target = WatchTarget::Modules(wanted);
    }
}

fn watch_file(watcher: &mut PollWatcher, path: &Path) {
    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
        warn!(path = %path.display(), error = %e, "Failed to watch module");
    }
}

/// Wait for the next batch of changes, coalescing events that arrive within
/// [`COALESCE_WINDOW_MS`] of each other. Returns `None` once the watcher is
/// gone.
pub async fn next_change(rx: &mut mpsc::UnboundedReceiver<Vec<PathBuf>>) -> Option<BTreeSet<PathBuf>> {
    let mut changed: BTreeSet<PathBuf> = rx.recv().await?.into_iter().collect();

    loop {
        match tokio::time::timeout(Duration::from_millis(COALESCE_WINDOW_MS), rx.recv()).await {
            Ok(Some(paths)) => changed.extend(paths),
            Ok(None) | Err(_) => break,
        }
    }

    Some(changed)
}

/// Check if we should process this event.
fn should_process_event(event: &Event) -> bool {
    match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any) => true,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime | MetadataKind::Any)) => true,
        _ => false,
    }
}
