//! File Watcher - Real-time file system monitoring
//!
//! Uses notify crate (FSEvents on macOS, inotify on Linux)
//! Feeds "these paths changed" batches to the watch session

use anyhow::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

/// Recursive watcher over the project root
pub struct FileWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    receiver: Option<Receiver<notify::Result<Event>>>,
    ignore_dirs: Vec<String>,
}

impl FileWatcher {
    /// Create new file watcher; `.git`, `.jake` and `target` are ignored
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            watcher: None,
            receiver: None,
            ignore_dirs: vec![".git".to_string(), ".jake".to_string(), "target".to_string()],
        }
    }

    /// Also ignore every path with a component named `name`
    pub fn ignore(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.ignore_dirs.contains(&name) {
            self.ignore_dirs.push(name);
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if path should be ignored
    fn should_ignore(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.components().any(|component| match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                self.ignore_dirs.iter().any(|ignored| *ignored == name)
            }
            _ => false,
        })
    }

    /// Start watching files
    pub fn start(&mut self) -> Result<()> {
        let (tx, rx) = channel();

        let config = Config::default().with_poll_interval(Duration::from_millis(100));

        let mut watcher = RecommendedWatcher::new(tx, config)?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        self.watcher = Some(watcher);
        self.receiver = Some(rx);

        info!("File watcher started for: {:?}", self.root);
        Ok(())
    }

    /// Stop watching
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("File watcher stopped");
        }
        self.receiver = None;
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Poll for changes (non-blocking)
    pub fn poll(&self) -> Vec<FileChange> {
        let mut changes = Vec::new();
        if let Some(rx) = &self.receiver {
            // Drain all pending events
            while let Ok(result) = rx.try_recv() {
                self.collect(result, &mut changes);
            }
        }
        changes
    }

    /// Block up to `timeout` for the first change, then drain the rest
    pub fn wait(&self, timeout: Duration) -> Vec<FileChange> {
        let Some(rx) = &self.receiver else {
            return Vec::new();
        };
        let mut changes = Vec::new();
        match rx.recv_timeout(timeout) {
            Ok(result) => self.collect(result, &mut changes),
            Err(RecvTimeoutError::Timeout) => return changes,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("watcher channel closed");
                return changes;
            }
        }
        changes.extend(self.poll());
        changes
    }

    fn collect(&self, result: notify::Result<Event>, changes: &mut Vec<FileChange>) {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!("Watch error: {:?}", e);
                return;
            }
        };

        let kind = match event.kind {
            notify::EventKind::Create(_) => ChangeKind::Create,
            notify::EventKind::Modify(_) => ChangeKind::Modify,
            notify::EventKind::Remove(_) => ChangeKind::Delete,
            _ => return,
        };

        for path in event.paths {
            if self.should_ignore(&path) {
                continue;
            }
            debug!("File change: {:?} ({:?})", path, kind);
            changes.push(FileChange { path, kind });
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_should_ignore_whole_components_only() {
        let watcher = FileWatcher::new("/project").ignore("node_modules");
        assert!(watcher.should_ignore(Path::new("/project/.git/index")));
        assert!(watcher.should_ignore(Path::new("/project/.jake/cache.json")));
        assert!(watcher.should_ignore(Path::new("/project/web/node_modules/x.js")));
        assert!(!watcher.should_ignore(Path::new("/project/targets.txt")));
        assert!(!watcher.should_ignore(Path::new("/project/src/main.c")));
    }

    #[test]
    fn test_reports_file_creation() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut watcher = FileWatcher::new(&root);
        watcher.start().unwrap();
        assert!(watcher.is_running());

        std::fs::write(root.join("new.txt"), "x").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline && seen.is_empty() {
            seen = watcher
                .wait(Duration::from_millis(200))
                .into_iter()
                .filter(|c| c.path.ends_with("new.txt"))
                .collect();
        }
        assert!(!seen.is_empty(), "no event for new.txt");

        watcher.stop();
        assert!(!watcher.is_running());
        assert!(watcher.poll().is_empty());
    }
}
