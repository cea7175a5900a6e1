//! Watch session - re-run the same targets whenever a relevant file changes
//!
//! The cache decides what is actually dirty; this loop only decides whether
//! a batch of changes is worth a `run` at all.

use crate::watcher::{FileChange, FileWatcher};
use anyhow::Result;
use jake_core::{globs, Engine, RunReport};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct WatchSession<'e, 'a> {
    engine: &'e Engine<'a>,
    targets: Vec<String>,
    patterns: Vec<String>,
    debounce: Duration,
}

impl<'e, 'a> WatchSession<'e, 'a> {
    /// Fails on the same structural errors `run` would
    pub fn new(engine: &'e Engine<'a>, targets: Vec<String>) -> Result<Self> {
        let patterns = engine.watch_patterns(&targets)?;
        debug!(?patterns, "watch patterns");
        Ok(Self {
            engine,
            targets,
            patterns,
            debounce: Duration::from_millis(250),
        })
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Without any input or `@watch` pattern, every change counts
    pub fn is_relevant(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let root = &self.engine.context().root;
        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative = relative.to_string_lossy().replace('\\', "/");

        self.patterns.iter().any(|pattern| {
            let dir = pattern.trim_end_matches('/');
            globs::matches(pattern, &relative) || relative.starts_with(&format!("{}/", dir))
        })
    }

    pub fn run_once(&self) -> Result<RunReport> {
        Ok(self.engine.run(&self.targets)?)
    }

    /// Run once, then again after every relevant batch of changes, until
    /// `stop` is set.
    pub fn watch<F>(&self, watcher: &FileWatcher, stop: &AtomicBool, mut on_run: F) -> Result<()>
    where
        F: FnMut(&RunReport),
    {
        on_run(&self.run_once()?);

        while !stop.load(Ordering::SeqCst) {
            let changes = watcher.wait(Duration::from_millis(200));
            let relevant = self.relevant(&changes);
            if relevant == 0 {
                continue;
            }

            // Let editors finish writing
            std::thread::sleep(self.debounce);
            let burst = watcher.poll();
            info!(changes = relevant + self.relevant(&burst), "change detected, re-running");

            match self.engine.run(&self.targets) {
                Ok(report) => on_run(&report),
                Err(e) => warn!(error = %e, "run failed"),
            }

            // Whatever the run itself wrote
            let own = watcher.poll();
            debug!(discarded = own.len(), "dropping events caused by the run");
        }
        Ok(())
    }

    fn relevant(&self, changes: &[FileChange]) -> usize {
        changes.iter().filter(|c| self.is_relevant(&c.path)).count()
    }
}
