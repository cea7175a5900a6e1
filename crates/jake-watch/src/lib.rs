//! Jake Watch - re-run recipes when their inputs change
//!
//! Features:
//! - File watching with notify (FSEvents on macOS, inotify on Linux)
//! - Ignores `.git`, `.jake` and `target`
//! - Debounced re-runs, only for paths some recipe in the graph cares about

pub mod session;
pub mod watcher;

pub use session::WatchSession;
pub use watcher::{ChangeKind, FileChange, FileWatcher};
