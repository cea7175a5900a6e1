//! Jake Hasher - BLAKE3 fingerprints for cache inputs
//!
//! Features:
//! - Content hashing with BLAKE3, files hashed in parallel with Rayon
//! - Directory inputs walked with `ignore` (respects .gitignore)
//! - Falls back to modification times above a configurable input count

use crate::globs;
use blake3::Hasher as Blake3Hasher;
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// How file inputs contribute to a fingerprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashStrategy {
    #[default]
    Content,
    Mtime,
}

/// Hex BLAKE3 digest identifying a set of inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..self.0.len().min(16)])
    }
}

/// Per-file digest
#[derive(Debug, Clone)]
pub struct FileHash {
    pub path: PathBuf,
    pub hash: String,
}

/// Main hasher struct
#[derive(Debug, Clone)]
pub struct Hasher {
    root: PathBuf,
    strategy: HashStrategy,
    max_content_files: usize,
}

impl Hasher {
    /// Create a new hasher for the given root directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            strategy: HashStrategy::Content,
            max_content_files: 4096,
        }
    }

    pub fn strategy(mut self, strategy: HashStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Above this many input files, modification times are used instead of contents
    pub fn max_content_files(mut self, limit: usize) -> Self {
        self.max_content_files = limit;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hash a single file using BLAKE3
    pub fn hash_file(&self, path: impl AsRef<Path>) -> std::io::Result<String> {
        let content = fs::read(self.root.join(path.as_ref()))?;
        Ok(blake3::hash(&content).to_hex().to_string())
    }

    /// Expand patterns into the concrete file list, walking directories
    pub fn resolve_inputs<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for path in globs::expand_all(&self.root, patterns) {
            let full = self.root.join(&path);
            if full.is_dir() {
                let mut walked: Vec<PathBuf> = WalkBuilder::new(&full)
                    .hidden(false)
                    .git_ignore(true)
                    .build()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                    .map(|e| {
                        e.path()
                            .strip_prefix(&self.root)
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|_| e.path().to_path_buf())
                    })
                    .collect();
                walked.sort();
                files.extend(walked);
            } else {
                files.push(path);
            }
        }
        let mut seen = HashSet::new();
        files.retain(|path| seen.insert(path.clone()));
        files
    }

    /// Digest every input (parallel with Rayon). Missing files hash to a fixed marker.
    pub fn hash_inputs(&self, files: &[PathBuf]) -> Vec<FileHash> {
        let use_mtime =
            self.strategy == HashStrategy::Mtime || files.len() > self.max_content_files;

        files
            .par_iter()
            .map(|path| {
                let full = self.root.join(path);
                let hash = if use_mtime {
                    mtime_digest(&full)
                } else {
                    match fs::read(&full) {
                        Ok(content) => blake3::hash(&content).to_hex().to_string(),
                        Err(_) => "missing".to_string(),
                    }
                };
                FileHash {
                    path: path.clone(),
                    hash,
                }
            })
            .collect()
    }

    /// Fingerprint of the resolved inputs plus optional command text
    pub fn fingerprint<S: AsRef<str>>(&self, patterns: &[S], command_text: Option<&str>) -> Fingerprint {
        let files = self.resolve_inputs(patterns);
        let mut hashes = self.hash_inputs(&files);

        // Sort for deterministic hash
        hashes.sort_by(|a, b| a.path.cmp(&b.path));

        let mut hasher = Blake3Hasher::new();
        for file in &hashes {
            hasher.update(file.path.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(file.hash.as_bytes());
            hasher.update(b"\n");
        }
        if let Some(text) = command_text {
            hasher.update(b"cmd\0");
            hasher.update(text.as_bytes());
        }

        Fingerprint(hasher.finalize().to_hex().to_string())
    }
}

fn mtime_digest(path: &Path) -> String {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| {
            let since = t.duration_since(UNIX_EPOCH).unwrap_or_default();
            format!("mtime:{}.{:09}", since.as_secs(), since.subsec_nanos())
        })
        .unwrap_or_else(|_| "missing".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let dir = project(&[("a.txt", "one"), ("b.txt", "two")]);
        let hasher = Hasher::new(dir.path());
        let first = hasher.fingerprint(&["*.txt"], None);
        let second = hasher.fingerprint(&["b.txt", "a.txt"], None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_overlapping_inputs_resolve_once() {
        let dir = project(&[("src/a.rs", "a"), ("src/b.rs", "b")]);
        let hasher = Hasher::new(dir.path());
        let files = hasher.resolve_inputs(&["src", "src/a.rs", "src/*.rs"]);
        assert_eq!(files, vec![PathBuf::from("src/a.rs"), PathBuf::from("src/b.rs")]);
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let dir = project(&[("a.txt", "one")]);
        let hasher = Hasher::new(dir.path());
        let before = hasher.fingerprint(&["a.txt"], None);
        fs::write(dir.path().join("a.txt"), "onf").unwrap();
        let after = hasher.fingerprint(&["a.txt"], None);
        assert_ne!(before, after);
    }

    #[test]
    fn test_command_text_is_part_of_fingerprint() {
        let dir = project(&[("a.txt", "one")]);
        let hasher = Hasher::new(dir.path());
        assert_ne!(
            hasher.fingerprint(&["a.txt"], Some("echo 1")),
            hasher.fingerprint(&["a.txt"], Some("echo 2"))
        );
    }

    #[test]
    fn test_missing_file_differs_from_present() {
        let dir = project(&[]);
        let hasher = Hasher::new(dir.path());
        let missing = hasher.fingerprint(&["later.txt"], None);
        fs::write(dir.path().join("later.txt"), "").unwrap();
        assert_ne!(missing, hasher.fingerprint(&["later.txt"], None));
    }

    #[test]
    fn test_directory_inputs_are_walked() {
        let dir = project(&[("src/a.rs", "a"), ("src/sub/b.rs", "b")]);
        let hasher = Hasher::new(dir.path());
        let files = hasher.resolve_inputs(&["src"]);
        assert_eq!(
            files,
            vec![PathBuf::from("src/a.rs"), PathBuf::from("src/sub/b.rs")]
        );
    }

    #[test]
    fn test_mtime_fallback_above_limit() {
        let dir = project(&[("a.txt", "one"), ("b.txt", "two")]);
        let hasher = Hasher::new(dir.path()).max_content_files(1);
        let files = hasher.resolve_inputs(&["*.txt"]);
        let hashes = hasher.hash_inputs(&files);
        assert!(hashes.iter().all(|h| h.hash.starts_with("mtime:")));

        let content = Hasher::new(dir.path()).hash_inputs(&files);
        assert!(content.iter().all(|h| !h.hash.starts_with("mtime:")));
        assert_eq!(content[0].hash, hasher.hash_file("a.txt").unwrap());
    }
}
