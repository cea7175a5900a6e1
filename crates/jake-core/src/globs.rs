//! Glob matcher - `*`, `**`, `?` and `[a-z]` against the filesystem

use glob::{MatchOptions, Pattern};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Does `s` contain any glob metacharacter?
pub fn is_pattern(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Expand one pattern relative to `root`.
///
/// Matches come back sorted and relative to `root` when the pattern was
/// relative. A literal path is returned as-is whether or not it exists, so
/// callers can tell a missing input from an empty glob.
pub fn expand(root: &Path, pattern: &str) -> Vec<PathBuf> {
    if !is_pattern(pattern) {
        return vec![PathBuf::from(pattern)];
    }

    let relative = !Path::new(pattern).is_absolute();
    // Only the pattern part is glob syntax; the root is taken literally
    let full = if relative {
        let root = Pattern::escape(&root.to_string_lossy());
        format!("{}/{}", root.trim_end_matches('/'), pattern)
    } else {
        pattern.to_string()
    };

    let entries = match glob::glob_with(&full, OPTIONS) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(pattern, error = %e, "invalid glob pattern");
            return Vec::new();
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .map(|path| {
            if relative {
                path.strip_prefix(root).map(Path::to_path_buf).unwrap_or(path)
            } else {
                path
            }
        })
        .collect();
    matches.sort();
    matches
}

/// Expand several patterns, keeping first-seen order across patterns and dropping duplicates
pub fn expand_all<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for pattern in patterns {
        for path in expand(root, pattern.as_ref()) {
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    out
}

/// Does `pattern` match `path`? Literal patterns compare after normalising `./`.
pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern = normalize(pattern);
    let path = normalize(path);
    if !is_pattern(pattern) {
        return pattern == path;
    }
    Pattern::new(pattern)
        .map(|p| p.matches_with(path, OPTIONS))
        .unwrap_or(false)
}

fn normalize(s: &str) -> &str {
    s.strip_prefix("./").unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in [
            "src/a.c",
            "src/b.c",
            "src/b.h",
            "src/nested/deep/c.c",
            "docs/x1.md",
            "docs/y2.md",
        ] {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, file).unwrap();
        }
        dir
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let dir = tree();
        let found = expand(dir.path(), "src/*.c");
        assert_eq!(found, vec![PathBuf::from("src/a.c"), PathBuf::from("src/b.c")]);
    }

    #[test]
    fn test_root_with_metacharacters_is_literal() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("proj[1]*?");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.c"), "a").unwrap();
        fs::write(root.join("src/b.h"), "b").unwrap();

        assert_eq!(expand(&root, "src/*.c"), vec![PathBuf::from("src/a.c")]);
    }

    #[test]
    fn test_double_star_recurses() {
        let dir = tree();
        let found = expand(dir.path(), "src/**/*.c");
        assert_eq!(
            found,
            vec![
                PathBuf::from("src/a.c"),
                PathBuf::from("src/b.c"),
                PathBuf::from("src/nested/deep/c.c"),
            ]
        );
    }

    #[test]
    fn test_question_mark_and_class() {
        let dir = tree();
        assert_eq!(
            expand(dir.path(), "src/?.h"),
            vec![PathBuf::from("src/b.h")]
        );
        assert_eq!(
            expand(dir.path(), "docs/[a-x]?.md"),
            vec![PathBuf::from("docs/x1.md")]
        );
    }

    #[test]
    fn test_expand_all_dedups_in_order() {
        let dir = tree();
        let found = expand_all(dir.path(), &["src/b.*", "src/*.c"]);
        assert_eq!(
            found,
            vec![
                PathBuf::from("src/b.c"),
                PathBuf::from("src/b.h"),
                PathBuf::from("src/a.c"),
            ]
        );
    }

    #[test]
    fn test_literal_kept_even_if_missing() {
        let dir = tree();
        assert_eq!(
            expand(dir.path(), "missing.txt"),
            vec![PathBuf::from("missing.txt")]
        );
        assert!(expand(dir.path(), "nothing/*.rs").is_empty());
    }

    #[test]
    fn test_matches() {
        assert!(matches("build/*.o", "build/main.o"));
        assert!(!matches("build/*.o", "build/sub/main.o"));
        assert!(matches("build/**/*.o", "build/sub/main.o"));
        assert!(matches("./out.txt", "out.txt"));
        assert!(!matches("out.txt", "out.txt.bak"));
    }
}
