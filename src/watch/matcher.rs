// src/watch/matcher.rs

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::errors::Result;
use crate::job::Trigger;

/// Compiled `on` block of one job.
///
/// A path matches when it lies under one of the watch roots and its path
/// relative to that root (forward slashes) passes the regex filter:
/// any `!`-exclusion match rejects it; otherwise it needs one include match,
/// or no include patterns at all.
#[derive(Clone)]
pub struct JobMatcher {
    roots: Vec<PathBuf>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl fmt::Debug for JobMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobMatcher")
            .field("roots", &self.roots)
            .field("include", &self.include.len())
            .field("exclude", &self.exclude.len())
            .finish()
    }
}

impl JobMatcher {
    /// Compile `trigger`. Relative roots are resolved against `cwd`; an empty
    /// path list watches `cwd` itself.
    pub fn new(trigger: &Trigger, cwd: &Path) -> Result<Self> {
        let roots = if trigger.paths.is_empty() {
            vec![canonical(cwd.to_path_buf())]
        } else {
            trigger
                .paths
                .iter()
                .map(|p| canonical(cwd.join(p)))
                .collect()
        };

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for pattern in &trigger.regex {
            match pattern.strip_prefix('!') {
                Some(rx) => exclude.push(Regex::new(rx)?),
                None => include.push(Regex::new(pattern)?),
            }
        }

        Ok(Self {
            roots,
            include,
            exclude,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn matches(&self, path: &Path) -> bool {
        let path = canonical(path.to_path_buf());
        self.roots
            .iter()
            .filter_map(|root| path.strip_prefix(root).ok())
            .any(|rel| self.matches_relative(&rel.to_string_lossy().replace('\\', "/")))
    }

    /// Apply only the regex filter to an already-relative path.
    pub fn matches_relative(&self, rel: &str) -> bool {
        if self.exclude.iter().any(|rx| rx.is_match(rel)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|rx| rx.is_match(rel))
    }
}

/// Best-effort canonicalisation. Deleted files cannot be canonicalised, so
/// fall back to canonicalising the parent and re-attaching the file name.
fn canonical(path: PathBuf) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => path,
        },
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> JobMatcher {
        let trigger = Trigger {
            paths: Vec::new(),
            regex: patterns.iter().map(|s| s.to_string()).collect(),
        };
        JobMatcher::new(&trigger, Path::new(".")).unwrap()
    }

    #[test]
    fn regex_filter_cases() {
        let cases: &[(&str, &[&str], bool)] = &[
            ("main.rs", &[r"\.rs$"], true),
            ("image.png", &[r"\.rs$"], false),
            ("main_test.rs", &[r"\.rs$", r"!_test\.rs$"], false),
            ("main.rs", &[r"\.rs$", r"!_test\.rs$"], true),
            ("anything", &[], true),
            ("Cargo.toml", &[r"\.rs$", r"^Cargo\.toml$"], true),
            ("vendor/foo.rs", &[r"\.rs$", "!vendor/"], false),
            ("notes.md", &["!target/"], true),
        ];

        for (path, patterns, expected) in cases {
            assert_eq!(
                matcher(patterns).matches_relative(path),
                *expected,
                "path {path:?} with {patterns:?}"
            );
        }
    }

    #[test]
    fn path_must_be_under_a_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("build.rs"), "").unwrap();

        let trigger = Trigger {
            paths: vec![PathBuf::from("src")],
            regex: vec![r"\.rs$".to_string()],
        };
        let m = JobMatcher::new(&trigger, dir.path()).unwrap();

        assert!(m.matches(&dir.path().join("src/lib.rs")));
        assert!(!m.matches(&dir.path().join("build.rs")));
        // Deleted files still resolve through their parent directory.
        assert!(m.matches(&dir.path().join("src/removed.rs")));
    }

    #[test]
    fn sibling_with_common_prefix_is_not_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::create_dir(dir.path().join("src2")).unwrap();

        let trigger = Trigger {
            paths: vec![PathBuf::from("src")],
            regex: Vec::new(),
        };
        let m = JobMatcher::new(&trigger, dir.path()).unwrap();
        assert!(!m.matches(&dir.path().join("src2/a.rs")));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let trigger = Trigger {
            paths: Vec::new(),
            regex: vec!["!(".to_string()],
        };
        assert!(JobMatcher::new(&trigger, Path::new(".")).is_err());
    }
}
