//! Pattern matching utilities for branch and command rules.
//!
//! Branch patterns are compiled once per invocation via `CompiledMatcher`.
//! Command patterns use a simpler `*`-only wildcard so rules stay readable.

use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};

/// A pre-compiled set of glob patterns for fast matching.
/// Created once when a policy is loaded, reused for every target check.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    patterns: Vec<(String, GlobMatcher)>,
}

impl CompiledMatcher {
    /// Compile a list of glob pattern strings into matchers.
    /// Returns an error if any pattern is malformed.
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let compiled = patterns
            .iter()
            .map(|p| {
                let glob = Glob::new(p)?;
                Ok((p.clone(), glob.compile_matcher()))
            })
            .collect::<Result<Vec<_>, globset::Error>>()?;
        Ok(Self { patterns: compiled })
    }

    /// Returns true if the given name matches any of the compiled patterns.
    pub fn matches(&self, name: &str) -> bool {
        let name = normalize_ref(name);
        let path = Path::new(&name);
        self.patterns
            .iter()
            .any(|(_, matcher)| matcher.is_match(path))
    }

    /// Returns the first pattern that matches, for reason strings.
    pub fn first_match(&self, name: &str) -> Option<&str> {
        let name = normalize_ref(name);
        let path = Path::new(&name);
        self.patterns
            .iter()
            .find(|(_, matcher)| matcher.is_match(path))
            .map(|(p, _)| p.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Get the raw pattern strings.
    pub fn pattern_strings(&self) -> Vec<&str> {
        self.patterns.iter().map(|(s, _)| s.as_str()).collect()
    }
}

/// Check if a command line matches any of the given command patterns.
/// `*` matches any sequence of characters; nothing else is special.
pub fn command_matches(command: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| glob_match_string(command.trim(), pattern.trim()))
}

fn glob_match_string(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return text == pattern;
    }

    let mut pos = 0;

    if !parts[0].is_empty() {
        if !text.starts_with(parts[0]) {
            return false;
        }
        pos = parts[0].len();
    }

    let last = parts[parts.len() - 1];
    if !last.is_empty() && (!text.ends_with(last) || text.len() - last.len() < pos) {
        return false;
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }

    true
}

/// Strip the ref namespace so `refs/heads/main` and `main` match the same patterns.
pub fn normalize_ref(name: &str) -> String {
    let name = name.trim();
    let name = name
        .strip_prefix("refs/heads/")
        .or_else(|| name.strip_prefix("refs/remotes/"))
        .unwrap_or(name);
    name.to_string()
}

/// Walk up from `start` looking for `file_name`.
pub fn find_upwards(start: &Path, file_name: &str) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(file_name);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiled_matcher_branches() {
        let matcher = CompiledMatcher::new(&[
            "main".to_string(),
            "release/*".to_string(),
            "hotfix-*".to_string(),
        ])
        .unwrap();

        assert!(matcher.matches("main"));
        assert!(matcher.matches("refs/heads/main"));
        assert!(matcher.matches("release/1.2"));
        assert!(matcher.matches("hotfix-login"));
        assert!(!matcher.matches("feature/main-menu"));
        assert!(!matcher.matches("mainline"));
        assert_eq!(matcher.first_match("release/2.0"), Some("release/*"));
    }

    #[test]
    fn test_command_matches() {
        let patterns = vec!["git branch -D tmp/*".to_string(), "* --dry-run".to_string()];

        assert!(command_matches("git branch -D tmp/scratch", &patterns));
        assert!(command_matches("git clean -fd --dry-run", &patterns));
        assert!(!command_matches("git branch -D main", &patterns));
    }

    #[test]
    fn test_glob_match_string() {
        assert!(glob_match_string("git reset --hard HEAD~1", "git reset --hard *"));
        assert!(glob_match_string("hello", "hello"));
        assert!(!glob_match_string("hello", "world"));
        // prefix and suffix must not overlap
        assert!(!glob_match_string("ab", "ab*b"));
    }

    #[test]
    fn test_find_upwards() {
        let tmp = tempfile::TempDir::new().unwrap();
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(tmp.path().join("a/.saferun.yaml"), "mode: enforce").unwrap();

        let found = find_upwards(&nested, ".saferun.yaml").unwrap();
        assert_eq!(found, tmp.path().join("a/.saferun.yaml"));
    }
}
