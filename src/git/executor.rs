//! The git collaborator.
//!
//! Every guarded command is eventually executed here from the host's real git,
//! exactly once per invocation. Read-only queries (branch names, SHAs, commit
//! counts) go through the same backend so tests can substitute a fake.

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Marks a git child process spawned by saferun so the shim never re-intercepts it.
pub const INTERCEPTED_ENV: &str = "SAFERUN_INTERCEPTED";

/// Propagated to the child so downstream hooks can see which change was approved.
pub const APPROVED_CHANGE_ENV: &str = "SAFERUN_APPROVED_CHANGE_ID";

/// Subcommands the classifier can flag as dangerous.
pub const GUARDED_SUBCOMMANDS: [&str; 6] = ["push", "branch", "reset", "clean", "rebase", "commit"];

/// Access to git for one repository.
pub trait GitBackend: Send + Sync {
    /// Run a read-only git query. Returns trimmed stdout on success,
    /// `None` if git failed (unknown ref, not a repository, ...).
    fn query(&self, args: &[&str]) -> Option<String>;

    /// Run the real command with inherited stdio and return its exit code.
    fn run(&self, subcommand: &str, args: &[String], env: &[(String, String)]) -> Result<i32>;
}

/// Backend that shells out to the git binary.
///
/// `global_args` are the options the user gave before the subcommand; they
/// precede every query and the real run so both see the same repository.
#[derive(Debug, Clone)]
pub struct SystemGit {
    repo_root: PathBuf,
    git_binary: PathBuf,
    global_args: Vec<String>,
}

impl SystemGit {
    pub fn new(repo_root: impl AsRef<Path>, git_binary: impl AsRef<Path>) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
            git_binary: git_binary.as_ref().to_path_buf(),
            global_args: Vec::new(),
        }
    }

    pub fn with_global_args(mut self, global_args: Vec<String>) -> Self {
        self.global_args = global_args;
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Find the repository top level from `cwd` as git would see it with
    /// `global_args`, or `None` outside a repository.
    pub fn discover_root(git_binary: &Path, cwd: &Path, global_args: &[String]) -> Option<PathBuf> {
        let output = Command::new(git_binary)
            .args(global_args)
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(cwd)
            .env(INTERCEPTED_ENV, "1")
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            None
        } else {
            Some(PathBuf::from(root))
        }
    }
}

impl GitBackend for SystemGit {
    fn query(&self, args: &[&str]) -> Option<String> {
        let output = Command::new(&self.git_binary)
            .args(&self.global_args)
            .args(args)
            .current_dir(&self.repo_root)
            .env(INTERCEPTED_ENV, "1")
            .stderr(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() {
            tracing::debug!("git {} failed with {}", args.join(" "), output.status);
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run(&self, subcommand: &str, args: &[String], env: &[(String, String)]) -> Result<i32> {
        let mut command = Command::new(&self.git_binary);
        // An empty alias keeps a user-level `alias.<subcommand>` from routing back to us.
        // Other subcommands keep their aliases.
        if GUARDED_SUBCOMMANDS.contains(&subcommand) {
            command.arg("-c").arg(format!("alias.{}=", subcommand));
        }
        let status = command
            .args(&self.global_args)
            .arg(subcommand)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(INTERCEPTED_ENV, "1")
            .current_dir(&self.repo_root)
            .status()
            .with_context(|| format!("Failed to execute git {}", subcommand))?;

        Ok(status.code().unwrap_or(1))
    }
}

/// Run git exactly as invoked, with no repository or guard involved.
pub fn passthrough(git_binary: &Path, args: &[String]) -> Result<i32> {
    let status = Command::new(git_binary)
        .args(args)
        .env(INTERCEPTED_ENV, "1")
        .status()
        .with_context(|| format!("Failed to execute {}", git_binary.display()))?;
    Ok(status.code().unwrap_or(1))
}

/// Locate the real git binary.
///
/// An explicit override wins. Otherwise the first `git` on `PATH` that is not
/// `self_exe` (the shim may itself be installed as `git`).
pub fn resolve_real_git(
    explicit: Option<&Path>,
    path_var: Option<&str>,
    self_exe: Option<&Path>,
) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let self_canonical = self_exe.and_then(|p| p.canonicalize().ok());

    if let Some(path_var) = path_var {
        for dir in env::split_paths(path_var) {
            let candidate = dir.join("git");
            if !candidate.is_file() {
                continue;
            }
            let canonical = candidate.canonicalize().ok();
            if canonical.is_some() && canonical == self_canonical {
                continue;
            }
            return candidate;
        }
    }

    PathBuf::from("/usr/bin/git")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A fake git that appends its argv to `log`, one invocation per line.
    #[cfg(unix)]
    fn recording_git(dir: &Path, log: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("git");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$*\" >> '{}'\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn test_global_args_come_before_the_subcommand() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("argv.log");
        let git = SystemGit::new(dir.path(), recording_git(dir.path(), &log))
            .with_global_args(vec!["-C".into(), "sub".into(), "--no-pager".into()]);

        let code = git
            .run("push", &["--force".into(), "origin".into(), "main".into()], &[])
            .unwrap();
        assert_eq!(code, 0);
        git.query(&["rev-parse", "HEAD"]);

        let lines = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = lines.lines().collect();
        assert_eq!(lines[0], "-c alias.push= -C sub --no-pager push --force origin main");
        assert_eq!(lines[1], "-C sub --no-pager rev-parse HEAD");
    }

    #[test]
    fn test_explicit_git_wins() {
        let p = resolve_real_git(Some(Path::new("/opt/git/bin/git")), Some("/usr/bin"), None);
        assert_eq!(p, PathBuf::from("/opt/git/bin/git"));
    }

    #[test]
    fn test_skips_self_on_path() {
        let shim_dir = TempDir::new().unwrap();
        let real_dir = TempDir::new().unwrap();
        let shim = shim_dir.path().join("git");
        let real = real_dir.path().join("git");
        std::fs::write(&shim, "shim").unwrap();
        std::fs::write(&real, "real").unwrap();

        let path_var = env::join_paths([shim_dir.path(), real_dir.path()])
            .unwrap()
            .to_string_lossy()
            .to_string();

        let found = resolve_real_git(None, Some(&path_var), Some(&shim));
        assert_eq!(found, real);
    }
}
