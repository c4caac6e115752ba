//! Context gatherer: the minimal repository facts one decision needs.
//!
//! Built once per invocation and read-only afterwards. Anything git can't
//! answer (unknown ref, detached HEAD, no remote) degrades to a neutral value
//! instead of failing the pipeline.

use crate::git::classifier::{OperationDescriptor, OperationKind};
use crate::git::executor::GitBackend;
use crate::utils::paths::CompiledMatcher;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Commit distance of one target relative to its reference point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitDistance {
    /// Commits only the target has (unmerged commits for a branch delete)
    pub ahead: u32,
    /// Commits only the reference has (commits discarded by a hard reset)
    pub behind: u32,
}

/// Per-invocation repository snapshot.
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    pub repo_slug: String,
    pub default_branch: String,
    /// `None` on a detached HEAD
    pub current_branch: Option<String>,
    pub protected_branch_patterns: Vec<String>,
    /// Keyed by the target as written on the command line
    pub distances: BTreeMap<String, CommitDistance>,
    pub resolved_shas: BTreeMap<String, String>,
    protected: CompiledMatcher,
}

impl RepositoryContext {
    pub fn new(
        repo_slug: impl Into<String>,
        default_branch: impl Into<String>,
        current_branch: Option<String>,
        protected_branch_patterns: Vec<String>,
    ) -> Result<Self> {
        let protected = CompiledMatcher::new(&protected_branch_patterns)
            .context("Invalid protected branch pattern")?;
        Ok(Self {
            repo_slug: repo_slug.into(),
            default_branch: default_branch.into(),
            current_branch,
            protected_branch_patterns,
            distances: BTreeMap::new(),
            resolved_shas: BTreeMap::new(),
            protected,
        })
    }

    pub fn with_distance(mut self, target: impl Into<String>, ahead: u32, behind: u32) -> Self {
        self.distances
            .insert(target.into(), CommitDistance { ahead, behind });
        self
    }

    /// Whether a branch matches any protected pattern.
    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected.matches(branch)
    }

    pub fn protected_pattern(&self, branch: &str) -> Option<&str> {
        self.protected.first_match(branch)
    }

    /// Distance for a target; unresolvable targets read as zero.
    pub fn distance(&self, target: &str) -> CommitDistance {
        self.distances.get(target).copied().unwrap_or_default()
    }

    pub fn ahead_count(&self, target: &str) -> u32 {
        self.distance(target).ahead
    }

    pub fn behind_count(&self, target: &str) -> u32 {
        self.distance(target).behind
    }

    /// Current branch name, or `HEAD` when detached.
    pub fn current_branch_name(&self) -> &str {
        self.current_branch.as_deref().unwrap_or("HEAD")
    }
}

/// Resolves a `RepositoryContext` through the git collaborator.
pub struct ContextGatherer<'a> {
    git: &'a dyn GitBackend,
    protected_patterns: Vec<String>,
    configured_default: Option<String>,
}

impl<'a> ContextGatherer<'a> {
    pub fn new(
        git: &'a dyn GitBackend,
        protected_patterns: Vec<String>,
        configured_default: Option<String>,
    ) -> Self {
        Self {
            git,
            protected_patterns,
            configured_default,
        }
    }

    pub fn gather(&self, descriptor: &OperationDescriptor) -> Result<RepositoryContext> {
        let current_branch = self
            .git
            .query(&["rev-parse", "--abbrev-ref", "HEAD"])
            .filter(|b| !b.is_empty() && b != "HEAD");
        let default_branch = self.default_branch();
        let repo_slug = self.repo_slug();

        let mut ctx = RepositoryContext::new(
            repo_slug,
            default_branch.clone(),
            current_branch,
            self.protected_patterns.clone(),
        )?;

        for name in ["HEAD", default_branch.as_str()] {
            if let Some(sha) = self.resolve_sha(name) {
                ctx.resolved_shas.insert(name.to_string(), sha);
            }
        }

        match descriptor.kind {
            OperationKind::BranchDelete => {
                for target in &descriptor.targets {
                    let distance = self.distance_between(&default_branch, target, &mut ctx);
                    ctx.distances.insert(target.clone(), distance);
                }
            }
            OperationKind::ResetHard => {
                let target = descriptor.reset_target();
                let distance = self.distance_between(target, "HEAD", &mut ctx);
                // From the reset's point of view: how far the target lags HEAD.
                ctx.distances.insert(
                    target.to_string(),
                    CommitDistance {
                        ahead: distance.behind,
                        behind: distance.ahead,
                    },
                );
            }
            _ => {}
        }

        tracing::debug!(
            repo = %ctx.repo_slug,
            branch = ctx.current_branch_name(),
            default = %ctx.default_branch,
            "gathered repository context"
        );

        Ok(ctx)
    }

    /// Commits in `target` not in `base` (ahead) and vice versa (behind).
    /// Zero when either side can't be resolved.
    fn distance_between(
        &self,
        base: &str,
        target: &str,
        ctx: &mut RepositoryContext,
    ) -> CommitDistance {
        let (Some(base_sha), Some(target_sha)) = (self.resolve_sha(base), self.resolve_sha(target))
        else {
            tracing::debug!("could not resolve {} or {}, assuming zero distance", base, target);
            return CommitDistance::default();
        };
        ctx.resolved_shas.insert(base.to_string(), base_sha.clone());
        ctx.resolved_shas.insert(target.to_string(), target_sha.clone());

        let ahead = self.count(&format!("{}..{}", base_sha, target_sha));
        let behind = self.count(&format!("{}..{}", target_sha, base_sha));
        CommitDistance { ahead, behind }
    }

    fn count(&self, range: &str) -> u32 {
        self.git
            .query(&["rev-list", "--count", range])
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    fn resolve_sha(&self, refname: &str) -> Option<String> {
        let spec = format!("{}^{{commit}}", refname);
        self.git
            .query(&["rev-parse", "--verify", "--quiet", &spec])
            .filter(|s| !s.is_empty())
    }

    fn default_branch(&self) -> String {
        if let Some(ref configured) = self.configured_default {
            return configured.clone();
        }
        if let Some(head) = self
            .git
            .query(&["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])
        {
            if let Some(branch) = head.strip_prefix("origin/") {
                return branch.to_string();
            }
        }
        for candidate in ["main", "master"] {
            let refname = format!("refs/heads/{}", candidate);
            if self
                .git
                .query(&["rev-parse", "--verify", "--quiet", &refname])
                .is_some()
            {
                return candidate.to_string();
            }
        }
        "main".to_string()
    }

    fn repo_slug(&self) -> String {
        self.git
            .query(&["config", "--get", "remote.origin.url"])
            .and_then(|url| slug_from_remote_url(&url))
            .or_else(|| {
                self.git
                    .query(&["rev-parse", "--show-toplevel"])
                    .and_then(|root| {
                        std::path::Path::new(&root)
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                    })
            })
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// `git@github.com:owner/repo.git` / `https://host/owner/repo` → `owner/repo`.
pub fn slug_from_remote_url(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/').map(|(_, p)| p)?
    } else if let Some((_, rest)) = url.split_once(':') {
        rest
    } else {
        return None;
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    Some(segments[segments.len() - 2..].join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::classifier::classify;
    use std::collections::HashMap;

    /// Answers queries from a fixed table keyed by the joined arguments.
    struct TableGit(HashMap<String, String>);

    impl GitBackend for TableGit {
        fn query(&self, args: &[&str]) -> Option<String> {
            self.0.get(&args.join(" ")).cloned()
        }
        fn run(&self, _: &str, _: &[String], _: &[(String, String)]) -> Result<i32> {
            Ok(0)
        }
    }

    fn table(entries: &[(&str, &str)]) -> TableGit {
        TableGit(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_slug_parsing() {
        assert_eq!(
            slug_from_remote_url("git@github.com:acme/widgets.git").as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(
            slug_from_remote_url("https://github.com/acme/widgets").as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(slug_from_remote_url("nonsense"), None);
    }

    #[test]
    fn test_reset_distance_counts_discarded_commits() {
        let git = table(&[
            ("rev-parse --abbrev-ref HEAD", "main"),
            ("config --get remote.origin.url", "git@github.com:acme/widgets.git"),
            ("symbolic-ref --short refs/remotes/origin/HEAD", "origin/main"),
            ("rev-parse --verify --quiet HEAD^{commit}", "aaa"),
            ("rev-parse --verify --quiet main^{commit}", "aaa"),
            ("rev-parse --verify --quiet HEAD~5^{commit}", "fff"),
            ("rev-list --count aaa..fff", "0"),
            ("rev-list --count fff..aaa", "5"),
        ]);
        let d = classify("reset", &["--hard".to_string(), "HEAD~5".to_string()]);
        let gatherer = ContextGatherer::new(&git, vec!["main".to_string()], None);
        let ctx = gatherer.gather(&d).unwrap();

        assert_eq!(ctx.repo_slug, "acme/widgets");
        assert_eq!(ctx.default_branch, "main");
        assert!(ctx.is_protected("main"));
        assert_eq!(ctx.behind_count("HEAD~5"), 5);
        assert_eq!(ctx.ahead_count("HEAD~5"), 0);
        assert_eq!(ctx.resolved_shas.get("HEAD~5").map(|s| s.as_str()), Some("fff"));
    }

    #[test]
    fn test_unresolvable_ref_is_zero_distance() {
        let git = table(&[("rev-parse --abbrev-ref HEAD", "feature")]);
        let d = classify("branch", &["-D".to_string(), "ghost".to_string()]);
        let gatherer = ContextGatherer::new(&git, vec!["main".to_string()], None);
        let ctx = gatherer.gather(&d).unwrap();

        assert_eq!(ctx.distance("ghost"), CommitDistance::default());
        assert_eq!(ctx.default_branch, "main");
        assert_eq!(ctx.repo_slug, "unknown");
    }

    #[test]
    fn test_detached_head() {
        let git = table(&[("rev-parse --abbrev-ref HEAD", "HEAD")]);
        let d = classify("clean", &["-fd".to_string()]);
        let ctx = ContextGatherer::new(&git, vec![], Some("trunk".to_string()))
            .gather(&d)
            .unwrap();
        assert_eq!(ctx.current_branch, None);
        assert_eq!(ctx.current_branch_name(), "HEAD");
        assert_eq!(ctx.default_branch, "trunk");
    }
}
