//! Command classifier: turns raw git arguments into an `OperationDescriptor`.
//!
//! Pure and total: anything we don't recognize as dangerous comes back as
//! `OperationKind::Unknown` and is passed straight through to git.
//! Flag handling follows git's own option parsing for the flags we care about,
//! including clustered short options (`-fd`, `-anm`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The kinds of git operations the guard intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Force push, `+refspec` push, or remote branch deletion
    Push,
    /// `git branch -d/-D/--delete`
    BranchDelete,
    /// `git reset --hard`
    ResetHard,
    /// `git clean -fd`
    Clean,
    /// `git rebase -i` / `--onto`
    Rebase,
    /// `git commit --no-verify`
    CommitNoVerify,
    /// Not interceptable: passed through untouched
    Unknown,
}

impl OperationKind {
    pub const GUARDED: [OperationKind; 6] = [
        OperationKind::Push,
        OperationKind::BranchDelete,
        OperationKind::ResetHard,
        OperationKind::Clean,
        OperationKind::Rebase,
        OperationKind::CommitNoVerify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Push => "force_push",
            OperationKind::BranchDelete => "branch_delete",
            OperationKind::ResetHard => "reset_hard",
            OperationKind::Clean => "clean",
            OperationKind::Rebase => "rebase",
            OperationKind::CommitNoVerify => "commit_no_verify",
            OperationKind::Unknown => "unknown",
        }
    }

    /// Operation type string used by the remote authority's dry-run endpoints.
    pub fn api_operation_type(&self) -> &'static str {
        match self {
            OperationKind::Push => "git_force_push",
            OperationKind::BranchDelete => "git_branch_delete",
            OperationKind::ResetHard => "git_reset_hard",
            OperationKind::Clean => "git_clean",
            OperationKind::Rebase => "git_rebase",
            OperationKind::CommitNoVerify => "git_commit_no_verify",
            OperationKind::Unknown => "git_unknown",
        }
    }

    /// Parse a rule key from the policy file. Accepts a few natural aliases.
    pub fn from_str_loose(s: &str) -> Option<OperationKind> {
        match s.to_lowercase().trim() {
            "force_push" | "push" | "push_force" => Some(OperationKind::Push),
            "branch_delete" | "delete_branch" | "branch" => Some(OperationKind::BranchDelete),
            "reset_hard" | "reset" | "hard_reset" => Some(OperationKind::ResetHard),
            "clean" | "force_clean" => Some(OperationKind::Clean),
            "rebase" | "interactive_rebase" => Some(OperationKind::Rebase),
            "commit_no_verify" | "no_verify" | "commit" => Some(OperationKind::CommitNoVerify),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured description of one intercepted git command.
/// Built once by `classify` and only ever read afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    /// The git subcommand as typed (`push`, `branch`, ...)
    pub subcommand: String,
    /// Arguments after the subcommand, untouched
    pub args: Vec<String>,
    /// Branch names or refs the command names, in command-line order
    pub targets: Vec<String>,
    pub flags: BTreeSet<String>,
    pub forced: bool,
    /// For push: the remote (first positional argument)
    pub remote: Option<String>,
}

impl OperationDescriptor {
    fn unknown(subcommand: &str, args: &[String]) -> Self {
        Self {
            kind: OperationKind::Unknown,
            subcommand: subcommand.to_string(),
            args: args.to_vec(),
            targets: Vec::new(),
            flags: BTreeSet::new(),
            forced: false,
            remote: None,
        }
    }

    pub fn is_interceptable(&self) -> bool {
        self.kind != OperationKind::Unknown
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// The commit-ish a hard reset moves to.
    pub fn reset_target(&self) -> &str {
        self.targets.first().map(|s| s.as_str()).unwrap_or("HEAD")
    }

    /// The full command line, for previews and the audit log.
    pub fn command_line(&self) -> String {
        let mut parts = vec!["git".to_string(), self.subcommand.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// A raw `git` argument list split at its subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInvocation {
    /// Options git consumes itself before the subcommand (`-C <dir>`, `-c k=v`, ...)
    pub global_args: Vec<String>,
    pub subcommand: String,
    pub args: Vec<String>,
}

/// Global options whose value is the following argument.
const GLOBAL_OPTIONS_WITH_VALUE: [&str; 8] = [
    "-C",
    "-c",
    "--git-dir",
    "--work-tree",
    "--namespace",
    "--super-prefix",
    "--config-env",
    "--attr-source",
];

/// Skip git's global options and find the subcommand.
///
/// `None` when there is no subcommand at all (`git --version`, `git -C repo`).
/// Unrecognized dashed arguments are treated as value-less global flags, so the
/// first bare word is always what git will run.
pub fn split_invocation(argv: &[String]) -> Option<GitInvocation> {
    let mut i = 0;
    while i < argv.len() {
        let arg = argv[i].as_str();
        if !arg.starts_with('-') {
            return Some(GitInvocation {
                global_args: argv[..i].to_vec(),
                subcommand: arg.to_string(),
                args: argv[i + 1..].to_vec(),
            });
        }
        i += if GLOBAL_OPTIONS_WITH_VALUE.contains(&arg) { 2 } else { 1 };
    }
    None
}

/// Classify one git invocation.
pub fn classify(subcommand: &str, args: &[String]) -> OperationDescriptor {
    let parsed = match subcommand {
        "push" => classify_push(args),
        "branch" => classify_branch(args),
        "reset" => classify_reset(args),
        "clean" => classify_clean(args),
        "rebase" => classify_rebase(args),
        "commit" => classify_commit(args),
        _ => None,
    };

    match parsed {
        Some(p) => OperationDescriptor {
            kind: p.kind,
            subcommand: subcommand.to_string(),
            args: args.to_vec(),
            targets: p.targets,
            flags: p.flags,
            forced: p.forced,
            remote: p.remote,
        },
        None => OperationDescriptor::unknown(subcommand, args),
    }
}

/// Intermediate result of a per-subcommand parser.
struct Parsed {
    kind: OperationKind,
    targets: Vec<String>,
    flags: BTreeSet<String>,
    forced: bool,
    remote: Option<String>,
}

impl Parsed {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            targets: Vec::new(),
            flags: BTreeSet::new(),
            forced: false,
            remote: None,
        }
    }

    fn flag(&mut self, name: &str) {
        self.flags.insert(name.to_string());
    }
}

/// A single-dash option cluster like `-fd` (but not `-` or `--x`).
fn short_cluster(arg: &str) -> Option<&str> {
    if arg.len() > 1 && arg.starts_with('-') && !arg.starts_with("--") {
        Some(&arg[1..])
    } else {
        None
    }
}

fn classify_push(args: &[String]) -> Option<Parsed> {
    let mut p = Parsed::new(OperationKind::Push);
    let mut positional: Vec<&str> = Vec::new();
    let mut delete = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        i += 1;
        match arg {
            "--" => {
                positional.extend(args[i..].iter().map(|s| s.as_str()));
                break;
            }
            "--force" => p.flag("force"),
            "--force-if-includes" => p.flag("force-if-includes"),
            "--delete" => delete = true,
            "-o" | "--push-option" | "--repo" | "--receive-pack" | "--exec" => {
                i += 1;
            }
            a if a == "--force-with-lease" || a.starts_with("--force-with-lease=") => {
                p.flag("force-with-lease")
            }
            a if a.starts_with("--") => {}
            a => match short_cluster(a) {
                Some(cluster) => {
                    for (pos, c) in cluster.char_indices() {
                        match c {
                            'f' => p.flag("force"),
                            'd' => delete = true,
                            'o' => {
                                if pos + 1 == cluster.len() {
                                    i += 1;
                                }
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                None => positional.push(a),
            },
        }
    }

    let mut refspecs = positional.into_iter();
    p.remote = refspecs.next().map(|s| s.to_string());

    for spec in refspecs {
        if delete {
            p.targets.push(strip_heads(spec));
            continue;
        }
        let spec = match spec.strip_prefix('+') {
            Some(rest) => {
                p.flag("refspec-force");
                rest
            }
            None => spec,
        };
        if let Some(dst) = spec.strip_prefix(':') {
            p.flag("delete-refspec");
            p.targets.push(strip_heads(dst));
        } else if let Some((_, dst)) = spec.split_once(':') {
            p.targets.push(strip_heads(dst));
        } else {
            p.targets.push(strip_heads(spec));
        }
    }

    if delete {
        p.flag("delete");
    }

    p.forced = p.flags.contains("force")
        || p.flags.contains("force-with-lease")
        || p.flags.contains("force-if-includes")
        || p.flags.contains("refspec-force");

    if p.forced || delete || p.flags.contains("delete-refspec") {
        Some(p)
    } else {
        None
    }
}

fn strip_heads(refname: &str) -> String {
    refname
        .strip_prefix("refs/heads/")
        .unwrap_or(refname)
        .to_string()
}

fn classify_branch(args: &[String]) -> Option<Parsed> {
    let mut p = Parsed::new(OperationKind::BranchDelete);
    let mut delete = false;
    let mut force = false;
    let mut positional = Vec::new();
    let mut after_dashdash = false;

    for arg in args {
        let a = arg.as_str();
        if after_dashdash {
            positional.push(a.to_string());
            continue;
        }
        match a {
            "--" => after_dashdash = true,
            "--delete" => delete = true,
            "--force" => force = true,
            "--remotes" => p.flag("remotes"),
            a if a.starts_with("--") => {}
            a => match short_cluster(a) {
                Some(cluster) => {
                    for c in cluster.chars() {
                        match c {
                            'd' => delete = true,
                            'D' => {
                                delete = true;
                                force = true;
                            }
                            'f' => force = true,
                            'r' => p.flag("remotes"),
                            _ => {}
                        }
                    }
                }
                None => positional.push(a.to_string()),
            },
        }
    }

    if !delete {
        return None;
    }

    p.flag("delete");
    if force {
        p.flag("force");
    }
    p.forced = force;
    p.targets = positional;
    Some(p)
}

fn classify_reset(args: &[String]) -> Option<Parsed> {
    let mut p = Parsed::new(OperationKind::ResetHard);
    let mut mode = "mixed";
    let mut commit: Option<String> = None;

    for arg in args {
        match arg.as_str() {
            "--" => break,
            "--hard" => mode = "hard",
            "--soft" => mode = "soft",
            "--mixed" => mode = "mixed",
            "--keep" => mode = "keep",
            "--merge" => mode = "merge",
            a if a.starts_with('-') => {}
            a => {
                if commit.is_none() {
                    commit = Some(a.to_string());
                }
            }
        }
    }

    if mode != "hard" {
        return None;
    }

    p.flag("hard");
    p.forced = true;
    p.targets.push(commit.unwrap_or_else(|| "HEAD".to_string()));
    Some(p)
}

fn classify_clean(args: &[String]) -> Option<Parsed> {
    let mut p = Parsed::new(OperationKind::Clean);
    let mut force = false;
    let mut directories = false;
    let mut dry_run = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        i += 1;
        match arg {
            "--" => break,
            "--force" => force = true,
            "--directories" => directories = true,
            "--dry-run" => dry_run = true,
            "--exclude" => i += 1,
            a if a.starts_with("--") => {}
            a => {
                if let Some(cluster) = short_cluster(a) {
                    for (pos, c) in cluster.char_indices() {
                        match c {
                            'f' => force = true,
                            'd' => directories = true,
                            'n' => dry_run = true,
                            'x' => p.flag("ignored"),
                            'X' => p.flag("only-ignored"),
                            'i' => p.flag("interactive"),
                            'e' => {
                                if pos + 1 == cluster.len() {
                                    i += 1;
                                }
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    if dry_run || !(force && directories) {
        return None;
    }

    p.flag("force");
    p.flag("directories");
    p.forced = true;
    Some(p)
}

fn classify_rebase(args: &[String]) -> Option<Parsed> {
    let mut p = Parsed::new(OperationKind::Rebase);
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        i += 1;
        match arg {
            "--continue" | "--abort" | "--skip" | "--quit" | "--edit-todo"
            | "--show-current-patch" => return None,
            "--interactive" => p.flag("interactive"),
            "--onto" => {
                p.flag("onto");
                if let Some(base) = args.get(i) {
                    p.targets.push(base.clone());
                }
                i += 1;
            }
            a if a.starts_with("--onto=") => {
                p.flag("onto");
                p.targets.push(a["--onto=".len()..].to_string());
            }
            "--exec" | "--strategy" | "--strategy-option" => i += 1,
            a if a.starts_with("--") => {}
            a => match short_cluster(a) {
                Some(cluster) => {
                    for (pos, c) in cluster.char_indices() {
                        match c {
                            'i' => p.flag("interactive"),
                            'x' | 's' | 'X' => {
                                if pos + 1 == cluster.len() {
                                    i += 1;
                                }
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                None => positional.push(a.to_string()),
            },
        }
    }

    if !p.flags.contains("interactive") && !p.flags.contains("onto") {
        return None;
    }

    p.forced = true;
    p.targets.extend(positional);
    Some(p)
}

fn classify_commit(args: &[String]) -> Option<Parsed> {
    let mut p = Parsed::new(OperationKind::CommitNoVerify);
    let mut no_verify = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        i += 1;
        match arg {
            "--" => break,
            "--no-verify" => no_verify = true,
            "--verify" => no_verify = false,
            "--message" | "--file" | "--reuse-message" | "--reedit-message" | "--template"
            | "--author" | "--date" | "--fixup" | "--squash" => i += 1,
            a if a.starts_with("--") => {}
            a => {
                if let Some(cluster) = short_cluster(a) {
                    for (pos, c) in cluster.char_indices() {
                        match c {
                            'n' => no_verify = true,
                            'm' | 'F' | 'c' | 'C' | 't' => {
                                if pos + 1 == cluster.len() {
                                    i += 1;
                                }
                                break;
                            }
                            // optional attached values
                            'S' | 'u' => break,
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    if !no_verify {
        return None;
    }

    p.flag("no-verify");
    p.forced = true;
    Some(p)
}
