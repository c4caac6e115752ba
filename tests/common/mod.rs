//! In-memory fakes for every port the guard talks to.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use saferun::approval::types::{ApprovalRequest, ChannelKind};
use saferun::approval::{
    ApprovalDeps, ApprovalOrchestrator, BrowserOpener, BypassStore, Notifier, Prompter,
    WaitSettings,
};
use saferun::audit::{AuditSink, LogEntry};
use saferun::authority::{
    AuthorityError, ChangeStatus, Confirmation, ConfirmationLedger, DryRunRequest, RemoteVerdict,
    RiskAuthority,
};
use saferun::git::GitBackend;
use saferun::guard::{Guard, GuardDeps};
use saferun::metrics::{MetricEvent, MetricsSink};
use saferun::policy::{parser, PolicyEngine};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn args(s: &str) -> Vec<String> {
    s.split_whitespace().map(String::from).collect()
}

// ── git ──

#[derive(Debug, Clone)]
pub struct GitRun {
    pub subcommand: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Answers read-only queries from a table; records every real run.
pub struct FakeGit {
    answers: HashMap<String, String>,
    runs: Mutex<Vec<GitRun>>,
    exit_code: i32,
}

impl FakeGit {
    /// A repository `acme/widgets` with `main` as default branch, checked out on `branch`.
    pub fn on_branch(branch: &str) -> Self {
        Self {
            answers: HashMap::new(),
            runs: Mutex::new(Vec::new()),
            exit_code: 0,
        }
        .answer("rev-parse --abbrev-ref HEAD", branch)
        .answer("config --get remote.origin.url", "git@github.com:acme/widgets.git")
        .answer("rev-parse --verify --quiet refs/heads/main", "m0")
        .with_ref("HEAD", "h0")
        .with_ref("main", "m0")
    }

    pub fn answer(mut self, args: &str, output: &str) -> Self {
        self.answers.insert(args.to_string(), output.to_string());
        self
    }

    pub fn with_ref(self, name: &str, sha: &str) -> Self {
        self.answer(&format!("rev-parse --verify --quiet {}^{{commit}}", name), sha)
    }

    /// `git rev-list --count from..to` answers `n`.
    pub fn with_count(self, from_sha: &str, to_sha: &str, n: u32) -> Self {
        self.answer(&format!("rev-list --count {}..{}", from_sha, to_sha), &n.to_string())
    }

    pub fn exiting_with(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn runs(&self) -> Vec<GitRun> {
        self.runs.lock().unwrap().clone()
    }
}

impl GitBackend for FakeGit {
    fn query(&self, args: &[&str]) -> Option<String> {
        self.answers.get(&args.join(" ")).cloned()
    }

    fn run(&self, subcommand: &str, args: &[String], env: &[(String, String)]) -> Result<i32> {
        self.runs.lock().unwrap().push(GitRun {
            subcommand: subcommand.to_string(),
            args: args.to_vec(),
            env: env.to_vec(),
        });
        Ok(self.exit_code)
    }
}

// ── remote authority ──

#[derive(Clone)]
pub enum DryRunScript {
    Verdict(RemoteVerdict),
    /// A raw 200 body, decoded the way the HTTP client decodes it
    Body(&'static str),
    Unreachable,
    Status(u16),
}

pub fn verdict(change_id: &str, needs_approval: bool) -> RemoteVerdict {
    RemoteVerdict {
        change_id: change_id.to_string(),
        needs_approval,
        approve_url: Some(format!("https://saferun.example/approve/{}", change_id)),
        revert_url: None,
        revert_window_hours: None,
        risk_score: 7.5,
        reasons: vec!["remote_policy".to_string()],
        human_preview: String::new(),
        expires_at: None,
    }
}

/// Scripted authority: one dry-run answer per target, a status sequence
/// (the last one repeats) and a record of everything sent.
pub struct FakeAuthority {
    scripts: Mutex<HashMap<String, DryRunScript>>,
    statuses: Mutex<VecDeque<ChangeStatus>>,
    pub dry_runs: Mutex<Vec<DryRunRequest>>,
    pub confirmations: Mutex<Vec<Confirmation>>,
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            statuses: Mutex::new(VecDeque::from([ChangeStatus::Pending])),
            dry_runs: Mutex::new(Vec::new()),
            confirmations: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, target: &str, script: DryRunScript) -> Self {
        self.scripts.lock().unwrap().insert(target.to_string(), script);
        self
    }

    pub fn statuses(self, statuses: &[ChangeStatus]) -> Self {
        *self.statuses.lock().unwrap() = statuses.iter().copied().collect();
        self
    }

    pub fn dry_run_count(&self) -> usize {
        self.dry_runs.lock().unwrap().len()
    }

    pub fn confirmations(&self) -> Vec<Confirmation> {
        self.confirmations.lock().unwrap().clone()
    }
}

#[async_trait]
impl RiskAuthority for FakeAuthority {
    async fn dry_run(&self, request: &DryRunRequest) -> Result<RemoteVerdict, AuthorityError> {
        self.dry_runs.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().get(&request.target).cloned();
        match script {
            Some(DryRunScript::Verdict(v)) => Ok(v),
            Some(DryRunScript::Body(body)) => serde_json::from_str(body)
                .map_err(|e| AuthorityError::InvalidResponse(e.to_string())),
            Some(DryRunScript::Status(status)) => Err(AuthorityError::Api {
                status,
                body: "nope".to_string(),
            }),
            Some(DryRunScript::Unreachable) | None => {
                Err(AuthorityError::Unreachable("connection refused".to_string()))
            }
        }
    }

    async fn change_status(&self, _change_id: &str) -> Result<ChangeStatus, AuthorityError> {
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        Ok(status.unwrap_or(ChangeStatus::Pending))
    }

    async fn confirm(&self, confirmation: &Confirmation) -> Result<(), AuthorityError> {
        self.confirmations.lock().unwrap().push(confirmation.clone());
        Ok(())
    }
}

// ── audit and metrics ──

#[derive(Default)]
pub struct MemoryAudit(pub Mutex<Vec<LogEntry>>);

impl MemoryAudit {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.0.lock().unwrap().clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, entry: &LogEntry) -> Result<()> {
        self.0.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMetrics(pub Mutex<Vec<MetricEvent>>);

impl MemoryMetrics {
    pub fn events(&self) -> Vec<MetricEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl MetricsSink for MemoryMetrics {
    fn emit(&self, event: &MetricEvent) -> Result<()> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ── the human side ──

/// Picks a fixed channel and hands out queued bypass codes.
pub struct ScriptedPrompter {
    choice: ChannelKind,
    codes: Mutex<VecDeque<Option<String>>>,
    pub offered: Mutex<Vec<Vec<ChannelKind>>>,
    pub notices: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn choosing(choice: ChannelKind) -> Self {
        Self {
            choice,
            codes: Mutex::new(VecDeque::new()),
            offered: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn with_codes(self, codes: &[Option<&str>]) -> Self {
        *self.codes.lock().unwrap() = codes.iter().map(|c| c.map(String::from)).collect();
        self
    }

    pub fn prompts(&self) -> usize {
        self.offered.lock().unwrap().len()
    }
}

impl Prompter for ScriptedPrompter {
    fn choose_channel(
        &self,
        _request: &ApprovalRequest,
        channels: &[ChannelKind],
        _timeout: Duration,
    ) -> Result<ChannelKind> {
        self.offered.lock().unwrap().push(channels.to_vec());
        Ok(self.choice)
    }

    fn read_bypass_code(&self, _attempt: u32, _max_attempts: u32) -> Result<Option<String>> {
        Ok(self.codes.lock().unwrap().pop_front().flatten())
    }

    fn notice(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

/// Valid codes in memory, each usable once.
pub struct MemoryBypassStore(Mutex<HashSet<String>>);

impl MemoryBypassStore {
    pub fn with(codes: &[&str]) -> Self {
        Self(Mutex::new(codes.iter().map(|c| c.to_string()).collect()))
    }
}

impl BypassStore for MemoryBypassStore {
    fn consume(&self, code: &str, _now: DateTime<Utc>) -> Result<bool> {
        Ok(self.0.lock().unwrap().remove(code))
    }
}

#[derive(Default)]
pub struct RecordingBrowser(pub Mutex<Vec<String>>);

impl BrowserOpener for RecordingBrowser {
    fn open(&self, url: &str) -> Result<()> {
        self.0.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, request: &ApprovalRequest) -> Result<()> {
        self.sent.lock().unwrap().push(request.change_id.clone());
        if self.fail {
            anyhow::bail!("webhook returned 500");
        }
        Ok(())
    }
}

// ── wiring ──

pub fn fast_wait() -> WaitSettings {
    WaitSettings {
        poll_interval: Duration::from_millis(10),
        timeout: Duration::from_millis(300),
    }
}

/// Every collaborator of one guard run, kept around for assertions.
pub struct Harness {
    pub git: Arc<FakeGit>,
    pub authority: Arc<FakeAuthority>,
    pub ledger: Arc<ConfirmationLedger>,
    pub audit: Arc<MemoryAudit>,
    pub metrics: Arc<MemoryMetrics>,
    pub prompter: Arc<ScriptedPrompter>,
    pub bypass: Arc<MemoryBypassStore>,
    pub browser: Arc<RecordingBrowser>,
    pub notifier: Option<Arc<RecordingNotifier>>,
    pub interrupt: Arc<Notify>,
    pub interactive: bool,
}

impl Harness {
    pub fn new(git: FakeGit, authority: FakeAuthority, prompter: ScriptedPrompter) -> Self {
        let authority = Arc::new(authority);
        Self {
            git: Arc::new(git),
            ledger: Arc::new(ConfirmationLedger::new(authority.clone())),
            authority,
            audit: Arc::new(MemoryAudit::default()),
            metrics: Arc::new(MemoryMetrics::default()),
            prompter: Arc::new(prompter),
            bypass: Arc::new(MemoryBypassStore::with(&[])),
            browser: Arc::new(RecordingBrowser::default()),
            notifier: None,
            interrupt: Arc::new(Notify::new()),
            interactive: true,
        }
    }

    pub fn with_bypass_codes(mut self, codes: &[&str]) -> Self {
        self.bypass = Arc::new(MemoryBypassStore::with(codes));
        self
    }

    pub fn with_notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    pub fn orchestrator(&self, bypass_allowed: bool) -> ApprovalOrchestrator {
        ApprovalOrchestrator::standard(ApprovalDeps {
            authority: self.authority.clone(),
            ledger: self.ledger.clone(),
            prompter: self.prompter.clone(),
            browser: self.browser.clone(),
            notifier: self
                .notifier
                .clone()
                .map(|n| n as Arc<dyn Notifier>),
            bypass_store: self.bypass.clone(),
            bypass_allowed,
            wait: fast_wait(),
            interrupt: self.interrupt.clone(),
            interactive: self.interactive,
        })
    }

    pub fn guard(&self, policy_yaml: &str) -> Guard {
        let policy = parser::parse_policy_str(policy_yaml).unwrap();
        let bypass_allowed = policy.bypass_allowed();
        let engine = PolicyEngine::new(policy).unwrap();
        Guard::new(
            engine,
            GuardDeps {
                git: self.git.clone(),
                authority: self.authority.clone(),
                ledger: self.ledger.clone(),
                approvals: self.orchestrator(bypass_allowed),
                audit: self.audit.clone(),
                metrics: self.metrics.clone(),
            },
        )
    }

    /// Confirmations per change id: each must appear exactly once.
    pub fn confirmation_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for c in self.authority.confirmations() {
            *counts.entry(c.change_id).or_insert(0) += 1;
        }
        counts
    }
}
