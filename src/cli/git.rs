//! `saferun git <args>`: guard one git command with the real collaborators.
//!
//! Also the body of the `saferun-shim` binary when it is installed as `git`.

use crate::approval::{
    ApprovalDeps, ApprovalOrchestrator, FileBypassStore, Notifier, PlainPrompter, Prompter,
    SystemBrowser, TerminalPrompter, WaitSettings, WebhookNotifier,
};
use crate::audit::AuditLogger;
use crate::authority::{ConfirmationLedger, HttpAuthority, RiskAuthority, UnconfiguredAuthority};
use crate::config::{load_policy, Settings, REAL_GIT_ENV};
use crate::git::executor::{passthrough, resolve_real_git};
use crate::git::{classify, split_invocation, GitBackend, GitInvocation, SystemGit};
use crate::guard::{Guard, GuardDeps};
use crate::metrics::{FanoutMetrics, JsonlMetrics, MetricsSink, TracingMetrics};
use crate::policy::PolicyEngine;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Find the real git, skipping this executable when it is installed as `git`.
pub fn real_git_binary() -> PathBuf {
    let explicit = env::var_os(REAL_GIT_ENV).map(PathBuf::from);
    let path_var = env::var("PATH").ok();
    let self_exe = env::current_exe().ok();
    resolve_real_git(explicit.as_deref(), path_var.as_deref(), self_exe.as_deref())
}

/// Run `git <args>` through the guard. Returns the process exit code.
pub async fn run_git_command(args: Vec<String>) -> Result<i32> {
    let cwd = env::current_dir().context("Failed to get current directory")?;
    let real_git = real_git_binary();

    let Some(GitInvocation {
        global_args,
        subcommand,
        args: rest,
    }) = split_invocation(&args)
    else {
        return passthrough(&real_git, &args);
    };

    if !classify(&subcommand, &rest).is_interceptable() {
        return passthrough(&real_git, &args);
    }

    let Some(repo_root) = SystemGit::discover_root(&real_git, &cwd, &global_args) else {
        // Outside a repository git reports its own error.
        tracing::debug!("not inside a git repository, passing through");
        return passthrough(&real_git, &args);
    };

    let (policy, policy_path) = load_policy(&repo_root)?;
    let settings = Settings::load(&policy.api)?;
    tracing::debug!(
        policy = ?policy_path,
        mode = %policy.mode,
        interactive = settings.interactive,
        "guarding git {}",
        subcommand
    );

    let engine = PolicyEngine::new(policy).context("Invalid policy")?;
    let bypass_allowed = engine.policy().bypass_allowed();

    let authority: Arc<dyn RiskAuthority> = match settings.api_url {
        Some(ref url) => Arc::new(HttpAuthority::new(
            url.clone(),
            settings.api_key.clone(),
            settings.http_timeout,
            settings.max_retries,
        )?),
        None => Arc::new(UnconfiguredAuthority),
    };
    let ledger = Arc::new(ConfirmationLedger::new(authority.clone()));

    let prompter: Arc<dyn Prompter> = if settings.interactive {
        Arc::new(TerminalPrompter)
    } else {
        Arc::new(PlainPrompter)
    };
    let notifier: Option<Arc<dyn Notifier>> = match settings.webhook_url {
        Some(ref url) => Some(Arc::new(WebhookNotifier::new(
            url.clone(),
            settings.http_timeout,
        )?)),
        None => None,
    };

    let interrupt = Arc::new(Notify::new());
    spawn_interrupt_listener(interrupt.clone());

    let approvals = ApprovalOrchestrator::standard(ApprovalDeps {
        authority: authority.clone(),
        ledger: ledger.clone(),
        prompter,
        browser: Arc::new(SystemBrowser),
        notifier,
        bypass_store: Arc::new(FileBypassStore::new(settings.bypass_file())),
        bypass_allowed,
        wait: WaitSettings {
            poll_interval: settings.poll_interval,
            timeout: settings.approval_timeout,
        },
        interrupt,
        interactive: settings.interactive,
    });

    let audit = Arc::new(AuditLogger::open(AuditLogger::default_path(
        &settings.saferun_home,
    ))?);
    let metrics: Arc<dyn MetricsSink> = if settings.metrics_file {
        Arc::new(FanoutMetrics(vec![
            Box::new(TracingMetrics),
            Box::new(JsonlMetrics::new(JsonlMetrics::default_path(
                &settings.saferun_home,
            ))),
        ]))
    } else {
        Arc::new(TracingMetrics)
    };

    // The working directory, not the top level: `clean` and friends are relative to it.
    let git: Arc<dyn GitBackend> =
        Arc::new(SystemGit::new(&cwd, &real_git).with_global_args(global_args));
    let guard = Guard::new(
        engine,
        GuardDeps {
            git,
            authority,
            ledger,
            approvals,
            audit,
            metrics,
        },
    );
    guard.run(&subcommand, &rest).await
}

/// Ctrl-C during a wait ends it as `interrupted` instead of killing the process.
/// Only a wait already in progress sees it.
fn spawn_interrupt_listener(interrupt: Arc<Notify>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::debug!("interrupt received");
            interrupt.notify_waiters();
        }
    });
}
