//! Approval channels. Each one drives a request to a terminal outcome.
//!
//! The orchestrator holds them in a dispatch table and only offers the ones
//! whose `is_available` holds for the request at hand.

use crate::approval::bypass::{is_valid_format, BypassStore, CODE_LENGTH};
use crate::approval::notify::{BrowserOpener, Notifier};
use crate::approval::types::{ApprovalOutcome, ApprovalRequest, CancelReason, ChannelKind};
use crate::approval::Prompter;
use crate::authority::{ChangeStatus, RiskAuthority};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub const MAX_BYPASS_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn is_available(&self, _request: &ApprovalRequest) -> bool {
        true
    }

    async fn run(&self, request: &ApprovalRequest, waiter: &StatusWaiter)
        -> Result<ApprovalOutcome>;
}

/// Polling parameters for direct wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitSettings {
    pub poll_interval: Duration,
    /// Hard wall-clock limit, independent of the number of polls
    pub timeout: Duration,
}

/// Polls the authority until the change settles, the deadline passes,
/// or the user interrupts.
///
/// Interrupts are delivered with [`Notify::notify_waiters`], which stores no
/// permit: a Ctrl-C that arrived while no wait was running does not end the
/// next one.
pub struct StatusWaiter {
    authority: Arc<dyn RiskAuthority>,
    settings: WaitSettings,
    interrupt: Arc<Notify>,
}

impl StatusWaiter {
    pub fn new(authority: Arc<dyn RiskAuthority>, settings: WaitSettings, interrupt: Arc<Notify>) -> Self {
        Self {
            authority,
            settings,
            interrupt,
        }
    }

    pub fn settings(&self) -> WaitSettings {
        self.settings
    }

    pub async fn wait(&self, change_id: &str) -> ApprovalOutcome {
        let deadline = Instant::now() + self.settings.timeout;
        let mut polls = 0u32;
        let interrupted = self.interrupt.notified();
        tokio::pin!(interrupted);
        interrupted.as_mut().enable();

        loop {
            polls += 1;
            let status = tokio::select! {
                status = self.authority.change_status(change_id) => status,
                _ = tokio::time::sleep_until(deadline) => {
                    return ApprovalOutcome::Cancelled(CancelReason::Timeout);
                }
                _ = &mut interrupted => {
                    return ApprovalOutcome::Cancelled(CancelReason::Interrupted);
                }
            };

            match status {
                Ok(ChangeStatus::Approved) => {
                    tracing::debug!(change_id, polls, "change approved");
                    return ApprovalOutcome::Approved;
                }
                Ok(ChangeStatus::Expired) => {
                    return ApprovalOutcome::Cancelled(CancelReason::Expired);
                }
                Ok(status) if status.is_settled() => {
                    tracing::debug!(change_id, ?status, "change settled without approval");
                    return ApprovalOutcome::Cancelled(CancelReason::Rejected);
                }
                Ok(_) => {}
                Err(e) => {
                    // Keep polling; the deadline still bounds the wait.
                    tracing::warn!(change_id, "status poll failed: {}", e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return ApprovalOutcome::Cancelled(CancelReason::Timeout);
            }
            let nap = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = &mut interrupted => {
                    return ApprovalOutcome::Cancelled(CancelReason::Interrupted);
                }
            }
        }
    }
}

/// Run a blocking prompter call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

pub struct DirectWaitChannel {
    prompter: Arc<dyn Prompter>,
}

impl DirectWaitChannel {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self { prompter }
    }
}

#[async_trait]
impl ApprovalChannel for DirectWaitChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::DirectWait
    }

    async fn run(
        &self,
        request: &ApprovalRequest,
        waiter: &StatusWaiter,
    ) -> Result<ApprovalOutcome> {
        let mut message = format!(
            "Waiting up to {}s for approval of {} (Ctrl-C to cancel)",
            waiter.settings().timeout.as_secs(),
            request.change_id
        );
        if let Some(ref url) = request.approve_url {
            message.push_str(&format!("\n  Approve at: {}", url));
        }
        self.prompter.notice(&message);
        Ok(waiter.wait(&request.change_id).await)
    }
}

pub struct BrowserChannel {
    opener: Arc<dyn BrowserOpener>,
    prompter: Arc<dyn Prompter>,
}

impl BrowserChannel {
    pub fn new(opener: Arc<dyn BrowserOpener>, prompter: Arc<dyn Prompter>) -> Self {
        Self { opener, prompter }
    }
}

#[async_trait]
impl ApprovalChannel for BrowserChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Browser
    }

    fn is_available(&self, request: &ApprovalRequest) -> bool {
        request.approve_url.is_some()
    }

    async fn run(
        &self,
        request: &ApprovalRequest,
        waiter: &StatusWaiter,
    ) -> Result<ApprovalOutcome> {
        let Some(ref url) = request.approve_url else {
            return Ok(waiter.wait(&request.change_id).await);
        };
        match self.opener.open(url) {
            Ok(()) => self.prompter.notice("Opened the approval page in your browser"),
            Err(e) => {
                tracing::debug!("browser launch failed: {:#}", e);
                self.prompter
                    .notice(&format!("Could not open a browser. Approve at: {}", url));
            }
        }
        Ok(waiter.wait(&request.change_id).await)
    }
}

pub struct WebhookChannel {
    notifier: Option<Arc<dyn Notifier>>,
    prompter: Arc<dyn Prompter>,
}

impl WebhookChannel {
    pub fn new(notifier: Option<Arc<dyn Notifier>>, prompter: Arc<dyn Prompter>) -> Self {
        Self { notifier, prompter }
    }
}

#[async_trait]
impl ApprovalChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn is_available(&self, _request: &ApprovalRequest) -> bool {
        self.notifier.is_some()
    }

    async fn run(
        &self,
        request: &ApprovalRequest,
        waiter: &StatusWaiter,
    ) -> Result<ApprovalOutcome> {
        if let Some(ref notifier) = self.notifier {
            match notifier.notify(request).await {
                Ok(()) => self.prompter.notice("Reviewers notified"),
                Err(e) => self
                    .prompter
                    .notice(&format!("Warning: notification failed ({:#}), still waiting", e)),
            }
        }
        Ok(waiter.wait(&request.change_id).await)
    }
}

pub struct BypassChannel {
    store: Arc<dyn BypassStore>,
    prompter: Arc<dyn Prompter>,
    /// Bypass enabled globally and for the current mode
    enabled: bool,
}

impl BypassChannel {
    pub fn new(store: Arc<dyn BypassStore>, prompter: Arc<dyn Prompter>, enabled: bool) -> Self {
        Self {
            store,
            prompter,
            enabled,
        }
    }
}

#[async_trait]
impl ApprovalChannel for BypassChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Bypass
    }

    fn is_available(&self, _request: &ApprovalRequest) -> bool {
        self.enabled
    }

    async fn run(
        &self,
        _request: &ApprovalRequest,
        _waiter: &StatusWaiter,
    ) -> Result<ApprovalOutcome> {
        if !self.enabled {
            return Ok(ApprovalOutcome::Cancelled(CancelReason::BypassRejected));
        }

        for attempt in 1..=MAX_BYPASS_ATTEMPTS {
            let prompter = self.prompter.clone();
            let code = blocking(move || prompter.read_bypass_code(attempt, MAX_BYPASS_ATTEMPTS)).await?;
            let Some(code) = code else {
                return Ok(ApprovalOutcome::Cancelled(CancelReason::UserCancelled));
            };

            if !is_valid_format(&code) {
                self.prompter
                    .notice(&format!("A bypass code is exactly {} digits", CODE_LENGTH));
                continue;
            }
            if self.store.consume(&code, chrono::Utc::now())? {
                tracing::info!("bypass code accepted");
                return Ok(ApprovalOutcome::Bypassed);
            }
            self.prompter.notice("Invalid or expired bypass code");
        }

        Ok(ApprovalOutcome::Cancelled(CancelReason::BypassRejected))
    }
}

pub struct CancelChannel;

#[async_trait]
impl ApprovalChannel for CancelChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Cancel
    }

    async fn run(&self, _: &ApprovalRequest, _: &StatusWaiter) -> Result<ApprovalOutcome> {
        Ok(ApprovalOutcome::Cancelled(CancelReason::UserCancelled))
    }
}
