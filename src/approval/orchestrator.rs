//! Approval orchestrator: a small state machine over the channel table.
//!
//! `AwaitingChannelSelection` → `Waiting(channel)` → Approved | Bypassed | Cancelled.
//! Non-interactive runs skip the menu: webhook if configured, else direct wait.
//! Every Cancelled outcome is confirmed as `cancelled` before `obtain` returns.

use crate::approval::bypass::BypassStore;
use crate::approval::channels::*;
use crate::approval::notify::{BrowserOpener, Notifier};
use crate::approval::types::*;
use crate::approval::Prompter;
use crate::authority::{Confirmation, ConfirmationLedger, RiskAuthority};
use std::sync::Arc;
use tokio::sync::Notify;

/// Collaborators for the standard channel table.
pub struct ApprovalDeps {
    pub authority: Arc<dyn RiskAuthority>,
    pub ledger: Arc<ConfirmationLedger>,
    pub prompter: Arc<dyn Prompter>,
    pub browser: Arc<dyn BrowserOpener>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub bypass_store: Arc<dyn BypassStore>,
    pub bypass_allowed: bool,
    pub wait: WaitSettings,
    pub interrupt: Arc<Notify>,
    pub interactive: bool,
}

pub struct ApprovalOrchestrator {
    channels: Vec<Box<dyn ApprovalChannel>>,
    prompter: Arc<dyn Prompter>,
    waiter: StatusWaiter,
    ledger: Arc<ConfirmationLedger>,
    interactive: bool,
}

impl ApprovalOrchestrator {
    pub fn new(
        channels: Vec<Box<dyn ApprovalChannel>>,
        prompter: Arc<dyn Prompter>,
        waiter: StatusWaiter,
        ledger: Arc<ConfirmationLedger>,
        interactive: bool,
    ) -> Self {
        Self {
            channels,
            prompter,
            waiter,
            ledger,
            interactive,
        }
    }

    /// Direct wait, browser, webhook, bypass, cancel.
    pub fn standard(deps: ApprovalDeps) -> Self {
        let channels: Vec<Box<dyn ApprovalChannel>> = vec![
            Box::new(DirectWaitChannel::new(deps.prompter.clone())),
            Box::new(BrowserChannel::new(deps.browser, deps.prompter.clone())),
            Box::new(WebhookChannel::new(deps.notifier, deps.prompter.clone())),
            Box::new(BypassChannel::new(
                deps.bypass_store,
                deps.prompter.clone(),
                deps.bypass_allowed,
            )),
            Box::new(CancelChannel),
        ];
        let waiter = StatusWaiter::new(deps.authority, deps.wait, deps.interrupt);
        Self::new(channels, deps.prompter, waiter, deps.ledger, deps.interactive)
    }

    /// Channels offered for this request, in menu order.
    pub fn available_channels(&self, request: &ApprovalRequest) -> Vec<ChannelKind> {
        self.channels
            .iter()
            .filter(|c| c.is_available(request))
            .map(|c| c.kind())
            .collect()
    }

    pub async fn obtain(&self, request: &ApprovalRequest) -> ApprovalOutcome {
        let mut state = ApprovalState::AwaitingChannelSelection;
        tracing::debug!(change_id = %request.change_id, ?state, "approval started");

        let outcome = match self.select_channel(request).await {
            Ok(kind) => {
                state = ApprovalState::Waiting(kind);
                tracing::debug!(change_id = %request.change_id, ?state, "channel selected");
                self.run_channel(kind, request).await
            }
            Err(e) => {
                tracing::warn!("approval prompt failed: {:#}", e);
                ApprovalOutcome::Cancelled(CancelReason::ChannelError)
            }
        };

        state = outcome.into();
        tracing::debug!(change_id = %request.change_id, ?state, "approval finished");

        if let ApprovalOutcome::Cancelled(reason) = outcome {
            self.ledger
                .confirm(Confirmation::cancelled(&request.change_id, reason.tag()))
                .await;
        }
        outcome
    }

    async fn select_channel(&self, request: &ApprovalRequest) -> anyhow::Result<ChannelKind> {
        let available = self.available_channels(request);

        if !self.interactive {
            self.prompter.notice(&format!(
                "{} needs approval (risk {:.1}/10){}",
                request.command,
                request.risk_score,
                request
                    .approve_url
                    .as_deref()
                    .map(|u| format!(": {}", u))
                    .unwrap_or_default()
            ));
            return Ok(if available.contains(&ChannelKind::Webhook) {
                ChannelKind::Webhook
            } else {
                ChannelKind::DirectWait
            });
        }

        let prompter = self.prompter.clone();
        let request = request.clone();
        let timeout = self.waiter.settings().timeout;
        tokio::task::spawn_blocking(move || prompter.choose_channel(&request, &available, timeout))
            .await?
    }

    async fn run_channel(&self, kind: ChannelKind, request: &ApprovalRequest) -> ApprovalOutcome {
        let Some(channel) = self
            .channels
            .iter()
            .find(|c| c.kind() == kind && c.is_available(request))
        else {
            tracing::warn!("channel {} is not available", kind);
            return ApprovalOutcome::Cancelled(CancelReason::ChannelError);
        };

        match channel.run(request, &self.waiter).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("approval channel {} failed: {:#}", kind, e);
                ApprovalOutcome::Cancelled(CancelReason::ChannelError)
            }
        }
    }
}
