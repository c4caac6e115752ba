//! Outbound side effects of approval channels: webhook notifications and
//! opening the approval page in a browser.

use crate::approval::types::ApprovalRequest;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Pushes an approval request to reviewers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: &ApprovalRequest) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    /// Preformatted, chat-friendly summary
    text: String,
    change_id: &'a str,
    operation: &'a str,
    target: &'a str,
    risk_score: f64,
    reasons: &'a [String],
    human_preview: &'a str,
    approve_url: Option<&'a str>,
}

/// Slack-style incoming webhook. Any non-2xx response is an error.
pub struct WebhookNotifier {
    url: String,
    http_client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

/// The human-readable notification text.
pub fn format_notification(request: &ApprovalRequest) -> String {
    let mut text = format!(
        "saferun: approval needed for `{}` on {} (risk {:.1}/10)",
        request.command, request.target, request.risk_score
    );
    if !request.reasons.is_empty() {
        text.push_str(&format!("\nReasons: {}", request.reasons.join(", ")));
    }
    if !request.human_preview.is_empty() {
        text.push_str(&format!("\n{}", request.human_preview));
    }
    if let Some(ref url) = request.approve_url {
        text.push_str(&format!("\nApprove: {}", url));
    }
    text
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, request: &ApprovalRequest) -> Result<()> {
        let payload = WebhookPayload {
            text: format_notification(request),
            change_id: &request.change_id,
            operation: request.operation.as_str(),
            target: &request.target,
            risk_score: request.risk_score,
            reasons: &request.reasons,
            human_preview: &request.human_preview,
            approve_url: request.approve_url.as_deref(),
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("Webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Webhook returned status {}", status);
        }
        Ok(())
    }
}

/// Opens URLs for the browser channel.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Uses the platform's URL opener (`open`, `xdg-open`, `start`).
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        let mut cmd = if cfg!(target_os = "macos") {
            let mut c = Command::new("open");
            c.arg(url);
            c
        } else if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", "start", "", url]);
            c
        } else {
            let mut c = Command::new("xdg-open");
            c.arg(url);
            c
        };

        let status = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("Failed to launch browser")?;
        if !status.success() {
            bail!("Browser launcher exited with {}", status);
        }
        Ok(())
    }
}
