pub mod bypass;
pub mod channels;
pub mod notify;
pub mod orchestrator;
pub mod terminal;
pub mod types;

use crate::approval::types::{ApprovalRequest, ChannelKind};
use anyhow::Result;
use std::time::Duration;

pub use bypass::{BypassStore, FileBypassStore};
pub use channels::{ApprovalChannel, StatusWaiter, WaitSettings};
pub use notify::{BrowserOpener, Notifier, SystemBrowser, WebhookNotifier};
pub use orchestrator::{ApprovalDeps, ApprovalOrchestrator};
pub use terminal::{PlainPrompter, TerminalPrompter};
pub use types::{ApprovalOutcome, CancelReason};

/// The human side of an approval.
/// Implementations are blocking; the orchestrator calls them off the runtime.
pub trait Prompter: Send + Sync {
    /// Show the request and the available channels, return the chosen one.
    /// Returns `Cancel` if nothing is chosen before `timeout`.
    fn choose_channel(
        &self,
        request: &ApprovalRequest,
        channels: &[ChannelKind],
        timeout: Duration,
    ) -> Result<ChannelKind>;

    /// Read one bypass code. `None` means the user gave up.
    fn read_bypass_code(&self, attempt: u32, max_attempts: u32) -> Result<Option<String>>;

    fn notice(&self, message: &str);
}
