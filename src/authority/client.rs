use crate::authority::types::{ChangeStatus, Confirmation, DryRunRequest, RemoteVerdict};
use async_trait::async_trait;
use thiserror::Error;

/// Errors from the remote risk authority.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("No remote authority configured")]
    NotConfigured,

    #[error("Remote authority unreachable: {0}")]
    Unreachable(String),

    #[error("Remote authority returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response from remote authority: {0}")]
    InvalidResponse(String),
}

impl AuthorityError {
    /// Audit reason tag for a fail-secure block.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            AuthorityError::NotConfigured | AuthorityError::Unreachable(_) => "api_unreachable",
            AuthorityError::Api { .. } | AuthorityError::InvalidResponse(_) => "api_error",
        }
    }
}

/// The remote policy/risk service.
#[async_trait]
pub trait RiskAuthority: Send + Sync {
    /// Submit one target for assessment.
    async fn dry_run(&self, request: &DryRunRequest) -> Result<RemoteVerdict, AuthorityError>;

    /// Current status of a change, re-read on every poll.
    async fn change_status(&self, change_id: &str) -> Result<ChangeStatus, AuthorityError>;

    /// Report the terminal status of a change. Called at most once per change id.
    async fn confirm(&self, confirmation: &Confirmation) -> Result<(), AuthorityError>;
}

/// Stand-in when no URL is configured: every call fails as unreachable.
pub struct UnconfiguredAuthority;

#[async_trait]
impl RiskAuthority for UnconfiguredAuthority {
    async fn dry_run(&self, _: &DryRunRequest) -> Result<RemoteVerdict, AuthorityError> {
        Err(AuthorityError::NotConfigured)
    }

    async fn change_status(&self, _: &str) -> Result<ChangeStatus, AuthorityError> {
        Err(AuthorityError::NotConfigured)
    }

    async fn confirm(&self, _: &Confirmation) -> Result<(), AuthorityError> {
        Err(AuthorityError::NotConfigured)
    }
}
