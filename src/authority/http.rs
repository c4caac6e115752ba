//! HTTP client for the remote risk authority.
//!
//! Transport errors are retried with exponential backoff (`100ms * 2^attempt`).
//! A 5xx is only retried for the status poll; the dry-run and confirm POSTs
//! are never resent once the server answered. 4xx responses are terminal.

use crate::authority::client::{AuthorityError, RiskAuthority};
use crate::authority::types::{
    ChangeStatus, ChangeStatusResponse, Confirmation, DryRunRequest, RemoteVerdict,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

const INITIAL_BACKOFF_MS: u64 = 100;

pub struct HttpAuthority {
    base_url: String,
    api_key: Option<String>,
    http_client: Client,
    max_retries: u32,
}

impl HttpAuthority {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("saferun/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
            max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    /// Send with retries. `build` is called once per attempt.
    async fn send<F>(&self, retry: Retry, build: F) -> Result<Response, AuthorityError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let outcome = self.authorize(build()).send().await;
            let retryable = match outcome {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if retry == Retry::ServerErrors && response.status().is_server_error() =>
                {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    AuthorityError::Api { status, body }
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AuthorityError::Api { status, body });
                }
                Err(e) => AuthorityError::Unreachable(e.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(retryable);
            }
            let wait = backoff(attempt);
            tracing::warn!(
                "remote authority call failed ({}), retrying in {}ms (attempt {}/{})",
                retryable,
                wait.as_millis(),
                attempt + 1,
                self.max_retries
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

/// Which failures a call may resend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Connection-level failures only
    Transport,
    /// Connection-level failures and 5xx responses
    ServerErrors,
}

/// Delay before retry number `attempt` (zero-based).
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS.saturating_mul(1u64 << attempt.min(16)))
}

#[async_trait]
impl RiskAuthority for HttpAuthority {
    async fn dry_run(&self, request: &DryRunRequest) -> Result<RemoteVerdict, AuthorityError> {
        let url = self.url(&format!("/v1/dry-run/{}", request.operation_type));
        let response = self
            .send(Retry::Transport, || self.http_client.post(&url).json(request))
            .await?;
        response
            .json::<RemoteVerdict>()
            .await
            .map_err(|e| AuthorityError::InvalidResponse(e.to_string()))
    }

    async fn change_status(&self, change_id: &str) -> Result<ChangeStatus, AuthorityError> {
        let url = self.url(&format!("/v1/changes/{}", change_id));
        let response = self
            .send(Retry::ServerErrors, || self.http_client.get(&url))
            .await?;
        let body: ChangeStatusResponse = response
            .json()
            .await
            .map_err(|e| AuthorityError::InvalidResponse(e.to_string()))?;
        Ok(body.status)
    }

    async fn confirm(&self, confirmation: &Confirmation) -> Result<(), AuthorityError> {
        let url = self.url("/v1/changes/confirm");
        self.send(Retry::Transport, || self.http_client.post(&url).json(confirmation))
            .await?;
        Ok(())
    }
}
