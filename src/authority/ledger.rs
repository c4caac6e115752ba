//! Exactly-once confirmation bookkeeping.
//!
//! Both the approval orchestrator (cancellations) and the execution guard
//! (applied/failed) confirm through the same ledger, so a change id can never
//! be confirmed twice or with two different statuses.

use crate::authority::client::RiskAuthority;
use crate::authority::types::{Confirmation, ConfirmationStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub struct ConfirmationLedger {
    authority: Arc<dyn RiskAuthority>,
    sent: Mutex<BTreeMap<String, ConfirmationStatus>>,
}

impl ConfirmationLedger {
    pub fn new(authority: Arc<dyn RiskAuthority>) -> Self {
        Self {
            authority,
            sent: Mutex::new(BTreeMap::new()),
        }
    }

    /// Send a confirmation unless this change id already has one.
    /// Returns `false` when skipped. Transport failures are logged, not returned:
    /// the change still counts as confirmed so it is never retried with another status.
    pub async fn confirm(&self, confirmation: Confirmation) -> bool {
        {
            let mut sent = match self.sent.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(existing) = sent.get(&confirmation.change_id) {
                tracing::debug!(
                    change_id = %confirmation.change_id,
                    "already confirmed as {}, skipping {}",
                    existing,
                    confirmation.status
                );
                return false;
            }
            sent.insert(confirmation.change_id.clone(), confirmation.status);
        }

        if let Err(e) = self.authority.confirm(&confirmation).await {
            tracing::warn!(
                change_id = %confirmation.change_id,
                "failed to confirm change as {}: {}",
                confirmation.status,
                e
            );
        }
        true
    }

    pub fn status_of(&self, change_id: &str) -> Option<ConfirmationStatus> {
        let sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.get(change_id).copied()
    }
}
