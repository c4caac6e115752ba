pub mod client;
pub mod http;
pub mod ledger;
pub mod types;

pub use client::{AuthorityError, RiskAuthority, UnconfiguredAuthority};
pub use http::HttpAuthority;
pub use ledger::ConfirmationLedger;
pub use types::*;
