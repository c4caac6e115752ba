//! `saferun bypass-code`: issue a one-time bypass code.
//!
//! The code is stored under the saferun home with an expiry. Entering it at an
//! approval prompt clears one operation, and is audited as a bypass.

use crate::approval::FileBypassStore;
use crate::config::Settings;
use crate::policy::ApiSection;
use anyhow::{bail, Result};
use chrono::{Duration, Local, Utc};
use colored::Colorize;

pub const DEFAULT_TTL_MINUTES: i64 = 15;
const MAX_TTL_MINUTES: i64 = 24 * 60;

/// Run the `saferun bypass-code` command.
pub fn run_bypass_code(ttl_minutes: i64) -> Result<()> {
    if !(1..=MAX_TTL_MINUTES).contains(&ttl_minutes) {
        bail!(
            "--ttl-minutes must be between 1 and {}, got {}",
            MAX_TTL_MINUTES,
            ttl_minutes
        );
    }

    let settings = Settings::load(&ApiSection::default())?;
    let store = FileBypassStore::new(settings.bypass_file());
    let (code, expires_at) = store.issue(Duration::minutes(ttl_minutes), Utc::now())?;
    tracing::debug!("issued bypass code in {}", store.path().display());

    println!();
    println!("  {} Bypass code: {}", "✓".green().bold(), code.bold());
    println!(
        "  Valid once, until {}",
        expires_at.with_timezone(&Local).format("%H:%M:%S").to_string().cyan()
    );
    println!(
        "  {}",
        "Bypassed operations are logged separately from approvals.".dimmed()
    );
    println!();
    Ok(())
}
