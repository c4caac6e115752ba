//! `saferun log`: browse the audit log.
//!
//! Shows every guarded operation: what ran, what was blocked, what needed
//! approval and what went through on a bypass code.

use crate::audit::{AuditLogger, AuditReader, LogFilter, Outcome};
use crate::config::Settings;
use crate::git::OperationKind;
use crate::policy::ApiSection;
use anyhow::{Context, Result};
use colored::Colorize;

/// Options for the `saferun log` command.
#[derive(Debug, Default)]
pub struct LogOptions {
    pub operation: Option<String>,
    pub outcome: Option<String>,
    pub repo: Option<String>,
    pub limit: Option<usize>,
    pub summary_only: bool,
}

/// Run the `saferun log` command.
pub fn run_log(options: LogOptions) -> Result<()> {
    let settings = Settings::load(&ApiSection::default())?;
    let reader = AuditReader::with_path(AuditLogger::default_path(&settings.saferun_home));
    let entries = reader.read_all().context("Failed to read audit log")?;

    if entries.is_empty() {
        println!();
        println!("  {} No audit entries found.", "ℹ".blue());
        println!(
            "  Guarded git commands are logged to {}",
            reader.log_path().display().to_string().dimmed()
        );
        println!();
        return Ok(());
    }

    let filter = LogFilter {
        operation: parse_filter(options.operation.as_deref(), OperationKind::from_str_loose, "operation")?,
        outcome: parse_filter(options.outcome.as_deref(), Outcome::from_str_loose, "outcome")?,
        repo: options.repo,
        limit: options.limit,
    };
    let filtered = AuditReader::filter_entries(&entries, &filter);
    let summary = AuditReader::summarize(&filtered);

    println!();
    if options.summary_only {
        println!(
            "  {} total | {} executed | {} approved | {} bypassed | {} blocked | {} cancelled | {} failed",
            summary.total.to_string().bold(),
            summary.executed.to_string().green().bold(),
            summary.approved.to_string().yellow().bold(),
            summary.bypassed.to_string().magenta().bold(),
            summary.blocked.to_string().red().bold(),
            summary.cancelled.to_string().dimmed(),
            summary.failed.to_string().red(),
        );
    } else {
        for entry in &filtered {
            println!("  {}", AuditReader::format_entry(entry));
        }
        println!();
        println!(
            "  {} {}",
            "─".repeat(40).dimmed(),
            summary.one_line().dimmed()
        );
    }
    println!();

    Ok(())
}

/// Unknown filter values are an error rather than silently matching everything.
fn parse_filter<T>(raw: Option<&str>, parse: fn(&str) -> Option<T>, what: &str) -> Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(value) => parse(value)
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("Unknown {} filter '{}'", what, value)),
    }
}
