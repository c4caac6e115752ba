//! `saferun init`: write a starter policy file.
//!
//! Creates `.saferun.yaml` at the repository root (or the current directory
//! outside a repository) from one of the built-in templates.

use crate::cli::git::real_git_binary;
use crate::git::SystemGit;
use crate::policy::defaults::{self, POLICY_FILE_NAME};
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

/// Run the `saferun init` command.
pub fn run_init(template: &str, output_path: Option<&str>, force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    let output_file = match output_path {
        Some(p) => PathBuf::from(p),
        None => SystemGit::discover_root(&real_git_binary(), &cwd, &[])
            .unwrap_or(cwd)
            .join(POLICY_FILE_NAME),
    };

    if output_file.exists() && !force {
        println!(
            "{} A policy file already exists at {}",
            "⚠".yellow(),
            output_file.display()
        );
        println!("  Use --force to overwrite it, or edit it directly.");
        return Ok(());
    }

    let yaml_content = defaults::get_default_policy(template).ok_or_else(|| {
        let available: Vec<String> = defaults::available_templates()
            .iter()
            .map(|(name, desc)| format!("  {} — {}", name.bold(), desc))
            .collect();
        anyhow::anyhow!(
            "Unknown template '{}'. Available templates:\n{}",
            template,
            available.join("\n")
        )
    })?;

    std::fs::write(&output_file, yaml_content)
        .with_context(|| format!("Failed to write policy file: {}", output_file.display()))?;

    println!();
    println!(
        "  {} Created {}",
        "✓".green().bold(),
        output_file.display().to_string().bold()
    );
    println!("  Template: {}", template.cyan());
    println!();
    println!("  {} What this policy does:", "ℹ".blue());

    match defaults::get_default_policy(template) {
        Some(defaults::ENFORCE_YAML) => {
            println!("    • Force pushes and unmerged branch deletes need approval");
            println!("    • Deleting a fully merged branch just runs");
            println!("    • Hard resets, forced cleans and rebases print a warning");
            println!("    • Anything touching main or master needs approval");
            println!("    • Commits with --no-verify are blocked");
        }
        Some(defaults::STRICT_YAML) => {
            println!("    • Every guarded operation needs approval");
            println!("    • Force pushes and --no-verify commits are blocked");
            println!("    • Bypass codes are not accepted");
        }
        Some(defaults::MONITOR_YAML) => {
            println!("    • Nothing is stopped");
            println!("    • Every guarded operation is logged");
        }
        _ => {}
    }

    println!();
    println!("  {} Next steps:", "→".blue());
    println!(
        "    1. Review the policy: {}",
        format!("saferun check {}", output_file.display()).dimmed()
    );
    println!(
        "    2. Route git through saferun: {}",
        "alias git='saferun git'".dimmed()
    );
    println!("    3. Check what happened: {}", "saferun log".dimmed());
    println!();

    Ok(())
}
