//! saferun: operation guard for destructive git commands.
//!
//! Quick start:
//!   saferun init             # write a starter .saferun.yaml
//!   saferun git push -f      # run a git command through the guard
//!   saferun log              # see what was allowed, blocked or approved
//!
//! For more info: saferun --help

use clap::{Parser, Subcommand};
use colored::Colorize;
use saferun::audit::{AuditLogger, AuditReader};
use saferun::cli;
use saferun::config::{load_policy, Settings};
use std::path::PathBuf;

/// saferun: think before git rewrites history.
#[derive(Parser)]
#[command(
    name = "saferun",
    version,
    about = "Guard destructive git commands",
    long_about = "saferun intercepts force pushes, hard resets, branch deletions,\n\
                  forced cleans, rebases and --no-verify commits, and decides\n\
                  whether each one runs, warns, needs approval or is blocked.\n\n\
                  Quick start:\n  \
                  saferun init             # write a starter policy\n  \
                  saferun git <args>       # run git through the guard\n  \
                  saferun log              # see what happened"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a git command through the guard
    Git {
        /// Arguments passed to git
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
        args: Vec<String>,
    },

    /// Create a policy file from a template
    Init {
        #[arg(short, long, default_value = "enforce", help = "enforce, strict or monitor")]
        template: String,
        #[arg(short, long, help = "Where to write the policy (default: repo root)")]
        output: Option<String>,
        #[arg(long, help = "Overwrite an existing policy file")]
        force: bool,
    },

    /// Validate your policy file
    Check {
        /// Path to policy file (default: nearest .saferun.yaml)
        policy: Option<PathBuf>,
    },

    /// See what saferun allowed, blocked and approved
    Log {
        #[arg(long, help = "Filter: force_push, branch_delete, reset_hard, clean, rebase, commit_no_verify")]
        operation: Option<String>,

        #[arg(long, help = "Filter: executed, api_allows, approved, bypassed, blocked, blocked_api_error, cancelled, failed")]
        outcome: Option<String>,

        #[arg(long, help = "Filter by repository (owner/name)")]
        repo: Option<String>,

        #[arg(short = 'n', long, help = "Show only the most recent N entries")]
        limit: Option<usize>,

        #[arg(long, help = "Show only the summary")]
        summary: bool,
    },

    /// Issue a one-time bypass code
    BypassCode {
        #[arg(long, default_value_t = cli::bypass::DEFAULT_TTL_MINUTES)]
        ttl_minutes: i64,
    },
}

#[tokio::main]
async fn main() {
    saferun::init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        None => show_status(),

        Some(Commands::Git { args }) => match cli::git::run_git_command(args).await {
            Ok(code) => std::process::exit(code),
            Err(e) => Err(e),
        },

        Some(Commands::Init {
            template,
            output,
            force,
        }) => cli::init::run_init(&template, output.as_deref(), force),

        Some(Commands::Check { policy }) => cli::check::run_check(policy.as_deref()),

        Some(Commands::Log {
            operation,
            outcome,
            repo,
            limit,
            summary,
        }) => cli::log::run_log(cli::log::LogOptions {
            operation,
            outcome,
            repo,
            limit,
            summary_only: summary,
        }),

        Some(Commands::BypassCode { ttl_minutes }) => cli::bypass::run_bypass_code(ttl_minutes),
    };

    if let Err(e) = result {
        eprintln!();
        eprintln!("  {} {}", "✗".red().bold(), e);
        for cause in e.chain().skip(1) {
            eprintln!("  {} {}", "caused by:".dimmed(), cause);
        }
        eprintln!();
        std::process::exit(1);
    }
}

/// `saferun` with no arguments: policy in effect and recent activity.
fn show_status() -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let (policy, path) = load_policy(&cwd)?;
    let settings = Settings::load(&policy.api)?;

    println!();
    println!("  {}  {}", "saferun".bold(), "— git operation guard".green());
    println!("  {}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".dimmed());
    println!();
    match path {
        Some(ref p) => println!("  Policy: {}", p.display().to_string().dimmed()),
        None => println!(
            "  Policy: {} ({})",
            "built-in defaults".yellow(),
            "saferun init".bold()
        ),
    }
    println!("  Mode:   {}", policy.mode.to_string().cyan());
    println!(
        "  Remote: {}",
        settings
            .api_url
            .as_deref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "not configured, approvals will block".red().to_string())
    );

    let reader = AuditReader::with_path(AuditLogger::default_path(&settings.saferun_home));
    if let Ok(entries) = reader.read_all() {
        if !entries.is_empty() {
            let summary = AuditReader::summarize(&entries);
            println!();
            println!("  {}", summary.one_line().dimmed());
        }
    }

    println!();
    println!("  {}", "Commands:".dimmed());
    println!("    {}   run git through the guard", "saferun git <args>".bold());
    println!("    {}          see what happened", "saferun log".bold());
    println!("    {}        validate your policy", "saferun check".bold());
    println!("    {}  issue a one-time bypass code", "saferun bypass-code".bold());
    println!();

    Ok(())
}
