//! saferun: operation guard for destructive git commands.
//!
//! Classifies a git invocation, resolves it against the repository policy,
//! asks the remote risk authority and a human when needed, and only then runs
//! the real command. The binaries are in `main.rs` and `shim/main.rs`.

pub mod approval;
pub mod audit;
pub mod authority;
pub mod cli;
pub mod config;
pub mod git;
pub mod guard;
pub mod metrics;
pub mod policy;
pub mod utils;

/// Logging to stderr, `saferun=warn` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("saferun=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
