//! saferun-shim: the git interceptor binary.
//!
//! Installed (or symlinked) as `git` ahead of the real git on `PATH`.
//! Every invocation is routed through the saferun guard, which passes
//! non-dangerous commands straight to the real git.
//!
//! How it works:
//! 1. Child processes spawned by saferun carry `SAFERUN_INTERCEPTED=1`;
//!    those go straight to the real git so nothing is guarded twice
//! 2. Everything else goes through the same pipeline as `saferun git`
//! 3. The real git is `SAFERUN_REAL_GIT`, or the first `git` on `PATH`
//!    that isn't this binary
//!
//! Usage:
//!   ln -s "$(which saferun-shim)" ~/.local/bin/git
//!   saferun-shim push --force origin main      # same as `saferun git ...`

use saferun::cli::git::{real_git_binary, run_git_command};
use saferun::git::executor::{passthrough, INTERCEPTED_ENV};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if env::var_os(INTERCEPTED_ENV).is_some() {
        let code = match passthrough(&real_git_binary(), &args) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("[saferun] Error: {:#}", e);
                1
            }
        };
        process::exit(code);
    }

    saferun::init_tracing();

    match run_git_command(args).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("[saferun] Error: {:#}", e);
            process::exit(1);
        }
    }
}
