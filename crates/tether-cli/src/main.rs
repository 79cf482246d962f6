//! Tether CLI - a git client for the smart HTTP protocol.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tether_transport::CancellationToken;

mod commands;
mod config;
mod logging;

use logging::LogFormat;

/// Exit code for usage errors and failures before any ref was touched.
const EXIT_FATAL: u8 = 128;

/// Tether - clone, fetch, push and pull over smart HTTP
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Configuration file (default: ~/.config/tether/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clone a repository into a new directory
    Clone {
        /// Repository URL
        url: String,
        /// Destination directory (default: derived from the URL)
        dir: Option<PathBuf>,
        /// Check out this branch instead of the remote HEAD
        #[arg(short, long)]
        branch: Option<String>,
        /// Fetch only this many commits of history
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Download objects and refs from a remote
    Fetch {
        /// Remote name
        #[arg(default_value = "origin")]
        remote: String,
        /// Refspecs to fetch instead of the configured ones
        refspecs: Vec<String>,
        /// Remove tracking refs whose remote branch is gone
        #[arg(short, long)]
        prune: bool,
        /// Limit history to this many commits
        #[arg(long)]
        depth: Option<u32>,
        /// Allow non-fast-forward updates
        #[arg(short, long)]
        force: bool,
    },

    /// Update remote refs and send the objects they need
    Push {
        /// Remote name
        #[arg(default_value = "origin")]
        remote: String,
        /// Refspecs to push (default: the current branch)
        refspecs: Vec<String>,
        /// Allow non-fast-forward updates
        #[arg(short, long)]
        force: bool,
    },

    /// Fetch and integrate the current branch's upstream
    Pull {
        /// Remote name
        #[arg(default_value = "origin")]
        remote: String,
        /// Rebase instead of merging
        #[arg(long)]
        rebase: bool,
        /// Stash local changes around the pull
        #[arg(long)]
        autostash: bool,
        /// Limit history to this many commits
        #[arg(long)]
        depth: Option<u32>,
    },

    /// List the refs a remote advertises
    LsRemote {
        /// Repository URL
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_FATAL } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let config = match config::Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let level = if cli.verbose > 0 {
        logging::level_for_verbosity(cli.verbose).to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "warn".to_string())
    };
    let format = cli.log_format.or(config.log_format).unwrap_or_default();
    logging::init_logging(&level, format);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling");
            on_signal.cancel();
        }
    });

    let ctx = commands::Context {
        config,
        cancel,
        quiet: cli.quiet,
    };
    let result = match cli.command {
        Commands::Clone {
            url,
            dir,
            branch,
            depth,
        } => commands::clone(&ctx, &url, dir, branch, depth).await,
        Commands::Fetch {
            remote,
            refspecs,
            prune,
            depth,
            force,
        } => commands::fetch(&ctx, remote, refspecs, prune, depth, force).await,
        Commands::Push {
            remote,
            refspecs,
            force,
        } => commands::push(&ctx, remote, refspecs, force).await,
        Commands::Pull {
            remote,
            rebase,
            autostash,
            depth,
        } => commands::pull(&ctx, remote, rebase, autostash, depth).await,
        Commands::LsRemote { url } => commands::ls_remote(&ctx, &url).await,
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(EXIT_FATAL)),
        Err(e) => {
            eprintln!("fatal: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
