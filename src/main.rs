//! `MiniShell` - expose a local port to the internet, and take it back
//!
//! # Usage
//!
//! ```bash
//! # Start the shell
//! minishell
//! /home/me $ public TCP --port:25565
//!
//! # Shell options
//! minishell --refresh 5 --discovery-timeout 4000
//! minishell --no-audit --log-level debug
//!
//! # Configuration
//! minishell config                   # Print the effective configuration
//! minishell config --write-default   # Write config.json with defaults
//! ```
//!
//! # Shutdown
//!
//! `exit`, end of input, SIGINT and SIGTERM all end in the same teardown.
//! A second signal during shutdown exits immediately with status 130.

use clap::{Parser, Subcommand};
use minishell::audit::AuditLog;
use minishell::config::{self, AppConfig};
use minishell::core::context::ExposureContext;
use minishell::core::controller::ExposureController;
use minishell::core::firewall::{FirewallRuleProvisioner, NftBackend};
use minishell::core::gateway::{GatewayProtocolClient, IgdBackend};
use minishell::shell;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tracing::{info, warn};

/// Exit status when a second signal interrupts the teardown
const FORCED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "minishell")]
#[command(
    about = "MiniShell - expose a local port through the firewall and the router",
    long_about = None
)]
struct Cli {
    /// Configuration file (default: config.json in the data directory)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Status refresh interval while a port is public (1-3600)
    #[arg(long, value_name = "SECONDS")]
    refresh: Option<u64>,

    /// How long to wait for the router to answer discovery (100-60000)
    #[arg(long, value_name = "MS")]
    discovery_timeout: Option<u64>,

    /// Do not write the audit log
    #[arg(long)]
    no_audit: bool,

    /// Log level for minishell.log (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as JSON
    Config {
        /// Write the default configuration instead
        #[arg(long)]
        write_default: bool,
    },
}

impl Cli {
    fn apply_overrides(&self, mut config: AppConfig) -> AppConfig {
        if let Some(secs) = self.refresh {
            config.refresh_interval_secs = secs;
        }
        if let Some(ms) = self.discovery_timeout {
            config.gateway.discovery_timeout_ms = ms;
        }
        if self.no_audit {
            config.audit_enabled = false;
        }
        config.normalized()
    }
}

fn main() -> ExitCode {
    let _ = minishell::utils::ensure_dirs();
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let loaded = runtime.block_on(config::load_config(cli.config.as_deref()));
    let config = cli.apply_overrides(loaded);

    let code = match &cli.command {
        Some(Commands::Config { write_default }) => {
            match runtime.block_on(handle_config(&config, cli.config.as_deref(), *write_default)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        None => runtime.block_on(run_session(config)),
    };

    // A pending blocking read on stdin must not hold the process open
    runtime.shutdown_background();
    code
}

fn init_logging(level: tracing::Level) {
    let builder = tracing_subscriber::fmt().with_max_level(level);

    if let Some(mut log_path) = minishell::utils::get_state_dir() {
        log_path.push("minishell.log");
        if let Ok(file) = std::fs::File::create(log_path) {
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
            return;
        }
    }
    builder.with_writer(std::io::stderr).init();
}

async fn handle_config(
    config: &AppConfig,
    path: Option<&Path>,
    write_default: bool,
) -> minishell::Result<()> {
    if write_default {
        let written = config::save_config(&AppConfig::default(), path).await?;
        println!("Wrote default configuration to {}", written.display());
    } else {
        println!("{}", serde_json::to_string_pretty(config)?);
    }
    Ok(())
}

async fn run_session(config: AppConfig) -> ExitCode {
    let audit = if config.audit_enabled {
        match AuditLog::new() {
            Ok(audit) => Some(audit),
            Err(e) => {
                warn!("Audit log disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let ctx = ExposureContext::new(
        FirewallRuleProvisioner::new(NftBackend::new(config.nft_options())),
        GatewayProtocolClient::new(IgdBackend, config.gateway_options()),
    )
    .with_audit(audit);
    let controller = ExposureController::new(Arc::new(ctx), config.report_options());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signals = tokio::spawn(watch_signals(shutdown_tx));

    let input = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let (_, report) =
        shell::run_then_teardown(controller, input, shutdown_rx, std::io::stdout()).await;
    print!("{report}");
    if report.has_failures() {
        warn!("Teardown left resources behind");
    }

    signals.abort();
    ExitCode::SUCCESS
}

/// Turns SIGINT/SIGTERM into the shutdown flag. A signal arriving after the
/// flag is set exits the process at once.
async fn watch_signals(shutdown: watch::Sender<bool>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {e}");
            None
        }
    };

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Cannot listen for SIGINT: {e}");
                    return;
                }
            }
            Some(()) = async {
                match terminate.as_mut() {
                    Some(stream) => stream.recv().await,
                    None => std::future::pending().await,
                }
            } => {}
        }

        if *shutdown.borrow() {
            eprintln!("\n[warn] Forced exit, cleanup skipped");
            std::process::exit(FORCED_EXIT_CODE);
        }
        info!("Shutdown requested by signal");
        println!("\n[info] Shutting down...");
        let _ = shutdown.send(true);
    }
}
