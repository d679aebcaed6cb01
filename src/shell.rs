//! Interactive command loop
//!
//! Reads one command per line and drives the [`ExposureController`]. Every
//! wait (reading a line, provisioning, reporting) also watches the shutdown
//! channel, so a signal abandons whatever is in flight. The loop itself never
//! releases anything: [`run_then_teardown`] runs the teardown once the loop
//! returns or panics.

use crate::core::cleanup::TeardownReport;
use crate::core::controller::{ExposureController, ReportExit, port_in_use, shutdown_requested};
use crate::core::error::{ExposeError, ValidationError, firewall_suggestions};
use crate::core::firewall::{FirewallBackend, RuleOutcome};
use crate::core::gateway::GatewayBackend;
use crate::core::types::{ExposeRequest, rule_name};
use crate::validators::parse_public_args;
use std::io::Write;
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::watch;
use tracing::{error, info, warn};

shadow_rs::shadow!(build);

/// Commands listed by `help`
pub const COMMANDS: [&str; 6] = ["public", "status", "help", "credits", "clear", "exit"];

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Empty,
    Public(Result<ExposeRequest, ValidationError>),
    Status,
    Help,
    Credits,
    Clear,
    Exit,
    Unknown(String),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Self::Empty;
        };
        let params: Vec<&str> = words.collect();

        match command {
            "public" => Self::Public(parse_public_args(&params)),
            "status" => Self::Status,
            "help" => Self::Help,
            "credits" => Self::Credits,
            "clear" => Self::Clear,
            "exit" => Self::Exit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Why the shell stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// `exit`, typed at the prompt or while reporting
    Command,
    Signal,
    InputClosed,
}

impl From<ReportExit> for ShellExit {
    fn from(exit: ReportExit) -> Self {
        match exit {
            ReportExit::ExitCommand => Self::Command,
            ReportExit::Signal => Self::Signal,
            ReportExit::InputClosed => Self::InputClosed,
        }
    }
}

/// Runs the command loop until `exit`, a shutdown signal or end of input.
///
/// A successful `public` hands over to the reporting loop; when reporting
/// ends, the shell ends too.
pub async fn run<F, G, R, W>(
    controller: &ExposureController<F, G>,
    input: &mut Lines<R>,
    shutdown: &mut watch::Receiver<bool>,
    out: &mut W,
) -> ShellExit
where
    F: FirewallBackend,
    G: GatewayBackend,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    loop {
        print_prompt(out);

        let line = tokio::select! {
            biased;
            () = shutdown_requested(shutdown) => return ShellExit::Signal,
            line = input.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                let _ = writeln!(out);
                return ShellExit::InputClosed;
            }
            Err(e) => {
                warn!("Failed to read command: {e}");
                return ShellExit::InputClosed;
            }
        };

        match ShellCommand::parse(&line) {
            ShellCommand::Empty => {}
            ShellCommand::Exit => {
                let _ = writeln!(out, "[info] Ending session...");
                return ShellExit::Command;
            }
            ShellCommand::Help => print_help(out),
            ShellCommand::Credits => print_credits(out),
            ShellCommand::Clear => clear_screen(out),
            ShellCommand::Status => print_status(controller, out),
            ShellCommand::Unknown(command) => {
                let _ = writeln!(
                    out,
                    "Unknown command: {command}. Type help for a list of commands."
                );
            }
            ShellCommand::Public(Err(e)) => {
                let _ = writeln!(out, "[error] {e}");
            }
            ShellCommand::Public(Ok(request)) => {
                if let Some(exit) = public(controller, request, input, shutdown, out).await {
                    return exit;
                }
            }
        }
    }
}

/// Runs the shell in its own task, then tears the session down.
///
/// The teardown runs however the shell ended, including a panic inside it.
/// The exit is `None` when the shell task did not return normally.
pub async fn run_then_teardown<F, G, R, W>(
    controller: ExposureController<F, G>,
    mut input: Lines<R>,
    mut shutdown: watch::Receiver<bool>,
    mut out: W,
) -> (Option<ShellExit>, TeardownReport)
where
    F: FirewallBackend,
    G: GatewayBackend,
    R: AsyncBufRead + Unpin + Send + 'static,
    W: Write + Send + 'static,
{
    let coordinator = controller.coordinator();
    let shell = tokio::spawn(async move {
        run(&controller, &mut input, &mut shutdown, &mut out).await
    });

    let exit = match shell.await {
        Ok(exit) => {
            info!("Shell finished: {exit:?}");
            Some(exit)
        }
        Err(e) if e.is_panic() => {
            error!("Shell task panicked: {e}");
            None
        }
        Err(e) => {
            error!("Shell task failed: {e}");
            None
        }
    };

    (exit, coordinator.teardown().await)
}

/// Exposes the port and reports until told to stop. `None` means the
/// exposure failed and the prompt continues.
async fn public<F, G, R, W>(
    controller: &ExposureController<F, G>,
    request: ExposeRequest,
    input: &mut Lines<R>,
    shutdown: &mut watch::Receiver<bool>,
    out: &mut W,
) -> Option<ShellExit>
where
    F: FirewallBackend,
    G: GatewayBackend,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let ExposeRequest { port, protocol } = request;
    let _ = writeln!(
        out,
        "[info] Adding firewall rule '{}' for {protocol}/{port}...",
        rule_name(port, protocol)
    );
    let _ = out.flush();

    let result = tokio::select! {
        biased;
        () = shutdown_requested(shutdown) => return Some(ShellExit::Signal),
        result = controller.expose(request) => result,
    };

    let exposure = match result {
        Ok(exposure) => exposure,
        Err(e) => {
            print_expose_error(out, &e);
            return None;
        }
    };

    match &exposure.rule_outcome {
        RuleOutcome::Added => {}
        RuleOutcome::AlreadyPresent => {
            let _ = writeln!(
                out,
                "[warn] Firewall rule '{}' already exists",
                exposure.rule_name
            );
        }
        RuleOutcome::Unverified { reason } => {
            let _ = writeln!(out, "[warn] While adding the firewall rule: {reason}");
            let _ = writeln!(
                out,
                "[warn] Make sure minishell may run nft, or create the rule manually."
            );
        }
    }
    if !port_in_use(port, protocol).await {
        let _ = writeln!(out, "[warn] Nothing is listening on {protocol}/{port} yet");
    }
    let _ = writeln!(
        out,
        "[info] Port mapping succeeded! Connect via {}",
        exposure.address.endpoint()
    );

    let exit = controller.report(&exposure, input, shutdown, out).await;
    let _ = writeln!(out, "[info] Leaving public mode...");
    Some(exit.into())
}

fn print_expose_error<W: Write>(out: &mut W, error: &ExposeError) {
    match error {
        ExposeError::Firewall(e) => {
            let _ = writeln!(out, "[error] Could not add firewall rule: {e}");
            for hint in firewall_suggestions(e) {
                let _ = writeln!(out, "        {hint}");
            }
        }
        ExposeError::Discovery(_) | ExposeError::Mapping(_) => {
            let _ = writeln!(out, "[error] {error}");
            let _ = writeln!(
                out,
                "[error] Port mapping failed. There may be no UPnP device, or the port is taken."
            );
        }
    }
    if error.rule_still_held() {
        let _ = writeln!(out, "[info] The firewall rule stays until the session ends.");
    }
}

fn print_prompt<W: Write>(out: &mut W) {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let _ = write!(out, "{cwd} $ ");
    let _ = out.flush();
}

fn print_help<W: Write>(out: &mut W) {
    let _ = writeln!(out, "\nAvailable commands:");
    for command in COMMANDS {
        let _ = writeln!(out, " - {command}");
    }
    let _ = writeln!(out, "\nUsage: public <TCP|UDP> --port:<num>\n");
}

fn print_credits<W: Write>(out: &mut W) {
    let _ = writeln!(out, "\nMiniShell {}", build::PKG_VERSION);
    let _ = writeln!(out, "Commit: {}", build::SHORT_COMMIT);
    let _ = writeln!(out, "Built: {}\n", build::BUILD_TIME);
}

fn clear_screen<W: Write>(out: &mut W) {
    if let Err(e) = crossterm::execute!(
        out,
        crossterm::terminal::Clear(crossterm::terminal::ClearType::All),
        crossterm::cursor::MoveTo(0, 0)
    ) {
        warn!("Failed to clear screen: {e}");
    }
}

fn print_status<F, G, W>(controller: &ExposureController<F, G>, out: &mut W)
where
    F: FirewallBackend,
    G: GatewayBackend,
    W: Write,
{
    let session = controller.session();
    let _ = writeln!(out, "[info] State: {}", controller.state());
    match session.rule_name() {
        Some(name) => {
            let _ = writeln!(out, "[info] Firewall rule: {name}");
        }
        None => {
            let _ = writeln!(out, "[info] No firewall rule held");
        }
    }
    if let Some(endpoint) = session.public_endpoint() {
        let _ = writeln!(out, "[info] Public address: {endpoint}");
    }
}
