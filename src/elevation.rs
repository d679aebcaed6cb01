//! Privilege elevation for the firewall tool
//!
//! minishell runs as an unprivileged user and only elevates to run `nft`.
//!
//! # Elevation Strategy
//!
//! - **Already root or `none`**: run the tool directly
//! - **`auto`**: `run0` when available (systemd v256+, no SUID), otherwise
//!   `sudo` on a terminal and `pkexec` without one
//! - **`sudo` / `run0` / `pkexec`**: use exactly that method
//!
//! # Environment Variables
//!
//! - `MINISHELL_ELEVATION_METHOD`: overrides the configured method
//!   (`none`, `auto`, `sudo`, `run0`, `pkexec`). Useful with sudoers
//!   NOPASSWD rules.
//!
//! # Security
//!
//! Commands are constructed without shell interpolation; the rule JSON is
//! written to the tool's stdin, never into argv.

use serde::{Deserialize, Serialize};
use std::io;
use strum::{Display, EnumString};
use tokio::process::Command;

/// Environment variable overriding the configured elevation method
pub const ELEVATION_ENV: &str = "MINISHELL_ELEVATION_METHOD";

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `MINISHELL_ELEVATION_METHOD`
    #[error("Invalid MINISHELL_ELEVATION_METHOD '{0}'. Valid options: none, auto, sudo, run0, pkexec")]
    InvalidMethod(String),

    /// The configured tool command line is empty
    #[error("Empty command line for the firewall tool")]
    EmptyCommand,

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How the firewall tool gets its privileges
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ElevationMethod {
    /// Run the tool as-is
    None,
    #[default]
    Auto,
    Sudo,
    Run0,
    Pkexec,
}

impl ElevationMethod {
    /// Applies the `MINISHELL_ELEVATION_METHOD` override, if set and non-empty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMethod` for an unknown override value.
    pub fn resolve(configured: Self) -> Result<Self, ElevationError> {
        match std::env::var(ELEVATION_ENV) {
            Ok(value) if !value.trim().is_empty() => value
                .trim()
                .parse()
                .map_err(|_| ElevationError::InvalidMethod(value.to_lowercase())),
            _ => Ok(configured),
        }
    }
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(elevator: &str, program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(elevator);
    cmd.arg(program).args(args);
    cmd
}

fn explicit(elevator: &str, program: &str, args: &[String]) -> Result<Command, ElevationError> {
    if !binary_exists(elevator) {
        return Err(ElevationError::MethodNotAvailable(elevator.into()));
    }
    Ok(wrapped(elevator, program, args))
}

/// Builds the command for `command_line` (program plus leading arguments)
/// followed by `args`, elevated according to `method`.
///
/// # Errors
///
/// Returns `Err` if the command line is empty, the override is invalid,
/// or the selected elevation binary is missing.
pub fn create_elevated_command(
    method: ElevationMethod,
    command_line: &[String],
    args: &[&str],
) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    let (program, leading) = command_line
        .split_first()
        .ok_or(ElevationError::EmptyCommand)?;
    let all_args: Vec<String> = leading
        .iter()
        .cloned()
        .chain(args.iter().map(|a| (*a).to_string()))
        .collect();

    let method = ElevationMethod::resolve(method)?;

    // Direct execution (no prompt needed)
    if method == ElevationMethod::None || nix::unistd::getuid().is_root() {
        let mut cmd = Command::new(program);
        cmd.args(&all_args);
        return Ok(cmd);
    }

    match method {
        ElevationMethod::Sudo => explicit("sudo", program, &all_args),
        ElevationMethod::Run0 => explicit("run0", program, &all_args),
        ElevationMethod::Pkexec => explicit("pkexec", program, &all_args),
        ElevationMethod::None | ElevationMethod::Auto => {
            // Prefer run0 everywhere when available (no SUID bit)
            if binary_exists("run0") {
                return Ok(wrapped("run0", program, &all_args));
            }

            let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
            if is_atty {
                Ok(wrapped("sudo", program, &all_args))
            } else {
                if !binary_exists("pkexec") {
                    return Err(ElevationError::PkexecNotFound);
                }
                Ok(wrapped("pkexec", program, &all_args))
            }
        }
    }
}
