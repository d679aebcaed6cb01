//! `MiniShell` - temporary public exposure of a local port
//!
//! On `public <TCP|UDP> --port:<num>` the shell opens an inbound allow rule in
//! the local firewall, asks the router for a `UPnP` port mapping, and shows the
//! resulting public address until the user leaves. Whatever was acquired is
//! released exactly once, however the program ends.
//!
//! # Architecture
//!
//! - [`core`] - Exposure lifecycle: firewall rules, gateway mappings, session, teardown
//! - [`shell`] - Line-oriented command loop
//! - [`validators`] - Input validation for the `public` command
//! - [`elevation`] - Privilege escalation for `nft` (run0, sudo, pkexec)
//! - [`audit`] - Audit log of every external mutation
//! - [`config`] - Configuration persistence
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Safety Features
//!
//! - The allow rule is recorded before `nft` runs, so an interrupted add is still removed
//! - A mapping is recorded only once the gateway accepted it; mappings owned by
//!   other clients are never deleted
//! - Teardown order is mapping first, then rule
//! - Atomic file operations with secure permissions

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod shell;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, ExposeError, FirewallError, Result};
pub use core::types::{ExposeRequest, Protocol};
