//! Port exposure lifecycle
//!
//! This module contains the types and logic for exposing a local port to
//! the internet and releasing everything again. It provides:
//!
//! - [`types`]: Protocol, rule and mapping descriptors
//! - [`firewall`]: Allow rules via nftables, with the soft-success policy
//! - [`nft_json`]: nftables JSON payloads and chain listing parsing
//! - [`gateway`]: NAT port mapping via `UPnP` IGD
//! - [`session`]: The single take-once exposure slot
//! - [`context`]: Backends, session and audit log shared by controller and cleanup
//! - [`cleanup`]: Idempotent teardown shared by every exit path
//! - [`controller`]: The `public` command state machine and status display
//! - [`error`]: Error types for all of the above

pub mod cleanup;
pub mod context;
pub mod controller;
pub mod error;
pub mod firewall;
pub mod gateway;
pub mod nft_json;
pub mod session;
pub mod types;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;
