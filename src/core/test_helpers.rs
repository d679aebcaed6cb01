//! Shared test utilities for core module tests
//!
//! Recording in-memory backends for the firewall and the gateway. Both can
//! share a [`Journal`] so tests can assert the relative order of calls.
//! This module is only compiled in test mode.

// Lock poisoning only happens after a test already failed
#![allow(clippy::missing_panics_doc)]

use crate::core::error::{DiscoveryError, FirewallError, MappingError};
use crate::core::firewall::FirewallBackend;
use crate::core::gateway::{GatewayBackend, MappingRequest};
use crate::core::types::{FirewallRuleDescriptor, Protocol};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered log of calls across mocks, e.g. `"gateway.remove 8080/TCP"`
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallCall {
    Add(String),
    Remove(String),
}

#[derive(Debug, Default)]
pub struct MockFirewall {
    calls: Mutex<Vec<FirewallCall>>,
    add_error: Mutex<Option<FirewallError>>,
    remove_error: Mutex<Option<FirewallError>>,
    remove_delay: Option<Duration>,
    journal: Journal,
}

impl MockFirewall {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// `remove_rule` takes `delay` and only counts once it completes
    pub fn slow_remove(delay: Duration) -> Self {
        Self {
            remove_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Every following `add_rule` fails with `error`
    pub fn fail_add_with(&self, error: FirewallError) {
        *self.add_error.lock().unwrap() = Some(error);
    }

    /// Every following `remove_rule` fails with `error`
    pub fn fail_remove_with(&self, error: FirewallError) {
        *self.remove_error.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<FirewallCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                FirewallCall::Remove(name) => Some(name),
                FirewallCall::Add(_) => None,
            })
            .collect()
    }
}

impl FirewallBackend for MockFirewall {
    async fn add_rule(&self, rule: &FirewallRuleDescriptor) -> Result<(), FirewallError> {
        self.calls
            .lock()
            .unwrap()
            .push(FirewallCall::Add(rule.name.clone()));
        self.journal
            .lock()
            .unwrap()
            .push(format!("firewall.add {}", rule.name));
        match self.add_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn remove_rule(&self, rule: &FirewallRuleDescriptor) -> Result<(), FirewallError> {
        if let Some(delay) = self.remove_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push(FirewallCall::Remove(rule.name.clone()));
        self.journal
            .lock()
            .unwrap()
            .push(format!("firewall.remove {}", rule.name));
        match self.remove_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Discover,
    Add(MappingRequest),
    Remove { port: u16, protocol: Protocol },
}

/// In-memory gateway at 192.168.1.1 with external address 203.0.113.10.
/// This host appears as 192.168.1.20. Handles are discovery counters.
#[derive(Debug, Default)]
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    discover_error: Mutex<Option<DiscoveryError>>,
    add_error: Mutex<Option<MappingError>>,
    remove_error: Mutex<Option<MappingError>>,
    hang_discovery: bool,
    hang_add: bool,
    journal: Journal,
}

impl MockGateway {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Discovery never completes
    pub fn hanging() -> Self {
        Self {
            hang_discovery: true,
            ..Self::default()
        }
    }

    /// `add_port` never completes, as if cancelled mid-request
    pub fn hanging_add(journal: Journal) -> Self {
        Self {
            hang_add: true,
            journal,
            ..Self::default()
        }
    }

    pub fn fail_discovery_with(&self, error: DiscoveryError) {
        *self.discover_error.lock().unwrap() = Some(error);
    }

    pub fn fail_add_with(&self, error: MappingError) {
        *self.add_error.lock().unwrap() = Some(error);
    }

    pub fn fail_remove_with(&self, error: MappingError) {
        *self.remove_error.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<(u16, Protocol)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::Remove { port, protocol } => Some((port, protocol)),
                _ => None,
            })
            .collect()
    }

    fn discoveries(&self) -> u32 {
        let count = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, GatewayCall::Discover))
            .count();
        u32::try_from(count).unwrap()
    }
}

impl GatewayBackend for MockGateway {
    type Handle = u32;

    async fn discover(&self, _timeout: Duration) -> Result<u32, DiscoveryError> {
        if self.hang_discovery {
            std::future::pending::<()>().await;
        }
        self.calls.lock().unwrap().push(GatewayCall::Discover);
        self.journal
            .lock()
            .unwrap()
            .push("gateway.discover".to_string());
        match self.discover_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(self.discoveries()),
        }
    }

    async fn external_address(&self, _handle: &u32) -> Result<IpAddr, MappingError> {
        Ok("203.0.113.10".parse().unwrap())
    }

    async fn local_address(&self, _handle: &u32) -> Result<IpAddr, MappingError> {
        Ok("192.168.1.20".parse().unwrap())
    }

    async fn add_port(&self, _handle: &u32, request: &MappingRequest) -> Result<(), MappingError> {
        self.calls
            .lock()
            .unwrap()
            .push(GatewayCall::Add(request.clone()));
        self.journal.lock().unwrap().push(format!(
            "gateway.add {}/{}",
            request.external_port, request.protocol
        ));
        if self.hang_add {
            std::future::pending::<()>().await;
        }
        match self.add_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn remove_port(
        &self,
        _handle: &u32,
        port: u16,
        protocol: Protocol,
    ) -> Result<(), MappingError> {
        self.calls
            .lock()
            .unwrap()
            .push(GatewayCall::Remove { port, protocol });
        self.journal
            .lock()
            .unwrap()
            .push(format!("gateway.remove {port}/{protocol}"));
        match self.remove_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
