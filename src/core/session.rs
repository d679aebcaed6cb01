//! The single exposure slot of the process
//!
//! `ExposureSession` holds at most one firewall rule and one port mapping.
//! Reads that release a resource go through [`ExposureSession::take_rule`]
//! and [`ExposureSession::take_mapping`], which clear the field in the same
//! critical section. Whichever teardown trigger runs first gets the
//! descriptor; every later one observes `None`.
//!
//! No method performs I/O and none can panic: a poisoned lock is recovered,
//! since the guarded data is a plain `Option`.

use crate::core::types::{FirewallRuleDescriptor, PortMappingDescriptor};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct ExposureSession<H> {
    rule: Mutex<Option<FirewallRuleDescriptor>>,
    mapping: Mutex<Option<PortMappingDescriptor<H>>>,
}

impl<H> Default for ExposureSession<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ExposureSession<H> {
    pub fn new() -> Self {
        Self {
            rule: Mutex::new(None),
            mapping: Mutex::new(None),
        }
    }

    /// Stores whichever descriptors are given. Absent arguments leave the
    /// corresponding field untouched.
    pub fn record(
        &self,
        rule: Option<FirewallRuleDescriptor>,
        mapping: Option<PortMappingDescriptor<H>>,
    ) {
        if let Some(rule) = rule {
            *lock(&self.rule) = Some(rule);
        }
        if let Some(mapping) = mapping {
            *lock(&self.mapping) = Some(mapping);
        }
    }

    pub fn take_rule(&self) -> Option<FirewallRuleDescriptor> {
        lock(&self.rule).take()
    }

    pub fn take_mapping(&self) -> Option<PortMappingDescriptor<H>> {
        lock(&self.mapping).take()
    }

    /// True while either resource is held. For display only.
    pub fn is_active(&self) -> bool {
        lock(&self.rule).is_some() || lock(&self.mapping).is_some()
    }

    /// Name of the held rule, if any
    pub fn rule_name(&self) -> Option<String> {
        lock(&self.rule).as_ref().map(|r| r.name.clone())
    }

    /// Public endpoint of the held mapping, if any
    pub fn public_endpoint(&self) -> Option<std::net::SocketAddr> {
        lock(&self.mapping)
            .as_ref()
            .map(PortMappingDescriptor::public_endpoint)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
