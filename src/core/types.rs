//! Data model shared by the exposure components

use crate::core::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use strum::{Display, EnumString};

/// Prefix of every firewall rule this program creates
pub const RULE_NAME_PREFIX: &str = "MiniShell_";

/// Transport protocol of an exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[strum(serialize = "TCP")]
    Tcp,
    #[strum(serialize = "UDP")]
    Udp,
}

impl Protocol {
    /// Lowercase name as used by nftables payload matches
    pub const fn nft_name(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Firewall allow-rule owned by the session.
///
/// The name is derived from port and protocol, so creation and deletion
/// always target the same rule without remembering user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleDescriptor {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl FirewallRuleDescriptor {
    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self {
            name: rule_name(port, protocol),
            port,
            protocol,
        }
    }
}

/// `MiniShell_<port>_<PROTOCOL>`
pub fn rule_name(port: u16, protocol: Protocol) -> String {
    format!("{RULE_NAME_PREFIX}{port}_{protocol}")
}

/// Live NAT mapping owned by the session, including the gateway handle
/// used to delete it.
#[derive(Debug)]
pub struct PortMappingDescriptor<H> {
    pub port: u16,
    pub protocol: Protocol,
    pub external_address: IpAddr,
    pub control_handle: H,
}

impl<H> PortMappingDescriptor<H> {
    /// Address remote peers connect to
    pub fn public_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.external_address, self.port)
    }
}

/// Address returned by a successful mapping negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedAddress {
    pub external_address: IpAddr,
    pub external_port: u16,
}

impl MappedAddress {
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.external_address, self.external_port)
    }
}

/// A validated `public` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposeRequest {
    pub port: u16,
    pub protocol: Protocol,
}

impl ExposeRequest {
    /// Builds a request from raw user tokens.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the port is not a strict decimal in
    /// 1..=65535 or the protocol is not TCP/UDP.
    pub fn parse(protocol: &str, port: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            protocol: crate::validators::parse_protocol(protocol)?,
            port: crate::validators::parse_port(port)?,
        })
    }
}
