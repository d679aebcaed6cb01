//! NAT port mapping through the local gateway
//!
//! [`GatewayBackend`] is the raw discovery/control capability;
//! [`IgdBackend`] implements it with `UPnP` IGD via `igd-next`. Gateway
//! error codes are mapped to [`MappingError`] kinds inside the backend.
//!
//! [`GatewayProtocolClient`] adds the lifecycle policy: discovery never
//! waits longer than the configured window, and deleting a mapping the
//! gateway no longer has counts as success.

use crate::core::error::{DiscoveryError, MappingError};
use crate::core::types::{MappedAddress, Protocol};
use igd_next::aio::Gateway;
use igd_next::aio::tokio::Tokio;
use igd_next::{AddPortError, PortMappingProtocol, RemovePortError, SearchError, SearchOptions};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Extra time granted to a backend past its own search timeout
const DISCOVERY_GRACE: Duration = Duration::from_millis(500);

/// Raw discovery and control capability of a gateway protocol
pub trait GatewayBackend: Send + Sync + 'static {
    /// Reference to a discovered gateway, owned by the mapping descriptor
    type Handle: Send + Sync + 'static;

    /// Searches for a gateway for at most `timeout`.
    fn discover(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Handle, DiscoveryError>> + Send;

    fn external_address(
        &self,
        handle: &Self::Handle,
    ) -> impl Future<Output = Result<IpAddr, MappingError>> + Send;

    /// LAN address of this host as seen from the gateway
    fn local_address(
        &self,
        handle: &Self::Handle,
    ) -> impl Future<Output = Result<IpAddr, MappingError>> + Send;

    fn add_port(
        &self,
        handle: &Self::Handle,
        request: &MappingRequest,
    ) -> impl Future<Output = Result<(), MappingError>> + Send;

    /// Must report a missing entry as [`MappingError::AlreadyAbsent`].
    fn remove_port(
        &self,
        handle: &Self::Handle,
        port: u16,
        protocol: Protocol,
    ) -> impl Future<Output = Result<(), MappingError>> + Send;
}

/// A mapping `external_port -> local:port` as sent to the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRequest {
    pub protocol: Protocol,
    pub external_port: u16,
    pub local: SocketAddr,
    pub lease_duration_secs: u32,
    pub description: String,
}

/// Policy knobs of the gateway client
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub discovery_timeout: Duration,
    pub description: String,
    pub lease_duration_secs: u32,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(2),
            description: "Public port for app".to_string(),
            lease_duration_secs: 0,
        }
    }
}

pub struct GatewayProtocolClient<B> {
    backend: B,
    options: GatewayOptions,
}

impl<B: GatewayBackend> GatewayProtocolClient<B> {
    pub fn new(backend: B, options: GatewayOptions) -> Self {
        Self { backend, options }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Finds a gateway within the discovery window.
    ///
    /// # Errors
    ///
    /// `NoGateway` when nothing answered in time, `Search` for other failures.
    pub async fn discover(&self) -> Result<B::Handle, DiscoveryError> {
        let window = self.options.discovery_timeout;
        let timeout_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        info!("Discovering UPnP gateway ({timeout_ms} ms window)");

        match tokio::time::timeout(window + DISCOVERY_GRACE, self.backend.discover(window)).await {
            Ok(Ok(handle)) => {
                info!("Gateway found");
                Ok(handle)
            }
            Ok(Err(e)) => {
                warn!("Gateway discovery failed: {e}");
                Err(e)
            }
            Err(_) => {
                warn!("Gateway discovery exceeded its window");
                Err(DiscoveryError::NoGateway { timeout_ms })
            }
        }
    }

    /// Maps `port` on the gateway to the same port on this host.
    ///
    /// # Errors
    ///
    /// `Rejected` if the gateway refuses, other kinds for query and
    /// transport failures.
    pub async fn add_mapping(
        &self,
        handle: &B::Handle,
        port: u16,
        protocol: Protocol,
    ) -> Result<MappedAddress, MappingError> {
        let external_address = self.backend.external_address(handle).await?;
        let local_ip = self.backend.local_address(handle).await?;
        debug!("External address {external_address}, local address {local_ip}");

        let request = MappingRequest {
            protocol,
            external_port: port,
            local: SocketAddr::new(local_ip, port),
            lease_duration_secs: self.options.lease_duration_secs,
            description: self.options.description.clone(),
        };

        info!("Requesting mapping {protocol} {port} -> {}", request.local);
        match self.backend.add_port(handle, &request).await {
            Ok(()) => {
                info!("Mapping {protocol} {port} established, reachable at {external_address}:{port}");
                Ok(MappedAddress {
                    external_address,
                    external_port: port,
                })
            }
            Err(e) => {
                error!("Failed to add mapping {protocol} {port}: {e}");
                Err(e)
            }
        }
    }

    /// Deletes the mapping. An entry the gateway no longer has counts as
    /// deleted.
    ///
    /// # Errors
    ///
    /// Any other gateway failure; never retried.
    pub async fn remove_mapping(
        &self,
        handle: &B::Handle,
        port: u16,
        protocol: Protocol,
    ) -> Result<(), MappingError> {
        info!("Removing mapping {protocol} {port}");
        match self.backend.remove_port(handle, port, protocol).await {
            Ok(()) => {
                info!("Mapping {protocol} {port} removed");
                Ok(())
            }
            Err(MappingError::AlreadyAbsent) => {
                info!("Mapping {protocol} {port} is already absent");
                Ok(())
            }
            Err(e) => {
                error!("Failed to remove mapping {protocol} {port}: {e}");
                Err(e)
            }
        }
    }
}

impl From<Protocol> for PortMappingProtocol {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => PortMappingProtocol::TCP,
            Protocol::Udp => PortMappingProtocol::UDP,
        }
    }
}

fn classify_search_error(error: SearchError, timeout: Duration) -> DiscoveryError {
    if matches!(error, SearchError::NoResponseWithinTimeout) {
        DiscoveryError::NoGateway {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        DiscoveryError::Search(error.to_string())
    }
}

fn classify_add_error(error: AddPortError) -> MappingError {
    let message = error.to_string();
    match error {
        AddPortError::RequestError(_) => MappingError::Request(message),
        _ => MappingError::Rejected(message),
    }
}

fn classify_remove_error(error: RemovePortError) -> MappingError {
    let message = error.to_string();
    match error {
        RemovePortError::NoSuchPortMapping => MappingError::AlreadyAbsent,
        RemovePortError::RequestError(_) => MappingError::Request(message),
        _ => MappingError::Rejected(message),
    }
}

/// `UPnP` Internet Gateway Device backend
#[derive(Debug, Clone, Copy, Default)]
pub struct IgdBackend;

impl GatewayBackend for IgdBackend {
    type Handle = Gateway<Tokio>;

    async fn discover(&self, timeout: Duration) -> Result<Self::Handle, DiscoveryError> {
        let options = SearchOptions {
            timeout: Some(timeout),
            ..Default::default()
        };
        let gateway = igd_next::aio::tokio::search_gateway(options)
            .await
            .map_err(|e| classify_search_error(e, timeout))?;
        debug!("Gateway at {}", gateway.addr);
        Ok(gateway)
    }

    async fn external_address(&self, handle: &Self::Handle) -> Result<IpAddr, MappingError> {
        handle
            .get_external_ip()
            .await
            .map_err(|e| MappingError::ExternalAddress(e.to_string()))
    }

    async fn local_address(&self, handle: &Self::Handle) -> Result<IpAddr, MappingError> {
        // Connecting a UDP socket sends nothing; it only selects the route
        let bind: SocketAddr = if handle.addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = tokio::net::UdpSocket::bind(bind)
            .await
            .map_err(|e| MappingError::LocalAddress(e.to_string()))?;
        socket
            .connect(handle.addr)
            .await
            .map_err(|e| MappingError::LocalAddress(e.to_string()))?;
        socket
            .local_addr()
            .map(|addr| addr.ip())
            .map_err(|e| MappingError::LocalAddress(e.to_string()))
    }

    async fn add_port(
        &self,
        handle: &Self::Handle,
        request: &MappingRequest,
    ) -> Result<(), MappingError> {
        handle
            .add_port(
                request.protocol.into(),
                request.external_port,
                request.local,
                request.lease_duration_secs,
                &request.description,
            )
            .await
            .map_err(classify_add_error)
    }

    async fn remove_port(
        &self,
        handle: &Self::Handle,
        port: u16,
        protocol: Protocol,
    ) -> Result<(), MappingError> {
        handle
            .remove_port(protocol.into(), port)
            .await
            .map_err(classify_remove_error)
    }
}
