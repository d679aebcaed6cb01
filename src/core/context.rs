use crate::audit::AuditLog;
use crate::core::firewall::{FirewallBackend, FirewallRuleProvisioner};
use crate::core::gateway::{GatewayBackend, GatewayProtocolClient};
use crate::core::session::ExposureSession;
use tokio::sync::Mutex;

/// Everything the controller and the cleanup coordinator share: the two
/// external capabilities and the one session slot of the process.
pub struct ExposureContext<F, G: GatewayBackend> {
    pub firewall: FirewallRuleProvisioner<F>,
    pub gateway: GatewayProtocolClient<G>,
    pub session: ExposureSession<G::Handle>,
    pub audit: Option<AuditLog>,
    /// Held for the whole of one teardown
    pub(crate) release_lock: Mutex<()>,
}

impl<F: FirewallBackend, G: GatewayBackend> ExposureContext<F, G> {
    pub fn new(firewall: FirewallRuleProvisioner<F>, gateway: GatewayProtocolClient<G>) -> Self {
        Self {
            firewall,
            gateway,
            session: ExposureSession::new(),
            audit: None,
            release_lock: Mutex::new(()),
        }
    }

    pub fn with_audit(mut self, audit: Option<AuditLog>) -> Self {
        self.audit = audit;
        self
    }
}
