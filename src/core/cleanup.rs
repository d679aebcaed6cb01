//! Release of whatever the exposure session holds
//!
//! Every exit path of the program (the `exit` command, SIGINT/SIGTERM,
//! end of input, a panicking shell task) ends in
//! [`CleanupCoordinator::teardown`]. Idempotence comes from the session's
//! take-once fields: a descriptor can only be taken by one call.

use crate::audit::{self, EventType};
use crate::core::context::ExposureContext;
use crate::core::firewall::FirewallBackend;
use crate::core::gateway::GatewayBackend;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one resource during a teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Nothing was held (never acquired, or released by an earlier call)
    NotHeld,
    Released { target: String },
    Failed { target: String, error: String },
}

impl Release {
    fn describe(&self, kind: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Release::NotHeld => Ok(()),
            Release::Released { target } => writeln!(f, "[info] Removed {kind} {target}"),
            Release::Failed { target, error } => {
                writeln!(f, "[error] Could not remove {kind} {target}: {error}")
            }
        }
    }
}

/// Outcome of one teardown call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub mapping: Release,
    pub rule: Release,
}

impl TeardownReport {
    /// True when this call found nothing to release
    pub fn is_noop(&self) -> bool {
        self.mapping == Release::NotHeld && self.rule == Release::NotHeld
    }

    pub fn has_failures(&self) -> bool {
        matches!(self.mapping, Release::Failed { .. })
            || matches!(self.rule, Release::Failed { .. })
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.mapping.describe("port mapping", f)?;
        self.rule.describe("firewall rule", f)
    }
}

pub struct CleanupCoordinator<F, G: GatewayBackend> {
    ctx: Arc<ExposureContext<F, G>>,
}

impl<F, G: GatewayBackend> Clone for CleanupCoordinator<F, G> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<F: FirewallBackend, G: GatewayBackend> CleanupCoordinator<F, G> {
    pub fn new(ctx: Arc<ExposureContext<F, G>>) -> Self {
        Self { ctx }
    }

    /// Releases the mapping, then the rule.
    ///
    /// Failures are logged and reported, never returned: a failure on the
    /// mapping must not keep the rule from being removed. Safe to call any
    /// number of times.
    ///
    /// The releases run in their own task. Dropping the returned future does
    /// not stop a removal that has started, and a later call waits for it.
    pub async fn teardown(&self) -> TeardownReport {
        let ctx = Arc::clone(&self.ctx);
        let task = tokio::spawn(async move {
            let _guard = ctx.release_lock.lock().await;
            let mapping = release_mapping(&ctx).await;
            let rule = release_rule(&ctx).await;
            TeardownReport { mapping, rule }
        });

        let report = match task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Teardown task failed: {e}");
                let failed = Release::Failed {
                    target: "session".into(),
                    error: e.to_string(),
                };
                TeardownReport {
                    mapping: failed.clone(),
                    rule: failed,
                }
            }
        };

        if report.is_noop() {
            debug!("Teardown: nothing held");
        } else if report.has_failures() {
            warn!("Teardown finished with failures: {report:?}");
        } else {
            info!("Teardown complete");
        }
        report
    }
}

async fn release_mapping<F: FirewallBackend, G: GatewayBackend>(
    ctx: &ExposureContext<F, G>,
) -> Release {
    let Some(mapping) = ctx.session.take_mapping() else {
        return Release::NotHeld;
    };

    let target = format!("{}/{}", mapping.port, mapping.protocol);
    let result = ctx
        .gateway
        .remove_mapping(&mapping.control_handle, mapping.port, mapping.protocol)
        .await;

    let error = result.err().map(|e| e.to_string());
    audit::record(
        ctx.audit.as_ref(),
        EventType::RemoveMapping,
        &target,
        mapping.port,
        mapping.protocol,
        error.clone(),
    )
    .await;

    match error {
        None => Release::Released { target },
        Some(error) => Release::Failed { target, error },
    }
}

async fn release_rule<F: FirewallBackend, G: GatewayBackend>(
    ctx: &ExposureContext<F, G>,
) -> Release {
    let Some(rule) = ctx.session.take_rule() else {
        return Release::NotHeld;
    };

    let result = ctx.firewall.remove_rule(&rule).await;

    let error = result.err().map(|e| e.to_string());
    audit::record(
        ctx.audit.as_ref(),
        EventType::RemoveRule,
        &rule.name,
        rule.port,
        rule.protocol,
        error.clone(),
    )
    .await;

    match error {
        None => Release::Released { target: rule.name },
        Some(error) => Release::Failed {
            target: rule.name,
            error,
        },
    }
}
