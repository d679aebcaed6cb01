//! Local firewall allow-rules
//!
//! [`FirewallBackend`] is the raw capability: add or remove a named rule and
//! report failures as a closed [`FirewallError`] kind. [`NftBackend`] is the
//! production implementation on top of the nftables JSON API; the stderr of
//! `nft` is classified there and nowhere else.
//!
//! [`FirewallRuleProvisioner`] applies the lifecycle policy on top of a
//! backend: an existing rule or a permission failure on creation is a soft
//! success, an absent rule on deletion is a success.

use crate::core::error::FirewallError;
use crate::core::nft_json::{self, ChainRef};
use crate::core::types::{FirewallRuleDescriptor, Protocol};
use crate::elevation::{ElevationMethod, create_elevated_command};
use serde_json::Value;
use std::future::Future;
use std::process::Stdio;
use tracing::{debug, error, info, warn};

/// Raw add/remove capability for named allow rules
pub trait FirewallBackend: Send + Sync + 'static {
    /// Adds an inbound allow rule. Must report an existing rule with the
    /// same name as [`FirewallError::AlreadyExists`].
    fn add_rule(
        &self,
        rule: &FirewallRuleDescriptor,
    ) -> impl Future<Output = Result<(), FirewallError>> + Send;

    /// Removes every rule with the descriptor's name. Must report a missing
    /// rule as [`FirewallError::AlreadyAbsent`].
    fn remove_rule(
        &self,
        rule: &FirewallRuleDescriptor,
    ) -> impl Future<Output = Result<(), FirewallError>> + Send;
}

/// How a rule came to be held after `add_rule`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Added,
    /// A rule with the same name was already present
    AlreadyPresent,
    /// The tool refused for lack of privileges; the rule may have to be
    /// created by hand
    Unverified { reason: String },
}

impl RuleOutcome {
    pub fn is_soft(&self) -> bool {
        !matches!(self, Self::Added)
    }
}

/// Creation and deletion of the session's allow rule
#[derive(Debug)]
pub struct FirewallRuleProvisioner<B> {
    backend: B,
}

impl<B: FirewallBackend> FirewallRuleProvisioner<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Adds the allow rule for `port`/`protocol`.
    ///
    /// # Errors
    ///
    /// Any failure other than "already exists" and "permission denied".
    pub async fn add_rule(
        &self,
        port: u16,
        protocol: Protocol,
    ) -> Result<(FirewallRuleDescriptor, RuleOutcome), FirewallError> {
        let rule = FirewallRuleDescriptor::new(port, protocol);
        let outcome = self.add_descriptor(&rule).await?;
        Ok((rule, outcome))
    }

    /// Same as [`Self::add_rule`] for an already built descriptor
    pub async fn add_descriptor(
        &self,
        rule: &FirewallRuleDescriptor,
    ) -> Result<RuleOutcome, FirewallError> {
        info!("Adding firewall rule '{}' for {}/{}", rule.name, rule.protocol, rule.port);
        match self.backend.add_rule(rule).await {
            Ok(()) => {
                info!("Firewall rule '{}' added", rule.name);
                Ok(RuleOutcome::Added)
            }
            Err(FirewallError::AlreadyExists) => {
                warn!("Firewall rule '{}' already exists, reusing it", rule.name);
                Ok(RuleOutcome::AlreadyPresent)
            }
            Err(FirewallError::Denied(reason)) => {
                warn!(
                    "Permission denied adding firewall rule '{}': {}. The rule may need to be created manually",
                    rule.name, reason
                );
                Ok(RuleOutcome::Unverified { reason })
            }
            Err(e) => {
                error!("Failed to add firewall rule '{}': {}", rule.name, e);
                Err(e)
            }
        }
    }

    /// Removes the allow rule. An absent rule counts as removed.
    ///
    /// # Errors
    ///
    /// Any other backend failure; never retried.
    pub async fn remove_rule(&self, rule: &FirewallRuleDescriptor) -> Result<(), FirewallError> {
        info!("Removing firewall rule '{}'", rule.name);
        match self.backend.remove_rule(rule).await {
            Ok(()) => {
                info!("Firewall rule '{}' removed", rule.name);
                Ok(())
            }
            Err(FirewallError::AlreadyAbsent) => {
                info!("Firewall rule '{}' is already absent", rule.name);
                Ok(())
            }
            Err(e) => {
                error!("Failed to remove firewall rule '{}': {}", rule.name, e);
                Err(e)
            }
        }
    }
}

/// Which operation produced a stderr message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NftOp {
    Add,
    Remove,
}

/// Maps `nft` stderr to an error kind
fn classify_nft_failure(op: NftOp, stderr: &str, exit_code: Option<i32>) -> FirewallError {
    let lower = stderr.to_lowercase();

    if lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("cache initialization failed")
        || lower.contains("not authorized")
    {
        return FirewallError::Denied(stderr.trim().to_string());
    }

    // Exit status 127 comes from an elevation wrapper that could not find nft
    if exit_code == Some(127) || lower.contains("command not found") {
        return FirewallError::ToolMissing(stderr.trim().to_string());
    }

    if lower.contains("no such file or directory") || lower.contains("does not exist") {
        return match op {
            NftOp::Remove => FirewallError::AlreadyAbsent,
            NftOp::Add => FirewallError::ChainMissing(stderr.trim().to_string()),
        };
    }

    if op == NftOp::Add && lower.contains("file exists") {
        return FirewallError::AlreadyExists;
    }

    FirewallError::Other {
        message: stderr.trim().to_string(),
        exit_code,
    }
}

/// Settings of the nftables backend
#[derive(Debug, Clone)]
pub struct NftOptions {
    pub chain: ChainRef,
    /// Program and leading arguments, e.g. `["nft"]`
    pub command: Vec<String>,
    pub elevation: ElevationMethod,
}

/// Allow rules in an existing nftables chain, managed via `nft --json`
#[derive(Debug, Clone)]
pub struct NftBackend {
    options: NftOptions,
}

impl NftBackend {
    pub fn new(options: NftOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &NftOptions {
        &self.options
    }

    /// Runs nft with `args`, feeding `stdin` if given. Returns stdout on
    /// success, classified stderr otherwise.
    async fn run(
        &self,
        op: NftOp,
        args: &[&str],
        stdin: Option<&Value>,
    ) -> Result<Vec<u8>, FirewallError> {
        let mut cmd = create_elevated_command(self.options.elevation, &self.options.command, args)
            .map_err(|e| FirewallError::Elevation(e.to_string()))?;

        debug!("Running nft {}", args.join(" "));

        let mut child = cmd
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("Failed to spawn nft: {e}");
                if e.kind() == std::io::ErrorKind::NotFound {
                    FirewallError::ToolMissing(format!("Failed to spawn nft: {e}"))
                } else {
                    FirewallError::other(format!("Failed to spawn nft: {e}"))
                }
            })?;

        if let Some(payload) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            use tokio::io::AsyncWriteExt;
            let json_string = serde_json::to_string(payload)
                .map_err(|e| FirewallError::other(format!("Failed to encode nft JSON: {e}")))?;
            pipe.write_all(json_string.as_bytes())
                .await
                .map_err(|e| FirewallError::other(format!("Failed to write to nft stdin: {e}")))?;
            // Close stdin so nft sees EOF
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FirewallError::other(format!("Failed to wait for nft: {e}")))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            warn!("nft {} failed: {}", args.join(" "), stderr.trim());
            Err(classify_nft_failure(op, &stderr, output.status.code()))
        }
    }

    /// Handles of rules named `name` in the configured chain
    async fn rule_handles(&self, op: NftOp, name: &str) -> Result<Vec<u64>, FirewallError> {
        let stdout = self.run(op, &self.options.chain.list_args(), None).await?;
        let listing: Value = serde_json::from_slice(&stdout).map_err(|e| {
            error!("Failed to parse nft chain listing: {e}");
            FirewallError::other(format!("Failed to parse nft chain listing: {e}"))
        })?;
        Ok(nft_json::find_rule_handles(&listing, name))
    }
}

impl FirewallBackend for NftBackend {
    async fn add_rule(&self, rule: &FirewallRuleDescriptor) -> Result<(), FirewallError> {
        if !self.rule_handles(NftOp::Add, &rule.name).await?.is_empty() {
            return Err(FirewallError::AlreadyExists);
        }

        let payload = nft_json::add_rule_payload(&self.options.chain, rule);
        self.run(NftOp::Add, &["--json", "-f", "-"], Some(&payload))
            .await
            .map(|_| ())
    }

    async fn remove_rule(&self, rule: &FirewallRuleDescriptor) -> Result<(), FirewallError> {
        let handles = self.rule_handles(NftOp::Remove, &rule.name).await?;
        if handles.is_empty() {
            return Err(FirewallError::AlreadyAbsent);
        }

        let payload = nft_json::delete_rules_payload(&self.options.chain, &handles);
        self.run(NftOp::Remove, &["--json", "-f", "-"], Some(&payload))
            .await
            .map(|_| ())
    }
}
