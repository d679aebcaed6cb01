use crate::core::controller::ReportOptions;
use crate::core::firewall::NftOptions;
use crate::core::gateway::GatewayOptions;
use crate::core::nft_json::ChainRef;
use crate::elevation::ElevationMethod;
use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Allowed range for the status refresh interval (seconds)
pub const REFRESH_RANGE: (u64, u64) = (1, 3600);
/// Allowed range for the gateway discovery window (milliseconds)
pub const DISCOVERY_RANGE: (u64, u64) = (100, 60_000);

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Seconds between status refreshes while a port is public (1-3600)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Clear the terminal before each status refresh
    #[serde(default = "default_true")]
    pub clear_screen: bool,
    /// Append rule/mapping changes to `audit.log`
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Where and how allow rules are managed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    pub family: String,
    pub table: String,
    pub chain: String,
    /// Program and leading arguments used to run nft
    pub nft_command: Vec<String>,
    pub elevation: ElevationMethod,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            family: "inet".to_string(),
            table: "filter".to_string(),
            chain: "input".to_string(),
            nft_command: vec!["nft".to_string()],
            elevation: ElevationMethod::Auto,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// How long discovery waits for a gateway (100-60000 ms)
    pub discovery_timeout_ms: u64,
    /// Label shown in the router's mapping table
    pub mapping_description: String,
    /// 0 requests a permanent mapping
    pub lease_duration_secs: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 2000,
            mapping_description: "Public port for app".to_string(),
            lease_duration_secs: 0,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            clear_screen: true,
            audit_enabled: true,
            firewall: FirewallConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    10
}

impl AppConfig {
    /// Clamps ranges and restores defaults for empty values
    pub fn normalized(mut self) -> Self {
        self.refresh_interval_secs = self
            .refresh_interval_secs
            .clamp(REFRESH_RANGE.0, REFRESH_RANGE.1);
        self.gateway.discovery_timeout_ms = self
            .gateway
            .discovery_timeout_ms
            .clamp(DISCOVERY_RANGE.0, DISCOVERY_RANGE.1);

        let defaults = FirewallConfig::default();
        if self.firewall.nft_command.iter().all(|s| s.trim().is_empty()) {
            self.firewall.nft_command = defaults.nft_command;
        }
        for (value, default) in [
            (&mut self.firewall.family, defaults.family),
            (&mut self.firewall.table, defaults.table),
            (&mut self.firewall.chain, defaults.chain),
        ] {
            if value.trim().is_empty() {
                *value = default;
            }
        }
        if self.gateway.mapping_description.trim().is_empty() {
            self.gateway.mapping_description = GatewayConfig::default().mapping_description;
        }
        self
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            clear_screen: self.clear_screen,
        }
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            discovery_timeout: Duration::from_millis(self.gateway.discovery_timeout_ms),
            description: self.gateway.mapping_description.clone(),
            lease_duration_secs: self.gateway.lease_duration_secs,
        }
    }

    pub fn nft_options(&self) -> NftOptions {
        NftOptions {
            chain: ChainRef {
                family: self.firewall.family.clone(),
                table: self.firewall.table.clone(),
                chain: self.firewall.chain.clone(),
            },
            command: self.firewall.nft_command.clone(),
            elevation: self.firewall.elevation,
        }
    }
}

/// `config.json` in the data directory
pub fn default_config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config using an atomic write pattern.
/// 1. Writes to a temporary file created with mode 0o600.
/// 2. Atomically renames to the target path.
///
/// Writes to `path`, or to the default location when `None`.
pub async fn save_config(config: &AppConfig, path: Option<&Path>) -> std::io::Result<PathBuf> {
    use tokio::fs::OpenOptions;
    use tokio::io::AsyncWriteExt;

    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "Data directory not found")
        })?,
    };
    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("json.tmp");

    // Create file with restrictive permissions from the start to prevent
    // race condition where file is briefly world-readable
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(&temp_path)
        .await?;

    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;

    tokio::fs::rename(&temp_path, &path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })?;
    Ok(path)
}

/// Loads the config from `path` (or the default location), normalized.
///
/// A missing file yields the defaults; an unreadable or invalid one yields
/// the defaults with a warning.
pub async fn load_config(path: Option<&Path>) -> AppConfig {
    let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
        return AppConfig::default();
    };

    match tokio::fs::read_to_string(&path).await {
        Ok(json) => match serde_json::from_str::<AppConfig>(&json) {
            Ok(config) => config.normalized(),
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {e}", path.display());
                AppConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            tracing::warn!("Cannot read config {}: {e}", path.display());
            AppConfig::default()
        }
    }
}
