use thiserror::Error;

/// Crate-level errors for startup and configuration
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bad user input for the `public` command. Never retried, no side effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Usage: public <TCP|UDP> --port:<num>")]
    Usage,

    #[error("Invalid protocol '{0}'. Use TCP or UDP.")]
    InvalidProtocol(String),

    #[error("Port parameter is missing. Use --port:<num>")]
    MissingPort,

    #[error("Invalid port '{0}': expected a decimal number between 1 and 65535")]
    InvalidPort(String),

    #[error("Unexpected argument '{0}'")]
    UnexpectedArgument(String),
}

/// Gateway discovery failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// No device answered inside the discovery window
    #[error("No UPnP gateway responded within {timeout_ms} ms")]
    NoGateway { timeout_ms: u64 },

    /// Discovery itself failed (socket, malformed description, ...)
    #[error("Gateway discovery failed: {0}")]
    Search(String),
}

/// Port mapping failures reported by the gateway wrapper
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// The gateway refused the mapping (port taken by another client, not authorized, ...)
    #[error("Gateway rejected the mapping: {0}")]
    Rejected(String),

    /// The mapping to delete is not present on the gateway
    #[error("Port mapping is already absent")]
    AlreadyAbsent,

    #[error("Could not query the external address: {0}")]
    ExternalAddress(String),

    #[error("Could not determine the local address towards the gateway: {0}")]
    LocalAddress(String),

    /// Transport-level failure talking to the gateway
    #[error("Gateway request failed: {0}")]
    Request(String),
}

/// Firewall tool failures, classified once at the backend boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FirewallError {
    #[error("Permission denied by the firewall tool: {0}")]
    Denied(String),

    #[error("Firewall rule already exists")]
    AlreadyExists,

    #[error("Firewall rule is already absent")]
    AlreadyAbsent,

    /// The configured table or chain does not exist
    #[error("Firewall chain not found: {0}")]
    ChainMissing(String),

    /// The firewall program (or its elevation wrapper) is not installed
    #[error("Firewall tool not found: {0}")]
    ToolMissing(String),

    /// The elevated command could not be built
    #[error("Elevation error: {0}")]
    Elevation(String),

    #[error("Firewall error: {message}")]
    Other {
        message: String,
        exit_code: Option<i32>,
    },
}

impl FirewallError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            exit_code: None,
        }
    }
}

/// Failures on the construction path of an exposure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExposeError {
    /// Hard firewall failure: nothing is held
    #[error(transparent)]
    Firewall(#[from] FirewallError),

    /// The firewall rule is held and is released by the next teardown
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The firewall rule is held and is released by the next teardown
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

impl ExposeError {
    /// Whether the firewall rule stays provisioned after this failure
    pub fn rule_still_held(&self) -> bool {
        !matches!(self, Self::Firewall(_))
    }
}

/// Hints shown next to a firewall failure
pub fn firewall_suggestions(error: &FirewallError) -> Vec<&'static str> {
    match error {
        FirewallError::Denied(_) => vec![
            "Run minishell as root, or configure sudo/run0/pkexec for nft",
            "Or create the allow rule manually",
        ],
        FirewallError::Elevation(_) => vec![
            "Set MINISHELL_ELEVATION_METHOD to sudo, run0 or pkexec",
            "Or set \"elevation\": \"none\" in config.json when running as root",
        ],
        FirewallError::ChainMissing(_) => vec![
            "The configured nftables table or chain does not exist",
            "Check firewall.family/table/chain in config.json: nft list ruleset",
        ],
        FirewallError::ToolMissing(_) => {
            vec!["Install nftables or set firewall.nft_command in config.json"]
        }
        FirewallError::AlreadyExists
        | FirewallError::AlreadyAbsent
        | FirewallError::Other { .. } => Vec::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
