//! Node configuration.
//!
//! Loaded from a TOML file; command-line flags override individual fields.

use lockgov_governance::ProtocolConfig;
use lockgov_types::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name
    pub name: String,
    /// Directory holding the snapshot and journal
    pub data_dir: PathBuf,
    /// Protocol address, guardian and staking/governor/timelock parameters
    pub protocol: ProtocolConfig,
    /// Treasury capability
    pub treasury: TreasuryConfig,
    /// Balances credited when the store is initialized
    #[serde(default)]
    pub genesis: Vec<GenesisAllocation>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "lockgov".to_string(),
            data_dir: PathBuf::from("./data"),
            protocol: ProtocolConfig::default(),
            treasury: TreasuryConfig::default(),
            genesis: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        reject_traversal(path)?;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: NodeConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        reject_traversal(path)?;

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| anyhow::anyhow!("Failed to write config file '{}': {}", path.display(), e))?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Node name cannot be empty");
        }
        reject_traversal(&self.data_dir)?;

        let protocol = &self.protocol;
        if protocol.address.is_zero() {
            anyhow::bail!("Protocol address cannot be the zero address");
        }
        protocol.staking.validate()?;
        protocol.governor.validate()?;
        protocol.timelock.validate()?;

        if self.treasury.enabled {
            if self.treasury.capability.is_zero() || self.treasury.account.is_zero() {
                anyhow::bail!("Treasury capability and account must be set");
            }
            if self.treasury.capability == protocol.address {
                anyhow::bail!("Treasury capability cannot be the protocol address");
            }
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            anyhow::bail!(
                "Unknown log format '{}', expected json or pretty",
                self.logging.format
            );
        }
        Ok(())
    }
}

fn reject_traversal(path: &Path) -> anyhow::Result<()> {
    if path.to_string_lossy().contains("..") {
        anyhow::bail!("Invalid path: directory traversal detected");
    }
    Ok(())
}

/// Treasury capability configuration.
///
/// Version 1 of the capability pays out without limit, version 2 caps every
/// transfer at `per_transfer_cap`. Version 1 is active until governance
/// upgrades it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryConfig {
    /// Register the treasury capability
    pub enabled: bool,
    /// Target address proposals send treasury transfers to
    pub capability: Address,
    /// Account the treasury pays from
    pub account: Address,
    /// Balance credited to the treasury account at init
    pub initial_balance: Amount,
    /// Cap enforced by version 2
    pub per_transfer_cap: Amount,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capability: Address::derive(b"lockgov/capability/treasury"),
            account: Address::derive(b"lockgov/treasury"),
            initial_balance: Amount::ZERO,
            per_transfer_cap: Amount::from_u64(100_000),
        }
    }
}

/// Initial balance of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub account: Address,
    pub amount: Amount,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log to file
    pub log_file: Option<PathBuf>,
    /// Log format (json|pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            format: "pretty".to_string(),
        }
    }
}
