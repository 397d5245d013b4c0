//! User configuration: networks, contracts with per-network overrides, live sync policy.
//!
//! Loaded from JSON. Contract kind (log filter vs factory) is decided once here and
//! carried as [ContractKind]; nothing downstream inspects field presence again.

use crate::error::ConfigError;
use crate::topics::EventFilter;
use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub networks: Vec<NetworkConfig>,
    pub contracts: Vec<ContractConfig>,
    pub live_sync: LiveSyncConfig,
}

/// One chain the indexer can talk to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    /// HTTP JSON-RPC URL (eth_blockNumber, eth_getLogs).
    pub rpc_url: String,
    /// WebSocket URL for newHeads. Without it, block arrival is polled.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
}

fn default_polling_interval_ms() -> u64 {
    1_000
}

/// A single address or a list of addresses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AddressOrList {
    One(Address),
    Many(Vec<Address>),
}

impl AddressOrList {
    pub fn to_vec(&self) -> Vec<Address> {
        match self {
            AddressOrList::One(a) => vec![*a],
            AddressOrList::Many(v) => v.clone(),
        }
    }
}

/// Factory declaration: `event` is a human-readable signature with parameter names,
/// e.g. `event PairCreated(address indexed token0, address indexed token1, address pair, uint256)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryConfig {
    pub address: Address,
    pub event: String,
    pub parameter: String,
}

/// How a contract's logs are matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractKind {
    /// Direct address match. `None` matches every emitter.
    LogFilter { address: Option<AddressOrList> },
    /// Children discovered from a factory event.
    Factory(FactoryConfig),
}

impl ContractKind {
    fn label(&self) -> &'static str {
        match self {
            ContractKind::LogFilter { .. } => "log filter",
            ContractKind::Factory(_) => "factory",
        }
    }
}

/// Per-network override of the contract's match target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkTarget {
    Address(AddressOrList),
    Factory(FactoryConfig),
}

/// A contract's deployment on one network. `None` fields fall back to the contract level.
#[derive(Debug, Clone, Default)]
pub struct ContractNetworkConfig {
    pub name: String,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    pub max_block_range: Option<u64>,
    pub filter: Option<EventFilter>,
    pub target: Option<NetworkTarget>,
}

#[derive(Debug, Clone)]
pub struct ContractConfig {
    pub name: String,
    pub abi: JsonAbi,
    pub network: Vec<ContractNetworkConfig>,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    pub max_block_range: Option<u64>,
    pub filter: Option<EventFilter>,
    pub kind: ContractKind,
}

/// Retry policy with exponential backoff and jitter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Attempts before giving up; 0 = unlimited.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// True once `failures` consecutive failures exhaust the budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }

    /// Delay before the next attempt after `failures` consecutive failures (>= 1).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        let base = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base / 2)
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Live synchronization policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveSyncConfig {
    pub head_request: RetryConfig,
    pub frontfill_max_attempts: u32,
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            head_request: RetryConfig::default(),
            frontfill_max_attempts: 5,
        }
    }
}

impl Config {
    /// Parse a JSON config. Relative ABI paths resolve against the current directory.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_json_with_base(json, Path::new("."))
    }

    /// Load a JSON config file. Relative ABI paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json_with_base(&json, base)
    }

    fn from_json_with_base(json: &str, base: &Path) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json).context("parse config")?;
        let contracts = raw
            .contracts
            .into_iter()
            .map(|c| c.resolve(base))
            .collect::<Result<Vec<_>>>()?;
        Ok(Config {
            networks: raw.networks,
            contracts,
            live_sync: raw.live_sync,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    networks: Vec<NetworkConfig>,
    #[serde(default)]
    contracts: Vec<RawContract>,
    #[serde(default)]
    live_sync: LiveSyncConfig,
}

/// Inline ABI array or a path to a JSON ABI file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AbiSource {
    Inline(JsonAbi),
    Path(PathBuf),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContract {
    name: String,
    abi: AbiSource,
    network: Vec<RawContractNetwork>,
    start_block: Option<u64>,
    end_block: Option<u64>,
    max_block_range: Option<u64>,
    filter: Option<EventFilter>,
    address: Option<AddressOrList>,
    factory: Option<FactoryConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContractNetwork {
    name: String,
    start_block: Option<u64>,
    end_block: Option<u64>,
    max_block_range: Option<u64>,
    filter: Option<EventFilter>,
    address: Option<AddressOrList>,
    factory: Option<FactoryConfig>,
}

impl RawContract {
    fn resolve(self, base: &Path) -> Result<ContractConfig> {
        let abi = match self.abi {
            AbiSource::Inline(abi) => abi,
            AbiSource::Path(p) => {
                let path = if p.is_relative() { base.join(p) } else { p };
                let json = std::fs::read_to_string(&path)
                    .with_context(|| format!("read ABI {}", path.display()))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("parse ABI {}", path.display()))?
            }
        };
        let kind = match (self.address, self.factory) {
            (Some(_), Some(_)) => return Err(ConfigError::AddressAndFactory(self.name).into()),
            (None, Some(factory)) => ContractKind::Factory(factory),
            (address, None) => ContractKind::LogFilter { address },
        };
        let network = self
            .network
            .into_iter()
            .map(|n| n.resolve(&self.name, &kind))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(ContractConfig {
            name: self.name,
            abi,
            network,
            start_block: self.start_block,
            end_block: self.end_block,
            max_block_range: self.max_block_range,
            filter: self.filter,
            kind,
        })
    }
}

impl RawContractNetwork {
    fn resolve(self, contract: &str, kind: &ContractKind) -> Result<ContractNetworkConfig, ConfigError> {
        let mismatch = |found| ConfigError::OverrideKindMismatch {
            contract: contract.to_string(),
            network: self.name.clone(),
            found,
            kind: kind.label(),
        };
        let target = match (self.address, self.factory, kind) {
            (Some(_), Some(_), _) => {
                return Err(ConfigError::AddressAndFactory(format!("{contract}@{}", self.name)))
            }
            (Some(_), None, ContractKind::Factory(_)) => return Err(mismatch("'address'")),
            (None, Some(_), ContractKind::LogFilter { .. }) => return Err(mismatch("'factory'")),
            (Some(a), None, _) => Some(NetworkTarget::Address(a)),
            (None, Some(f), _) => Some(NetworkTarget::Factory(f)),
            (None, None, _) => None,
        };
        Ok(ContractNetworkConfig {
            name: self.name,
            start_block: self.start_block,
            end_block: self.end_block,
            max_block_range: self.max_block_range,
            filter: self.filter,
            target,
        })
    }
}
