//! Source resolution: configuration -> flat list of per-network log sources.
//!
//! One [Source] per (contract, network) pair, in contract then network declaration order.
//! Network-level overrides win over contract-level values; `start_block` defaults to 0.
//! Pure: no RPC calls.

use crate::abi::{get_events, AbiEvents};
use crate::config::{Config, ContractKind, NetworkTarget};
use crate::error::ConfigError;
use crate::factory::{build_factory_criteria, FactoryCriteria};
use crate::topics::{build_topics, Topics};
use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use std::sync::Arc;

/// Direct address/topic criteria. `address: None` matches every emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilterCriteria {
    pub address: Option<Vec<Address>>,
    pub topics: Option<Topics>,
}

impl LogFilterCriteria {
    /// Lowercase `0x` addresses, as sent to the RPC.
    pub fn address_hex(&self) -> Option<Vec<String>> {
        self.address
            .as_ref()
            .map(|v| v.iter().map(|a| format!("0x{}", hex::encode(a))).collect())
    }
}

/// Criteria of a source; the variant is the source's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCriteria {
    LogFilter(LogFilterCriteria),
    Factory(FactoryCriteria),
}

/// A contract on one network, with everything needed to fetch and decode its logs.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    /// Network name.
    pub network: String,
    pub chain_id: u64,
    pub abi: Arc<JsonAbi>,
    pub events: Arc<AbiEvents>,
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub max_block_range: Option<u64>,
    pub criteria: SourceCriteria,
}

impl Source {
    pub fn is_log_filter(&self) -> bool {
        matches!(self.criteria, SourceCriteria::LogFilter(_))
    }

    pub fn is_factory(&self) -> bool {
        matches!(self.criteria, SourceCriteria::Factory(_))
    }

    /// Addresses whose logs this source needs; `None` means any address.
    pub fn contract_addresses(&self) -> Option<Vec<Address>> {
        match &self.criteria {
            SourceCriteria::LogFilter(c) => c.address.clone(),
            SourceCriteria::Factory(c) => Some(vec![c.address]),
        }
    }

    pub fn topics(&self) -> Option<&Topics> {
        match &self.criteria {
            SourceCriteria::LogFilter(c) => c.topics.as_ref(),
            SourceCriteria::Factory(c) => c.topics.as_ref(),
        }
    }
}

/// Resolves every (contract, network) pair of `config` into a [Source].
pub fn build_sources(config: &Config) -> Result<Vec<Source>, ConfigError> {
    let mut sources = Vec::new();
    for contract in &config.contracts {
        let abi = Arc::new(contract.abi.clone());
        let events = Arc::new(get_events(&contract.abi));

        for network_contract in &contract.network {
            let network = config
                .networks
                .iter()
                .find(|n| n.name == network_contract.name)
                .ok_or_else(|| ConfigError::UnknownNetwork {
                    contract: contract.name.clone(),
                    network: network_contract.name.clone(),
                })?;

            let topics = network_contract
                .filter
                .as_ref()
                .or(contract.filter.as_ref())
                .map(|filter| build_topics(&contract.abi, filter))
                .transpose()?;

            let criteria = match &contract.kind {
                ContractKind::Factory(default) => {
                    let factory = match &network_contract.target {
                        Some(NetworkTarget::Factory(f)) => f,
                        _ => default,
                    };
                    SourceCriteria::Factory(FactoryCriteria {
                        topics,
                        ..build_factory_criteria(factory)?
                    })
                }
                ContractKind::LogFilter { address } => {
                    let address = match &network_contract.target {
                        Some(NetworkTarget::Address(a)) => Some(a),
                        _ => address.as_ref(),
                    };
                    SourceCriteria::LogFilter(LogFilterCriteria {
                        address: address.map(|a| a.to_vec()),
                        topics,
                    })
                }
            };

            sources.push(Source {
                name: contract.name.clone(),
                network: network.name.clone(),
                chain_id: network.chain_id,
                abi: Arc::clone(&abi),
                events: Arc::clone(&events),
                start_block: network_contract
                    .start_block
                    .or(contract.start_block)
                    .unwrap_or(0),
                end_block: network_contract.end_block.or(contract.end_block),
                max_block_range: network_contract.max_block_range.or(contract.max_block_range),
                criteria,
            });
        }
    }
    Ok(sources)
}
