//! Networks: a name, a chain id and the provider used to reach it.

use crate::config::{Config, NetworkConfig};
use crate::error::ProviderError;
use crate::provider::{JsonRpcProvider, Provider};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Network {
    /// Unique key.
    pub name: String,
    pub chain_id: u64,
    pub provider: Arc<dyn Provider>,
}

impl Network {
    pub fn new(name: impl Into<String>, chain_id: u64, provider: Arc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            chain_id,
            provider,
        }
    }

    /// Network backed by a [JsonRpcProvider].
    pub fn from_config(config: &NetworkConfig) -> Result<Self, ProviderError> {
        let provider = JsonRpcProvider::new(config)?;
        Ok(Self::new(config.name.clone(), config.chain_id, Arc::new(provider)))
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("name", &self.name)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

/// One [Network] per configured network, in declaration order.
pub fn build_networks(config: &Config) -> Result<Vec<Network>, ProviderError> {
    config.networks.iter().map(Network::from_config).collect()
}
