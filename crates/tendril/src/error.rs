//! Error types.
//!
//! [ConfigError] is fatal: it means the user's configuration cannot be resolved and
//! there is nothing to retry. [ProviderError] is transient and stays inside retry loops.
//! [SyncError] is what the live orchestrator surfaces to its caller.

use thiserror::Error;

/// Misconfiguration detected while resolving sources or building topics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("contract '{contract}' references unknown network '{network}'")]
    UnknownNetwork { contract: String, network: String },

    #[error("source references unknown network '{0}'")]
    UnknownSourceNetwork(String),

    #[error("event '{0}' not found in ABI")]
    EventNotFound(String),

    #[error("event name '{0}' is ambiguous (overloaded); use the full signature, e.g. '{1}'")]
    AmbiguousEvent(String, String),

    #[error("invalid event signature '{0}': {1}")]
    InvalidSignature(String, String),

    #[error("anonymous event '{0}' has no selector to filter on")]
    AnonymousEvent(String),

    #[error("event '{event}' has no indexed argument named '{arg}'")]
    UnknownArgument { event: String, arg: String },

    #[error("event '{event}' has {indexed} indexed arguments, got {given} filter values")]
    TooManyArguments {
        event: String,
        indexed: usize,
        given: usize,
    },

    #[error("cannot encode value for '{arg}' as {ty}: {reason}")]
    InvalidArgument {
        arg: String,
        ty: String,
        reason: String,
    },

    #[error("topic filters support at most 4 slots, got {0}")]
    TooManyTopics(usize),

    #[error("factory event '{event}' has no parameter '{parameter}'; expected one of [{expected}]")]
    FactoryParameterNotFound {
        event: String,
        parameter: String,
        expected: String,
    },

    #[error("factory parameter '{parameter}' of '{event}' must be an address, got {ty}")]
    FactoryParameterNotAddress {
        event: String,
        parameter: String,
        ty: String,
    },

    #[error("factory event '{event}' has {indexed} indexed parameters; at most 3 fit in topics")]
    TooManyIndexedParameters { event: String, indexed: usize },

    #[error("contract '{0}' declares both 'address' and 'factory'")]
    AddressAndFactory(String),

    #[error("network override '{network}' of contract '{contract}' sets {found} but the contract is a {kind} contract")]
    OverrideKindMismatch {
        contract: String,
        network: String,
        found: &'static str,
        kind: &'static str,
    },
}

/// Errors returned by a [crate::Provider].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors returned by the live synchronization orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("network '{network}' head unavailable after {attempts} attempts: {reason}")]
    HeadUnavailable {
        network: String,
        attempts: u32,
        reason: String,
    },
}
