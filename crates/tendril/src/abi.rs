//! Event catalogue of a contract ABI and event-name resolution.

use crate::error::ConfigError;
use alloy::json_abi::{Event, JsonAbi};
use alloy::primitives::B256;
use std::collections::{BTreeMap, HashSet};

/// One event the handler layer can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiEventMeta {
    /// Name unique within the contract: the event name, or its signature when overloaded.
    pub safe_name: String,
    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub signature: String,
    /// topic0.
    pub selector: B256,
    pub item: Event,
}

/// Non-anonymous events of an ABI, keyed by safe name.
pub type AbiEvents = BTreeMap<String, AbiEventMeta>;

/// Builds the event catalogue. Overloaded names are keyed by full signature.
pub fn get_events(abi: &JsonAbi) -> AbiEvents {
    let events: Vec<&Event> = abi.events().filter(|e| !e.anonymous).collect();
    let mut seen = HashSet::new();
    let overloaded: HashSet<&str> = events
        .iter()
        .filter(|e| !seen.insert(e.name.as_str()))
        .map(|e| e.name.as_str())
        .collect();

    events
        .into_iter()
        .map(|e| {
            let signature = e.signature();
            let safe_name = if overloaded.contains(e.name.as_str()) {
                signature.clone()
            } else {
                e.name.clone()
            };
            let meta = AbiEventMeta {
                safe_name: safe_name.clone(),
                signature,
                selector: e.selector(),
                item: e.clone(),
            };
            (safe_name, meta)
        })
        .collect()
}

/// Finds the ABI event for `name`.
///
/// A name containing `(` is a signature (required when the ABI overloads the name) and is
/// parsed directly; the ABI item with the same selector is preferred so that `indexed`
/// markers come from the ABI. A bare name must exist exactly once in the ABI.
pub fn find_abi_event(abi: &JsonAbi, name: &str) -> Result<Event, ConfigError> {
    if name.contains('(') {
        let trimmed = name.trim();
        let src = if trimmed.starts_with("event ") {
            trimmed.to_string()
        } else {
            format!("event {trimmed}")
        };
        let parsed = Event::parse(&src)
            .map_err(|e| ConfigError::InvalidSignature(name.to_string(), e.to_string()))?;
        let selector = parsed.selector();
        return Ok(abi
            .events()
            .find(|e| !e.anonymous && e.selector() == selector)
            .cloned()
            .unwrap_or(parsed));
    }

    match abi.event(name).map(Vec::as_slice) {
        None | Some([]) => Err(ConfigError::EventNotFound(name.to_string())),
        Some([event]) => Ok(event.clone()),
        Some([first, ..]) => Err(ConfigError::AmbiguousEvent(
            name.to_string(),
            first.signature(),
        )),
    }
}
