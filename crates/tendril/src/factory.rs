//! Factory criteria: where a factory's "child created" event carries the child address.

use crate::config::FactoryConfig;
use crate::error::ConfigError;
use crate::topics::Topics;
use alloy::json_abi::Event;
use alloy::primitives::{Address, B256};
use std::fmt;
use std::str::FromStr;

/// Location of the child address inside the factory log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildAddressLocation {
    /// `topic1`..`topic3`.
    Topic(u8),
    /// Byte offset of the ABI word in the log data.
    Offset(usize),
}

impl ChildAddressLocation {
    /// Reads the child address from a log's topics and data.
    pub fn extract(&self, topics: &[B256], data: &[u8]) -> Option<Address> {
        match *self {
            ChildAddressLocation::Topic(i) => topics
                .get(i as usize)
                .map(|t| Address::from_word(*t)),
            ChildAddressLocation::Offset(offset) => {
                let word = data.get(offset..offset.checked_add(32)?)?;
                Some(Address::from_slice(&word[12..]))
            }
        }
    }
}

impl fmt::Display for ChildAddressLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildAddressLocation::Topic(i) => write!(f, "topic{i}"),
            ChildAddressLocation::Offset(o) => write!(f, "offset{o}"),
        }
    }
}

impl FromStr for ChildAddressLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(n) = s.strip_prefix("topic") {
            match n.parse::<u8>() {
                Ok(i @ 1..=3) => return Ok(ChildAddressLocation::Topic(i)),
                _ => return Err(format!("invalid topic location '{s}'")),
            }
        }
        if let Some(n) = s.strip_prefix("offset") {
            return n
                .parse::<usize>()
                .map(ChildAddressLocation::Offset)
                .map_err(|e| format!("invalid offset location '{s}': {e}"));
        }
        Err(format!("unknown child address location '{s}'"))
    }
}

/// Log criteria for a factory source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryCriteria {
    pub address: Address,
    pub event_selector: B256,
    pub child_address_location: ChildAddressLocation,
    /// Topic criteria applied to the children's logs.
    pub topics: Option<Topics>,
}

impl FactoryCriteria {
    /// Child address announced by a factory log, if the log is the factory's child event.
    pub fn child_address(&self, emitter: Address, topics: &[B256], data: &[u8]) -> Option<Address> {
        if emitter != self.address || topics.first() != Some(&self.event_selector) {
            return None;
        }
        self.child_address_location.extract(topics, data)
    }
}

/// Resolves a factory declaration to its criteria (without child topics).
pub fn build_factory_criteria(factory: &FactoryConfig) -> Result<FactoryCriteria, ConfigError> {
    let src = factory.event.trim();
    let src = if src.starts_with("event ") {
        src.to_string()
    } else {
        format!("event {src}")
    };
    let event = Event::parse(&src)
        .map_err(|e| ConfigError::InvalidSignature(factory.event.clone(), e.to_string()))?;
    if event.anonymous {
        return Err(ConfigError::AnonymousEvent(event.name));
    }

    let param = event
        .inputs
        .iter()
        .find(|p| p.name == factory.parameter)
        .ok_or_else(|| ConfigError::FactoryParameterNotFound {
            event: event.name.clone(),
            parameter: factory.parameter.clone(),
            expected: event
                .inputs
                .iter()
                .map(|p| format!("'{}'", p.name))
                .collect::<Vec<_>>()
                .join(", "),
        })?;
    if param.ty != "address" {
        return Err(ConfigError::FactoryParameterNotAddress {
            event: event.name.clone(),
            parameter: factory.parameter.clone(),
            ty: param.ty.clone(),
        });
    }

    let position = |indexed: bool| {
        event
            .inputs
            .iter()
            .filter(|p| p.indexed == indexed)
            .position(|p| p.name == factory.parameter)
    };
    let child_address_location = match position(true) {
        Some(i) if param.indexed => {
            if i >= 3 {
                return Err(ConfigError::TooManyIndexedParameters {
                    event: event.name.clone(),
                    indexed: event.inputs.iter().filter(|p| p.indexed).count(),
                });
            }
            ChildAddressLocation::Topic(i as u8 + 1)
        }
        _ => ChildAddressLocation::Offset(position(false).unwrap_or_default() * 32),
    };

    Ok(FactoryCriteria {
        address: factory.address,
        event_selector: event.selector(),
        child_address_location,
        topics: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, keccak256};

    const FACTORY: Address = address!("5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f");

    fn factory(event: &str, parameter: &str) -> FactoryConfig {
        FactoryConfig {
            address: FACTORY,
            event: event.into(),
            parameter: parameter.into(),
        }
    }

    #[test]
    fn indexed_parameter_maps_to_topic() {
        let c = build_factory_criteria(&factory(
            "event PairCreated(address indexed token0, address indexed token1, address pair, uint256)",
            "token1",
        ))
        .unwrap();
        assert_eq!(c.address, FACTORY);
        assert_eq!(c.event_selector, keccak256("PairCreated(address,address,address,uint256)"));
        assert_eq!(c.child_address_location, ChildAddressLocation::Topic(2));
        assert_eq!(c.child_address_location.to_string(), "topic2");
    }

    #[test]
    fn non_indexed_parameter_maps_to_offset() {
        let c = build_factory_criteria(&factory(
            "PoolCreated(address indexed token0, uint24 fee, address pool)",
            "pool",
        ))
        .unwrap();
        assert_eq!(c.child_address_location, ChildAddressLocation::Offset(32));
        assert_eq!(c.child_address_location.to_string(), "offset32");
    }

    #[test]
    fn rejects_unknown_or_non_address_parameter() {
        let err = build_factory_criteria(&factory("event Created(address indexed child)", "pair")).unwrap_err();
        assert!(matches!(err, ConfigError::FactoryParameterNotFound { ref expected, .. } if expected == "'child'"));

        let err = build_factory_criteria(&factory("event Created(uint256 indexed id)", "id")).unwrap_err();
        assert!(matches!(err, ConfigError::FactoryParameterNotAddress { .. }));
    }

    #[test]
    fn fourth_indexed_parameter_is_rejected() {
        let err = build_factory_criteria(&factory(
            "event Created(address indexed a, address indexed b, address indexed c, address indexed child)",
            "child",
        ))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::TooManyIndexedParameters {
                event: "Created".into(),
                indexed: 4,
            }
        );

        let c = build_factory_criteria(&factory(
            "event Created(address indexed a, address indexed b, address indexed child)",
            "child",
        ))
        .unwrap();
        assert_eq!(c.child_address_location, ChildAddressLocation::Topic(3));
    }

    #[test]
    fn location_round_trips_through_str() {
        assert_eq!("topic3".parse::<ChildAddressLocation>(), Ok(ChildAddressLocation::Topic(3)));
        assert_eq!("offset64".parse::<ChildAddressLocation>(), Ok(ChildAddressLocation::Offset(64)));
        assert!("topic4".parse::<ChildAddressLocation>().is_err());
        assert!("data0".parse::<ChildAddressLocation>().is_err());
    }

    #[test]
    fn extracts_child_from_topic_and_data() {
        let child = address!("00000000000000000000000000000000000000c1");
        let selector = keccak256("Created(address)");
        let criteria = FactoryCriteria {
            address: FACTORY,
            event_selector: selector,
            child_address_location: ChildAddressLocation::Topic(1),
            topics: None,
        };
        let topics = [selector, child.into_word()];
        assert_eq!(criteria.child_address(FACTORY, &topics, &[]), Some(child));
        assert_eq!(criteria.child_address(child, &topics, &[]), None);

        let mut data = vec![0u8; 64];
        data[44..64].copy_from_slice(child.as_slice());
        assert_eq!(ChildAddressLocation::Offset(32).extract(&[], &data), Some(child));
        assert_eq!(ChildAddressLocation::Offset(64).extract(&[], &data), None);
    }
}
