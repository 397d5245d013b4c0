//! Topic criteria for `eth_getLogs` / `eth_subscribe` filters.
//!
//! [build_topics] turns a user event filter into [Topics]: either slot 0 = OR over several
//! event selectors, or one event with its indexed arguments at their natural slots.

use crate::abi::find_abi_event;
use crate::error::ConfigError;
use alloy::dyn_abi::{DynSolType, Specifier};
use alloy::json_abi::{Event, EventParam, JsonAbi};
use alloy::primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// EVM logs carry at most four topics.
pub const MAX_TOPICS: usize = 4;

/// One topic position: a single hash or a set of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TopicSlot {
    One(B256),
    AnyOf(Vec<B256>),
}

impl TopicSlot {
    pub fn matches(&self, topic: &B256) -> bool {
        match self {
            TopicSlot::One(t) => t == topic,
            TopicSlot::AnyOf(ts) => ts.contains(topic),
        }
    }
}

/// Ordered topic slots; `None` is a wildcard. Serializes to the JSON-RPC `topics` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Topics(Vec<Option<TopicSlot>>);

impl Topics {
    pub fn new(slots: Vec<Option<TopicSlot>>) -> Result<Self, ConfigError> {
        if slots.len() > MAX_TOPICS {
            return Err(ConfigError::TooManyTopics(slots.len()));
        }
        Ok(Self(slots))
    }

    pub fn slots(&self) -> &[Option<TopicSlot>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if a log with `log_topics` satisfies every constrained slot.
    pub fn matches(&self, log_topics: &[B256]) -> bool {
        self.0.iter().enumerate().all(|(i, slot)| match slot {
            None => true,
            Some(slot) => log_topics.get(i).is_some_and(|t| slot.matches(t)),
        })
    }
}

/// Which events of a contract to match.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EventFilter {
    /// Event names or signatures; a log matches if its topic0 is any of them.
    Signatures(Vec<String>),
    /// One event, optionally constrained on indexed arguments.
    Event {
        event: String,
        #[serde(default)]
        args: Option<EventArgs>,
    },
}

/// Indexed argument constraints, by position (indexed inputs only) or by name.
/// `null` leaves a slot unconstrained; an array at a non-array parameter means "any of".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EventArgs {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

/// Builds the topic criteria for `filter` against `abi`.
pub fn build_topics(abi: &JsonAbi, filter: &EventFilter) -> Result<Topics, ConfigError> {
    match filter {
        EventFilter::Signatures(names) => {
            let mut selectors: Vec<B256> = Vec::with_capacity(names.len());
            for name in names {
                let selector = selector_of(&find_abi_event(abi, name)?)?;
                if !selectors.contains(&selector) {
                    selectors.push(selector);
                }
            }
            Topics::new(vec![Some(TopicSlot::AnyOf(selectors))])
        }
        EventFilter::Event { event, args } => {
            let event = find_abi_event(abi, event)?;
            let selector = selector_of(&event)?;
            let mut slots = vec![Some(TopicSlot::One(selector))];
            if let Some(args) = args {
                slots.extend(indexed_arg_slots(&event, args)?);
            }
            Topics::new(slots)
        }
    }
}

fn selector_of(event: &Event) -> Result<B256, ConfigError> {
    if event.anonymous {
        return Err(ConfigError::AnonymousEvent(event.name.clone()));
    }
    Ok(event.selector())
}

fn indexed_arg_slots(event: &Event, args: &EventArgs) -> Result<Vec<Option<TopicSlot>>, ConfigError> {
    let indexed: Vec<&EventParam> = event.inputs.iter().filter(|p| p.indexed).collect();
    let values: Vec<Option<&Value>> = match args {
        EventArgs::Positional(values) => {
            if values.len() > indexed.len() {
                return Err(ConfigError::TooManyArguments {
                    event: event.name.clone(),
                    indexed: indexed.len(),
                    given: values.len(),
                });
            }
            (0..indexed.len()).map(|i| values.get(i)).collect()
        }
        EventArgs::Named(map) => {
            if let Some(unknown) = map.keys().find(|k| !indexed.iter().any(|p| &p.name == *k)) {
                return Err(ConfigError::UnknownArgument {
                    event: event.name.clone(),
                    arg: unknown.clone(),
                });
            }
            indexed.iter().map(|p| map.get(&p.name)).collect()
        }
    };

    indexed
        .iter()
        .zip(values)
        .map(|(param, value)| match value {
            None | Some(Value::Null) => Ok(None),
            Some(value) => encode_slot(param, value).map(Some),
        })
        .collect()
}

fn encode_slot(param: &EventParam, value: &Value) -> Result<TopicSlot, ConfigError> {
    let ty: DynSolType = param.resolve().map_err(|e| invalid(param, e.to_string()))?;
    let is_array_type = matches!(ty, DynSolType::Array(_) | DynSolType::FixedArray(..));
    match value {
        Value::Array(items) if !is_array_type => {
            let topics = items
                .iter()
                .map(|v| encode_topic(param, &ty, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TopicSlot::AnyOf(topics))
        }
        _ => encode_topic(param, &ty, value).map(TopicSlot::One),
    }
}

/// Value types are ABI-encoded into one word; `string`/`bytes` are hashed.
fn encode_topic(param: &EventParam, ty: &DynSolType, value: &Value) -> Result<B256, ConfigError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => return Err(invalid(param, format!("unsupported value {other}"))),
    };
    match ty {
        DynSolType::String => Ok(keccak256(text.as_bytes())),
        DynSolType::Bytes => {
            let bytes = hex::decode(text.strip_prefix("0x").unwrap_or(&text))
                .map_err(|e| invalid(param, e.to_string()))?;
            Ok(keccak256(bytes))
        }
        DynSolType::Array(_) | DynSolType::FixedArray(..) | DynSolType::Tuple(_) => {
            Err(invalid(param, "array and tuple topics are not supported".into()))
        }
        ty => ty
            .coerce_str(&text)
            .map_err(|e| invalid(param, e.to_string()))?
            .as_word()
            .ok_or_else(|| invalid(param, "not a single-word type".into())),
    }
}

fn invalid(param: &EventParam, reason: String) -> ConfigError {
    ConfigError::InvalidArgument {
        arg: param.name.clone(),
        ty: param.ty.clone(),
        reason,
    }
}
