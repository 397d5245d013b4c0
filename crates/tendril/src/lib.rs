//! Multi-network EVM log sources and live head-following.
//!
//! - **Sources**: [build_sources] resolves configured contracts into one [Source] per
//!   (contract, network) pair, with either a log filter (addresses + topics) or factory
//!   criteria (child-address location inside a factory event).
//! - **Live sync**: [LiveBlockOrchestrator] fetches each network's head, attaches a block
//!   listener that enqueues newer blocks into a paused frontfill queue, and hands back a
//!   resume handle to call once historical backfill is done.

pub mod abi;
pub mod config;
pub mod error;
pub mod factory;
pub mod frontfill;
pub mod live;
pub mod network;
pub mod provider;
pub mod queue;
pub mod sources;
pub mod topics;

pub use abi::{find_abi_event, get_events, AbiEventMeta, AbiEvents};
pub use config::{
    AddressOrList, Config, ContractConfig, ContractKind, ContractNetworkConfig, FactoryConfig,
    LiveSyncConfig, NetworkConfig, NetworkTarget, RetryConfig,
};
pub use error::{ConfigError, ProviderError, SyncError};
pub use factory::{build_factory_criteria, ChildAddressLocation, FactoryCriteria};
pub use frontfill::{
    create_block_frontfill_queue, BlockFrontfillContext, BlockFrontfillQueue, BlockFrontfillTask,
    CacheStore, HandlerQueue, LiveLogBatch,
};
pub use live::{
    LiveBlockOrchestrator, LiveBlockQueues, LiveNetworkStatus, ResumeLiveBlockQueues,
    SynchronizationState,
};
pub use network::{build_networks, Network};
pub use provider::{BlockListener, JsonRpcProvider, LogQuery, Provider};
pub use queue::PausableQueue;
pub use sources::{build_sources, LogFilterCriteria, Source, SourceCriteria};
pub use topics::{build_topics, EventArgs, EventFilter, TopicSlot, Topics, MAX_TOPICS};
