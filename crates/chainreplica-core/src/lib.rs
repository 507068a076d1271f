//! chainreplica-core — reorg-aware replication of namespaced chain data.
//!
//! # Architecture
//!
//! ```text
//! DataStoreBuilder → DataStore
//!                      ├── control listener  (SubEvent: subscribe / unsubscribe)
//!                      ├── NamespaceManager  (one per namespace, ConsensusSubscriber)
//!                      │     ├── record extraction (Specifier ‖ Namespace ‖ Payload)
//!                      │     └── BlockBuffer       (maturity window, matured mode)
//!                      ├── ConsensusSet      (collaborator, pushes ConsensusChanges)
//!                      └── Database          (collaborator: memory / SQLite)
//! ```

pub mod buffer;
pub mod config;
pub mod consensus;
pub mod datastore;
pub mod error;
pub mod event;
pub mod logging;
pub mod manager;
pub mod namespace;
pub mod record;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

pub use buffer::{BlockBuffer, BlockFrame};
pub use config::{ChainInfo, DataStoreConfig, ReplicationMode};
pub use consensus::{ConsensusSet, ConsensusSubscriber, MemoryConsensusSet, SubscriberId};
pub use datastore::{DataStore, DataStoreBuilder};
pub use error::ReplicaError;
pub use event::{SubAction, SubEvent};
pub use logging::{init_tracing, LogConfig};
pub use manager::{decode_checkpoint, NamespaceManager, NamespaceManagerState};
pub use namespace::Namespace;
pub use storage::{ControlReceiver, Database};
pub use types::{Block, BlockId, ConsensusChange, ConsensusChangeId, DataId, Timestamp, Transaction};
