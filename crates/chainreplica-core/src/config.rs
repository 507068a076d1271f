//! Data store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ReplicaError;
use crate::logging::LogConfig;

/// Chain parameters the replicator needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Chain name, used in log output.
    pub name: String,
    /// Number of blocks after which a block is considered unlikely to be
    /// reverted. Sizes the block buffer in matured mode.
    pub maturity_delay: u64,
}

impl Default for ChainInfo {
    fn default() -> Self {
        Self {
            name: "standard".into(),
            maturity_delay: 144,
        }
    }
}

/// When records are written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Write records as soon as their block is applied; delete them when it
    /// is reverted.
    Immediate,
    /// Hold applied blocks in a buffer of `maturity_delay` blocks and only
    /// write a block's records once it leaves the buffer. Reverts inside the
    /// window never touch storage.
    #[default]
    Matured,
}

/// Configuration for a [`DataStore`](crate::DataStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataStoreConfig {
    /// Directory for the data store's log file.
    pub persist_dir: PathBuf,
    #[serde(default)]
    pub chain: ChainInfo,
    #[serde(default)]
    pub replication: ReplicationMode,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("datastore"),
            chain: ChainInfo::default(),
            replication: ReplicationMode::default(),
            log: LogConfig::default(),
        }
    }
}

impl DataStoreConfig {
    /// Block buffer capacity, `None` in immediate mode.
    pub fn buffer_size(&self) -> Option<usize> {
        match self.replication {
            ReplicationMode::Immediate => None,
            ReplicationMode::Matured => Some(self.chain.maturity_delay as usize),
        }
    }

    pub fn validate(&self) -> Result<(), ReplicaError> {
        if self.buffer_size() == Some(0) {
            return Err(ReplicaError::Config(
                "matured replication needs a maturity delay of at least one block".into(),
            ));
        }
        Ok(())
    }
}
