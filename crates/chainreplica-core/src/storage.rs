//! Storage collaborator trait.
//!
//! A [`Database`] receives replicated records, persists namespace manager
//! checkpoints, and carries the control channel over which consumers
//! subscribe to and unsubscribe from namespaces.
//!
//! Implementations live in `chainreplica-storage` (`InMemoryDatabase`,
//! `SqliteDatabase`).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ReplicaError;
use crate::namespace::Namespace;
use crate::types::DataId;

/// Receiving end of the control channel: raw, unparsed control payloads.
pub type ControlReceiver = mpsc::UnboundedReceiver<String>;

#[async_trait]
pub trait Database: Send + Sync {
    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), ReplicaError>;

    /// Store one record. Ids are unique per namespace; other namespaces may
    /// reuse the same ids.
    async fn store_data(&self, namespace: Namespace, id: DataId, data: &[u8]) -> Result<(), ReplicaError>;

    /// Remove one record.
    async fn delete_data(&self, namespace: Namespace, id: DataId) -> Result<(), ReplicaError>;

    /// Save (upsert) a namespace manager checkpoint.
    async fn save_manager(&self, namespace: Namespace, checkpoint: &[u8]) -> Result<(), ReplicaError>;

    /// Load every persisted checkpoint.
    async fn load_managers(&self) -> Result<Vec<(Namespace, Vec<u8>)>, ReplicaError>;

    /// Remove a checkpoint after its namespace is unsubscribed.
    async fn delete_manager(&self, namespace: Namespace) -> Result<(), ReplicaError>;

    /// Start delivering control payloads. The receiver closes when
    /// [`Database::unsubscribe_control`] is called or the backend shuts down.
    async fn subscribe_control(&self) -> Result<ControlReceiver, ReplicaError>;

    async fn unsubscribe_control(&self) -> Result<(), ReplicaError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), ReplicaError>;
}
