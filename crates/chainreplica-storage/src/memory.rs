//! In-memory storage backend.
//!
//! Keeps replicated records and manager checkpoints in RAM and carries the
//! control channel over a tokio mpsc channel. Useful for testing and for
//! embedding a replica that does not need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use chainreplica_core::error::ReplicaError;
use chainreplica_core::manager::{decode_checkpoint, NamespaceManagerState};
use chainreplica_core::namespace::Namespace;
use chainreplica_core::storage::{ControlReceiver, Database};
use chainreplica_core::types::DataId;

/// In-memory replica storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryDatabase {
    data: Mutex<BTreeMap<(Namespace, DataId), Vec<u8>>>,
    managers: Mutex<HashMap<Namespace, Vec<u8>>>,
    control: Mutex<Option<mpsc::UnboundedSender<String>>>,
    unavailable: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a control message to the subscribed listener.
    ///
    /// Returns `false` when nobody is listening; the message is dropped.
    pub fn publish(&self, payload: impl Into<String>) -> bool {
        match self.control.lock().unwrap().as_ref() {
            Some(tx) => tx.send(payload.into()).is_ok(),
            None => false,
        }
    }

    pub fn get_data(&self, namespace: Namespace, id: DataId) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(&(namespace, id)).cloned()
    }

    /// Records of one namespace, ordered by id.
    pub fn records(&self, namespace: Namespace) -> Vec<(DataId, Vec<u8>)> {
        self.data
            .lock()
            .unwrap()
            .range((namespace, 0)..=(namespace, DataId::MAX))
            .map(|((_, id), payload)| (*id, payload.clone()))
            .collect()
    }

    pub fn data_count(&self, namespace: Namespace) -> usize {
        self.records(namespace).len()
    }

    /// Decoded checkpoint of a namespace, if one is stored and readable.
    pub fn manager_state(&self, namespace: Namespace) -> Option<NamespaceManagerState> {
        let managers = self.managers.lock().unwrap();
        let checkpoint = managers.get(&namespace)?;
        decode_checkpoint(checkpoint).ok().map(|(state, _)| state)
    }

    /// Store a raw checkpoint, bypassing the manager.
    pub fn insert_checkpoint(&self, namespace: Namespace, checkpoint: Vec<u8>) {
        self.managers.lock().unwrap().insert(namespace, checkpoint);
    }

    /// Make every call fail with a storage error (simulated outage).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ReplicaError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReplicaError::Storage("in-memory database unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn ping(&self) -> Result<(), ReplicaError> {
        self.check()
    }

    async fn store_data(&self, namespace: Namespace, id: DataId, data: &[u8]) -> Result<(), ReplicaError> {
        self.check()?;
        self.data.lock().unwrap().insert((namespace, id), data.to_vec());
        Ok(())
    }

    async fn delete_data(&self, namespace: Namespace, id: DataId) -> Result<(), ReplicaError> {
        self.check()?;
        self.data.lock().unwrap().remove(&(namespace, id));
        Ok(())
    }

    async fn save_manager(&self, namespace: Namespace, checkpoint: &[u8]) -> Result<(), ReplicaError> {
        self.check()?;
        self.managers.lock().unwrap().insert(namespace, checkpoint.to_vec());
        Ok(())
    }

    async fn load_managers(&self) -> Result<Vec<(Namespace, Vec<u8>)>, ReplicaError> {
        self.check()?;
        let managers = self.managers.lock().unwrap();
        let mut all: Vec<_> = managers.iter().map(|(ns, cp)| (*ns, cp.clone())).collect();
        all.sort_by_key(|(ns, _)| *ns);
        Ok(all)
    }

    async fn delete_manager(&self, namespace: Namespace) -> Result<(), ReplicaError> {
        self.check()?;
        self.managers.lock().unwrap().remove(&namespace);
        Ok(())
    }

    async fn subscribe_control(&self) -> Result<ControlReceiver, ReplicaError> {
        self.check()?;
        let (tx, rx) = mpsc::unbounded_channel();
        if self.control.lock().unwrap().replace(tx).is_some() {
            debug!("replaced existing control subscription");
        }
        Ok(rx)
    }

    async fn unsubscribe_control(&self) -> Result<(), ReplicaError> {
        self.control.lock().unwrap().take();
        Ok(())
    }

    async fn close(&self) -> Result<(), ReplicaError> {
        self.control.lock().unwrap().take();
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
