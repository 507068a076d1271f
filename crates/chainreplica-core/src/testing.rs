//! Test doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ReplicaError;
use crate::namespace::Namespace;
use crate::record::{encode_record, SPECIFIER_LEN};
use crate::storage::{ControlReceiver, Database};
use crate::types::{Block, BlockId, ConsensusChange, ConsensusChangeId, DataId, Transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Store(Namespace, DataId, Vec<u8>),
    Delete(Namespace, DataId),
}

/// Database that records every data call.
#[derive(Default)]
pub struct RecordingDatabase {
    pub ops: Mutex<Vec<Op>>,
    pub managers: Mutex<HashMap<Namespace, Vec<u8>>>,
    control: Mutex<Option<mpsc::UnboundedSender<String>>>,
    fail_data: AtomicBool,
    fail_ping: AtomicBool,
    pub closed: AtomicBool,
}

impl RecordingDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn set_fail_data(&self, fail: bool) {
        self.fail_data.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn publish(&self, payload: &str) -> bool {
        match self.control.lock().unwrap().as_ref() {
            Some(tx) => tx.send(payload.to_string()).is_ok(),
            None => false,
        }
    }

    fn check_data(&self) -> Result<(), ReplicaError> {
        if self.fail_data.load(Ordering::SeqCst) {
            return Err(ReplicaError::Storage("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn ping(&self) -> Result<(), ReplicaError> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(ReplicaError::Storage("connection refused".into()));
        }
        Ok(())
    }

    async fn store_data(&self, namespace: Namespace, id: DataId, data: &[u8]) -> Result<(), ReplicaError> {
        self.check_data()?;
        self.ops.lock().unwrap().push(Op::Store(namespace, id, data.to_vec()));
        Ok(())
    }

    async fn delete_data(&self, namespace: Namespace, id: DataId) -> Result<(), ReplicaError> {
        self.check_data()?;
        self.ops.lock().unwrap().push(Op::Delete(namespace, id));
        Ok(())
    }

    async fn save_manager(&self, namespace: Namespace, checkpoint: &[u8]) -> Result<(), ReplicaError> {
        self.check_data()?;
        self.managers.lock().unwrap().insert(namespace, checkpoint.to_vec());
        Ok(())
    }

    async fn load_managers(&self) -> Result<Vec<(Namespace, Vec<u8>)>, ReplicaError> {
        Ok(self
            .managers
            .lock()
            .unwrap()
            .iter()
            .map(|(ns, cp)| (*ns, cp.clone()))
            .collect())
    }

    async fn delete_manager(&self, namespace: Namespace) -> Result<(), ReplicaError> {
        self.managers.lock().unwrap().remove(&namespace);
        Ok(())
    }

    async fn subscribe_control(&self) -> Result<ControlReceiver, ReplicaError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.control.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe_control(&self) -> Result<(), ReplicaError> {
        self.control.lock().unwrap().take();
        Ok(())
    }

    async fn close(&self) -> Result<(), ReplicaError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn ns(s: &str) -> Namespace {
    Namespace::load_str(s).unwrap()
}

/// Arbitrary data blob with an all-zero specifier.
pub fn blob(namespace: &str, payload: &[u8]) -> Vec<u8> {
    encode_record(&[0u8; SPECIFIER_LEN], &ns(namespace), payload)
}

pub fn block(n: u8, timestamp: u64, blobs: Vec<Vec<u8>>) -> Block {
    Block::new(BlockId([n; 32]), timestamp, vec![Transaction::with_data(blobs)])
}

pub fn change_id(n: u8) -> ConsensusChangeId {
    ConsensusChangeId([n; 32])
}

pub fn applied(n: u8, blocks: Vec<Block>) -> ConsensusChange {
    ConsensusChange::apply(change_id(n), blocks)
}

pub fn reverted(n: u8, reverted_blocks: Vec<Block>, applied_blocks: Vec<Block>) -> ConsensusChange {
    ConsensusChange {
        id: change_id(n),
        reverted_blocks,
        applied_blocks,
    }
}
