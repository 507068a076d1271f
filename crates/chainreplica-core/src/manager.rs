//! Namespace manager: replicates the records of one namespace.
//!
//! A manager subscribes to the consensus set, extracts the records addressed
//! to its namespace from every applied or reverted block, stores or deletes
//! them, and checkpoints its position after each consensus change so it can
//! resume after a restart.
//!
//! Lifecycle: `Pending → Active → Closed`. `Closed` is terminal.

use std::sync::Arc;

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::{BlockBuffer, BlockFrame};
use crate::consensus::{ConsensusSet, ConsensusSubscriber, SubscriberId};
use crate::error::ReplicaError;
use crate::namespace::Namespace;
use crate::record::matching_records;
use crate::storage::Database;
use crate::types::{Block, ConsensusChange, ConsensusChangeId, DataId, Timestamp, Transaction};

/// Persisted position of a namespace manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct NamespaceManagerState {
    /// Number of blocks processed (applied minus reverted).
    pub block_height: u64,
    /// Last consensus change fully processed; the resume cursor.
    pub recent_change_id: ConsensusChangeId,
    /// Id the next matched record will get. Advances for every matched
    /// record, including the ones skipped by `subscribe_start`.
    pub data_id: DataId,
    /// Records from blocks older than this are not replicated.
    pub subscribe_start: Timestamp,
}

/// Checkpoint layout: the state, then the frames not yet replicated
/// (oldest first).
#[derive(BorshSerialize, BorshDeserialize)]
struct ManagerCheckpoint {
    state: NamespaceManagerState,
    pending: Vec<BlockFrame>,
}

/// Decode a checkpoint into its state and pending frames.
pub fn decode_checkpoint(bytes: &[u8]) -> Result<(NamespaceManagerState, Vec<BlockFrame>), ReplicaError> {
    let cp: ManagerCheckpoint =
        borsh::from_slice(bytes).map_err(|e| ReplicaError::Decode(e.to_string()))?;
    Ok((cp.state, cp.pending))
}

enum Subscription {
    /// Not yet registered with a consensus set.
    Pending,
    Active(Arc<dyn ConsensusSet>),
    Closed,
}

struct Inner {
    state: NamespaceManagerState,
    subscription: Subscription,
    /// `None` in immediate replication mode.
    buffer: Option<BlockBuffer>,
    /// Restored frames that no longer fit the buffer; replicated on subscribe.
    matured: Vec<BlockFrame>,
}

/// Tracks and replicates one namespace.
pub struct NamespaceManager {
    id: SubscriberId,
    namespace: Namespace,
    db: Arc<dyn Database>,
    inner: Mutex<Inner>,
}

impl NamespaceManager {
    /// Create a manager that starts from genesis, replicating blocks whose
    /// timestamp is at least `subscribe_start`.
    ///
    /// `buffer_size` is the block buffer capacity (`None` = replicate
    /// immediately).
    pub fn new(
        namespace: Namespace,
        db: Arc<dyn Database>,
        subscribe_start: Timestamp,
        buffer_size: Option<usize>,
    ) -> Self {
        let state = NamespaceManagerState {
            subscribe_start,
            ..Default::default()
        };
        Self::with_state(namespace, db, state, buffer_size.map(BlockBuffer::new), vec![])
    }

    /// Recreate a manager from a persisted checkpoint.
    ///
    /// Pending frames are pushed back into the buffer; frames that overflow
    /// it (the buffer shrank or replication is now immediate) are replicated
    /// when the manager subscribes.
    pub fn restore(
        namespace: Namespace,
        db: Arc<dyn Database>,
        checkpoint: &[u8],
        buffer_size: Option<usize>,
    ) -> Result<Self, ReplicaError> {
        let (state, pending) = decode_checkpoint(checkpoint)?;
        let mut buffer = buffer_size.map(BlockBuffer::new);
        let matured = match buffer.as_mut() {
            Some(buf) => pending.into_iter().filter_map(|frame| buf.push(frame)).collect(),
            None => pending,
        };
        Ok(Self::with_state(namespace, db, state, buffer, matured))
    }

    fn with_state(
        namespace: Namespace,
        db: Arc<dyn Database>,
        state: NamespaceManagerState,
        buffer: Option<BlockBuffer>,
        matured: Vec<BlockFrame>,
    ) -> Self {
        Self {
            id: SubscriberId::next(),
            namespace,
            db,
            inner: Mutex::new(Inner {
                state,
                subscription: Subscription::Pending,
                buffer,
                matured,
            }),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub async fn state(&self) -> NamespaceManagerState {
        self.inner.lock().await.state
    }

    pub async fn is_subscribed(&self) -> bool {
        matches!(self.inner.lock().await.subscription, Subscription::Active(_))
    }

    /// Blocks applied but not yet replicated.
    pub async fn pending_blocks(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.matured.len() + inner.buffer.as_ref().map_or(0, BlockBuffer::len)
    }

    /// Encode the current checkpoint.
    pub async fn serialize(&self) -> Result<Vec<u8>, ReplicaError> {
        encode_checkpoint(&*self.inner.lock().await)
    }

    /// Persist the checkpoint under this manager's namespace.
    pub async fn save(&self) -> Result<(), ReplicaError> {
        let inner = self.inner.lock().await;
        self.persist(&inner).await
    }

    /// Remove the persisted checkpoint.
    pub async fn delete(&self) -> Result<(), ReplicaError> {
        self.db.delete_manager(self.namespace).await
    }

    /// Register with `cs`, resuming after the last processed change.
    ///
    /// The consensus set replays the backlog before this returns, so callers
    /// run it in a spawned task. A manager that is closed meanwhile is
    /// unsubscribed again once registration finishes.
    pub async fn subscribe_cs(self: Arc<Self>, cs: Arc<dyn ConsensusSet>) -> Result<(), ReplicaError> {
        let since = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            match inner.subscription {
                Subscription::Pending => {}
                Subscription::Active(_) => {
                    debug!(namespace = %self.namespace, "already subscribed");
                    return Ok(());
                }
                Subscription::Closed => {
                    debug!(namespace = %self.namespace, "manager closed before subscribing");
                    return Ok(());
                }
            }
            if !inner.matured.is_empty() {
                let start = inner.state.subscribe_start;
                for frame in std::mem::take(&mut inner.matured) {
                    self.store_block(&frame.block, frame.data_id, start).await;
                }
                if let Err(e) = self.persist(inner).await {
                    error!(namespace = %self.namespace, error = %e, "failed to save namespace manager state");
                }
            }
            inner.subscription = Subscription::Active(Arc::clone(&cs));
            inner.state.recent_change_id
        };

        info!(namespace = %self.namespace, since = %since, "subscribing to consensus set");
        let subscriber: Arc<dyn ConsensusSubscriber> = self.clone();
        if let Err(e) = cs.consensus_set_subscribe(subscriber, since).await {
            let mut inner = self.inner.lock().await;
            if matches!(inner.subscription, Subscription::Active(_)) {
                inner.subscription = Subscription::Pending;
            }
            return Err(e);
        }

        if matches!(self.inner.lock().await.subscription, Subscription::Closed) {
            cs.unsubscribe(self.id).await;
        }
        Ok(())
    }

    /// Stop following the consensus set. Idempotent; the manager is closed
    /// for good afterwards.
    pub async fn unsubscribe_cs(&self) {
        let mut inner = self.inner.lock().await;
        if let Subscription::Active(cs) = std::mem::replace(&mut inner.subscription, Subscription::Closed) {
            cs.unsubscribe(self.id).await;
            info!(namespace = %self.namespace, "unsubscribed from consensus set");
        }
    }

    // ─── Replication ──────────────────────────────────────────────────────────

    fn block_records<'a>(&self, block: &'a Block) -> Vec<&'a [u8]> {
        block
            .transactions
            .iter()
            .flat_map(|tx| matching_records(tx, &self.namespace))
            .collect()
    }

    /// Copy of `block` keeping only the blobs this namespace replicates.
    fn prune(&self, block: &Block) -> Block {
        let transactions = block
            .transactions
            .iter()
            .map(|tx| matching_records(tx, &self.namespace))
            .filter(|records| !records.is_empty())
            .map(|records| Transaction::with_data(records.iter().map(|p| self.reencode(p)).collect()))
            .collect();
        Block::new(block.id, block.timestamp, transactions)
    }

    fn reencode(&self, payload: &[u8]) -> Vec<u8> {
        crate::record::encode_record(&[0u8; crate::record::SPECIFIER_LEN], &self.namespace, payload)
    }

    /// Store the records of `block` under consecutive ids from `first_id`.
    async fn store_block(&self, block: &Block, first_id: DataId, subscribe_start: Timestamp) {
        if block.timestamp < subscribe_start {
            return;
        }
        for (offset, payload) in self.block_records(block).into_iter().enumerate() {
            let id = first_id + offset as DataId;
            match self.db.store_data(self.namespace, id, payload).await {
                Ok(()) => debug!(namespace = %self.namespace, data_id = id, "stored record"),
                Err(e) => error!(namespace = %self.namespace, data_id = id, error = %e, "failed to store record"),
            }
        }
    }

    /// Delete the records of `block`, newest first.
    async fn delete_block(&self, block: &Block, first_id: DataId, subscribe_start: Timestamp) {
        if block.timestamp < subscribe_start {
            return;
        }
        let count = self.block_records(block).len() as DataId;
        for id in (first_id..first_id + count).rev() {
            match self.db.delete_data(self.namespace, id).await {
                Ok(()) => debug!(namespace = %self.namespace, data_id = id, "rolled back record"),
                Err(e) => error!(namespace = %self.namespace, data_id = id, error = %e, "failed to delete record"),
            }
        }
    }

    async fn apply_block(&self, inner: &mut Inner, block: &Block, change_id: ConsensusChangeId) {
        let first_id = inner.state.data_id;
        inner.state.data_id += self.block_records(block).len() as DataId;
        inner.state.block_height += 1;

        let start = inner.state.subscribe_start;
        match inner.buffer.as_mut() {
            Some(buf) => {
                let frame = BlockFrame::new(self.prune(block), change_id, first_id);
                if let Some(mature) = buf.push(frame) {
                    self.store_block(&mature.block, mature.data_id, start).await;
                }
            }
            None => self.store_block(block, first_id, start).await,
        }
    }

    async fn revert_block(&self, inner: &mut Inner, block: &Block) {
        inner.state.data_id -= self.block_records(block).len() as DataId;
        inner.state.block_height -= 1;

        let first_id = inner.state.data_id;
        match inner.buffer.as_mut().and_then(|buf| buf.pop(&block.id)) {
            // Never replicated, nothing to undo in storage.
            Some(frame) => {
                debug_assert_eq!(frame.data_id, first_id);
                debug!(namespace = %self.namespace, block = %block.id, "dropped buffered block");
            }
            None => {
                self.delete_block(block, first_id, inner.state.subscribe_start)
                    .await
            }
        }
    }

    async fn persist(&self, inner: &Inner) -> Result<(), ReplicaError> {
        let bytes = encode_checkpoint(inner)?;
        self.db.save_manager(self.namespace, &bytes).await
    }
}

fn encode_checkpoint(inner: &Inner) -> Result<Vec<u8>, ReplicaError> {
    let pending = inner
        .matured
        .iter()
        .chain(inner.buffer.iter().flat_map(|buf| buf.frames()))
        .cloned()
        .collect();
    let cp = ManagerCheckpoint {
        state: inner.state,
        pending,
    };
    borsh::to_vec(&cp).map_err(ReplicaError::Io)
}

#[async_trait]
impl ConsensusSubscriber for NamespaceManager {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    async fn process_consensus_change(&self, cc: &ConsensusChange) {
        if cc.applied_blocks.is_empty() {
            panic!("process_consensus_change called with a consensus change that has no applied blocks");
        }

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if !matches!(inner.subscription, Subscription::Active(_)) {
            debug!(namespace = %self.namespace, change = %cc.id, "not subscribed, ignoring consensus change");
            return;
        }

        debug!(
            namespace = %self.namespace,
            height = inner.state.block_height,
            reverted = cc.reverted_blocks.len(),
            applied = cc.applied_blocks.len(),
            "processing consensus change"
        );
        if cc.is_reorg() {
            warn!(namespace = %self.namespace, depth = cc.reverted_blocks.len(), "reverting blocks");
        }

        for block in &cc.reverted_blocks {
            self.revert_block(inner, block).await;
        }
        for block in &cc.applied_blocks {
            self.apply_block(inner, block, cc.id).await;
        }

        inner.state.recent_change_id = cc.id;
        if let Err(e) = self.persist(inner).await {
            error!(namespace = %self.namespace, error = %e, "failed to save namespace manager state");
        }
    }
}
