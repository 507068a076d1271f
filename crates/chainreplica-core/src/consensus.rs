//! Consensus collaborator traits.
//!
//! The replicator never validates blocks itself. It subscribes to a
//! consensus set, which pushes [`ConsensusChange`]s to every subscriber,
//! serially and in chain order.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::ReplicaError;
use crate::types::{ConsensusChange, ConsensusChangeId};

/// Process-unique identity of a consensus subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiver of consensus changes.
#[async_trait]
pub trait ConsensusSubscriber: Send + Sync {
    fn subscriber_id(&self) -> SubscriberId;

    /// Called once per consensus change, never concurrently for the same
    /// subscriber.
    async fn process_consensus_change(&self, cc: &ConsensusChange);
}

/// The consensus set the replicator follows.
#[async_trait]
pub trait ConsensusSet: Send + Sync {
    /// Subscribe and replay every change after `since`
    /// ([`ConsensusChangeId::BEGINNING`] = from genesis) before returning.
    async fn consensus_set_subscribe(
        &self,
        subscriber: Arc<dyn ConsensusSubscriber>,
        since: ConsensusChangeId,
    ) -> Result<(), ReplicaError>;

    /// Stop delivering changes to a subscriber. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriberId);
}

// ─── In-memory consensus set (for testing) ───────────────────────────────────

/// In-memory consensus set for tests and embedding.
///
/// Keeps the full change history so late subscribers can replay it.
#[derive(Default)]
pub struct MemoryConsensusSet {
    history: Mutex<Vec<ConsensusChange>>,
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn ConsensusSubscriber>>>,
    /// Held while delivering, so each subscriber sees changes one at a time
    /// and in history order.
    delivery: tokio::sync::Mutex<()>,
}

impl MemoryConsensusSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change to the history and deliver it to every subscriber.
    ///
    /// # Panics
    /// If the change applies no blocks.
    pub async fn apply(&self, cc: ConsensusChange) {
        assert!(
            !cc.applied_blocks.is_empty(),
            "consensus change must apply at least one block"
        );
        let _delivery = self.delivery.lock().await;
        self.history.lock().unwrap().push(cc.clone());
        // Never hold the registry lock across a callback.
        let subscribers: Vec<_> = self.subscribers.lock().unwrap().values().cloned().collect();
        for subscriber in subscribers {
            subscriber.process_consensus_change(&cc).await;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().unwrap().contains_key(&id)
    }

    /// Id of the most recent change, or `BEGINNING` if there is none.
    pub fn current_change_id(&self) -> ConsensusChangeId {
        self.history
            .lock()
            .unwrap()
            .last()
            .map(|cc| cc.id)
            .unwrap_or(ConsensusChangeId::BEGINNING)
    }

    fn backlog_since(&self, since: ConsensusChangeId) -> Result<Vec<ConsensusChange>, ReplicaError> {
        let history = self.history.lock().unwrap();
        if since.is_beginning() {
            return Ok(history.clone());
        }
        match history.iter().position(|cc| cc.id == since) {
            Some(pos) => Ok(history[pos + 1..].to_vec()),
            None => Err(ReplicaError::Consensus(format!(
                "unknown consensus change id {since}"
            ))),
        }
    }
}

#[async_trait]
impl ConsensusSet for MemoryConsensusSet {
    async fn consensus_set_subscribe(
        &self,
        subscriber: Arc<dyn ConsensusSubscriber>,
        since: ConsensusChangeId,
    ) -> Result<(), ReplicaError> {
        let _delivery = self.delivery.lock().await;
        for cc in self.backlog_since(since)? {
            subscriber.process_consensus_change(&cc).await;
        }
        self.subscribers
            .lock()
            .unwrap()
            .insert(subscriber.subscriber_id(), subscriber);
        Ok(())
    }

    async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().unwrap().remove(&id);
    }
}
