//! The data store: owns the namespace managers and the control listener.
//!
//! ```text
//! Database::subscribe_control ─► listener task ─► handle_sub_event
//!                                                   ├── Start → NamespaceManager::new + subscribe_cs
//!                                                   └── End   → unsubscribe_cs + delete checkpoint
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{DataStoreConfig, ReplicationMode};
use crate::consensus::ConsensusSet;
use crate::error::ReplicaError;
use crate::event::{SubAction, SubEvent};
use crate::logging::init_tracing;
use crate::manager::NamespaceManager;
use crate::namespace::Namespace;
use crate::storage::{ControlReceiver, Database};
use crate::types::Timestamp;

struct Inner {
    cs: Arc<dyn ConsensusSet>,
    db: Arc<dyn Database>,
    config: DataStoreConfig,
    managers: Mutex<HashMap<Namespace, Arc<NamespaceManager>>>,
}

/// Replicates the namespaces requested over the control channel.
pub struct DataStore {
    inner: Arc<Inner>,
    listener: Option<JoinHandle<()>>,
}

impl DataStore {
    /// Start a data store: check storage, recover persisted managers and
    /// begin listening for control messages.
    pub async fn new(
        cs: Arc<dyn ConsensusSet>,
        db: Arc<dyn Database>,
        config: DataStoreConfig,
    ) -> Result<Self, ReplicaError> {
        config.validate()?;
        db.ping().await?;
        init_tracing(&config.log, Some(&config.persist_dir))?;

        let inner = Arc::new(Inner {
            cs,
            db,
            config,
            managers: Mutex::new(HashMap::new()),
        });
        inner.recover().await?;

        let control = inner.db.subscribe_control().await?;
        let listener = tokio::spawn(listen(Arc::clone(&inner), control));

        info!(
            chain = %inner.config.chain.name,
            mode = ?inner.config.replication,
            persist_dir = %inner.config.persist_dir.display(),
            "Data store started"
        );
        Ok(Self {
            inner,
            listener: Some(listener),
        })
    }

    /// Apply one control event. The listener calls this for every valid
    /// control message.
    pub async fn handle_sub_event(&self, ev: SubEvent) {
        self.inner.handle_sub_event(ev).await
    }

    /// Namespaces currently replicated, sorted.
    pub async fn namespaces(&self) -> Vec<Namespace> {
        let mut namespaces: Vec<_> = self.inner.managers.lock().await.keys().copied().collect();
        namespaces.sort();
        namespaces
    }

    pub async fn manager(&self, namespace: &Namespace) -> Option<Arc<NamespaceManager>> {
        self.inner.managers.lock().await.get(namespace).cloned()
    }

    pub fn config(&self) -> &DataStoreConfig {
        &self.inner.config
    }

    /// Shut down: stop the control listener, unsubscribe every manager and
    /// close storage. Returns the storage close error, if any.
    pub async fn close(mut self) -> Result<(), ReplicaError> {
        let unsubscribed = self.inner.db.unsubscribe_control().await;
        if let Some(listener) = self.listener.take() {
            match unsubscribed {
                // The receiver is closed, the listener drains and exits.
                Ok(()) => {
                    let _ = listener.await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to unsubscribe from control channel");
                    listener.abort();
                }
            }
        }

        let managers: Vec<_> = self.inner.managers.lock().await.values().cloned().collect();
        let tasks = managers.into_iter().map(|nsm| {
            tokio::spawn(async move {
                nsm.unsubscribe_cs().await;
            })
        });
        join_all(tasks).await;

        let closed = self.inner.db.close().await;
        match &closed {
            Ok(()) => info!("Data store closed"),
            Err(e) => error!(error = %e, "Failed to close database"),
        }
        closed
    }
}

impl Drop for DataStore {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn listen(inner: Arc<Inner>, mut control: ControlReceiver) {
    while let Some(payload) = control.recv().await {
        match SubEvent::parse(&payload) {
            Some(ev) => inner.handle_sub_event(ev).await,
            None => debug!(payload = %payload, "Ignoring malformed control message"),
        }
    }
    debug!("Control channel closed");
}

impl Inner {
    fn buffer_size(&self) -> Option<usize> {
        self.config.buffer_size()
    }

    /// Reload persisted managers and resubscribe them.
    async fn recover(&self) -> Result<(), ReplicaError> {
        let checkpoints = self.db.load_managers().await?;
        let mut managers = self.managers.lock().await;
        for (namespace, checkpoint) in checkpoints {
            let nsm = match NamespaceManager::restore(namespace, Arc::clone(&self.db), &checkpoint, self.buffer_size()) {
                Ok(nsm) => Arc::new(nsm),
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Skipping unreadable namespace manager");
                    continue;
                }
            };
            let state = nsm.state().await;
            info!(
                namespace = %namespace,
                height = state.block_height,
                data_id = state.data_id,
                "Recovered namespace manager"
            );
            self.spawn_subscribe(Arc::clone(&nsm));
            managers.insert(namespace, nsm);
        }
        Ok(())
    }

    fn spawn_subscribe(&self, nsm: Arc<NamespaceManager>) {
        let cs = Arc::clone(&self.cs);
        tokio::spawn(async move {
            let namespace = nsm.namespace();
            if let Err(e) = nsm.subscribe_cs(cs).await {
                error!(namespace = %namespace, error = %e, "Failed to subscribe to consensus set");
            }
        });
    }

    async fn handle_sub_event(&self, ev: SubEvent) {
        match ev.action {
            SubAction::Start => self.start(ev.namespace, ev.start).await,
            SubAction::End => self.end(ev.namespace).await,
        }
    }

    async fn start(&self, namespace: Namespace, start: Timestamp) {
        let mut managers = self.managers.lock().await;
        let evicted = managers.remove(&namespace);
        if let Some(old) = &evicted {
            info!(namespace = %namespace, "Replacing existing namespace manager");
            old.unsubscribe_cs().await;
        }

        let nsm = Arc::new(NamespaceManager::new(
            namespace,
            Arc::clone(&self.db),
            start,
            self.buffer_size(),
        ));
        if let Err(e) = nsm.save().await {
            error!(namespace = %namespace, error = %e, "Failed to save new namespace manager");
            // The evicted manager is closed; its checkpoint must not come back on restart.
            if let Some(old) = evicted {
                if let Err(e) = old.delete().await {
                    error!(namespace = %namespace, error = %e, "Failed to delete replaced namespace manager state");
                }
            }
            return;
        }
        info!(namespace = %namespace, start, "Subscribed namespace");
        managers.insert(namespace, Arc::clone(&nsm));
        self.spawn_subscribe(nsm);
    }

    async fn end(&self, namespace: Namespace) {
        let mut managers = self.managers.lock().await;
        let Some(nsm) = managers.remove(&namespace) else {
            debug!(namespace = %namespace, "Unsubscribe for unknown namespace");
            return;
        };
        nsm.unsubscribe_cs().await;
        if let Err(e) = nsm.delete().await {
            error!(namespace = %namespace, error = %e, "Failed to delete namespace manager state");
        }
        info!(namespace = %namespace, "Unsubscribed namespace");
    }
}

/// Fluent builder for [`DataStore`].
///
/// ```rust,no_run
/// # async fn run(
/// #     cs: std::sync::Arc<dyn chainreplica_core::ConsensusSet>,
/// #     db: std::sync::Arc<dyn chainreplica_core::Database>,
/// # ) -> Result<(), chainreplica_core::ReplicaError> {
/// use chainreplica_core::{DataStoreBuilder, ReplicationMode};
///
/// let store = DataStoreBuilder::new()
///     .persist_dir("/var/lib/replica")
///     .maturity_delay(6)
///     .replication(ReplicationMode::Matured)
///     .consensus(cs)
///     .storage(db)
///     .build()
///     .await?;
/// # store.close().await
/// # }
/// ```
#[derive(Default)]
pub struct DataStoreBuilder {
    config: DataStoreConfig,
    cs: Option<Arc<dyn ConsensusSet>>,
    db: Option<Arc<dyn Database>>,
}

impl DataStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DataStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory for the log file.
    pub fn persist_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.persist_dir = dir.into();
        self
    }

    pub fn chain(mut self, name: impl Into<String>) -> Self {
        self.config.chain.name = name.into();
        self
    }

    /// Blocks a record waits before it is replicated in matured mode.
    pub fn maturity_delay(mut self, blocks: u64) -> Self {
        self.config.chain.maturity_delay = blocks;
        self
    }

    pub fn replication(mut self, mode: ReplicationMode) -> Self {
        self.config.replication = mode;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log.level = level.into();
        self
    }

    pub fn consensus(mut self, cs: Arc<dyn ConsensusSet>) -> Self {
        self.cs = Some(cs);
        self
    }

    pub fn storage(mut self, db: Arc<dyn Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Start the data store.
    pub async fn build(self) -> Result<DataStore, ReplicaError> {
        let cs = self.cs.ok_or(ReplicaError::MissingConsensus)?;
        let db = self.db.ok_or(ReplicaError::MissingStorage)?;
        DataStore::new(cs, db, self.config).await
    }
}
