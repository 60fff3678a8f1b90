use std::sync::Arc;

use tracing::info;

use tavla_core::{
    CoreError, IdentityDeletionListener, IdentityRegistry, StorageError, UuidMessageFactory,
};
use tavla_db::{init_database, RedbRepository};
use tavla_sync::{MessageManager, PersistentTaskEngine, ReminderHandler};

use crate::config::Config;

pub type NodeManager = MessageManager<RedbRepository, IdentityRegistry, UuidMessageFactory>;
pub type NodeTaskEngine = PersistentTaskEngine<RedbRepository>;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Everything a running node owns, wired over one redb database.
pub struct Node {
    pub registry: Arc<IdentityRegistry>,
    pub manager: Arc<NodeManager>,
    pub tasks: Arc<NodeTaskEngine>,
}

impl Node {
    pub fn open(config: &Config) -> Result<Self, NodeError> {
        let db = init_database(&config.db_path)?;
        let repo = Arc::new(RedbRepository::new(db));

        let registry = Arc::new(IdentityRegistry::new());
        for identity in &config.own_identities {
            registry.add_own_identity(identity.clone());
        }

        let manager = Arc::new(MessageManager::new(
            Arc::clone(&repo),
            Arc::clone(&registry),
            UuidMessageFactory,
            config.manager_config(),
        ));
        let listener: Arc<dyn IdentityDeletionListener> = manager.clone();
        registry.add_deletion_listener(Arc::downgrade(&listener));

        let tasks = Arc::new(PersistentTaskEngine::new(repo).with_handler(ReminderHandler));

        info!(
            own_identities = config.own_identities.len(),
            "Node opened {}",
            config.db_path.display()
        );
        Ok(Node {
            registry,
            manager,
            tasks,
        })
    }

    pub fn start(&self) -> Result<(), NodeError> {
        self.manager.start()?;
        Ok(())
    }

    /// Blocks until the manager thread has stopped.
    pub fn shutdown(&self) {
        self.manager.terminate();
    }
}
