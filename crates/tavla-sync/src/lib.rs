//! Tavla Sync - Message manager and persistent task engine.

pub mod lifecycle;
pub mod locking;
pub mod manager;
pub mod protocol;
pub mod tasks;

pub use lifecycle::{Lifecycle, LifecycleState};
pub use locking::{BoardLock, EntityLocks, MessageLock};
pub use manager::{
    DeletionStats, ManagerConfig, ManagerGuard, MessageDraft, MessageManager, MessageQueries,
};
pub use protocol::{FetchCallbacks, Ingest, InsertCallbacks};
pub use tasks::{
    PersistentTaskEngine, ReminderHandler, ReminderPayload, TaskEngineGuard, TaskHandler,
    TaskRunStats,
};
