//! The message manager: ingestion, publication, boards, subscriptions and
//! identity deletion over one repository.

mod boards;
mod deletion;
mod ingest;
mod publish;
mod queries;

pub use deletion::DeletionStats;
pub use publish::MessageDraft;
pub use queries::MessageQueries;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use tavla_core::sync;
use tavla_core::{
    ContentUri, CoreError, FetchFailureReason, Identity, IdentityDeletionListener, IdentityId,
    IdentityProvider, ListUri, Message, MessageFactory, MessageId, MessageList, MessageListId,
    MessageReference, OwnMessageList, Repository,
};

use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::locking::EntityLocks;
use crate::protocol::{FetchCallbacks, Ingest, InsertCallbacks};

/// Timing of the background linking pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Delay before the first background pass.
    pub startup_delay: Duration,
    /// Passes are separated by `period / 2 + random(0..=period)`.
    pub period: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(3 * 60),
            period: Duration::from_secs(15 * 60),
        }
    }
}

impl ManagerConfig {
    pub fn next_sleep(&self) -> Duration {
        let period_ms = u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=period_ms);
        self.period / 2 + Duration::from_millis(jitter)
    }
}

/// Coordinates every mutation of the forum graph.
pub struct MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    repo: Arc<R>,
    identities: Arc<I>,
    factory: F,
    config: ManagerConfig,
    monitor: Mutex<()>,
    locks: EntityLocks,
    lifecycle: Lifecycle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Proof that the manager monitor is held.
///
/// Operations that need the caller to hold the monitor across several
/// calls live here. Operations that take the identity provider monitor
/// first are only on [`MessageManager`].
pub struct ManagerGuard<'a, R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    manager: &'a MessageManager<R, I, F>,
    _monitor: MutexGuard<'a, ()>,
}

impl<R, I, F> MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    pub fn new(repo: Arc<R>, identities: Arc<I>, factory: F, config: ManagerConfig) -> Self {
        Self {
            repo,
            identities,
            factory,
            config,
            monitor: Mutex::new(()),
            locks: EntityLocks::new(),
            lifecycle: Lifecycle::new(),
            worker: Mutex::new(None),
        }
    }

    /// Take the manager monitor.
    pub fn lock(&self) -> ManagerGuard<'_, R, I, F> {
        ManagerGuard {
            manager: self,
            _monitor: sync::lock(&self.monitor),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn identities(&self) -> &Arc<I> {
        &self.identities
    }

    /// Two-phase stop: request, then wait until the worker reports stopped.
    /// In-flight transactions complete first.
    pub fn terminate(&self) {
        info!("Stopping message manager");
        if !self.lifecycle.request_stop() {
            return;
        }

        let worker = sync::lock(&self.worker).take();
        match worker {
            Some(handle) => {
                self.lifecycle.wait_stopped();
                if handle.join().is_err() {
                    error!("Message manager thread panicked");
                }
            }
            None => self.lifecycle.mark_stopped(),
        }
        info!("Message manager stopped");
    }
}

impl<R, I, F> MessageManager<R, I, F>
where
    R: Repository + 'static,
    I: IdentityProvider + 'static,
    F: MessageFactory + 'static,
{
    /// Link anything stored before the last shutdown, then start the
    /// `message-manager` thread.
    pub fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        info!("Starting message manager");
        match self.add_messages_to_boards() {
            Ok(linked) => info!(linked, "Initial board linking pass done"),
            Err(e) => warn!(error = %e, "Initial board linking pass failed"),
        }

        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("message-manager".to_string())
            .spawn(move || manager.run())
            .map_err(|e| CoreError::Task(format!("failed to spawn message-manager: {}", e)))?;
        *sync::lock(&self.worker) = Some(handle);
        Ok(())
    }

    fn run(&self) {
        if self.lifecycle.mark_running() && self.lifecycle.sleep(self.config.startup_delay) {
            loop {
                match self.add_messages_to_boards() {
                    Ok(linked) if linked > 0 => info!("Linked {} messages into boards", linked),
                    Ok(_) => {}
                    Err(e) => error!("Board linking pass failed: {}", e),
                }
                if !self.lifecycle.sleep(self.config.next_sleep()) {
                    break;
                }
            }
        }
        self.lifecycle.mark_stopped();
    }
}

impl<'a, R, I, F> ManagerGuard<'a, R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    fn repo(&self) -> &'a R {
        &self.manager.repo
    }

    fn locks(&self) -> &'a EntityLocks {
        &self.manager.locks
    }

    fn factory(&self) -> &'a F {
        &self.manager.factory
    }
}

impl<R, I, F> IdentityDeletionListener for MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    fn on_identity_deletion(&self, identity: &Identity) -> Result<(), CoreError> {
        MessageManager::on_identity_deletion(self, identity)
    }
}

impl<R, I, F> FetchCallbacks for MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    fn on_message_received(&self, message: Message) -> Ingest {
        MessageManager::on_message_received(self, message)
    }

    fn on_message_list_received(&self, list: MessageList) -> Ingest {
        MessageManager::on_message_list_received(self, list)
    }

    fn on_message_fetch_failed(
        &self,
        reference: &MessageReference,
        reason: FetchFailureReason,
    ) -> Ingest {
        MessageManager::on_message_fetch_failed(self, reference, reason)
    }

    fn on_message_list_fetch_failed(
        &self,
        author: &IdentityId,
        uri: &ListUri,
        reason: FetchFailureReason,
    ) -> Ingest {
        MessageManager::on_message_list_fetch_failed(self, author, uri, reason)
    }
}

impl<R, I, F> InsertCallbacks for MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    fn begin_list_insert(&self, list_id: &MessageListId) -> Result<OwnMessageList, CoreError> {
        MessageManager::begin_list_insert(self, list_id)
    }

    fn on_message_list_insert_succeeded(&self, uri: &ListUri) -> Result<(), CoreError> {
        MessageManager::on_message_list_insert_succeeded(self, uri)
    }

    fn on_message_list_insert_failed(
        &self,
        uri: &ListUri,
        collision: bool,
    ) -> Result<(), CoreError> {
        MessageManager::on_message_list_insert_failed(self, uri, collision)
    }

    fn on_own_message_inserted(
        &self,
        id: &MessageId,
        real_uri: ContentUri,
    ) -> Result<(), CoreError> {
        MessageManager::on_own_message_inserted(self, id, real_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.startup_delay, Duration::from_secs(180));
        assert_eq!(config.period, Duration::from_secs(900));
    }

    #[test]
    fn test_next_sleep_is_within_bounds() {
        let config = ManagerConfig {
            startup_delay: Duration::ZERO,
            period: Duration::from_secs(10),
        };
        for _ in 0..100 {
            let sleep = config.next_sleep();
            assert!(sleep >= Duration::from_secs(5));
            assert!(sleep <= Duration::from_secs(15));
        }
    }
}
