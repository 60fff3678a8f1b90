use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::ids::IdentityId;
use crate::sync;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub nickname: String,
    /// Key under which the identity publishes its content.
    pub routing_key: String,
    pub own: bool,
}

/// An identity the local user can author content as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnIdentity(Identity);

impl OwnIdentity {
    pub fn new(id: IdentityId, nickname: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self(Identity {
            id,
            nickname: nickname.into(),
            routing_key: routing_key.into(),
            own: true,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.0
    }
}

impl std::ops::Deref for OwnIdentity {
    type Target = Identity;

    fn deref(&self) -> &Identity {
        &self.0
    }
}

/// Source of identities. The provider has its own monitor, which is always
/// taken before the message manager's.
pub trait IdentityProvider: Send + Sync {
    fn monitor(&self) -> &Mutex<()>;

    fn get_identity(&self, id: &IdentityId) -> Result<Identity, CoreError>;

    fn get_own_identity(&self, id: &IdentityId) -> Result<OwnIdentity, CoreError>;
}

/// Called before an identity is removed. An error aborts the removal.
pub trait IdentityDeletionListener: Send + Sync {
    fn on_identity_deletion(&self, identity: &Identity) -> Result<(), CoreError>;
}

/// Local identity provider backed by a map.
#[derive(Default)]
pub struct IdentityRegistry {
    monitor: Mutex<()>,
    identities: RwLock<HashMap<IdentityId, Identity>>,
    listeners: Mutex<Vec<Weak<dyn IdentityDeletionListener>>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_identity(&self, id: IdentityId, nickname: impl Into<String>, routing_key: impl Into<String>) {
        let identity = Identity {
            id: id.clone(),
            nickname: nickname.into(),
            routing_key: routing_key.into(),
            own: false,
        };
        sync::write(&self.identities).insert(id, identity);
    }

    pub fn add_own_identity(&self, identity: OwnIdentity) {
        sync::write(&self.identities).insert(identity.id.clone(), identity.0);
    }

    /// Listeners are held weakly; dropped listeners are pruned on removal.
    pub fn add_deletion_listener(&self, listener: Weak<dyn IdentityDeletionListener>) {
        sync::lock(&self.listeners).push(listener);
    }

    pub fn own_identities(&self) -> Vec<OwnIdentity> {
        let mut own: Vec<_> = sync::read(&self.identities)
            .values()
            .filter(|i| i.own)
            .cloned()
            .map(OwnIdentity)
            .collect();
        own.sort_by(|a, b| a.id.cmp(&b.id));
        own
    }

    /// Removes an identity after every listener has cleaned up after it.
    pub fn remove(&self, id: &IdentityId) -> Result<Identity, CoreError> {
        let _monitor = sync::lock(&self.monitor);
        let identity = self.get_identity(id)?;

        let listeners: Vec<Arc<dyn IdentityDeletionListener>> = {
            let mut listeners = sync::lock(&self.listeners);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in listeners {
            if let Err(e) = listener.on_identity_deletion(&identity) {
                warn!(identity = %id, error = %e, "Identity deletion aborted by listener");
                return Err(e);
            }
        }

        sync::write(&self.identities).remove(id);
        info!(identity = %id, "Removed identity");
        Ok(identity)
    }
}

impl IdentityProvider for IdentityRegistry {
    fn monitor(&self) -> &Mutex<()> {
        &self.monitor
    }

    fn get_identity(&self, id: &IdentityId) -> Result<Identity, CoreError> {
        sync::read(&self.identities)
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("identity", id))
    }

    fn get_own_identity(&self, id: &IdentityId) -> Result<OwnIdentity, CoreError> {
        match self.get_identity(id)? {
            identity if identity.own => Ok(OwnIdentity(identity)),
            _ => Err(CoreError::not_found("own identity", id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        calls: AtomicUsize,
        fail: bool,
    }

    impl IdentityDeletionListener for CountingListener {
        fn on_identity_deletion(&self, _identity: &Identity) -> Result<(), CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::Task("listener refused".to_string()));
            }
            Ok(())
        }
    }

    fn alice() -> IdentityId {
        IdentityId::new("alice").unwrap()
    }

    #[test]
    fn test_own_identity_lookup() {
        let registry = IdentityRegistry::new();
        registry.add_own_identity(OwnIdentity::new(alice(), "Alice", "key-a"));
        registry.add_identity(IdentityId::new("bob").unwrap(), "Bob", "key-b");

        assert_eq!(registry.get_own_identity(&alice()).unwrap().nickname, "Alice");
        let bob = IdentityId::new("bob").unwrap();
        assert!(registry.get_identity(&bob).is_ok());
        assert!(registry.get_own_identity(&bob).unwrap_err().is_not_found());
        assert_eq!(registry.own_identities().len(), 1);
    }

    #[test]
    fn test_remove_notifies_listeners() {
        let registry = IdentityRegistry::new();
        registry.add_own_identity(OwnIdentity::new(alice(), "Alice", "key-a"));

        let listener = Arc::new(CountingListener {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let shared: Arc<dyn IdentityDeletionListener> = listener.clone();
        registry.add_deletion_listener(Arc::downgrade(&shared));

        registry.remove(&alice()).unwrap();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
        assert!(registry.get_identity(&alice()).is_err());
    }

    #[test]
    fn test_failing_listener_aborts_removal() {
        let registry = IdentityRegistry::new();
        registry.add_own_identity(OwnIdentity::new(alice(), "Alice", "key-a"));

        let listener = Arc::new(CountingListener {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let shared: Arc<dyn IdentityDeletionListener> = listener.clone();
        registry.add_deletion_listener(Arc::downgrade(&shared));

        assert!(registry.remove(&alice()).is_err());
        assert!(registry.get_identity(&alice()).is_ok());
    }

    #[test]
    fn test_dropped_listener_is_skipped() {
        let registry = IdentityRegistry::new();
        registry.add_own_identity(OwnIdentity::new(alice(), "Alice", "key-a"));
        {
            let listener = Arc::new(CountingListener {
                calls: AtomicUsize::new(0),
                fail: true,
            });
            let shared: Arc<dyn IdentityDeletionListener> = listener;
            registry.add_deletion_listener(Arc::downgrade(&shared));
        }
        assert!(registry.remove(&alice()).is_ok());
    }
}
