//! Per-entity locks.
//!
//! Every code path acquires locks in one order:
//!
//! 1. identity provider monitor
//! 2. message manager monitor
//! 3. repository write transaction
//! 4. board lock
//! 5. message lock
//!
//! Steps 1 and 2 are enforced by which type an operation lives on (see
//! `MessageManager` and `ManagerGuard`). Steps 4 and 5 are enforced here: a
//! message lock can only be taken through a held board lock, or on its own.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use tavla_core::sync;
use tavla_core::{BoardName, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntityKey {
    Board(BoardName),
    Message(MessageId),
}

/// Named mutexes for boards and messages, created on demand.
#[derive(Debug, Default)]
pub struct EntityLocks {
    held: Mutex<HashSet<EntityKey>>,
    released: Condvar,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn board(&self, name: &BoardName) -> BoardLock<'_> {
        self.acquire(EntityKey::Board(name.clone()));
        BoardLock {
            locks: self,
            name: name.clone(),
        }
    }

    /// Lock a message without any board.
    pub fn message(&self, id: &MessageId) -> MessageLock<'_> {
        self.acquire(EntityKey::Message(id.clone()));
        MessageLock {
            locks: self,
            id: id.clone(),
        }
    }

    pub fn is_locked_board(&self, name: &BoardName) -> bool {
        sync::lock(&self.held).contains(&EntityKey::Board(name.clone()))
    }

    fn acquire(&self, key: EntityKey) {
        let mut held = sync::lock(&self.held);
        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(key);
    }

    fn release(&self, key: &EntityKey) {
        sync::lock(&self.held).remove(key);
        self.released.notify_all();
    }
}

pub struct BoardLock<'a> {
    locks: &'a EntityLocks,
    name: BoardName,
}

impl BoardLock<'_> {
    pub fn name(&self) -> &BoardName {
        &self.name
    }

    /// Lock a message while this board stays locked.
    pub fn message(&self, id: &MessageId) -> MessageLock<'_> {
        self.locks.message(id)
    }
}

impl Drop for BoardLock<'_> {
    fn drop(&mut self) {
        self.locks.release(&EntityKey::Board(self.name.clone()));
    }
}

pub struct MessageLock<'a> {
    locks: &'a EntityLocks,
    id: MessageId,
}

impl MessageLock<'_> {
    pub fn id(&self) -> &MessageId {
        &self.id
    }
}

impl Drop for MessageLock<'_> {
    fn drop(&mut self) {
        self.locks.release(&EntityKey::Message(self.id.clone()));
    }
}
