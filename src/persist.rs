//! The durable key/value contract a tree is committed through, and a simple
//! in-memory implementation of it.
//!
//! A tree never interprets the bytes it stores. Each node is saved under the
//! 16 bytes of its [NodeId](crate::btree::NodeId), and the tree's own metadata
//! is saved under the 16 bytes of the tree's UUID.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::PersistError;

/// A single key and its opaque payload, as handed to [Persister::save].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// The storage key.
    pub key: Vec<u8>,
    /// The bytes stored under `key`.
    pub payload: Vec<u8>,
}

impl Payload {
    /// Pair a key with its payload.
    pub fn new(key: Vec<u8>, payload: Vec<u8>) -> Self {
        Payload { key, payload }
    }
}

/// A durable key/value store.
///
/// Implementations must be safe to call from many threads at once, as node
/// loads are issued from the worker threads of a batch operation.
pub trait Persister: Send + Sync {
    /// Store every item. This should be atomic from the point of view of the
    /// tree: either all items are durable, or an error is returned.
    fn save(&self, items: Vec<Payload>) -> Result<(), PersistError>;

    /// Fetch the payload for each key, in the order of `keys`. A key that is
    /// not stored yields `None` in its position.
    fn load(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, PersistError>;
}

/// A [Persister] that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    items: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryPersister {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored blobs.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Determine if the store is currently empty
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl Persister for MemoryPersister {
    fn save(&self, items: Vec<Payload>) -> Result<(), PersistError> {
        let mut guard = self.items.write();
        guard.extend(items.into_iter().map(|p| (p.key, p.payload)));
        Ok(())
    }

    fn load(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, PersistError> {
        let guard = self.items.read();
        Ok(keys.iter().map(|k| guard.get(k).cloned()).collect())
    }
}
