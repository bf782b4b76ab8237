//! A persistent, copy-on-write B-tree committed through a [Persister].
//!
//! A committed [Tree] is immutable. To change it, derive a [MutableTree]
//! with [Tree::as_mutable], apply batches of additions and deletions, and
//! [MutableTree::commit] the session. Commit writes every node the session
//! touched to the persister and returns a new committed [Tree]; the tree the
//! session was derived from is unaffected, as is any other session derived
//! from it.
//!
//! Nodes refer to each other by [NodeId]. A session never alters a node it
//! did not create: the first time it needs to change a node, it copies it
//! under a new ID and rewrites the parent to point at the copy.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use cowtree::btree::{Config, Key, OrdComparator, Tree};
//! use cowtree::persist::MemoryPersister;
//!
//! let persister = Arc::new(MemoryPersister::new());
//! let tree: Tree<u64> = Tree::new(Config::new(persister.clone(), OrdComparator));
//!
//! let mut session = tree.as_mutable();
//! session.add_items(vec![Key::new(1, b"one".to_vec()), Key::new(2, b"two".to_vec())]).unwrap();
//! let committed = session.commit().unwrap();
//! assert_eq!(committed.len(), 2);
//! // The tree the session came from is untouched.
//! assert_eq!(tree.len(), 0);
//!
//! // Anything committed can be loaded again by ID.
//! let loaded: Tree<u64> = Tree::load(persister, committed.id(), OrdComparator).unwrap();
//! let mut seen = Vec::new();
//! loaded.apply(&[1, 2, 3], |k| seen.push(k.payload.clone())).unwrap();
//! assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec()]);
//! ```

mod cache;
mod codec;
mod constants;
mod context;
mod cursor;
mod delete;
mod insert;
mod node;
mod path;

pub use node::{Key, NodeId};

use serde::{de::DeserializeOwned, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use self::constants::{CACHE_TIMEOUT, DEFAULT_NODE_WIDTH, MIN_NODE_WIDTH};
use self::cursor::Tr;
use crate::error::Result;
use crate::persist::Persister;

/// The bounds a value type needs to be stored in a tree.
pub trait TreeValue: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> TreeValue for T where T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{}

/// The total order a tree keeps its values in. It must not change for the
/// lifetime of a tree, including across commits and loads.
pub trait Comparator<V>: Send + Sync {
    /// Order `a` relative to `b`.
    fn compare(&self, a: &V, b: &V) -> Ordering;
}

impl<V, F> Comparator<V> for F
where
    F: Fn(&V, &V) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &V, b: &V) -> Ordering {
        self(a, b)
    }
}

/// Orders values by their [Ord] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<V: Ord> Comparator<V> for OrdComparator {
    fn compare(&self, a: &V, b: &V) -> Ordering {
        a.cmp(b)
    }
}

/// How a tree is built and where it is stored.
pub struct Config<V> {
    pub(crate) node_width: usize,
    pub(crate) persister: Arc<dyn Persister>,
    pub(crate) comparator: Arc<dyn Comparator<V>>,
    pub(crate) workers: usize,
    pub(crate) cache_timeout: Duration,
}

impl<V> Clone for Config<V> {
    fn clone(&self) -> Self {
        Config {
            node_width: self.node_width,
            persister: self.persister.clone(),
            comparator: self.comparator.clone(),
            workers: self.workers,
            cache_timeout: self.cache_timeout,
        }
    }
}

impl<V> Debug for Config<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("node_width", &self.node_width)
            .field("workers", &self.workers)
            .field("cache_timeout", &self.cache_timeout)
            .finish()
    }
}

impl<V> Config<V> {
    /// A configuration with the default node width, one worker per
    /// available processor, and a 30 second cache wait.
    pub fn new<C>(persister: Arc<dyn Persister>, comparator: C) -> Self
    where
        C: Comparator<V> + 'static,
    {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Config {
            node_width: DEFAULT_NODE_WIDTH,
            persister,
            comparator: Arc::new(comparator),
            workers,
            cache_timeout: CACHE_TIMEOUT,
        }
    }

    /// Set the number of values a node holds before it splits. Non-root
    /// nodes are kept at least half full.
    ///
    /// # Panics
    /// If `width` is below 2.
    pub fn with_node_width(mut self, width: usize) -> Self {
        assert!(width >= MIN_NODE_WIDTH);
        self.node_width = width;
        self
    }

    /// Set how many threads a batch operation fans out to.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = usize::max(workers, 1);
        self
    }

    /// Set how long a lookup waits on another caller's load of the same node.
    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    /// The configured node width.
    pub fn node_width(&self) -> usize {
        self.node_width
    }
}

/// A committed, immutable tree.
///
/// Reads are safe from any number of threads, and are unaffected by any
/// session derived from this tree.
pub struct Tree<V: TreeValue> {
    inner: Tr<V>,
}

impl<V: TreeValue> Tree<V> {
    /// Create a new empty tree. Nothing is persisted until a session derived
    /// from it is committed.
    pub fn new(config: Config<V>) -> Self {
        Tree {
            inner: Tr::new(Uuid::new_v4(), 0, None, config),
        }
    }

    /// Load a committed tree by its ID.
    pub fn load<C>(persister: Arc<dyn Persister>, id: Uuid, comparator: C) -> Result<Self>
    where
        C: Comparator<V> + 'static,
    {
        Self::load_with(Config::new(persister, comparator), id)
    }

    /// Load a committed tree by its ID, using `config` for everything except
    /// the node width, which is restored from storage.
    pub fn load_with(config: Config<V>, id: Uuid) -> Result<Self> {
        Ok(Tree {
            inner: Tr::load(config, id)?,
        })
    }

    /// Begin a mutation session over this tree.
    pub fn as_mutable(&self) -> MutableTree<V> {
        MutableTree {
            inner: self.inner.snapshot(),
        }
    }

    /// Look up each of `values`, and call `f` with every key found, in the
    /// order of `values`. Missing values are skipped.
    pub fn apply<F>(&self, values: &[V], f: F) -> Result<()>
    where
        F: FnMut(&Key<V>),
    {
        self.inner.apply(values, f)
    }

    /// Look up a single value.
    pub fn get(&self, value: &V) -> Result<Option<Key<V>>> {
        self.inner.lookup(value)
    }

    /// The number of values in the tree.
    pub fn len(&self) -> usize {
        self.inner.count
    }

    /// Determine if the tree is currently empty
    pub fn is_empty(&self) -> bool {
        self.inner.count == 0
    }

    /// The tree's identity, also its key in the persister.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The node width the tree was built with.
    pub fn node_width(&self) -> usize {
        self.inner.config.node_width
    }

    /// Walk the whole tree and check its structural invariants.
    pub fn verify(&self) -> Result<bool> {
        self.inner.verify()
    }

    /// The number of levels in the tree. An empty tree has height 0.
    pub fn height(&self) -> Result<usize> {
        self.inner.height()
    }
}

impl<V: TreeValue> Clone for Tree<V> {
    fn clone(&self) -> Self {
        Tree {
            inner: self.inner.snapshot(),
        }
    }
}

impl<V: TreeValue> Debug for Tree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("id", &self.inner.id)
            .field("count", &self.inner.count)
            .field("root", &self.inner.root)
            .finish()
    }
}

/// A mutation session derived from a committed [Tree].
///
/// Changes are private to the session until [commit](MutableTree::commit).
/// A session must not be driven from several threads at once; the batch
/// operations parallelise internally.
///
/// If a batch operation returns an error, the session may be part way
/// through the batch and should be discarded.
pub struct MutableTree<V: TreeValue> {
    inner: Tr<V>,
}

impl<V: TreeValue> MutableTree<V> {
    /// Add or overwrite keys. When the same value appears more than once,
    /// the later key wins. Returns the keys that were replaced, in the order
    /// of the items that replaced them.
    pub fn add_items(&mut self, items: Vec<Key<V>>) -> Result<Vec<Key<V>>> {
        self.inner.add_items(items)
    }

    /// Remove values. Values that are not present are ignored. Returns the
    /// keys removed, in the order of `values`.
    pub fn delete_items(&mut self, values: Vec<V>) -> Result<Vec<Key<V>>> {
        self.inner.delete_items(values)
    }

    /// Persist the session and return the committed tree.
    ///
    /// If the persister fails, nothing is lost and commit may be retried.
    /// After success the session carries on from the committed state.
    pub fn commit(&mut self) -> Result<Tree<V>> {
        self.inner.commit()?;
        Ok(Tree {
            inner: self.inner.snapshot(),
        })
    }

    /// Look up each of `values`, and call `f` with every key found, in the
    /// order of `values`. Uncommitted changes are visible.
    pub fn apply<F>(&self, values: &[V], f: F) -> Result<()>
    where
        F: FnMut(&Key<V>),
    {
        self.inner.apply(values, f)
    }

    /// Look up a single value.
    pub fn get(&self, value: &V) -> Result<Option<Key<V>>> {
        self.inner.lookup(value)
    }

    /// The number of values in the session's view of the tree.
    pub fn len(&self) -> usize {
        self.inner.count
    }

    /// Determine if the tree is currently empty
    pub fn is_empty(&self) -> bool {
        self.inner.count == 0
    }

    /// The identity of the tree this session commits to.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Walk the whole tree and check its structural invariants.
    pub fn verify(&self) -> Result<bool> {
        self.inner.verify()
    }

    /// The number of levels in the tree. An empty tree has height 0.
    pub fn height(&self) -> Result<usize> {
        self.inner.height()
    }
}

impl<V: TreeValue> Debug for MutableTree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableTree")
            .field("id", &self.inner.id)
            .field("count", &self.inner.count)
            .field("root", &self.inner.root)
            .field("dirty", &self.inner.context.len())
            .finish()
    }
}
