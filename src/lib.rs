//! Cowtree - Persistent Copy-On-Write B-Trees
//!
//! A cowtree is an ordered index of values, each paired with an opaque
//! payload, that is stored through a pluggable key/value [Persister]. Every
//! committed version of a tree is immutable, and any number of versions may
//! share nodes. Changing a tree means deriving a mutation session from a
//! committed version, copying only the nodes on the paths that change, and
//! committing those copies as a new version.
//!
//! Mutation is batched. Additions are routed, applied, and propagated up the
//! tree on a pool of scoped worker threads, so large batches scale with the
//! number of processors. Deletions run sequentially, rebalancing as they go.
//!
//! Nodes read back from the persister are shared through a single-flight
//! cache: concurrent requests for the same node issue one load between them.
//!
//! See [btree] for an example.

#![warn(unused_extern_crates)]
#![warn(missing_docs)]
#![allow(clippy::needless_lifetimes)]

pub mod btree;
pub mod error;
pub mod persist;

// This is where the gud rust lives.
mod utils;

pub use btree::{Comparator, Config, Key, MutableTree, OrdComparator, Tree};
pub use error::{Error, Result};
pub use persist::{MemoryPersister, Payload, Persister};
