//! The errors a tree operation can fail with.

use std::sync::Arc;

use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::btree::NodeId;

/// The result of a tree operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error a [Persister](crate::persist::Persister) hands back. It is
/// carried through the tree untouched.
pub type PersistError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can go wrong between a tree and its persister.
///
/// Errors are cloneable, since a single failed node load is reported to
/// every caller that was waiting on it.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// A node referenced by the tree is missing from the persister.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// No tree metadata is stored under this ID.
    #[error("tree {0} not found")]
    TreeNotFound(Uuid),

    /// The persister failed.
    #[error(transparent)]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),

    /// Gave up waiting on another caller's load of this node. The load
    /// itself carries on.
    #[error("timed out waiting for node {0} to load")]
    Timeout(NodeId),

    /// Stored bytes could not be encoded or decoded.
    #[error("codec failure: {0}")]
    Codec(String),
}

impl Error {
    pub(crate) fn persistence(error: PersistError) -> Self {
        Error::Persistence(Arc::from(error))
    }
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Codec(format!("{}", error))
    }
}
