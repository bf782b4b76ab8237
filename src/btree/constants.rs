use std::time::Duration;

/// The default branching factor, and the number of values a node may hold
/// before it must split.
pub(crate) const DEFAULT_NODE_WIDTH: usize = 10_000;

/// The smallest branching factor that still lets an internal node split into
/// two valid halves.
pub(crate) const MIN_NODE_WIDTH: usize = 2;

/// How long a caller waits on another caller's in-flight node load.
pub(crate) const CACHE_TIMEOUT: Duration = Duration::from_secs(30);

// When the number of keys headed for one leaf exceeds this fraction of its
// current size, the leaf is rebuilt with a single merge instead of repeated
// single-element inserts.
pub(crate) const BULK_INSERT_RATIO: f64 = 0.1;

// Same trade for removal.
pub(crate) const BULK_DELETE_RATIO: f64 = 0.1;

pub(crate) const PATH_INLINE: usize = 8;
