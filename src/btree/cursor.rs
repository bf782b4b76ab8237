//! The cursor is what actually knits a tree together. It holds the root and
//! count of one version of a tree, the shared node cache, and for a mutable
//! session the nodes that session owns. Both [super::Tree] and
//! [super::MutableTree] are thin handles over a cursor.
//!
//! Batch insertion lives in `insert.rs`, deletion in `delete.rs`. This file
//! covers descent, queries, commit and load, and the whole-tree checks.

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

use super::cache::Cacher;
use super::codec::{decode_meta, encode_meta, encode_node, TreeMeta};
use super::context::Context;
use super::node::{Key, Node, NodeId};
use super::path::Path;
use super::{Comparator, Config, TreeValue};
use crate::error::{Error, Result};
use crate::persist::Payload;
use crate::utils::fan_out;

pub(crate) struct Tr<V: TreeValue> {
    pub(crate) id: Uuid,
    pub(crate) count: usize,
    pub(crate) root: Option<NodeId>,
    pub(crate) config: Config<V>,
    pub(crate) cacher: Arc<Cacher<V>>,
    pub(crate) context: Context<V>,
}

/// A node a mutable session is about to change. An owned node already
/// belongs to the session; a shared one must be loaded and copied first.
pub(crate) enum Writable<V> {
    Owned(Node<V>),
    Shared(NodeId),
}

impl<V: TreeValue> Tr<V> {
    pub(crate) fn new(id: Uuid, count: usize, root: Option<NodeId>, config: Config<V>) -> Self {
        let cacher = Arc::new(Cacher::new(
            config.persister.clone(),
            config.cache_timeout,
        ));
        Tr {
            id,
            count,
            root,
            config,
            cacher,
            context: Context::default(),
        }
    }

    pub(crate) fn load(mut config: Config<V>, id: Uuid) -> Result<Self> {
        let keys = [id.as_bytes().to_vec()];
        let bytes = config
            .persister
            .load(&keys)
            .map_err(Error::persistence)?
            .pop()
            .flatten()
            .ok_or(Error::TreeNotFound(id))?;
        let meta = decode_meta(&bytes)?;
        debug!(tree = %id, count = meta.count, node_width = meta.node_width, "loaded tree");
        config.node_width = meta.node_width;
        Ok(Tr::new(id, meta.count, meta.root, config))
    }

    /// Another handle on the same committed version. Session-owned nodes are
    /// not carried over.
    pub(crate) fn snapshot(&self) -> Self {
        Tr {
            id: self.id,
            count: self.count,
            root: self.root,
            config: self.config.clone(),
            cacher: self.cacher.clone(),
            context: Context::default(),
        }
    }

    #[inline(always)]
    pub(crate) fn cmp(&self) -> &dyn Comparator<V> {
        self.config.comparator.as_ref()
    }

    pub(crate) fn node(&self, id: &NodeId) -> Result<Arc<Node<V>>> {
        self.cacher.get_node(&self.context, id)
    }

    /// Descend towards `v`, recording every node and index taken. The last
    /// bundle is the leaf. Empty when the tree has no root.
    pub(crate) fn find(&self, v: &V) -> Result<Path> {
        let cmp = self.cmp();
        let mut path = Path::new();
        let mut next = self.root;
        while let Some(id) = next {
            let node = self.node(&id)?;
            if node.is_leaf {
                let idx = match node.search(v, cmp) {
                    Ok(i) | Err(i) => i,
                };
                path.push(id, idx);
                next = None;
            } else {
                let idx = node.child_index(v, cmp);
                path.push(id, idx);
                next = Some(node.child(idx));
            }
        }
        Ok(path)
    }

    pub(crate) fn lookup(&self, v: &V) -> Result<Option<Key<V>>> {
        let cmp = self.cmp();
        let mut next = self.root;
        while let Some(id) = next {
            let node = self.node(&id)?;
            if node.is_leaf {
                return Ok(node.get(v, cmp));
            }
            next = Some(node.child(node.child_index(v, cmp)));
        }
        Ok(None)
    }

    pub(crate) fn apply<F>(&self, values: &[V], mut f: F) -> Result<()>
    where
        F: FnMut(&Key<V>),
    {
        let found = fan_out(self.config.workers, values.iter().collect(), |v| {
            self.lookup(v)
        })?;
        found.iter().flatten().for_each(|k| f(k));
        Ok(())
    }

    /// Claim a node for mutation without loading it yet.
    pub(crate) fn writable(&mut self, id: &NodeId) -> Writable<V> {
        match self.context.take(id) {
            Some(n) => Writable::Owned(n),
            None => Writable::Shared(*id),
        }
    }

    /// Turn a claim into a node the session may change. Safe to call from
    /// workers, since it never touches the session's own nodes.
    pub(crate) fn materialise(&self, w: Writable<V>) -> Result<Node<V>> {
        match w {
            Writable::Owned(n) => Ok(n),
            Writable::Shared(id) => {
                let shared = self.cacher.get_node(&self.context, &id)?;
                let n = shared.copy();
                trace!(from = ?id, to = ?n.id, "copy on write");
                Ok(n)
            }
        }
    }

    pub(crate) fn take_writable(&mut self, id: &NodeId) -> Result<Node<V>> {
        let w = self.writable(id);
        self.materialise(w)
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        let mut items = Vec::with_capacity(self.context.len() + 1);
        for node in self.context.nodes() {
            items.push(Payload::new(
                node.id.as_bytes().to_vec(),
                encode_node(node.as_ref())?,
            ));
        }
        let meta = TreeMeta {
            root: self.root,
            count: self.count,
            node_width: self.config.node_width,
        };
        items.push(Payload::new(self.id.as_bytes().to_vec(), encode_meta(&meta)?));

        debug!(
            tree = %self.id,
            nodes = self.context.len(),
            count = self.count,
            "commit"
        );
        self.config
            .persister
            .save(items)
            .map_err(Error::persistence)?;

        self.context = Context::default();
        self.cacher.clear();
        Ok(())
    }

    pub(crate) fn height(&self) -> Result<usize> {
        let mut height = 0;
        let mut next = self.root;
        while let Some(id) = next {
            let node = self.node(&id)?;
            height += 1;
            next = if node.is_leaf {
                None
            } else {
                Some(node.child(0))
            };
        }
        Ok(height)
    }

    /// Check every node: ordering, fan-out, occupancy, that values sit
    /// within the separators above them, that all leaves share one depth,
    /// and that the leaves hold exactly `count` values.
    pub(crate) fn verify(&self) -> Result<bool> {
        let root = match self.root {
            Some(r) => r,
            None => return Ok(self.count == 0),
        };
        let mut walk = VerifyWalk {
            leaf_depth: None,
            count: 0,
        };
        let ok = self.verify_node(&root, None, None, 1, &mut walk)?;
        if !ok {
            return Ok(false);
        }
        if walk.count != self.count {
            trace!(expected = self.count, found = walk.count, "count mismatch");
            return Ok(false);
        }
        Ok(true)
    }

    fn verify_node(
        &self,
        id: &NodeId,
        lower: Option<&V>,
        upper: Option<&V>,
        depth: usize,
        walk: &mut VerifyWalk,
    ) -> Result<bool> {
        let cmp = self.cmp();
        let node = self.node(id)?;
        if !node.verify(cmp, self.config.node_width, depth == 1) {
            trace!(?id, "node failed verification");
            return Ok(false);
        }
        if let (Some(lo), Some(first)) = (lower, node.values.first()) {
            if cmp.compare(first, lo) == Ordering::Less {
                return Ok(false);
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.values.last()) {
            if cmp.compare(last, hi) != Ordering::Less {
                return Ok(false);
            }
        }

        if node.is_leaf {
            walk.count += node.len();
            return match walk.leaf_depth {
                Some(d) => Ok(d == depth),
                None => {
                    walk.leaf_depth = Some(depth);
                    Ok(true)
                }
            };
        }

        for i in 0..node.entries.len() {
            let lo = if i == 0 { lower } else { Some(&node.values[i - 1]) };
            let hi = if i == node.values.len() {
                upper
            } else {
                Some(&node.values[i])
            };
            if !self.verify_node(&node.child(i), lo, hi, depth + 1, walk)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

struct VerifyWalk {
    leaf_depth: Option<usize>,
    count: usize,
}
