use foldhash::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use super::node::{Node, NodeId};

/// The nodes a mutable session has created or copied. A node found here
/// belongs to the session and may be changed in place; anything else is
/// shared and must be copied first.
#[derive(Debug)]
pub(crate) struct Context<V> {
    seen_nodes: HashMap<NodeId, Arc<Node<V>>>,
}

impl<V> Default for Context<V> {
    fn default() -> Self {
        Context {
            seen_nodes: HashMap::default(),
        }
    }
}

impl<V: Clone + Debug> Context<V> {
    pub(crate) fn get(&self, id: &NodeId) -> Option<&Arc<Node<V>>> {
        self.seen_nodes.get(id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &NodeId) -> bool {
        self.seen_nodes.contains_key(id)
    }

    pub(crate) fn insert(&mut self, node: Node<V>) {
        self.seen_nodes.insert(node.id, Arc::new(node));
    }

    /// Move a node out for mutation. It must be put back with `insert`.
    pub(crate) fn take(&mut self, id: &NodeId) -> Option<Node<V>> {
        self.seen_nodes.remove(id).map(Arc::unwrap_or_clone)
    }

    pub(crate) fn remove(&mut self, id: &NodeId) {
        self.seen_nodes.remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.seen_nodes.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.seen_nodes.is_empty()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Arc<Node<V>>> {
        self.seen_nodes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::Context;
    use crate::btree::node::Node;

    #[test]
    fn test_btree_context_take_insert() {
        let mut ctx: Context<usize> = Context::default();
        assert!(ctx.is_empty());
        let n = Node::new_leaf();
        let id = n.id;
        ctx.insert(n);
        assert!(ctx.contains(&id));
        assert_eq!(ctx.len(), 1);

        let mut n = ctx.take(&id).unwrap();
        assert!(!ctx.contains(&id));
        n.values.push(1);
        n.entries.push(crate::btree::node::Entry::Payload(vec![1]));
        ctx.insert(n);
        assert_eq!(ctx.get(&id).map(|n| n.len()), Some(1));

        ctx.remove(&id);
        assert!(ctx.is_empty());
    }
}
