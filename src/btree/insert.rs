//! Batched parallel insertion.
//!
//! A batch is routed to its leaves in parallel, then every touched leaf is
//! updated and split on its own worker. Changes then climb the tree one
//! layer at a time: the children of each parent are grouped, and each parent
//! is rewritten on its own worker. Two workers never hold the same node.

use foldhash::HashMap;
use tracing::{debug, trace};

use super::cursor::Tr;
use super::node::{Key, Node, NodeId};
use super::path::Path;
use super::TreeValue;
use crate::error::Result;
use crate::utils::fan_out;

// The keys bound for one leaf, tagged with their input position.
struct LeafBatch<V> {
    path: Path,
    keys: Vec<(usize, Key<V>)>,
}

// A node that changed below a parent that has not been updated yet.
struct Change<V> {
    // The ancestors of the changed node, nearest last.
    path: Path,
    old_id: NodeId,
    new_id: NodeId,
    separators: Vec<(V, NodeId)>,
}

impl<V> Change<V> {
    fn is_dirty(&self) -> bool {
        self.old_id != self.new_id || !self.separators.is_empty()
    }
}

struct ChildUpdate<V> {
    index: usize,
    old_id: NodeId,
    new_id: NodeId,
    separators: Vec<(V, NodeId)>,
}

struct ParentBatch<V> {
    path: Path,
    updates: Vec<ChildUpdate<V>>,
}

// What a worker hands back: the change to report upward, and the nodes it
// produced for the session to own.
struct Done<V> {
    change: Change<V>,
    nodes: Vec<Node<V>>,
    overwritten: Vec<(usize, Key<V>)>,
}

impl<V: TreeValue> Tr<V> {
    pub(crate) fn add_items(&mut self, items: Vec<Key<V>>) -> Result<Vec<Key<V>>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let total = items.len();

        if self.root.is_none() {
            let leaf = Node::new_leaf();
            self.root = Some(leaf.id);
            self.context.insert(leaf);
        }

        let paths = {
            let this = &*self;
            fan_out(this.config.workers, items.iter().collect(), |k| {
                this.find(&k.value)
            })?
        };

        let mut batches: HashMap<NodeId, LeafBatch<V>> = HashMap::default();
        for (idx, (key, path)) in items.into_iter().zip(paths).enumerate() {
            let leaf = match path.peek() {
                Some(b) => b.id,
                None => unreachable!(),
            };
            batches
                .entry(leaf)
                .or_insert_with(|| LeafBatch {
                    path,
                    keys: Vec::new(),
                })
                .keys
                .push((idx, key));
        }
        trace!(items = total, leaves = batches.len(), "add batch routed");

        let work: Vec<_> = batches
            .into_values()
            .map(|b| {
                let w = match b.path.peek() {
                    Some(leaf) => self.writable(&leaf.id),
                    None => unreachable!(),
                };
                (b, w)
            })
            .collect();

        let done = {
            let this = &*self;
            let width = this.config.node_width;
            fan_out(this.config.workers, work, |(mut batch, w)| {
                let leaf = match batch.path.pop() {
                    Some(b) => b,
                    None => unreachable!(),
                };
                let mut node = this.materialise(w)?;
                let overwritten = node.insert_keys(batch.keys, this.cmp());
                let (separators, mut nodes) = split_off(&mut node, width);
                let change = Change {
                    path: batch.path,
                    old_id: leaf.id,
                    new_id: node.id,
                    separators,
                };
                nodes.push(node);
                Ok(Done {
                    change,
                    nodes,
                    overwritten,
                })
            })?
        };

        let mut overwritten = Vec::new();
        let mut changes = self.absorb(done, &mut overwritten);

        loop {
            changes.retain(Change::is_dirty);
            let Some(first) = changes.first() else {
                break;
            };
            if first.path.is_empty() {
                // Only the root has no ancestors.
                for change in changes {
                    self.grow_root(change);
                }
                break;
            }
            changes = self.walk_up(changes)?;
        }

        self.count += total - overwritten.len();
        overwritten.sort_by_key(|(idx, _)| *idx);
        Ok(overwritten.into_iter().map(|(_, k)| k).collect())
    }

    // Hand the nodes workers produced to the session.
    fn absorb(
        &mut self,
        done: Vec<Done<V>>,
        overwritten: &mut Vec<(usize, Key<V>)>,
    ) -> Vec<Change<V>> {
        done.into_iter()
            .map(|d| {
                for n in d.nodes {
                    self.context.insert(n);
                }
                overwritten.extend(d.overwritten);
                d.change
            })
            .collect()
    }

    // Apply one layer of changes to their parents.
    fn walk_up(&mut self, changes: Vec<Change<V>>) -> Result<Vec<Change<V>>> {
        let mut parents: HashMap<NodeId, ParentBatch<V>> = HashMap::default();
        for mut c in changes {
            let parent = match c.path.pop() {
                Some(b) => b,
                None => unreachable!(),
            };
            parents
                .entry(parent.id)
                .or_insert_with(|| ParentBatch {
                    path: c.path,
                    updates: Vec::new(),
                })
                .updates
                .push(ChildUpdate {
                    index: parent.index,
                    old_id: c.old_id,
                    new_id: c.new_id,
                    separators: c.separators,
                });
        }

        let work: Vec<_> = parents
            .into_iter()
            .map(|(id, batch)| (id, batch, self.writable(&id)))
            .collect();

        let done = {
            let this = &*self;
            let width = this.config.node_width;
            fan_out(this.config.workers, work, |(old_id, batch, w)| {
                let mut node = this.materialise(w)?;
                // Repoint children before separators shift the indices.
                let mut separators = Vec::new();
                for u in batch.updates {
                    debug_assert!(node.child(u.index) == u.old_id);
                    node.set_child(u.index, u.new_id);
                    separators.extend(u.separators);
                }
                node.insert_separators(separators, this.cmp());
                let (separators, mut nodes) = split_off(&mut node, width);
                let change = Change {
                    path: batch.path,
                    old_id,
                    new_id: node.id,
                    separators,
                };
                nodes.push(node);
                Ok(Done {
                    change,
                    nodes,
                    overwritten: Vec::new(),
                })
            })?
        };

        let mut unused = Vec::new();
        Ok(self.absorb(done, &mut unused))
    }

    // The root changed. Point at it, and stack new levels on top while it
    // keeps splitting.
    fn grow_root(&mut self, change: Change<V>) {
        let width = self.config.node_width;
        let mut top = change.new_id;
        let mut separators = change.separators;
        while !separators.is_empty() {
            let mut root = Node::new_branch(separators, top);
            let (seps, nodes) = split_off(&mut root, width);
            for n in nodes {
                self.context.insert(n);
            }
            separators = seps;
            top = root.id;
            self.context.insert(root);
            debug!(tree = %self.id, root = ?top, "tree grew a level");
        }
        self.root = Some(top);
    }
}

// Split `node` down to `width`, returning the separators and the new left
// siblings separately.
fn split_off<V: TreeValue>(node: &mut Node<V>, width: usize) -> (Vec<(V, NodeId)>, Vec<Node<V>>) {
    let split = node.split(width);
    if !split.is_empty() {
        trace!(id = ?node.id, into = split.len() + 1, "split");
    }
    split
        .into_iter()
        .map(|(sep, left)| ((sep, left.id), left))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::super::cursor::Tr;
    use crate::btree::node::Key;
    use crate::btree::{Config, OrdComparator};
    use crate::persist::MemoryPersister;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use uuid::Uuid;

    fn create_tr(width: usize, workers: usize) -> Tr<usize> {
        let config = Config::new(Arc::new(MemoryPersister::new()), OrdComparator)
            .with_node_width(width)
            .with_workers(workers);
        Tr::new(Uuid::new_v4(), 0, None, config)
    }

    fn keys(values: impl IntoIterator<Item = usize>) -> Vec<Key<usize>> {
        values
            .into_iter()
            .map(|v| Key::new(v, v.to_be_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_btree_insert_single_leaf() {
        let mut tr = create_tr(10, 4);
        let r = tr.add_items(keys([5, 1, 3])).unwrap();
        assert!(r.is_empty());
        assert_eq!(tr.count, 3);
        assert_eq!(tr.height().unwrap(), 1);
        assert!(tr.verify().unwrap());
    }

    #[test]
    fn test_btree_insert_empty_batch() {
        let mut tr = create_tr(10, 4);
        assert!(tr.add_items(Vec::new()).unwrap().is_empty());
        assert!(tr.root.is_none());
    }

    #[test]
    fn test_btree_insert_split_root() {
        // 20 sequential values at width 10 can not fit one leaf.
        let mut tr = create_tr(10, 4);
        tr.add_items(keys(0..20)).unwrap();
        assert_eq!(tr.count, 20);
        assert_eq!(tr.height().unwrap(), 2);
        assert!(tr.verify().unwrap());
        for i in 0..20 {
            assert_eq!(tr.lookup(&i).unwrap(), Some(Key::new(i, i.to_be_bytes().to_vec())));
        }
    }

    #[test]
    fn test_btree_insert_deep_tree() {
        let mut tr = create_tr(3, 8);
        tr.add_items(keys(0..1000)).unwrap();
        assert_eq!(tr.count, 1000);
        assert!(tr.height().unwrap() > 3);
        assert!(tr.verify().unwrap());
    }

    #[test]
    fn test_btree_insert_many_batches() {
        let mut tr = create_tr(4, 4);
        let mut expect = BTreeMap::new();
        for round in 0..20usize {
            let batch: Vec<usize> = (0..37).map(|i| (i * 7919 + round * 31) % 500).collect();
            tr.add_items(batch.iter().map(|v| Key::new(*v, vec![round as u8])).collect())
                .unwrap();
            for v in batch {
                expect.insert(v, vec![round as u8]);
            }
            assert!(tr.verify().unwrap());
            assert_eq!(tr.count, expect.len());
        }
        for (v, p) in expect {
            assert_eq!(tr.lookup(&v).unwrap().map(|k| k.payload), Some(p));
        }
    }

    #[test]
    fn test_btree_insert_overwrite_order() {
        let mut tr = create_tr(4, 4);
        tr.add_items((0..50).map(|v| Key::new(v, vec![0])).collect())
            .unwrap();
        // Overwrite in reverse, with an in-batch duplicate of 10.
        let batch = vec![
            Key::new(40, vec![1]),
            Key::new(10, vec![1]),
            Key::new(99, vec![1]),
            Key::new(10, vec![2]),
            Key::new(3, vec![1]),
        ];
        let r = tr.add_items(batch).unwrap();
        assert_eq!(
            r,
            vec![
                Key::new(40, vec![0]),
                Key::new(10, vec![0]),
                Key::new(10, vec![1]),
                Key::new(3, vec![0]),
            ]
        );
        assert_eq!(tr.count, 51);
        assert_eq!(tr.lookup(&10).unwrap(), Some(Key::new(10, vec![2])));
        assert!(tr.verify().unwrap());
    }

    #[test]
    fn test_btree_insert_worker_counts_agree() {
        let values: Vec<usize> = (0..2000).map(|i| (i * 104729) % 3001).collect();
        let mut a = create_tr(8, 1);
        let mut b = create_tr(8, 16);
        a.add_items(keys(values.clone())).unwrap();
        b.add_items(keys(values.clone())).unwrap();
        assert_eq!(a.count, b.count);
        assert!(a.verify().unwrap());
        assert!(b.verify().unwrap());
        for v in values {
            assert_eq!(a.lookup(&v).unwrap(), b.lookup(&v).unwrap());
        }
    }

    #[test]
    fn test_btree_insert_owned_nodes_stay_put() {
        // A second batch into a fresh session's own nodes must not copy them.
        let mut tr = create_tr(100, 4);
        tr.add_items(keys(0..10)).unwrap();
        let root = tr.root;
        tr.add_items(keys(10..20)).unwrap();
        assert_eq!(tr.root, root);
        assert_eq!(tr.context.len(), 1);
    }
}
