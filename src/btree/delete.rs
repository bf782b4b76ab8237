//! Deletion runs one leaf at a time. Values that land in the same leaf as
//! their predecessor in the input are removed together, then the leaf's
//! ancestors are repaired on the way back up: a node left below half full
//! borrows from a sibling, or merges with it when the pair can not both be
//! kept half full.

use std::cmp::Ordering;
use tracing::{debug, trace};

use super::cursor::Tr;
use super::node::{min_occupancy, Key, Node, NodeId, RebalanceState};
use super::path::Path;
use super::TreeValue;
use crate::error::Result;

impl<V: TreeValue> Tr<V> {
    pub(crate) fn delete_items(&mut self, values: Vec<V>) -> Result<Vec<Key<V>>> {
        let comparator = self.config.comparator.clone();
        let cmp = comparator.as_ref();
        let mut deleted: Vec<(usize, Key<V>)> = Vec::new();
        let mut input = values.into_iter().enumerate().peekable();

        while let Some((idx, v)) = input.next() {
            if self.root.is_none() {
                break;
            }
            let mut path = self.find(&v)?;
            let leaf_id = match path.pop() {
                Some(b) => b.id,
                None => unreachable!(),
            };

            let mut run = vec![(idx, v)];
            let any_present = {
                let leaf = self.node(&leaf_id)?;
                if let (Some(lo), Some(hi)) = (leaf.values.first(), leaf.values.last()) {
                    while let Some((_, next)) = input.peek() {
                        let within = cmp.compare(lo, next) != Ordering::Greater
                            && cmp.compare(next, hi) != Ordering::Greater;
                        if !within {
                            break;
                        }
                        if let Some(item) = input.next() {
                            run.push(item);
                        }
                    }
                }
                run.iter().any(|(_, v)| leaf.search(v, cmp).is_ok())
            };
            // Nothing to remove, so nothing is copied.
            if !any_present {
                continue;
            }

            let mut leaf = self.take_writable(&leaf_id)?;
            deleted.extend(leaf.remove_values(run, cmp));
            let new_id = leaf.id;
            self.context.insert(leaf);
            self.repair(path, leaf_id, new_id)?;
        }

        trace!(removed = deleted.len(), "delete batch done");
        self.count -= deleted.len();
        deleted.sort_by_key(|(idx, _)| *idx);
        Ok(deleted.into_iter().map(|(_, k)| k).collect())
    }

    // Walk from a changed node back to the root, repointing each parent and
    // fixing any underflow on the way.
    fn repair(&mut self, mut path: Path, mut old_id: NodeId, mut new_id: NodeId) -> Result<()> {
        let threshold = min_occupancy(self.config.node_width);
        while let Some(parent_bundle) = path.pop() {
            let underflow = self.node(&new_id)?.len() < threshold;
            if old_id == new_id && !underflow {
                return Ok(());
            }
            let mut parent = self.take_writable(&parent_bundle.id)?;
            parent.set_child(parent_bundle.index, new_id);
            if underflow {
                self.rebalance_child(&mut parent, parent_bundle.index, threshold)?;
            }
            old_id = parent_bundle.id;
            new_id = parent.id;
            self.context.insert(parent);
        }
        self.root = Some(new_id);
        self.collapse_root()
    }

    // Rebalance the child at `idx` of `parent` against an adjacent sibling,
    // preferring the right one.
    fn rebalance_child(&mut self, parent: &mut Node<V>, idx: usize, threshold: usize) -> Result<()> {
        let (li, ri) = if idx + 1 < parent.entries.len() {
            (idx, idx + 1)
        } else if idx > 0 {
            (idx - 1, idx)
        } else {
            return Ok(());
        };

        let mut left = self.take_writable(&parent.child(li))?;
        let mut right = self.take_writable(&parent.child(ri))?;
        parent.set_child(li, left.id);
        parent.set_child(ri, right.id);

        match left.rebalance(&mut right, &mut parent.values[li], threshold) {
            RebalanceState::Borrowed => {
                trace!(left = ?left.id, right = ?right.id, "borrowed");
                self.context.insert(left);
                self.context.insert(right);
            }
            RebalanceState::Merged => {
                trace!(left = ?left.id, right = ?right.id, "merged");
                parent.values.remove(li);
                parent.entries.remove(ri);
                self.context.insert(left);
            }
        }
        Ok(())
    }

    // Drop internal roots left with a single child, and the root leaf once
    // it is empty.
    fn collapse_root(&mut self) -> Result<()> {
        while let Some(id) = self.root {
            let node = self.node(&id)?;
            if !node.values.is_empty() {
                break;
            }
            self.context.remove(&id);
            if node.is_leaf {
                self.root = None;
            } else {
                self.root = Some(node.child(0));
            }
            debug!(tree = %self.id, root = ?self.root, "tree shrank a level");
        }
        Ok(())
    }
}
