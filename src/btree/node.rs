use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;
use std::mem;
use uuid::Uuid;

use super::constants::{BULK_DELETE_RATIO, BULK_INSERT_RATIO};
use super::Comparator;
use crate::utils::{slice_search, slice_upper_bound};

/// The identity of a node. Once a node has been committed its ID is never
/// reused for different content.
pub type NodeId = Uuid;

/// A user value paired with its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key<V> {
    /// The ordered value.
    pub value: V,
    /// The bytes stored alongside `value`.
    pub payload: Vec<u8>,
}

impl<V> Key<V> {
    /// Pair a value with a payload.
    pub fn new(value: V, payload: Vec<u8>) -> Self {
        Key { value, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Entry {
    Payload(Vec<u8>),
    Child(NodeId),
}

impl Entry {
    fn into_payload(self) -> Vec<u8> {
        match self {
            Entry::Payload(p) => p,
            Entry::Child(_) => unreachable!(),
        }
    }
}

/// The fewest values a non-root node may hold.
#[inline(always)]
pub(crate) fn min_occupancy(width: usize) -> usize {
    usize::max(width / 2, 1)
}

/// The outcome of rebalancing a node against its sibling.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RebalanceState {
    // Entries were shifted between the pair, both now meet the threshold and
    // the separator has been rewritten.
    Borrowed,
    // The right node was folded into the left and is now empty. The parent
    // must drop the separator and the right node's entry.
    Merged,
}

/// A leaf or internal page.
///
/// Leaves hold one `Entry::Payload` per value. Internal nodes hold one more
/// `Entry::Child` than values: `entries[i]` leads to values below
/// `values[i]`, and the final entry leads to values at or above the last
/// separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Node<V> {
    pub(crate) id: NodeId,
    pub(crate) is_leaf: bool,
    pub(crate) values: Vec<V>,
    pub(crate) entries: Vec<Entry>,
}

impl<V: Clone + Debug> Node<V> {
    pub(crate) fn new_leaf() -> Self {
        Node {
            id: Uuid::new_v4(),
            is_leaf: true,
            values: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Build an internal node over children that were split apart. The
    /// `separators` must be ordered, each pairing the lowest value of the
    /// next child with the child below it. `last` holds everything above the
    /// final separator.
    pub(crate) fn new_branch(separators: Vec<(V, NodeId)>, last: NodeId) -> Self {
        let mut values = Vec::with_capacity(separators.len());
        let mut entries = Vec::with_capacity(separators.len() + 1);
        for (v, id) in separators {
            values.push(v);
            entries.push(Entry::Child(id));
        }
        entries.push(Entry::Child(last));
        Node {
            id: Uuid::new_v4(),
            is_leaf: false,
            values,
            entries,
        }
    }

    /// Copy this node under a fresh identity. This is the only way a
    /// published node is changed.
    pub(crate) fn copy(&self) -> Self {
        Node {
            id: Uuid::new_v4(),
            is_leaf: self.is_leaf,
            values: self.values.clone(),
            entries: self.entries.clone(),
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn child(&self, idx: usize) -> NodeId {
        debug_assert!(!self.is_leaf);
        match self.entries[idx] {
            Entry::Child(id) => id,
            Entry::Payload(_) => unreachable!(),
        }
    }

    pub(crate) fn set_child(&mut self, idx: usize, id: NodeId) {
        debug_assert!(!self.is_leaf);
        debug_assert!(matches!(self.entries[idx], Entry::Child(_)));
        self.entries[idx] = Entry::Child(id);
    }

    /// Which entry of an internal node leads towards `v`. Equal values go
    /// right of their separator.
    pub(crate) fn child_index(&self, v: &V, cmp: &dyn Comparator<V>) -> usize {
        debug_assert!(!self.is_leaf);
        slice_upper_bound(&self.values, v, cmp)
    }

    pub(crate) fn search(&self, v: &V, cmp: &dyn Comparator<V>) -> Result<usize, usize> {
        slice_search(&self.values, v, cmp)
    }

    pub(crate) fn key(&self, idx: usize) -> Key<V> {
        debug_assert!(self.is_leaf);
        match &self.entries[idx] {
            Entry::Payload(p) => Key {
                value: self.values[idx].clone(),
                payload: p.clone(),
            },
            Entry::Child(_) => unreachable!(),
        }
    }

    pub(crate) fn get(&self, v: &V, cmp: &dyn Comparator<V>) -> Option<Key<V>> {
        self.search(v, cmp).ok().map(|idx| self.key(idx))
    }

    /// Add keys to a leaf, overwriting any already present. `keys` must be
    /// in caller input order, tagged with their input position; when the same
    /// value appears twice the later one wins. Returns every key that was
    /// replaced, tagged with the position of the key that replaced it.
    pub(crate) fn insert_keys(
        &mut self,
        keys: Vec<(usize, Key<V>)>,
        cmp: &dyn Comparator<V>,
    ) -> Vec<(usize, Key<V>)> {
        debug_assert!(self.is_leaf);
        if (keys.len() as f64) > (self.len() as f64) * BULK_INSERT_RATIO {
            self.merge_keys(keys, cmp)
        } else {
            keys.into_iter()
                .filter_map(|(idx, k)| self.insert_key(k, cmp).map(|old| (idx, old)))
                .collect()
        }
    }

    fn insert_key(&mut self, key: Key<V>, cmp: &dyn Comparator<V>) -> Option<Key<V>> {
        match self.search(&key.value, cmp) {
            Ok(idx) => {
                let value = mem::replace(&mut self.values[idx], key.value);
                let payload =
                    mem::replace(&mut self.entries[idx], Entry::Payload(key.payload)).into_payload();
                Some(Key { value, payload })
            }
            Err(idx) => {
                self.values.insert(idx, key.value);
                self.entries.insert(idx, Entry::Payload(key.payload));
                None
            }
        }
    }

    // Sort the batch, then rebuild the leaf in one pass over both sequences.
    fn merge_keys(
        &mut self,
        mut keys: Vec<(usize, Key<V>)>,
        cmp: &dyn Comparator<V>,
    ) -> Vec<(usize, Key<V>)> {
        // Stable, so duplicates stay in input order.
        keys.sort_by(|a, b| cmp.compare(&a.1.value, &b.1.value));

        // Each survivor remembers where its run of duplicates began, since
        // that item is the one that displaces a stored key.
        let mut overwritten = Vec::new();
        let mut incoming: Vec<(usize, Key<V>)> = Vec::with_capacity(keys.len());
        let mut first_of_run: Vec<usize> = Vec::with_capacity(keys.len());
        for (idx, key) in keys {
            if let Some(last) = incoming.last_mut() {
                if cmp.compare(&last.1.value, &key.value) == Ordering::Equal {
                    let (_, prev) = mem::replace(last, (idx, key));
                    overwritten.push((idx, prev));
                    continue;
                }
            }
            first_of_run.push(idx);
            incoming.push((idx, key));
        }

        let old_values = mem::take(&mut self.values);
        let old_entries = mem::take(&mut self.entries);
        let capacity = old_values.len() + incoming.len();
        self.values.reserve(capacity);
        self.entries.reserve(capacity);

        let mut old = old_values.into_iter().zip(old_entries).peekable();
        let mut inc = incoming.into_iter().zip(first_of_run).peekable();

        loop {
            let ord = match (old.peek(), inc.peek()) {
                (Some((ov, _)), Some(((_, k), _))) => cmp.compare(ov, &k.value),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };
            match ord {
                Ordering::Less => {
                    if let Some((v, e)) = old.next() {
                        self.values.push(v);
                        self.entries.push(e);
                    }
                }
                Ordering::Greater => {
                    if let Some(((_, k), _)) = inc.next() {
                        self.values.push(k.value);
                        self.entries.push(Entry::Payload(k.payload));
                    }
                }
                Ordering::Equal => {
                    if let (Some((v, e)), Some(((_, k), first))) = (old.next(), inc.next()) {
                        overwritten.push((
                            first,
                            Key {
                                value: v,
                                payload: e.into_payload(),
                            },
                        ));
                        self.values.push(k.value);
                        self.entries.push(Entry::Payload(k.payload));
                    }
                }
            }
        }

        overwritten
    }

    /// Remove values from a leaf. Values that are absent are ignored, as is
    /// the second occurrence of a value given twice. Returns the removed keys
    /// tagged with the input position that removed them.
    pub(crate) fn remove_values(
        &mut self,
        values: Vec<(usize, V)>,
        cmp: &dyn Comparator<V>,
    ) -> Vec<(usize, Key<V>)> {
        debug_assert!(self.is_leaf);
        if (values.len() as f64) > (self.len() as f64) * BULK_DELETE_RATIO {
            self.remove_bulk(values, cmp)
        } else {
            values
                .into_iter()
                .filter_map(|(idx, v)| {
                    self.search(&v, cmp).ok().map(|i| {
                        let value = self.values.remove(i);
                        let payload = self.entries.remove(i).into_payload();
                        (idx, Key { value, payload })
                    })
                })
                .collect()
        }
    }

    fn remove_bulk(
        &mut self,
        mut targets: Vec<(usize, V)>,
        cmp: &dyn Comparator<V>,
    ) -> Vec<(usize, Key<V>)> {
        targets.sort_by(|a, b| cmp.compare(&a.1, &b.1));
        targets.dedup_by(|b, a| cmp.compare(&a.1, &b.1) == Ordering::Equal);

        let old_values = mem::take(&mut self.values);
        let old_entries = mem::take(&mut self.entries);
        let mut removed = Vec::with_capacity(targets.len());
        let mut targets = targets.into_iter().peekable();

        for (v, e) in old_values.into_iter().zip(old_entries) {
            while targets
                .peek()
                .is_some_and(|(_, t)| cmp.compare(t, &v) == Ordering::Less)
            {
                targets.next();
            }
            match targets.peek() {
                Some((_, t)) if cmp.compare(t, &v) == Ordering::Equal => {
                    if let Some((idx, _)) = targets.next() {
                        removed.push((
                            idx,
                            Key {
                                value: v,
                                payload: e.into_payload(),
                            },
                        ));
                    }
                }
                _ => {
                    self.values.push(v);
                    self.entries.push(e);
                }
            }
        }

        removed
    }

    /// Place separators produced by a child split. Each separator is paired
    /// with the new left sibling it bounds.
    pub(crate) fn insert_separators(&mut self, separators: Vec<(V, NodeId)>, cmp: &dyn Comparator<V>) {
        debug_assert!(!self.is_leaf);
        for (v, id) in separators {
            let idx = slice_upper_bound(&self.values, &v, cmp);
            self.values.insert(idx, v);
            self.entries.insert(idx, Entry::Child(id));
        }
    }

    /// Carve left siblings off this node until it holds no more than `width`
    /// values. Returns the new siblings in ascending order, each paired with
    /// the separator a parent needs to route to it. `self` keeps the highest
    /// values and its identity.
    pub(crate) fn split(&mut self, width: usize) -> Vec<(V, Node<V>)> {
        let mut out = Vec::new();
        while self.len() > width {
            let take = usize::min(width, self.len() / 2);
            let rest_values = self.values.split_off(take);
            let left_values = mem::replace(&mut self.values, rest_values);

            let (sep, left_entries) = if self.is_leaf {
                let rest_entries = self.entries.split_off(take);
                (
                    self.values[0].clone(),
                    mem::replace(&mut self.entries, rest_entries),
                )
            } else {
                // The separator moves up rather than being copied.
                let sep = self.values.remove(0);
                let rest_entries = self.entries.split_off(take + 1);
                (sep, mem::replace(&mut self.entries, rest_entries))
            };

            out.push((
                sep,
                Node {
                    id: Uuid::new_v4(),
                    is_leaf: self.is_leaf,
                    values: left_values,
                    entries: left_entries,
                },
            ));
        }
        out
    }

    /// Rebalance `self` against `right`, its right sibling. `sep` is the
    /// parent's separator between the two and is rewritten on a borrow.
    pub(crate) fn rebalance(
        &mut self,
        right: &mut Node<V>,
        sep: &mut V,
        threshold: usize,
    ) -> RebalanceState {
        debug_assert!(self.is_leaf == right.is_leaf);
        if (self.len() + right.len()) / 2 >= threshold {
            if self.len() < threshold {
                self.take_from_right(right, sep, threshold - self.len());
            } else if right.len() < threshold {
                self.give_to_right(right, sep, threshold - right.len());
            }
            RebalanceState::Borrowed
        } else {
            if !self.is_leaf {
                self.values.push(sep.clone());
            }
            self.values.append(&mut right.values);
            self.entries.append(&mut right.entries);
            RebalanceState::Merged
        }
    }

    fn take_from_right(&mut self, right: &mut Node<V>, sep: &mut V, count: usize) {
        if self.is_leaf {
            self.values.extend(right.values.drain(..count));
            self.entries.extend(right.entries.drain(..count));
            *sep = right.values[0].clone();
        } else {
            // Rotate through the parent: the old separator comes down and
            // the last value taken from the right goes up.
            self.values.push(sep.clone());
            self.values.extend(right.values.drain(..count - 1));
            self.entries.extend(right.entries.drain(..count));
            *sep = right.values.remove(0);
        }
    }

    fn give_to_right(&mut self, right: &mut Node<V>, sep: &mut V, count: usize) {
        if self.is_leaf {
            let mut values = self.values.split_off(self.len() - count);
            let mut entries = self.entries.split_off(self.entries.len() - count);
            values.append(&mut right.values);
            entries.append(&mut right.entries);
            right.values = values;
            right.entries = entries;
            *sep = right.values[0].clone();
        } else {
            let mut values = self.values.split_off(self.len() - count + 1);
            let new_sep = match self.values.pop() {
                Some(v) => v,
                None => unreachable!(),
            };
            values.push(mem::replace(sep, new_sep));
            values.append(&mut right.values);
            let mut entries = self.entries.split_off(self.entries.len() - count);
            entries.append(&mut right.entries);
            right.values = values;
            right.entries = entries;
        }
    }

    /// Check ordering, fan-out and occupancy of this node alone.
    pub(crate) fn verify(&self, cmp: &dyn Comparator<V>, width: usize, is_root: bool) -> bool {
        let sorted = self
            .values
            .windows(2)
            .all(|w| cmp.compare(&w[0], &w[1]) == Ordering::Less);
        let fanout = if self.is_leaf {
            self.entries.len() == self.values.len()
                && self.entries.iter().all(|e| matches!(e, Entry::Payload(_)))
        } else {
            self.entries.len() == self.values.len() + 1
                && self.entries.iter().all(|e| matches!(e, Entry::Child(_)))
        };
        let occupancy = self.len() <= width
            && (is_root || self.len() >= min_occupancy(width))
            && (self.is_leaf || !self.values.is_empty());
        sorted && fanout && occupancy
    }
}
