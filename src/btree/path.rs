use smallvec::SmallVec;

use super::constants::PATH_INLINE;
use super::node::NodeId;

/// One step of a descent: the node visited, and the index taken within it.
/// For an internal node the index is the child followed; for a leaf it is
/// where the searched value is, or would be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PathBundle {
    pub(crate) id: NodeId,
    pub(crate) index: usize,
}

/// The record of a root-to-leaf descent. It is only ever walked back up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Path {
    stack: SmallVec<[PathBundle; PATH_INLINE]>,
}

impl Path {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, id: NodeId, index: usize) {
        self.stack.push(PathBundle { id, index });
    }

    pub(crate) fn pop(&mut self) -> Option<PathBundle> {
        self.stack.pop()
    }

    pub(crate) fn peek(&self) -> Option<&PathBundle> {
        self.stack.last()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Path;
    use uuid::Uuid;

    #[test]
    fn test_btree_path_stack() {
        let ids: Vec<_> = (0..12).map(|_| Uuid::new_v4()).collect();
        let mut p = Path::new();
        assert!(p.is_empty());
        assert!(p.peek().is_none());
        // Past the inline capacity on purpose.
        for (i, id) in ids.iter().enumerate() {
            p.push(*id, i);
        }
        assert_eq!(p.len(), 12);
        assert_eq!(p.peek().map(|b| b.id), Some(ids[11]));
        for (i, id) in ids.iter().enumerate().rev() {
            let b = p.pop().unwrap();
            assert_eq!(b.id, *id);
            assert_eq!(b.index, i);
        }
        assert!(p.pop().is_none());
    }
}
