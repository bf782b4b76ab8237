//! Node and tree metadata encoding. Only round-trip fidelity matters; the
//! byte layout is whatever bincode produces.

use bincode::{DefaultOptions, Options};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

use super::constants::MIN_NODE_WIDTH;
use super::node::{Entry, Node, NodeId};
use crate::error::{Error, Result};

/// What a committed tree stores under its own UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TreeMeta {
    pub(crate) root: Option<NodeId>,
    pub(crate) count: usize,
    pub(crate) node_width: usize,
}

fn options() -> impl Options {
    DefaultOptions::new().with_fixint_encoding()
}

pub(crate) fn encode_node<V: Serialize>(node: &Node<V>) -> Result<Vec<u8>> {
    Ok(options().serialize(node)?)
}

pub(crate) fn decode_node<V>(bytes: &[u8]) -> Result<Node<V>>
where
    V: DeserializeOwned + Clone + Debug,
{
    let node: Node<V> = options().deserialize(bytes)?;
    let expected = if node.is_leaf {
        node.values.len()
    } else {
        node.values.len() + 1
    };
    if node.entries.len() != expected {
        return Err(Error::Codec(format!(
            "node {} has {} entries for {} values",
            node.id,
            node.entries.len(),
            node.values.len()
        )));
    }
    let kinds_match = node.entries.iter().all(|e| match e {
        Entry::Payload(_) => node.is_leaf,
        Entry::Child(_) => !node.is_leaf,
    });
    if !kinds_match {
        return Err(Error::Codec(format!(
            "node {} mixes payloads and children",
            node.id
        )));
    }
    Ok(node)
}

pub(crate) fn encode_meta(meta: &TreeMeta) -> Result<Vec<u8>> {
    Ok(options().serialize(meta)?)
}

pub(crate) fn decode_meta(bytes: &[u8]) -> Result<TreeMeta> {
    let meta: TreeMeta = options().deserialize(bytes)?;
    if meta.node_width < MIN_NODE_WIDTH {
        return Err(Error::Codec(format!(
            "stored node width {} is below {}",
            meta.node_width, MIN_NODE_WIDTH
        )));
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::{decode_meta, decode_node, encode_meta, encode_node, TreeMeta};
    use crate::btree::node::{Entry, Key, Node};
    use crate::btree::OrdComparator;
    use crate::error::Error;
    use uuid::Uuid;

    #[test]
    fn test_btree_codec_leaf() {
        let mut n: Node<String> = Node::new_leaf();
        n.insert_keys(
            vec![
                (0, Key::new("b".to_string(), vec![2])),
                (1, Key::new("a".to_string(), vec![1, 1])),
            ],
            &OrdComparator,
        );
        let bytes = encode_node(&n).unwrap();
        let d: Node<String> = decode_node(&bytes).unwrap();
        assert_eq!(d, n);
    }

    #[test]
    fn test_btree_codec_branch() {
        let n: Node<u64> = Node::new_branch(vec![(10, Uuid::new_v4())], Uuid::new_v4());
        let d: Node<u64> = decode_node(&encode_node(&n).unwrap()).unwrap();
        assert_eq!(d, n);
    }

    #[test]
    fn test_btree_codec_rejects_bad_fanout() {
        let mut n: Node<u64> = Node::new_branch(vec![(10, Uuid::new_v4())], Uuid::new_v4());
        n.entries.pop();
        let r = decode_node::<u64>(&encode_node(&n).unwrap());
        assert!(matches!(r, Err(Error::Codec(_))));
        assert!(matches!(decode_node::<u64>(&[1, 2, 3]), Err(Error::Codec(_))));
    }

    #[test]
    fn test_btree_codec_rejects_wrong_entry_kind() {
        let mut leaf: Node<u64> = Node::new_leaf();
        leaf.values.push(1);
        leaf.entries.push(Entry::Child(Uuid::new_v4()));
        let r = decode_node::<u64>(&encode_node(&leaf).unwrap());
        assert!(matches!(r, Err(Error::Codec(_))));

        let mut branch: Node<u64> = Node::new_branch(vec![(10, Uuid::new_v4())], Uuid::new_v4());
        branch.entries[0] = Entry::Payload(vec![1]);
        let r = decode_node::<u64>(&encode_node(&branch).unwrap());
        assert!(matches!(r, Err(Error::Codec(_))));
    }

    #[test]
    fn test_btree_codec_rejects_narrow_width() {
        for node_width in [0, 1] {
            let m = TreeMeta {
                root: None,
                count: 0,
                node_width,
            };
            let r = decode_meta(&encode_meta(&m).unwrap());
            assert!(matches!(r, Err(Error::Codec(_))));
        }
    }

    #[test]
    fn test_btree_codec_meta() {
        let m = TreeMeta {
            root: Some(Uuid::new_v4()),
            count: 42,
            node_width: 16,
        };
        assert_eq!(decode_meta(&encode_meta(&m).unwrap()).unwrap(), m);
    }
}
