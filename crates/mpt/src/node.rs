//! Binary hash trie nodes.
//!
//! Nodes are immutable and shared through `Arc`. Every mutation copies the
//! nodes on the path from the root to the touched leaf and recomputes their
//! digests on the way back up, so a cloned root is a snapshot that later
//! mutations never reach.
//!
//! The trie is kept canonical: a branch exists only above two or more keys,
//! a leaf holds exactly one key and an empty node holds none. Equal key sets
//! therefore always produce identical trees and identical digests.

use std::sync::Arc;

use crate::crypto;
use crate::path::{bit_at, common_prefix_bits};
use crate::{Hash32, MptError, Result};

pub(crate) type Link = Arc<Node>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Empty,
    Leaf {
        key: Hash32,
        value: Vec<u8>,
        digest: Hash32,
    },
    Branch {
        left: Link,
        right: Link,
        digest: Hash32,
    },
    /// Pruned subtree, only its digest is known. Appears in partial tries.
    Stub { digest: Hash32 },
}

impl Node {
    pub(crate) fn empty() -> Link {
        Arc::new(Node::Empty)
    }

    pub(crate) fn leaf(key: Hash32, value: Vec<u8>) -> Link {
        let digest = crypto::hash_leaf(&key, &value);
        Arc::new(Node::Leaf { key, value, digest })
    }

    pub(crate) fn branch(left: Link, right: Link) -> Link {
        let digest = crypto::hash_branch(&left.digest(), &right.digest());
        Arc::new(Node::Branch { left, right, digest })
    }

    pub(crate) fn stub(digest: Hash32) -> Link {
        Arc::new(Node::Stub { digest })
    }

    pub(crate) fn digest(&self) -> Hash32 {
        match self {
            Node::Empty => crypto::empty_hash(),
            Node::Leaf { digest, .. } | Node::Branch { digest, .. } | Node::Stub { digest } => {
                *digest
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }
}

fn insufficient(key: &Hash32) -> MptError {
    MptError::InsufficientAuthenticationData(hex::encode(key))
}

/// Look `key` up below `node`, which sits at `depth`.
pub(crate) fn get<'a>(node: &'a Node, key: &Hash32, depth: usize) -> Result<Option<&'a [u8]>> {
    match node {
        Node::Empty => Ok(None),
        Node::Leaf { key: k, value, .. } => Ok((k == key).then_some(value.as_slice())),
        Node::Branch { left, right, .. } => {
            let child = if bit_at(key, depth) { right } else { left };
            get(child, key, depth + 1)
        }
        Node::Stub { .. } => Err(insufficient(key)),
    }
}

/// Insert or overwrite `key`. Returns the new subtree root.
pub(crate) fn insert(node: &Link, key: Hash32, value: Vec<u8>, depth: usize) -> Result<Link> {
    match node.as_ref() {
        Node::Empty => Ok(Node::leaf(key, value)),
        Node::Leaf { key: k, value: v, .. } if *k == key => {
            if *v == value {
                Ok(node.clone())
            } else {
                Ok(Node::leaf(key, value))
            }
        }
        Node::Leaf { key: k, .. } => {
            let existing = *k;
            Ok(split(node.clone(), &existing, Node::leaf(key, value), &key, depth))
        }
        Node::Branch { left, right, .. } => {
            if bit_at(&key, depth) {
                let right = insert(right, key, value, depth + 1)?;
                Ok(Node::branch(left.clone(), right))
            } else {
                let left = insert(left, key, value, depth + 1)?;
                Ok(Node::branch(left, right.clone()))
            }
        }
        Node::Stub { .. } => Err(insufficient(&key)),
    }
}

/// Separate two leaves whose keys agree on the first `depth` bits, growing
/// only as many branches as needed to tell them apart.
fn split(a: Link, a_key: &Hash32, b: Link, b_key: &Hash32, depth: usize) -> Link {
    let diverge = common_prefix_bits(a_key, b_key);
    debug_assert!(diverge >= depth && diverge < crate::KEY_BITS);

    let mut node = if bit_at(a_key, diverge) {
        Node::branch(b, a)
    } else {
        Node::branch(a, b)
    };
    for d in (depth..diverge).rev() {
        node = if bit_at(a_key, d) {
            Node::branch(Node::empty(), node)
        } else {
            Node::branch(node, Node::empty())
        };
    }
    node
}

/// Remove `key`. Returns `None` when the key was not present (the trie is
/// left as it was), otherwise the new subtree root.
pub(crate) fn delete(node: &Link, key: &Hash32, depth: usize) -> Result<Option<Link>> {
    match node.as_ref() {
        Node::Empty => Ok(None),
        Node::Leaf { key: k, .. } => Ok((k == key).then(Node::empty)),
        Node::Branch { left, right, .. } => {
            let go_right = bit_at(key, depth);
            let (child, sibling) = if go_right { (right, left) } else { (left, right) };
            let Some(child) = delete(child, key, depth + 1)? else {
                return Ok(None);
            };
            let (left, right) = if go_right {
                (sibling.clone(), child)
            } else {
                (child, sibling.clone())
            };
            collapse(left, right, key).map(Some)
        }
        Node::Stub { .. } => Err(insufficient(key)),
    }
}

/// Rebuild a branch after a deletion below it, folding it away when it no
/// longer separates two keys.
fn collapse(left: Link, right: Link, key: &Hash32) -> Result<Link> {
    match (left.as_ref(), right.as_ref()) {
        (Node::Empty, Node::Empty) => Ok(Node::empty()),
        (Node::Empty, Node::Leaf { .. }) => Ok(right),
        (Node::Leaf { .. }, Node::Empty) => Ok(left),
        // A stub beside an empty subtree might be a single leaf that would
        // have to move up; without its contents the shape is unknown.
        (Node::Empty, Node::Stub { .. }) | (Node::Stub { .. }, Node::Empty) => {
            Err(insufficient(key))
        }
        _ => Ok(Node::branch(left, right)),
    }
}

/// Copy of `node` keeping only the paths to `keys`; every subtree off those
/// paths is replaced by a stub carrying its digest. `keys` must be sorted.
pub(crate) fn prune(node: &Link, keys: &[Hash32], depth: usize) -> Link {
    if keys.is_empty() {
        return match node.as_ref() {
            Node::Empty => node.clone(),
            other => Node::stub(other.digest()),
        };
    }
    match node.as_ref() {
        Node::Empty | Node::Leaf { .. } | Node::Stub { .. } => node.clone(),
        Node::Branch { left, right, .. } => {
            let split_at = keys.partition_point(|k| !bit_at(k, depth));
            let (go_left, go_right) = keys.split_at(split_at);
            Node::branch(
                prune(left, go_left, depth + 1),
                prune(right, go_right, depth + 1),
            )
        }
    }
}

/// Collect every (key, value) below `node` in key order.
pub(crate) fn collect(node: &Node, out: &mut Vec<(Hash32, Vec<u8>)>) {
    match node {
        Node::Empty | Node::Stub { .. } => {}
        Node::Leaf { key, value, .. } => out.push((*key, value.clone())),
        Node::Branch { left, right, .. } => {
            collect(left, out);
            collect(right, out);
        }
    }
}

/// Whether a branch with these children is in canonical form.
pub(crate) fn is_canonical_branch(left: &Node, right: &Node) -> bool {
    !matches!(
        (left, right),
        (Node::Empty, Node::Empty) | (Node::Empty, Node::Leaf { .. }) | (Node::Leaf { .. }, Node::Empty)
    )
}
