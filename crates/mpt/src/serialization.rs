//! Wire format shared by snapshots of full tries and by proofs.
//!
//! A trie is flattened into its nodes in pre-order. Each node is a tag plus
//! the fields that tag allows: a leaf carries its key and value, a stub its
//! digest, empty and branch nodes nothing. Branch digests are never sent;
//! the receiver recomputes them, so a proof cannot smuggle in a digest for
//! a subtree it also reveals.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::node::{self, Link, Node};
use crate::path::{has_prefix, key_from_slice, with_bit};
use crate::{Hash32, MptError, Result, KEY_BITS};

pub const WIRE_VERSION: u8 = 1;

const TAG_EMPTY: u8 = 0;
const TAG_LEAF: u8 = 1;
const TAG_BRANCH: u8 = 2;
const TAG_STUB: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrieKind {
    Full,
    Partial,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireNode {
    pub tag: u8,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub digest: Option<Hash32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTrie {
    pub version: u8,
    pub kind: TrieKind,
    pub nodes: Vec<WireNode>,
}

impl SerializedTrie {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MptError::InvalidSerialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| MptError::InvalidSerialization(e.to_string()))
    }
}

pub(crate) fn flatten(root: &Node, kind: TrieKind) -> SerializedTrie {
    let mut nodes = Vec::new();
    push(root, &mut nodes);
    SerializedTrie {
        version: WIRE_VERSION,
        kind,
        nodes,
    }
}

fn push(node: &Node, out: &mut Vec<WireNode>) {
    match node {
        Node::Empty => out.push(WireNode {
            tag: TAG_EMPTY,
            key: None,
            value: None,
            digest: None,
        }),
        Node::Leaf { key, value, .. } => out.push(WireNode {
            tag: TAG_LEAF,
            key: Some(key.to_vec()),
            value: Some(value.clone()),
            digest: None,
        }),
        Node::Branch { left, right, .. } => {
            out.push(WireNode {
                tag: TAG_BRANCH,
                key: None,
                value: None,
                digest: None,
            });
            push(left, out);
            push(right, out);
        }
        Node::Stub { digest } => out.push(WireNode {
            tag: TAG_STUB,
            key: None,
            value: None,
            digest: Some(*digest),
        }),
    }
}

pub(crate) fn rebuild(trie: &SerializedTrie, expected: TrieKind) -> Result<Link> {
    if trie.version != WIRE_VERSION {
        return Err(invalid(format!("unsupported wire version {}", trie.version)));
    }
    if trie.kind != expected {
        return Err(invalid(format!("expected {expected:?} trie, got {:?}", trie.kind)));
    }
    let mut decoder = Decoder {
        nodes: &trie.nodes,
        pos: 0,
        kind: expected,
    };
    let root = decoder.node(0, [0u8; 32])?;
    if decoder.pos != trie.nodes.len() {
        return Err(invalid(format!(
            "{} trailing nodes after root",
            trie.nodes.len() - decoder.pos
        )));
    }
    Ok(root)
}

fn invalid(msg: impl Into<String>) -> MptError {
    MptError::InvalidSerialization(msg.into())
}

struct Decoder<'a> {
    nodes: &'a [WireNode],
    pos: usize,
    kind: TrieKind,
}

impl<'a> Decoder<'a> {
    fn next(&mut self) -> Result<&'a WireNode> {
        let nodes: &'a [WireNode] = self.nodes;
        let wire = nodes
            .get(self.pos)
            .ok_or_else(|| invalid("node list ends inside a branch"))?;
        self.pos += 1;
        Ok(wire)
    }

    fn node(&mut self, depth: usize, prefix: Hash32) -> Result<Link> {
        let at = self.pos;
        let wire = self.next()?;
        match wire.tag {
            TAG_EMPTY => {
                fields(wire, at, false, false, false)?;
                Ok(Node::empty())
            }
            TAG_LEAF => {
                fields(wire, at, true, true, false)?;
                let raw = wire.key.as_deref().unwrap_or_default();
                let key = key_from_slice(raw).map_err(|e| invalid(format!("node {at}: {e}")))?;
                if !has_prefix(&key, &prefix, depth) {
                    return Err(invalid(format!("node {at}: leaf key off its path")));
                }
                let value = wire.value.clone().unwrap_or_default();
                Ok(Node::leaf(key, value))
            }
            TAG_BRANCH => {
                fields(wire, at, false, false, false)?;
                if depth >= KEY_BITS {
                    return Err(invalid(format!("node {at}: branch below key length")));
                }
                let left = self.node(depth + 1, with_bit(prefix, depth, false))?;
                let right = self.node(depth + 1, with_bit(prefix, depth, true))?;
                if !node::is_canonical_branch(&left, &right) {
                    return Err(invalid(format!("node {at}: non-canonical branch")));
                }
                Ok(Node::branch(left, right))
            }
            TAG_STUB => {
                if self.kind == TrieKind::Full {
                    return Err(invalid(format!("node {at}: stub in a full trie")));
                }
                fields(wire, at, false, false, true)?;
                let digest = wire.digest.unwrap_or_default();
                if digest == crypto::empty_hash() {
                    return Err(invalid(format!("node {at}: stub for an empty subtree")));
                }
                Ok(Node::stub(digest))
            }
            other => Err(invalid(format!("node {at}: unknown tag {other}"))),
        }
    }
}

/// Every tag has an exact set of fields; anything missing or extra is rejected.
fn fields(wire: &WireNode, at: usize, key: bool, value: bool, digest: bool) -> Result<()> {
    if wire.key.is_some() != key || wire.value.is_some() != value || wire.digest.is_some() != digest
    {
        return Err(invalid(format!("node {at}: fields do not match tag {}", wire.tag)));
    }
    Ok(())
}
