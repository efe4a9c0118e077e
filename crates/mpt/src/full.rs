use crate::node::{self, Link, Node};
use crate::serialization::{self, SerializedTrie, TrieKind};
use crate::{Hash32, Result};

/// Server-side authenticated dictionary holding the complete mapping.
///
/// Cloning is O(1) and yields an independent snapshot: nodes are shared but
/// never modified in place, so mutating either copy leaves the other intact.
#[derive(Clone, Debug)]
pub struct MptDictionaryFull {
    pub(crate) root: Link,
    len: usize,
}

impl MptDictionaryFull {
    pub fn new() -> Self {
        Self {
            root: Node::empty(),
            len: 0,
        }
    }

    /// Build a dictionary from (key, value) pairs; later duplicates win.
    pub fn from_entries<I, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Hash32, V)>,
        V: Into<Vec<u8>>,
    {
        let mut dict = Self::new();
        for (key, value) in entries {
            dict.insert(key, value)?;
        }
        Ok(dict)
    }

    /// Insert or overwrite a mapping
    pub fn insert(&mut self, key: Hash32, value: impl Into<Vec<u8>>) -> Result<()> {
        let is_new = self.get(&key).is_none();
        self.root = node::insert(&self.root, key, value.into(), 0)?;
        if is_new {
            self.len += 1;
        }
        Ok(())
    }

    /// Remove a mapping. Returns `false` if the key was absent.
    pub fn delete(&mut self, key: &Hash32) -> Result<bool> {
        match node::delete(&self.root, key, 0)? {
            Some(root) => {
                self.root = root;
                self.len -= 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unauthenticated lookup
    pub fn get(&self, key: &Hash32) -> Option<&[u8]> {
        // full tries never hold stubs, so the walk cannot fail
        node::get(&self.root, key, 0).ok().flatten()
    }

    pub fn contains(&self, key: &Hash32) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Root digest
    pub fn commitment(&self) -> Hash32 {
        self.root.digest()
    }

    /// Immutable copy of the current version.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// All mappings in key order
    pub fn entries(&self) -> Vec<(Hash32, Vec<u8>)> {
        let mut out = Vec::with_capacity(self.len);
        node::collect(&self.root, &mut out);
        out
    }

    pub fn to_wire(&self) -> SerializedTrie {
        serialization::flatten(&self.root, TrieKind::Full)
    }

    pub fn from_wire(trie: &SerializedTrie) -> Result<Self> {
        let root = serialization::rebuild(trie, TrieKind::Full)?;
        let mut entries = Vec::new();
        node::collect(&root, &mut entries);
        Ok(Self {
            root,
            len: entries.len(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.to_wire().to_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Self::from_wire(&SerializedTrie::from_bytes(bytes)?)
    }
}

impl Default for MptDictionaryFull {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for MptDictionaryFull {
    fn eq(&self, other: &Self) -> bool {
        self.commitment() == other.commitment()
    }
}

impl Eq for MptDictionaryFull {}
