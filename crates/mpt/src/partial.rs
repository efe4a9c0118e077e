use crate::node::{self, Link};
use crate::serialization::{self, SerializedTrie, TrieKind};
use crate::{Hash32, MptDictionaryFull, MptError, Result};

/// Client-side view of a dictionary: the paths to a set of keys plus the
/// digests of every subtree hanging off those paths.
///
/// The root digest is recomputed from what the proof contains, so a holder
/// can check it against a root obtained elsewhere without trusting the
/// party that built the proof. Lookups that leave the revealed paths fail
/// with [`MptError::InsufficientAuthenticationData`]; missing data is never
/// reported as a missing key.
#[derive(Clone, Debug)]
pub struct MptDictionaryPartial {
    root: Link,
}

impl MptDictionaryPartial {
    /// Extract a proof for `keys` from `full`.
    pub fn from_full(full: &MptDictionaryFull, keys: &[Hash32]) -> Self {
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();
        Self {
            root: node::prune(&full.root, &keys, 0),
        }
    }

    /// Authenticated lookup.
    ///
    /// `Ok(None)` means the proof shows the key is absent.
    pub fn get(&self, key: &Hash32) -> Result<Option<&[u8]>> {
        node::get(&self.root, key, 0)
    }

    /// Update a mapping whose path the proof covers, e.g. to predict the
    /// root that results from a pending change.
    pub fn insert(&mut self, key: Hash32, value: impl Into<Vec<u8>>) -> Result<()> {
        self.root = node::insert(&self.root, key, value.into(), 0)?;
        Ok(())
    }

    /// Remove a mapping whose path (and the shape around it) the proof covers.
    pub fn delete(&mut self, key: &Hash32) -> Result<bool> {
        match node::delete(&self.root, key, 0)? {
            Some(root) => {
                self.root = root;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Root digest recomputed from the proof alone
    pub fn commitment(&self) -> Hash32 {
        self.root.digest()
    }

    /// Check the proof against a trusted root and an expected mapping.
    /// `expected == None` asserts the key is absent.
    pub fn verify(&self, trusted_root: &Hash32, key: &Hash32, expected: Option<&[u8]>) -> Result<()> {
        let root = self.commitment();
        if root != *trusted_root {
            return Err(MptError::VerificationFailed(format!(
                "proof root {} does not match trusted root {}",
                hex::encode(root),
                hex::encode(trusted_root)
            )));
        }
        let found = self.get(key)?;
        if found != expected {
            return Err(MptError::VerificationFailed(format!(
                "value for key {} does not match",
                hex::encode(key)
            )));
        }
        Ok(())
    }

    /// Keys whose leaves the proof reveals
    pub fn revealed_keys(&self) -> Vec<Hash32> {
        let mut out = Vec::new();
        node::collect(&self.root, &mut out);
        out.into_iter().map(|(k, _)| k).collect()
    }

    pub fn to_wire(&self) -> SerializedTrie {
        serialization::flatten(&self.root, TrieKind::Partial)
    }

    pub fn from_wire(trie: &SerializedTrie) -> Result<Self> {
        Ok(Self {
            root: serialization::rebuild(trie, TrieKind::Partial)?,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.to_wire().to_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Self::from_wire(&SerializedTrie::from_bytes(bytes)?)
    }
}
