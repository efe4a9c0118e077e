//! Authenticated sets: dictionaries whose keys are record witnesses and
//! whose values are a fixed membership marker.

use crate::{Hash32, MptDictionaryFull, MptDictionaryPartial, Result};

const MEMBER: &[u8] = &[0x01];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MptSetFull {
    dict: MptDictionaryFull,
}

impl MptSetFull {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_witnesses<I: IntoIterator<Item = Hash32>>(witnesses: I) -> Result<Self> {
        let mut set = Self::new();
        for w in witnesses {
            set.insert(w)?;
        }
        Ok(set)
    }

    /// Returns `false` if the witness was already a member.
    pub fn insert(&mut self, witness: Hash32) -> Result<bool> {
        if self.dict.contains(&witness) {
            return Ok(false);
        }
        self.dict.insert(witness, MEMBER)?;
        Ok(true)
    }

    /// Returns `false` if the witness was not a member.
    pub fn delete(&mut self, witness: &Hash32) -> Result<bool> {
        self.dict.delete(witness)
    }

    pub fn contains(&self, witness: &Hash32) -> bool {
        self.dict.contains(witness)
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    pub fn commitment(&self) -> Hash32 {
        self.dict.commitment()
    }

    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn witnesses(&self) -> Vec<Hash32> {
        self.dict.entries().into_iter().map(|(k, _)| k).collect()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.dict.serialize()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            dict: MptDictionaryFull::deserialize(bytes)?,
        })
    }
}

/// Membership proof for a handful of witnesses.
#[derive(Clone, Debug)]
pub struct MptSetPartial {
    dict: MptDictionaryPartial,
}

impl MptSetPartial {
    pub fn from_full(set: &MptSetFull, witnesses: &[Hash32]) -> Self {
        Self {
            dict: MptDictionaryPartial::from_full(&set.dict, witnesses),
        }
    }

    /// Authenticated membership test; fails if the proof does not cover it.
    pub fn contains(&self, witness: &Hash32) -> Result<bool> {
        Ok(self.dict.get(witness)?.is_some())
    }

    pub fn commitment(&self) -> Hash32 {
        self.dict.commitment()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.dict.serialize()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            dict: MptDictionaryPartial::deserialize(bytes)?,
        })
    }
}
