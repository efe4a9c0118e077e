//! Domain-separated hashing for trie nodes

use crate::Hash32;

const DOMAIN_LEAF: u8 = 0x00;
const DOMAIN_BRANCH: u8 = 0x01;
const DOMAIN_EMPTY: u8 = 0x02;

/// Plain blake3 of arbitrary bytes (used to derive keys and witnesses)
pub fn hash_bytes(data: &[u8]) -> Hash32 {
    blake3::hash(data).into()
}

/// Leaf hash binds the full key and the stored value.
/// leaf = H(0x00 || key || len(value) as u64 LE || value)
pub fn hash_leaf(key: &Hash32, value: &[u8]) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[DOMAIN_LEAF]);
    hasher.update(key);
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value);
    hasher.finalize().into()
}

/// Branch node hash
/// node = H(0x01 || left || right)
pub fn hash_branch(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut data = [0u8; 1 + 32 + 32];
    data[0] = DOMAIN_BRANCH;
    data[1..33].copy_from_slice(left);
    data[33..].copy_from_slice(right);
    blake3::hash(&data).into()
}

/// Canonical digest of an empty subtree
pub fn empty_hash() -> Hash32 {
    blake3::hash(&[DOMAIN_EMPTY]).into()
}
