//! Core types for the authenticated dictionary

/// 32-byte hash
pub type Hash32 = [u8; 32];

/// Trie keys are fixed-length hashes (relationship ids, record witnesses).
pub type Key = Hash32;

/// Length in bytes of every key stored in a trie.
pub const KEY_LEN: usize = 32;

/// Number of path bits a key provides.
pub const KEY_BITS: usize = KEY_LEN * 8;
