//! Merkle Prefix Trie
//!
//! Authenticated dictionaries and sets over a binary hash trie. A full
//! dictionary commits its whole mapping to one 32-byte root; a partial
//! dictionary holds just the paths to a few keys and can recompute that
//! same root, which is what makes it a proof.

mod crypto;
mod full;
mod node;
mod partial;
mod path;
mod serialization;
mod set;
mod types;

pub use crypto::{empty_hash, hash_branch, hash_bytes, hash_leaf};
pub use full::MptDictionaryFull;
pub use partial::MptDictionaryPartial;
pub use path::{bit_at, common_prefix_bits, key_from_slice};
pub use serialization::{SerializedTrie, TrieKind, WireNode, WIRE_VERSION};
pub use set::{MptSetFull, MptSetPartial};
pub use types::{Hash32, Key, KEY_BITS, KEY_LEN};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MptError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Insufficient authentication data for key {0}")]
    InsufficientAuthenticationData(String),

    #[error("Invalid serialization: {0}")]
    InvalidSerialization(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),
}

pub type Result<T> = std::result::Result<T, MptError>;
