//! Key -> path codec. A key is read as a sequence of bits, most significant
//! bit of byte 0 first; bit `d` picks the child at depth `d` (0 = left).

use crate::{Hash32, MptError, Result, KEY_BITS, KEY_LEN};

/// Bit of `key` consumed at `depth`. `true` means "go right".
pub fn bit_at(key: &Hash32, depth: usize) -> bool {
    debug_assert!(depth < KEY_BITS);
    (key[depth / 8] >> (7 - depth % 8)) & 1 == 1
}

/// Number of leading bits shared by `a` and `b` (KEY_BITS when equal).
pub fn common_prefix_bits(a: &Hash32, b: &Hash32) -> usize {
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = x ^ y;
        if diff != 0 {
            return i * 8 + diff.leading_zeros() as usize;
        }
    }
    KEY_BITS
}

/// Whether the first `depth` bits of `key` equal those of `prefix`.
pub fn has_prefix(key: &Hash32, prefix: &Hash32, depth: usize) -> bool {
    common_prefix_bits(key, prefix) >= depth
}

/// Set bit `depth` of `prefix` (used while walking a trie to track the path).
pub fn with_bit(mut prefix: Hash32, depth: usize, bit: bool) -> Hash32 {
    let mask = 1u8 << (7 - depth % 8);
    if bit {
        prefix[depth / 8] |= mask;
    } else {
        prefix[depth / 8] &= !mask;
    }
    prefix
}

/// Convert an untrusted byte string into a key, enforcing the key length.
pub fn key_from_slice(bytes: &[u8]) -> Result<Hash32> {
    bytes.try_into().map_err(|_| {
        MptError::MalformedInput(format!(
            "key must be {KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_order_is_msb_first() {
        let mut key = [0u8; 32];
        key[0] = 0b1000_0000;
        key[1] = 0b0000_0001;
        assert!(bit_at(&key, 0));
        assert!(!bit_at(&key, 1));
        assert!(bit_at(&key, 15));
        assert!(!bit_at(&key, 8));
    }

    #[test]
    fn test_common_prefix() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        assert_eq!(common_prefix_bits(&a, &b), KEY_BITS);
        b[2] = 0b0010_0000;
        assert_eq!(common_prefix_bits(&a, &b), 18);
        assert!(has_prefix(&a, &b, 18));
        assert!(!has_prefix(&a, &b, 19));
    }

    #[test]
    fn test_with_bit_roundtrip() {
        let p = with_bit([0u8; 32], 10, true);
        assert!(bit_at(&p, 10));
        let p = with_bit(p, 10, false);
        assert_eq!(p, [0u8; 32]);
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(key_from_slice(&[1u8; 32]).is_ok());
        assert!(matches!(
            key_from_slice(&[1u8; 31]),
            Err(MptError::MalformedInput(_))
        ));
    }
}
