//! Signatures over digests (ed25519)

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use mpt::Hash32;

pub fn sign(digest: &Hash32, key: &SigningKey) -> Vec<u8> {
    key.sign(digest).to_bytes().to_vec()
}

/// `false` for malformed signature bytes as well as for bad signatures.
pub fn verify(digest: &Hash32, signature: &[u8], key: &VerifyingKey) -> bool {
    let sig = match Signature::from_slice(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    key.verify(digest, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_sign_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let digest = mpt::hash_bytes(b"root");
        let sig = sign(&digest, &key);
        assert!(verify(&digest, &sig, &key.verifying_key()));
    }

    #[test]
    fn test_rejects_other_digest_key_and_garbage() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let digest = mpt::hash_bytes(b"root");
        let sig = sign(&digest, &key);

        assert!(!verify(&mpt::hash_bytes(b"other"), &sig, &key.verifying_key()));
        assert!(!verify(&digest, &sig, &other.verifying_key()));
        assert!(!verify(&digest, &sig[..10], &key.verifying_key()));

        let mut flipped = sig.clone();
        flipped[0] ^= 0x01;
        assert!(!verify(&digest, &flipped, &key.verifying_key()));
    }
}
