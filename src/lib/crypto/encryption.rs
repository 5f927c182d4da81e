use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use k256::{PublicKey, SecretKey};
use rand::Rng;
use sha2::Sha256;

/// Domain separator for HKDF key derivation.
const HKDF_INFO: &[u8] = b"tee-mpt-state-sealing-v1";

/// Length of the random nonce prefixed to every sealed value.
pub const NONCE_LEN: usize = 12;

/// Errors that can occur while sealing or opening a state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionError {
    #[error("key derivation failed")]
    KeyDerivationFailed,
    #[error("cipher initialization failed")]
    CipherInitFailed,
    #[error("sealed value shorter than its nonce")]
    Truncated,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed (wrong key or corrupted data)")]
    DecryptionFailed,
}

/// Derive the symmetric key shared between `secret` and `peer`.
///
/// ECDH is symmetric, so the TEE (with its secret and the owner's public key)
/// and the owner (with its secret and the TEE's public key) derive the same key.
fn shared_key(secret: &SecretKey, peer: &PublicKey) -> Result<[u8; 32], EncryptionError> {
    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let hkdf = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|_| EncryptionError::KeyDerivationFailed)?;
    Ok(key)
}

/// Seal `plaintext` for `peer`. Output layout: `nonce || ciphertext`.
pub fn seal(
    secret: &SecretKey,
    peer: &PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let key = shared_key(secret, peer)?;
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).map_err(|_| EncryptionError::CipherInitFailed)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a value produced by [`seal`] on the other side of the key exchange.
pub fn open(
    secret: &SecretKey,
    peer: &PublicKey,
    sealed: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if sealed.len() < NONCE_LEN {
        return Err(EncryptionError::Truncated);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

    let key = shared_key(secret, peer)?;
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).map_err(|_| EncryptionError::CipherInitFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| EncryptionError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (SecretKey, PublicKey) {
        let secret = SecretKey::random(&mut rand::thread_rng());
        let public = secret.public_key();
        (secret, public)
    }

    #[test]
    fn test_owner_opens_value_sealed_by_tee() {
        let (tee_sk, tee_pk) = keypair();
        let (owner_sk, owner_pk) = keypair();

        let sealed = seal(&tee_sk, &owner_pk, b"balance=100").unwrap();
        let opened = open(&owner_sk, &tee_pk, &sealed).unwrap();

        assert_eq!(opened, b"balance=100");
    }

    #[test]
    fn test_tee_opens_value_sealed_by_owner() {
        let (tee_sk, tee_pk) = keypair();
        let (owner_sk, owner_pk) = keypair();

        let sealed = seal(&owner_sk, &tee_pk, b"42").unwrap();
        assert_eq!(open(&tee_sk, &owner_pk, &sealed).unwrap(), b"42");
    }

    #[test]
    fn test_wrong_key_fails() {
        let (tee_sk, _) = keypair();
        let (_, owner_pk) = keypair();
        let (other_sk, other_pk) = keypair();

        let sealed = seal(&tee_sk, &owner_pk, b"secret").unwrap();
        assert_eq!(
            open(&other_sk, &other_pk, &sealed),
            Err(EncryptionError::DecryptionFailed)
        );
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let (tee_sk, _) = keypair();
        let (_, owner_pk) = keypair();

        let a = seal(&tee_sk, &owner_pk, b"same").unwrap();
        let b = seal(&tee_sk, &owner_pk, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let (tee_sk, _) = keypair();
        let (_, owner_pk) = keypair();
        assert_eq!(
            open(&tee_sk, &owner_pk, &[0u8; 5]),
            Err(EncryptionError::Truncated)
        );
    }
}
