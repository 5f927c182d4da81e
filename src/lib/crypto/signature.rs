use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Offset between the curve recovery id (0 or 1) and the `v` value carried
/// in signed payloads.
pub const RECOVERY_ID_OFFSET: u8 = 27;

/// Recoverable secp256k1 signature in Ethereum `(v, r, s)` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverableSignature {
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid signature: {0}")]
    InvalidSignature(&'static str),

    #[error("signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch { expected: Address, recovered: Address },

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Map a wire `v` value to the curve recovery id. Only 27 and 28 are accepted.
pub fn to_recovery_id(v: u8) -> Result<RecoveryId, SignatureError> {
    v.checked_sub(RECOVERY_ID_OFFSET)
        .filter(|id| *id <= 1)
        .and_then(RecoveryId::from_byte)
        .ok_or(SignatureError::InvalidSignature("recovery indicator out of range"))
}

/// Map a curve recovery id back to its wire `v` value.
pub fn from_recovery_id(id: RecoveryId) -> u8 {
    id.to_byte() + RECOVERY_ID_OFFSET
}

/// Ethereum address of a secp256k1 public key: last 20 bytes of
/// keccak256 over the uncompressed point without its tag byte.
pub fn public_key_to_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the signer address of `hash` from a recoverable signature.
///
/// Fails on an out-of-range `v`, zero or out-of-range scalars, high-s
/// signatures, and points that do not recover. There is no fallback identity.
pub fn recover_signer(hash: B256, sig: &RecoverableSignature) -> Result<Address, SignatureError> {
    let recovery_id = to_recovery_id(sig.v)?;

    let mut raw = [0u8; 64];
    raw[..32].copy_from_slice(sig.r.as_slice());
    raw[32..].copy_from_slice(sig.s.as_slice());
    let signature = Signature::from_slice(&raw)
        .map_err(|_| SignatureError::InvalidSignature("malformed scalar"))?;

    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
        .map_err(|_| SignatureError::InvalidSignature("public key recovery failed"))?;

    Ok(public_key_to_address(&key))
}

/// Recover the signer and check it against `expected`.
pub fn verify(
    hash: B256,
    sig: &RecoverableSignature,
    expected: Address,
) -> Result<(), SignatureError> {
    let recovered = recover_signer(hash, sig)?;
    if recovered != expected {
        return Err(SignatureError::SignerMismatch {
            expected,
            recovered,
        });
    }
    Ok(())
}

/// Sign a 32-byte prehash, producing the `(v, r, s)` encoding accepted by
/// [`recover_signer`].
pub fn sign_hash(key: &SigningKey, hash: B256) -> Result<RecoverableSignature, SignatureError> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash.as_slice())
        .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
    let bytes = signature.to_bytes();

    Ok(RecoverableSignature {
        v: from_recovery_id(recovery_id),
        r: B256::from_slice(&bytes[..32]),
        s: B256::from_slice(&bytes[32..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_recover_matches_signing_key() {
        let key = test_key(0x11);
        let hash = keccak256(b"confidential call");
        let sig = sign_hash(&key, hash).unwrap();

        let recovered = recover_signer(hash, &sig).unwrap();
        assert_eq!(recovered, public_key_to_address(key.verifying_key()));
    }

    #[test]
    fn test_verify_against_recovered_address() {
        let key = test_key(0x22);
        let hash = keccak256(b"payload");
        let sig = sign_hash(&key, hash).unwrap();

        let recovered = recover_signer(hash, &sig).unwrap();
        assert!(verify(hash, &sig, recovered).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_address() {
        let key = test_key(0x22);
        let hash = keccak256(b"payload");
        let sig = sign_hash(&key, hash).unwrap();

        let result = verify(hash, &sig, Address::repeat_byte(0x01));
        assert!(matches!(result, Err(SignatureError::SignerMismatch { .. })));
    }

    #[test]
    fn test_sign_hash_uses_offset_v() {
        let key = test_key(0x33);
        for msg in [b"a".as_slice(), b"b", b"c", b"d"] {
            let sig = sign_hash(&key, keccak256(msg)).unwrap();
            assert!(sig.v == 27 || sig.v == 28);
        }
    }

    #[test]
    fn test_out_of_range_v_rejected() {
        let key = test_key(0x44);
        let hash = keccak256(b"payload");
        let sig = sign_hash(&key, hash).unwrap();

        for v in [0u8, 1, 26, 29, 35, 36, 255] {
            let bad = RecoverableSignature { v, ..sig };
            assert!(matches!(
                recover_signer(hash, &bad),
                Err(SignatureError::InvalidSignature(_))
            ));
        }
    }

    #[test]
    fn test_zero_scalar_rejected() {
        let sig = RecoverableSignature {
            v: 27,
            r: B256::ZERO,
            s: B256::repeat_byte(0x01),
        };
        let result = recover_signer(keccak256(b"x"), &sig);
        assert!(matches!(result, Err(SignatureError::InvalidSignature(_))));
    }

    #[test]
    fn test_tampered_hash_recovers_different_signer() {
        let key = test_key(0x55);
        let sig = sign_hash(&key, keccak256(b"original")).unwrap();

        let recovered = recover_signer(keccak256(b"tampered"), &sig);
        // Either recovery fails or yields a different identity, never the signer.
        if let Ok(address) = recovered {
            assert_ne!(address, public_key_to_address(key.verifying_key()));
        }
    }

    #[test]
    fn test_recovery_id_conversions() {
        for id in [0u8, 1] {
            let recovery_id = RecoveryId::from_byte(id).unwrap();
            let v = from_recovery_id(recovery_id);
            assert_eq!(v, id + RECOVERY_ID_OFFSET);
            assert_eq!(to_recovery_id(v).unwrap(), recovery_id);
        }
    }
}
