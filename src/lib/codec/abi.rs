use alloy::primitives::{Bytes, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};

use super::CodecError;
use crate::domain::function::StateLocation;
use crate::domain::proof::ProofBundle;

sol! {
    interface IConfidentialVerifier {
        function get_states(bytes[] read) external view returns (bytes[]);

        function set_states(
            bytes[] read,
            uint256 old_states_len,
            bytes[] data,
            uint256[] proof
        ) external;
    }
}

/// Decode an ABI `bytes[]` into its elements.
pub fn decode_value_array(data: &[u8]) -> Result<Vec<Bytes>, CodecError> {
    Ok(Vec::<Bytes>::abi_decode(data)?)
}

/// Encode elements as an ABI `bytes[]`. Inverse of [`decode_value_array`].
pub fn encode_value_array(values: &[Bytes]) -> Bytes {
    Bytes::from(values.to_vec().abi_encode())
}

/// Each storage location as `abi.encode(string slot, string key)`; the key is
/// empty for scalar slots.
pub fn encode_locations(locations: &[StateLocation]) -> Vec<Bytes> {
    locations
        .iter()
        .map(|loc| {
            let key = loc.key.clone().unwrap_or_default();
            Bytes::from((loc.slot.clone(), key).abi_encode())
        })
        .collect()
}

/// Call data for `get_states(read)` on the verifier.
pub fn encode_get_states(read: &[StateLocation]) -> Bytes {
    let call = IConfidentialVerifier::get_statesCall {
        read: encode_locations(read),
    };
    Bytes::from(call.abi_encode())
}

/// Call data for `set_states(read, old_states_len, data, proof)` on the verifier.
pub fn encode_set_states(read: &[StateLocation], data: Vec<Bytes>, proof: &ProofBundle) -> Bytes {
    let call = IConfidentialVerifier::set_statesCall {
        read: encode_locations(read),
        old_states_len: U256::from(read.len()),
        data,
        proof: proof.to_words(),
    };
    Bytes::from(call.abi_encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    fn locations() -> Vec<StateLocation> {
        vec![
            StateLocation {
                slot: "balances".to_string(),
                key: Some("0xAA".to_string()),
            },
            StateLocation {
                slot: "total_transfers".to_string(),
                key: None,
            },
        ]
    }

    #[test]
    fn test_value_array_preserves_order_and_empties() {
        let values = vec![Bytes::from_static(b"first"), Bytes::new(), Bytes::from_static(b"third")];
        let decoded = decode_value_array(&encode_value_array(&values)).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            decode_value_array(&[0x01, 0x02, 0x03]),
            Err(CodecError::Abi(_))
        ));
    }

    #[test]
    fn test_get_states_selector() {
        let data = encode_get_states(&locations());
        assert_eq!(&data[..4], IConfidentialVerifier::get_statesCall::SELECTOR.as_slice());
    }

    #[test]
    fn test_set_states_carries_proof_and_len() {
        let proof = ProofBundle {
            code_hash: B256::repeat_byte(0x01),
            policy_digest: B256::repeat_byte(0x02),
            old_states_digest: B256::repeat_byte(0x03),
        };
        let data = encode_set_states(&locations(), vec![Bytes::from_static(b"x")], &proof);

        let decoded = IConfidentialVerifier::set_statesCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.old_states_len, U256::from(2));
        assert_eq!(decoded.proof, proof.to_words());
        assert_eq!(decoded.data, vec![Bytes::from_static(b"x")]);
        assert_eq!(decoded.read.len(), 2);
    }
}
