use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use k256::ecdsa::SigningKey;

use super::CodecError;
use crate::crypto::signature::{recover_signer, sign_hash, RecoverableSignature, SignatureError};
use crate::domain::submission::{FunctionCall, PolicyRegistration, Submission};

/// Signed, self-certifying inbound payload: `rlp([nonce, to, data, v, r, s])`.
///
/// `to` is a 20-byte contract address for opening submissions and policy
/// registrations, or a 32-byte target digest for joining submissions.
/// `data` is the JSON body. The signer is always recovered from `(v, r, s)`;
/// there is no claimed sender field.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct SignedEnvelope {
    pub nonce: u64,
    pub to: Bytes,
    pub data: Bytes,
    pub v: u8,
    pub r: U256,
    pub s: U256,
}

fn signing_hash(nonce: u64, to: &Bytes, data: &Bytes) -> B256 {
    let payload_length = nonce.length() + to.length() + data.length();
    let mut out = Vec::with_capacity(payload_length + 8);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    nonce.encode(&mut out);
    to.encode(&mut out);
    data.encode(&mut out);
    keccak256(&out)
}

impl SignedEnvelope {
    /// Decode a raw envelope. Trailing bytes are rejected.
    pub fn decode_raw(raw: &[u8]) -> Result<Self, CodecError> {
        let mut buf = raw;
        let envelope = Self::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(CodecError::TrailingBytes(buf.len()));
        }
        Ok(envelope)
    }

    pub fn encode_raw(&self) -> Bytes {
        Bytes::from(alloy_rlp::encode(self))
    }

    /// Sign `(nonce, to, data)` with `key`.
    pub fn sign(nonce: u64, to: Bytes, data: Bytes, key: &SigningKey) -> Result<Self, CodecError> {
        let sig = sign_hash(key, signing_hash(nonce, &to, &data))?;
        Ok(Self {
            nonce,
            to,
            data,
            v: sig.v,
            r: U256::from_be_bytes(sig.r.0),
            s: U256::from_be_bytes(sig.s.0),
        })
    }

    /// Envelope opening a new transaction on `contract`.
    pub fn open(
        nonce: u64,
        contract: Address,
        call: &FunctionCall,
        key: &SigningKey,
    ) -> Result<Self, CodecError> {
        let data = serde_json::to_vec(call)?;
        Self::sign(nonce, Bytes::copy_from_slice(contract.as_slice()), data.into(), key)
    }

    /// Envelope contributing arguments to the transaction at `target`.
    pub fn join(
        nonce: u64,
        target: B256,
        call: &FunctionCall,
        key: &SigningKey,
    ) -> Result<Self, CodecError> {
        let data = serde_json::to_vec(call)?;
        Self::sign(nonce, Bytes::copy_from_slice(target.as_slice()), data.into(), key)
    }

    /// Envelope registering a policy for `contract`.
    pub fn register(
        nonce: u64,
        contract: Address,
        registration: &PolicyRegistration,
        key: &SigningKey,
    ) -> Result<Self, CodecError> {
        let data = serde_json::to_vec(registration)?;
        Self::sign(nonce, Bytes::copy_from_slice(contract.as_slice()), data.into(), key)
    }

    /// Content hash over `(nonce, to, data)`; the message the signature covers.
    pub fn signing_hash(&self) -> B256 {
        signing_hash(self.nonce, &self.to, &self.data)
    }

    pub fn signature(&self) -> RecoverableSignature {
        RecoverableSignature {
            v: self.v,
            r: B256::from(self.r.to_be_bytes::<32>()),
            s: B256::from(self.s.to_be_bytes::<32>()),
        }
    }

    /// Recover the signer from the envelope's own signature.
    pub fn sender(&self) -> Result<Address, SignatureError> {
        recover_signer(self.signing_hash(), &self.signature())
    }

    /// Decode the body as a party submission; the shape follows `to`'s width.
    pub fn submission(&self) -> Result<Submission, CodecError> {
        let call: FunctionCall = serde_json::from_slice(&self.data)?;
        match self.to.len() {
            20 => Ok(Submission::Open {
                contract: Address::from_slice(&self.to),
                nonce: self.nonce,
                call,
            }),
            32 => Ok(Submission::Join {
                target: B256::from_slice(&self.to),
                call,
            }),
            n => Err(CodecError::InvalidTarget(n)),
        }
    }

    /// Decode the body as a policy registration for the contract in `to`.
    pub fn policy_registration(&self) -> Result<(Address, PolicyRegistration), CodecError> {
        if self.to.len() != 20 {
            return Err(CodecError::InvalidTarget(self.to.len()));
        }
        let registration: PolicyRegistration = serde_json::from_slice(&self.data)?;
        Ok((Address::from_slice(&self.to), registration))
    }
}
