use std::fmt;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use k256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::OrchestratorConfig;
use crate::crypto::signature::public_key_to_address;

/// Ledger key of the singleton TEE account row.
pub const TEE_ACCOUNT_KEY: &[u8] = b"tee";

/// The TEE's on-ledger account. `nonce` is the nonce of the next signed
/// call and only ever moves forward by one per emitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeeAccount {
    pub address: Address,
    pub nonce: u64,
}

impl TeeAccount {
    pub fn new(address: Address) -> Self {
        Self { address, nonce: 0 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TeeError {
    #[error("invalid TEE private key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// A signed `set_states` call ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCall {
    pub hash: B256,
    pub nonce: u64,
    /// EIP-2718 encoding of the signed legacy transaction.
    pub raw: Bytes,
}

/// Key material held inside the enclave.
///
/// The same secp256k1 key signs outbound calls and derives the ECDH secrets
/// state owners seal their values with.
pub struct TeeKeystore {
    signer: PrivateKeySigner,
    secret: SecretKey,
    address: Address,
    chain_id: u64,
    gas_limit: u64,
    gas_price: u128,
}

impl fmt::Debug for TeeKeystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeeKeystore")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("gas_limit", &self.gas_limit)
            .field("gas_price", &self.gas_price)
            .finish_non_exhaustive()
    }
}

impl TeeKeystore {
    pub fn new(signer: PrivateKeySigner, chain_id: u64, gas_limit: u64, gas_price: u128) -> Self {
        let secret = SecretKey::from(signer.credential());
        let address = public_key_to_address(signer.credential().verifying_key());

        Self {
            signer,
            secret,
            address,
            chain_id,
            gas_limit,
            gas_price,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, TeeError> {
        let signer = match &config.tee.private_key {
            Some(key) => key
                .parse::<PrivateKeySigner>()
                .map_err(|e| TeeError::InvalidKey(e.to_string()))?,
            None => {
                warn!("no [tee] private_key configured, generating an ephemeral key");
                PrivateKeySigner::random()
            }
        };
        Ok(Self::new(
            signer,
            config.chain_id,
            config.gas_limit,
            config.gas_price,
        ))
    }

    /// Ephemeral keystore with default gas settings.
    pub fn random(chain_id: u64) -> Self {
        let defaults = OrchestratorConfig::default();
        Self::new(
            PrivateKeySigner::random(),
            chain_id,
            defaults.gas_limit,
            defaults.gas_price,
        )
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// Sign a call to `to` carrying `input` at `nonce`.
    ///
    /// Signing has no side effects; the caller owns the nonce and advances it
    /// only once the signed call is recorded.
    pub fn sign_call(&self, to: Address, input: Bytes, nonce: u64) -> Result<SignedCall, TeeError> {
        let mut tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input,
        };

        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| TeeError::Signing(e.to_string()))?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));

        Ok(SignedCall {
            hash: *envelope.tx_hash(),
            nonce,
            raw: Bytes::from(envelope.encoded_2718()),
        })
    }
}
