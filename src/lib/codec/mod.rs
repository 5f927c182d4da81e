pub mod abi;
pub mod envelope;

use crate::crypto::signature::SignatureError;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("RLP decode error: {0}")]
    Rlp(#[from] alloy_rlp::Error),

    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),

    #[error("envelope target must be 20 (contract) or 32 (digest) bytes, got {0}")]
    InvalidTarget(usize),

    #[error("JSON body error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI decode error: {0}")]
    Abi(#[from] alloy::sol_types::Error),

    #[error("envelope signing failed: {0}")]
    Signing(#[from] SignatureError),
}
