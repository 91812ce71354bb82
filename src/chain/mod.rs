//! Transaction broadcast
//!
//! The custody core only needs one capability from the chain: take a signed
//! transaction, broadcast it, and wait for confirmation. [`RpcBroadcaster`]
//! does this against a Solana JSON-RPC endpoint.

mod rpc;

use async_trait::async_trait;
use ed25519_dalek::Signature;

use crate::types::CustodyError;

pub use rpc::RpcBroadcaster;

/// Errors from broadcasting a signed transaction.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("transaction {0} not confirmed in time")]
    ConfirmationTimeout(String),
}

impl From<BroadcastError> for CustodyError {
    fn from(err: BroadcastError) -> Self {
        match err {
            BroadcastError::ConfirmationTimeout(_) => Self::ConfirmationTimeout(err.to_string()),
            other => Self::Broadcast(other.to_string()),
        }
    }
}

/// Broadcast-and-confirm capability of a blockchain client.
#[async_trait]
pub trait TransactionBroadcaster: Send + Sync {
    /// Submit a fully signed transaction and wait until it is confirmed.
    ///
    /// Returns the confirmation identifier (the transaction signature).
    async fn broadcast_and_confirm(&self, signed_tx: &[u8]) -> Result<String, BroadcastError>;
}

/// Wire form of a single-signer Solana transaction:
/// compact-u16 signature count (1), the signature, then the message.
pub fn assemble_transaction(signature: &Signature, message: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(1 + Signature::BYTE_SIZE + message.len());
    wire.push(1);
    wire.extend_from_slice(&signature.to_bytes());
    wire.extend_from_slice(message);
    wire
}
