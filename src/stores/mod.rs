//! Share and custody-record persistence.
//!
//! The two share stores are independent: nothing here spans both, and the
//! router treats every write as its own operation. Backends:
//!
//! - [`MongoShareStore`] / [`MongoCustodyRecordStore`] for deployments
//! - [`MemoryShareStore`] / [`MemoryCustodyRecordStore`] for tests and local runs

mod memory;
mod mongo;

use async_trait::async_trait;

use crate::custodial_keys::{CipherError, CustodyRecord, EncryptedShare};

pub use memory::{MemoryCustodyRecordStore, MemoryShareStore};
pub use mongo::{MongoCustodyRecordStore, MongoShareStore};

/// Errors from a single store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("slot {slot} already occupied")]
    Conflict { slot: u8 },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// An encrypted share together with the slot it occupies.
///
/// `share` is `Err` when the stored encoding cannot be parsed; the slot is
/// still reported so the reader can count it as a decryption failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredShare {
    pub slot: u8,
    pub share: Result<EncryptedShare, CipherError>,
}

/// One share store (Store A or Store B).
///
/// `put` is create-only: writing an occupied slot fails with
/// [`StoreError::Conflict`]. `delete` only removes a slot that still holds
/// the given share, so a provisioning attempt can roll back every slot it
/// may have written (including writes whose acknowledgement was lost)
/// without touching another attempt's shares.
#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Persist one encrypted share in `slot` for `user_id`.
    async fn put(&self, user_id: &str, slot: u8, share: &EncryptedShare)
        -> Result<(), StoreError>;

    /// All shares this store holds for `user_id`; empty if none.
    async fn get(&self, user_id: &str) -> Result<Vec<StoredShare>, StoreError>;

    /// Remove `slot` if it holds exactly `share` (provisioning rollback).
    /// Returns whether a share was removed.
    async fn delete(
        &self,
        user_id: &str,
        slot: u8,
        share: &EncryptedShare,
    ) -> Result<bool, StoreError>;
}

/// Storage for custody records (public key and share locations).
#[async_trait]
pub trait CustodyRecordStore: Send + Sync {
    /// Insert if no record exists for the user. Returns `false` if one does.
    async fn insert(&self, record: &CustodyRecord) -> Result<bool, StoreError>;

    /// Look up the record for `user_id`.
    async fn get(&self, user_id: &str) -> Result<Option<CustodyRecord>, StoreError>;
}
