//! In-memory stores backed by `DashMap`.
//!
//! Used by the test suite and for running without MongoDB. Shares are kept
//! in their encoded `hex(iv):hex(ct)` form, as the Mongo backend keeps them.
//! The share store can simulate an outage, slow reads, slow write
//! acknowledgements, failed writes and bit rot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::custodial_keys::{CustodyRecord, EncryptedShare};

use super::{CustodyRecordStore, ShareStore, StoreError, StoredShare};

// =============================================================================
// Share Store
// =============================================================================

/// In-memory share store with fault injection.
#[derive(Default)]
pub struct MemoryShareStore {
    shares: DashMap<String, BTreeMap<u8, String>>,
    unreachable: AtomicBool,
    reject_writes: AtomicBool,
    delay_ms: AtomicU64,
    ack_delay_ms: AtomicU64,
}

impl MemoryShareStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the network were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make `put` fail while reads keep working.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Delay every read by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Commit every `put` immediately but acknowledge it only after `delay`.
    pub fn set_ack_delay(&self, delay: Duration) {
        self.ack_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Flip one ciphertext byte of a stored share. Returns false if absent.
    pub fn corrupt(&self, user_id: &str, slot: u8) -> bool {
        let Some(mut user) = self.shares.get_mut(user_id) else {
            return false;
        };
        let Some(encoded) = user.get_mut(&slot) else {
            return false;
        };
        match EncryptedShare::decode(encoded) {
            Ok(mut share) if !share.ciphertext.is_empty() => {
                share.ciphertext[0] ^= 0x01;
                *encoded = share.encode();
                true
            }
            _ => false,
        }
    }

    /// Overwrite a slot with raw encoded content, bypassing create-only writes.
    pub fn overwrite(&self, user_id: &str, slot: u8, encoded: &str) {
        self.shares
            .entry(user_id.to_string())
            .or_default()
            .insert(slot, encoded.to_string());
    }

    /// Number of shares held for `user_id`.
    pub fn share_count(&self, user_id: &str) -> usize {
        self.shares.get(user_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Slots held for `user_id`, ascending.
    pub fn slots(&self, user_id: &str) -> Vec<u8> {
        self.shares
            .get(user_id)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default()
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("simulated outage".into()));
        }
        Ok(())
    }

    async fn pause(millis: &AtomicU64) {
        let delay = millis.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl ShareStore for MemoryShareStore {
    async fn put(
        &self,
        user_id: &str,
        slot: u8,
        share: &EncryptedShare,
    ) -> Result<(), StoreError> {
        self.check_reachable()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated write failure".into()));
        }

        {
            let mut user = self.shares.entry(user_id.to_string()).or_default();
            if user.contains_key(&slot) {
                return Err(StoreError::Conflict { slot });
            }
            user.insert(slot, share.encode());
        }

        Self::pause(&self.ack_delay_ms).await;
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Vec<StoredShare>, StoreError> {
        Self::pause(&self.delay_ms).await;
        self.check_reachable()?;

        Ok(self
            .shares
            .get(user_id)
            .map(|user| {
                user.iter()
                    .map(|(&slot, encoded)| StoredShare {
                        slot,
                        share: EncryptedShare::decode(encoded),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(
        &self,
        user_id: &str,
        slot: u8,
        share: &EncryptedShare,
    ) -> Result<bool, StoreError> {
        self.check_reachable()?;

        let Some(mut user) = self.shares.get_mut(user_id) else {
            return Ok(false);
        };
        let removed = match user.get(&slot) {
            Some(encoded) if *encoded == share.encode() => user.remove(&slot).is_some(),
            _ => false,
        };
        let now_empty = user.is_empty();
        drop(user);

        if now_empty {
            self.shares.remove_if(user_id, |_, v| v.is_empty());
        }
        Ok(removed)
    }
}

// =============================================================================
// Custody Record Store
// =============================================================================

/// In-memory custody record store.
#[derive(Default)]
pub struct MemoryCustodyRecordStore {
    records: DashMap<String, CustodyRecord>,
    unreachable: AtomicBool,
    stale_reads: AtomicBool,
}

impl MemoryCustodyRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the network were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make `get` answer "absent" as a lagging replica would, while `insert`
    /// still sees every record.
    pub fn set_stale_reads(&self, stale: bool) {
        self.stale_reads.store(stale, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CustodyRecordStore for MemoryCustodyRecordStore {
    async fn insert(&self, record: &CustodyRecord) -> Result<bool, StoreError> {
        self.check_reachable()?;

        match self.records.entry(record.user_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, user_id: &str) -> Result<Option<CustodyRecord>, StoreError> {
        self.check_reachable()?;
        if self.stale_reads.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.records.get(user_id).map(|r| r.clone()))
    }
}
