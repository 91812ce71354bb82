//! Share Custody Router
//!
//! Decides which store holds which share, and reads them back.
//!
//! # Partition
//!
//! Fixed and auditable: shares `1..=ceil(N/2)` go to Store A, the rest to
//! Store B. The slot number is the share's x-coordinate, so an operator can
//! tell from any record exactly where every share lives.
//!
//! # Quorum invariant
//!
//! Neither store alone may hold T shares. The reference (4, 2) layout breaks
//! this (each store holds 2), so it is only accepted when the configuration
//! explicitly acknowledges a single-store quorum.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::stores::{ShareStore, StoreError, StoredShare};
use crate::types::{CustodyError, Result, StoreId, UnavailableReason, UnavailableStore};

use super::crypto::{CipherError, EncryptedShare};
use super::sharing::MAX_SHARES;

// =============================================================================
// Custody Record
// =============================================================================

/// Where one share lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLocation {
    pub store: StoreId,
    pub slot: u8,
}

/// Per-user custody record: public key plus the location of every share.
///
/// Written once at provisioning and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyRecord {
    pub user_id: String,

    /// Base58 Ed25519 public key
    pub public_key: String,

    pub total_shares: usize,

    pub threshold: usize,

    pub locations: Vec<ShareLocation>,

    pub created_at: DateTime<Utc>,
}

impl CustodyRecord {
    pub fn new(
        user_id: &str,
        public_key: &str,
        total_shares: usize,
        threshold: usize,
        locations: Vec<ShareLocation>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            public_key: public_key.to_string(),
            total_shares,
            threshold,
            locations,
            created_at: Utc::now(),
        }
    }

    /// Number of shares the record places in `store`.
    pub fn shares_in(&self, store: StoreId) -> usize {
        self.locations.iter().filter(|l| l.store == store).count()
    }

    /// Whether `slot` is recorded as living in `store`.
    pub fn holds(&self, store: StoreId, slot: u8) -> bool {
        self.locations
            .iter()
            .any(|l| l.store == store && l.slot == slot)
    }
}

/// An encrypted share read back from a store.
///
/// `share` is `Err` when the stored encoding was unreadable.
#[derive(Debug, Clone)]
pub struct GatheredShare {
    pub location: ShareLocation,
    pub share: std::result::Result<EncryptedShare, CipherError>,
}

// =============================================================================
// Router
// =============================================================================

/// Routes shares between Store A and Store B.
#[derive(Clone)]
pub struct CustodyRouter {
    store_a: Arc<dyn ShareStore>,
    store_b: Arc<dyn ShareStore>,
    store_timeout: Duration,
    allow_single_store_quorum: bool,
}

impl CustodyRouter {
    pub fn new(
        store_a: Arc<dyn ShareStore>,
        store_b: Arc<dyn ShareStore>,
        store_timeout: Duration,
        allow_single_store_quorum: bool,
    ) -> Self {
        Self {
            store_a,
            store_b,
            store_timeout,
            allow_single_store_quorum,
        }
    }

    fn store(&self, id: StoreId) -> &Arc<dyn ShareStore> {
        match id {
            StoreId::A => &self.store_a,
            StoreId::B => &self.store_b,
        }
    }

    /// Compute the fixed partition for (N, T) and check the quorum invariant.
    pub fn plan(
        total: usize,
        threshold: usize,
        allow_single_store_quorum: bool,
    ) -> Result<Vec<ShareLocation>> {
        if threshold < 2 || threshold > total || total > MAX_SHARES {
            return Err(CustodyError::UnsafeThreshold(format!(
                "{threshold} of {total} cannot be split across two stores"
            )));
        }

        let in_a = total.div_ceil(2);
        let in_b = total - in_a;
        let largest = in_a.max(in_b);
        if largest >= threshold && !allow_single_store_quorum {
            return Err(CustodyError::UnsafeThreshold(format!(
                "store-a would hold {in_a} and store-b {in_b} shares, one store alone reaches threshold {threshold}"
            )));
        }

        Ok((1..=total)
            .map(|i| ShareLocation {
                store: if i <= in_a { StoreId::A } else { StoreId::B },
                slot: i as u8,
            })
            .collect())
    }

    /// Validate (N, T) against this router's policy.
    pub fn check(&self, total: usize, threshold: usize) -> Result<()> {
        Self::plan(total, threshold, self.allow_single_store_quorum).map(|_| ())
    }

    /// Write `shares` (in x-coordinate order) to both stores and build the
    /// custody record.
    ///
    /// The two stores are written concurrently and independently. If either
    /// side fails, every slot this call may have written is deleted again and
    /// the call fails with `Provisioning`. A write that timed out or failed
    /// in the backend counts as possibly written.
    pub async fn distribute(
        &self,
        user_id: &str,
        public_key: &str,
        shares: &[EncryptedShare],
        threshold: usize,
    ) -> Result<CustodyRecord> {
        let locations = Self::plan(shares.len(), threshold, self.allow_single_store_quorum)?;

        let batch_a = batch_for(&locations, shares, StoreId::A);
        let batch_b = batch_for(&locations, shares, StoreId::B);

        let (res_a, res_b) = tokio::join!(
            self.write_batch(StoreId::A, user_id, &batch_a),
            self.write_batch(StoreId::B, user_id, &batch_b),
        );

        let mut failures = Vec::new();
        let mut written = Vec::new();
        for (store, (touched, error)) in [(StoreId::A, res_a), (StoreId::B, res_b)] {
            written.extend(
                touched
                    .into_iter()
                    .map(|(slot, share)| (ShareLocation { store, slot }, share)),
            );
            if let Some(e) = error {
                failures.push(format!("{store}: {e}"));
            }
        }

        if !failures.is_empty() {
            warn!(
                user_id = %user_id,
                written = written.len(),
                "Share distribution failed, rolling back"
            );
            self.rollback(user_id, &written).await;
            return Err(CustodyError::Provisioning(format!(
                "share distribution failed ({})",
                failures.join("; ")
            )));
        }

        debug!(
            user_id = %user_id,
            store_a = batch_a.len(),
            store_b = batch_b.len(),
            "Distributed shares"
        );

        Ok(CustodyRecord::new(
            user_id,
            public_key,
            shares.len(),
            threshold,
            locations,
        ))
    }

    /// Writes one store's batch in order, stopping at the first failure.
    ///
    /// Returns every slot the store may now hold from this batch and the
    /// failure, if any. Only a `Conflict` proves the slot was not written.
    async fn write_batch<'a>(
        &self,
        store: StoreId,
        user_id: &str,
        batch: &[(u8, &'a EncryptedShare)],
    ) -> (Vec<(u8, &'a EncryptedShare)>, Option<StoreError>) {
        let backend = self.store(store);
        let mut touched = Vec::with_capacity(batch.len());

        for &(slot, share) in batch {
            let result = tokio::time::timeout(self.store_timeout, backend.put(user_id, slot, share))
                .await
                .unwrap_or_else(|_| Err(StoreError::Unreachable("write timed out".into())));

            match result {
                Ok(()) => touched.push((slot, share)),
                Err(e @ StoreError::Conflict { .. }) => return (touched, Some(e)),
                Err(e) => {
                    touched.push((slot, share));
                    return (touched, Some(e));
                }
            }
        }
        (touched, None)
    }

    /// Delete the given shares, each only if its slot still holds it.
    /// Best effort: failures are logged.
    pub async fn rollback(&self, user_id: &str, written: &[(ShareLocation, &EncryptedShare)]) {
        for (location, share) in written {
            let backend = self.store(location.store);
            let result = tokio::time::timeout(
                self.store_timeout,
                backend.delete(user_id, location.slot, share),
            )
            .await;

            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(
                    user_id = %user_id,
                    store = %location.store,
                    slot = location.slot,
                    error = %e,
                    "Rollback of share failed"
                ),
                Err(_) => warn!(
                    user_id = %user_id,
                    store = %location.store,
                    slot = location.slot,
                    "Rollback of share timed out"
                ),
            }
        }
    }

    /// Read a user's shares from both stores in parallel.
    ///
    /// Shares with an unreadable encoding are still returned (and counted), so
    /// they surface as decryption failures rather than missing shares.
    /// Succeeds as long as the shares collected reach the record's threshold,
    /// even if one store is down or short. Otherwise fails with
    /// `ShareUnavailable` naming each store that came up short.
    pub async fn gather(&self, record: &CustodyRecord) -> Result<Vec<GatheredShare>> {
        let (res_a, res_b) = tokio::join!(
            self.read(StoreId::A, &record.user_id),
            self.read(StoreId::B, &record.user_id),
        );

        let mut gathered = Vec::with_capacity(record.total_shares);
        let mut problems = Vec::new();

        for (store, result) in [(StoreId::A, res_a), (StoreId::B, res_b)] {
            let expected = record.shares_in(store);
            if expected == 0 {
                continue;
            }

            match result {
                Ok(stored) => {
                    let before = gathered.len();
                    gathered.extend(
                        stored
                            .into_iter()
                            .filter(|s| record.holds(store, s.slot))
                            .map(|StoredShare { slot, share }| GatheredShare {
                                location: ShareLocation { store, slot },
                                share,
                            }),
                    );
                    let got = gathered.len() - before;

                    if got == 0 {
                        problems.push(UnavailableStore {
                            store,
                            reason: UnavailableReason::NotFound,
                        });
                    } else if got < expected {
                        problems.push(UnavailableStore {
                            store,
                            reason: UnavailableReason::ShortRead { expected, got },
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        user_id = %record.user_id,
                        store = %store,
                        error = %e,
                        "Share store read failed"
                    );
                    problems.push(UnavailableStore {
                        store,
                        reason: UnavailableReason::Unreachable,
                    });
                }
            }
        }

        if gathered.len() < record.threshold {
            return Err(if problems.is_empty() {
                CustodyError::InsufficientShares {
                    required: record.threshold,
                    available: gathered.len(),
                }
            } else {
                CustodyError::ShareUnavailable(problems)
            });
        }

        if !problems.is_empty() {
            info!(
                user_id = %record.user_id,
                gathered = gathered.len(),
                threshold = record.threshold,
                degraded = %problems
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                "Proceeding with degraded share set"
            );
        }

        Ok(gathered)
    }

    async fn read(
        &self,
        store: StoreId,
        user_id: &str,
    ) -> std::result::Result<Vec<StoredShare>, StoreError> {
        tokio::time::timeout(self.store_timeout, self.store(store).get(user_id))
            .await
            .unwrap_or_else(|_| Err(StoreError::Unreachable("read timed out".into())))
    }
}

fn batch_for<'a>(
    locations: &[ShareLocation],
    shares: &'a [EncryptedShare],
    store: StoreId,
) -> Vec<(u8, &'a EncryptedShare)> {
    locations
        .iter()
        .zip(shares)
        .filter(|(l, _)| l.store == store)
        .map(|(l, s)| (l.slot, s))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryShareStore;

    fn share(byte: u8) -> EncryptedShare {
        EncryptedShare {
            ciphertext: vec![byte; 32],
            iv: vec![byte; 12],
        }
    }

    fn shares(n: u8) -> Vec<EncryptedShare> {
        (1..=n).map(share).collect()
    }

    fn router(allow: bool) -> (CustodyRouter, Arc<MemoryShareStore>, Arc<MemoryShareStore>) {
        let a = Arc::new(MemoryShareStore::new());
        let b = Arc::new(MemoryShareStore::new());
        let router = CustodyRouter::new(
            a.clone(),
            b.clone(),
            Duration::from_millis(200),
            allow,
        );
        (router, a, b)
    }

    #[test]
    fn test_reference_partition_is_two_and_two() {
        let plan = CustodyRouter::plan(4, 2, true).unwrap();
        let in_a: Vec<u8> = plan.iter().filter(|l| l.store == StoreId::A).map(|l| l.slot).collect();
        let in_b: Vec<u8> = plan.iter().filter(|l| l.store == StoreId::B).map(|l| l.slot).collect();

        assert_eq!(in_a, vec![1, 2]);
        assert_eq!(in_b, vec![3, 4]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        assert_eq!(
            CustodyRouter::plan(5, 3, false).unwrap(),
            CustodyRouter::plan(5, 3, false).unwrap()
        );
    }

    #[test]
    fn test_single_store_quorum_rejected_without_acknowledgement() {
        assert!(matches!(
            CustodyRouter::plan(4, 2, false),
            Err(CustodyError::UnsafeThreshold(_))
        ));
        assert!(CustodyRouter::plan(4, 3, false).is_ok());
        // 3 of 5 puts 3 shares in store A
        assert!(CustodyRouter::plan(5, 3, false).is_err());
        assert!(CustodyRouter::plan(5, 4, false).is_ok());
    }

    #[test]
    fn test_degenerate_thresholds_always_rejected() {
        for (n, t) in [(4, 1), (4, 0), (2, 3)] {
            assert!(matches!(
                CustodyRouter::plan(n, t, true),
                Err(CustodyError::UnsafeThreshold(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_distribute_places_two_per_store() {
        let (router, a, b) = router(true);

        let record = router.distribute("u1", "pk", &shares(4), 2).await.unwrap();

        assert_eq!(a.slots("u1"), vec![1, 2]);
        assert_eq!(b.slots("u1"), vec![3, 4]);
        assert_eq!(record.shares_in(StoreId::A), 2);
        assert_eq!(record.shares_in(StoreId::B), 2);
        assert_eq!(record.locations.len(), 4);
    }

    #[tokio::test]
    async fn test_distribute_unsafe_writes_nothing() {
        let (router, a, b) = router(false);

        let err = router.distribute("u1", "pk", &shares(4), 2).await.unwrap_err();
        assert!(matches!(err, CustodyError::UnsafeThreshold(_)));
        assert_eq!(a.share_count("u1") + b.share_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_partial_write_is_rolled_back() {
        let (router, a, b) = router(true);
        b.set_reject_writes(true);

        let err = router.distribute("u1", "pk", &shares(4), 2).await.unwrap_err();

        assert!(matches!(err, CustodyError::Provisioning(_)));
        assert!(err.to_string().contains("store-b"));
        assert_eq!(a.share_count("u1"), 0);
        assert_eq!(b.share_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_gather_from_both_stores() {
        let (router, _, _) = router(true);
        let record = router.distribute("u1", "pk", &shares(4), 2).await.unwrap();

        let gathered = router.gather(&record).await.unwrap();
        assert_eq!(gathered.len(), 4);
        for g in &gathered {
            assert_eq!(g.share, Ok(share(g.location.slot)));
        }
    }

    #[tokio::test]
    async fn test_single_store_never_returns_quorum_under_strict_policy() {
        let (router, a, b) = router(false);
        let record = router.distribute("u1", "pk", &shares(4), 3).await.unwrap();

        assert!(a.get("u1").await.unwrap().len() < record.threshold);
        assert!(b.get("u1").await.unwrap().len() < record.threshold);
    }

    #[tokio::test]
    async fn test_gather_names_unreachable_store() {
        let (router, _, b) = router(false);
        let record = router.distribute("u1", "pk", &shares(4), 3).await.unwrap();
        b.set_unreachable(true);

        let err = router.gather(&record).await.unwrap_err();
        match err {
            CustodyError::ShareUnavailable(stores) => {
                assert_eq!(
                    stores,
                    vec![UnavailableStore {
                        store: StoreId::B,
                        reason: UnavailableReason::Unreachable,
                    }]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_gather_tolerates_one_store_when_quorum_remains() {
        let (router, _, b) = router(true);
        let record = router.distribute("u1", "pk", &shares(4), 2).await.unwrap();
        b.set_unreachable(true);

        let gathered = router.gather(&record).await.unwrap();
        assert_eq!(gathered.len(), 2);
        assert!(gathered.iter().all(|g| g.location.store == StoreId::A));
    }

    #[tokio::test]
    async fn test_gather_times_out_slow_store() {
        let (router, a, _) = router(false);
        let record = router.distribute("u1", "pk", &shares(4), 3).await.unwrap();
        a.set_delay(Duration::from_secs(5));

        let err = router.gather(&record).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(err.to_string().contains("store-a (unreachable)"));
    }

    #[tokio::test]
    async fn test_gather_reports_not_found_and_short_reads() {
        let (router, a, b) = router(false);
        let record = router.distribute("u1", "pk", &shares(4), 3).await.unwrap();
        assert!(a.delete("u1", 1, &share(1)).await.unwrap());
        assert!(b.delete("u1", 3, &share(3)).await.unwrap());
        assert!(b.delete("u1", 4, &share(4)).await.unwrap());

        let err = router.gather(&record).await.unwrap_err();
        match err {
            CustodyError::ShareUnavailable(stores) => {
                assert_eq!(
                    stores[0].reason,
                    UnavailableReason::ShortRead {
                        expected: 2,
                        got: 1
                    }
                );
                assert_eq!(stores[1].reason, UnavailableReason::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_write_with_lost_ack_is_rolled_back() {
        // Store B commits each write but answers after the router gave up
        let (router, a, b) = router(true);
        b.set_ack_delay(Duration::from_millis(500));

        let err = router.distribute("u1", "pk", &shares(4), 2).await.unwrap_err();
        assert!(matches!(err, CustodyError::Provisioning(_)));
        assert_eq!(a.share_count("u1"), 0);
        assert_eq!(b.share_count("u1"), 0);

        b.set_ack_delay(Duration::ZERO);
        router.distribute("u1", "pk", &shares(4), 2).await.unwrap();
        assert_eq!(b.slots("u1"), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_rollback_leaves_other_attempts_shares() {
        let (router, a, b) = router(true);
        let winner = router.distribute("u1", "pk", &shares(4), 2).await.unwrap();

        // A competing attempt holding different ciphertexts for the same slots
        let other: Vec<EncryptedShare> = (11..=14).map(share).collect();
        let written: Vec<_> = winner.locations.iter().copied().zip(&other).collect();
        router.rollback("u1", &written).await;

        assert_eq!(a.slots("u1"), vec![1, 2]);
        assert_eq!(b.slots("u1"), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_conflicting_slot_is_not_rolled_back() {
        let (router, _, b) = router(true);
        b.put("u1", 3, &share(30)).await.unwrap();

        let err = router.distribute("u1", "pk", &shares(4), 2).await.unwrap_err();
        assert!(matches!(err, CustodyError::Provisioning(_)));
        assert_eq!(b.slots("u1"), vec![3]);
        let kept = b.get("u1").await.unwrap();
        assert_eq!(kept[0].share, Ok(share(30)));
    }

    #[tokio::test]
    async fn test_gather_counts_unreadable_encodings() {
        let (router, a, _) = router(false);
        let record = router.distribute("u1", "pk", &shares(4), 3).await.unwrap();
        a.overwrite("u1", 2, "zz:zz");

        let gathered = router.gather(&record).await.unwrap();
        assert_eq!(gathered.len(), 4);
        let unreadable: Vec<u8> = gathered
            .iter()
            .filter(|g| g.share.is_err())
            .map(|g| g.location.slot)
            .collect();
        assert_eq!(unreadable, vec![2]);
    }
}
