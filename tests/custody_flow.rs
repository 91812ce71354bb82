//! End-to-end custody flows against the in-memory stores.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier};

use keyshard::chain::{BroadcastError, TransactionBroadcaster};
use keyshard::custodial_keys::{decode_public_key, generate_random_bytes, CustodyService};
use keyshard::stores::{CustodyRecordStore, MemoryCustodyRecordStore, MemoryShareStore};
use keyshard::types::{StoreId, UnavailableReason};
use keyshard::{CustodyConfig, CustodyError};

struct Custody {
    service: Arc<CustodyService>,
    store_a: Arc<MemoryShareStore>,
    store_b: Arc<MemoryShareStore>,
    records: Arc<MemoryCustodyRecordStore>,
}

fn custody(config: CustodyConfig) -> Custody {
    let store_a = Arc::new(MemoryShareStore::new());
    let store_b = Arc::new(MemoryShareStore::new());
    let records = Arc::new(MemoryCustodyRecordStore::new());
    let service = CustodyService::new(config, store_a.clone(), store_b.clone(), records.clone())
        .expect("valid configuration");
    Custody {
        service: Arc::new(service),
        store_a,
        store_b,
        records,
    }
}

/// 2-of-4, single-store quorum acknowledged.
fn reference() -> Custody {
    custody(CustodyConfig::new(generate_random_bytes()))
}

/// 3-of-4, neither store alone can rebuild.
fn strict() -> Custody {
    custody(
        CustodyConfig::new(generate_random_bytes())
            .with_shares(4, 3)
            .with_single_store_quorum(false)
            .with_store_timeout(Duration::from_millis(200)),
    )
}

fn verify(public_key: &str, message: &[u8], signature: &str) -> bool {
    let key = decode_public_key(public_key).expect("valid public key");
    let bytes: [u8; 64] = bs58::decode(signature)
        .into_vec()
        .expect("base58 signature")
        .try_into()
        .expect("64-byte signature");
    key.verify(message, &Signature::from_bytes(&bytes)).is_ok()
}

#[tokio::test]
async fn provision_then_sign_verifies_under_public_key() {
    let c = reference();

    let account = c.service.provision("alice").await.unwrap();
    let public_key = c.service.get_public_key("alice").await.unwrap();
    assert_eq!(public_key, account.public_key);

    let tx = b"transfer 1 SOL to bob";
    let signed = c.service.sign_transaction("alice", tx).await.unwrap();
    assert!(verify(&public_key, tx, &signed.signature));
    assert!(!verify(&public_key, b"transfer 2 SOL to bob", &signed.signature));
}

#[tokio::test]
async fn accounts_get_distinct_keys() {
    let c = reference();
    let a = c.service.provision("alice").await.unwrap();
    let b = c.service.provision("bob").await.unwrap();
    assert_ne!(a.public_key, b.public_key);
    assert_eq!(c.records.len(), 2);
}

#[tokio::test]
async fn reprovisioning_keeps_original_account() {
    let c = reference();
    let first = c.service.provision("alice").await.unwrap();
    let record = c.records.get("alice").await.unwrap().unwrap();

    let err = c.service.provision("alice").await.unwrap_err();
    assert!(matches!(err, CustodyError::AlreadyProvisioned(_)));

    assert_eq!(c.records.get("alice").await.unwrap().unwrap(), record);
    assert_eq!(c.service.get_public_key("alice").await.unwrap(), first.public_key);

    let signed = c.service.sign_transaction("alice", b"tx").await.unwrap();
    assert!(verify(&first.public_key, b"tx", &signed.signature));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_provisioning_creates_at_most_one_account() {
    let c = reference();
    // Slow acknowledgements keep the attempts interleaved across both stores
    c.store_a.set_ack_delay(Duration::from_millis(5));
    c.store_b.set_ack_delay(Duration::from_millis(5));

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let service = c.service.clone();
            tokio::spawn(async move { service.provision("alice").await })
        })
        .collect();

    let mut created = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => created += 1,
            Err(CustodyError::AlreadyProvisioned(_)) | Err(CustodyError::Provisioning(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(created <= 1);

    // Losers removed only their own shares
    let record = c.records.get("alice").await.unwrap();
    assert_eq!(record.is_some(), created == 1);
    if record.is_some() {
        assert_eq!(c.store_a.slots("alice"), vec![1, 2]);
        assert_eq!(c.store_b.slots("alice"), vec![3, 4]);
    } else {
        assert_eq!(c.store_a.share_count("alice") + c.store_b.share_count("alice"), 0);
    }

    c.store_a.set_ack_delay(Duration::ZERO);
    c.store_b.set_ack_delay(Duration::ZERO);
    match c.service.provision("alice").await {
        Ok(_) => assert_eq!(created, 0),
        Err(CustodyError::AlreadyProvisioned(_)) => assert_eq!(created, 1),
        Err(other) => panic!("unexpected error: {other}"),
    }
    assert_eq!(c.records.len(), 1);
    c.service.sign_transaction("alice", b"tx").await.unwrap();
}

#[tokio::test]
async fn provisioning_retry_succeeds_after_lost_write_ack() {
    let c = strict();
    c.store_b.set_ack_delay(Duration::from_secs(1));

    let err = c.service.provision("alice").await.unwrap_err();
    assert!(matches!(err, CustodyError::Provisioning(_)));
    assert!(err.is_retriable());
    assert_eq!(c.store_a.share_count("alice"), 0);
    assert_eq!(c.store_b.share_count("alice"), 0);
    assert!(c.records.is_empty());

    c.store_b.set_ack_delay(Duration::ZERO);
    let account = c.service.provision("alice").await.unwrap();
    let signed = c.service.sign_transaction("alice", b"tx").await.unwrap();
    assert!(verify(&account.public_key, b"tx", &signed.signature));
}

#[tokio::test]
async fn reference_layout_signs_from_store_a_alone() {
    // Under 2-of-4 each store holds a full quorum
    let c = reference();
    let account = c.service.provision("alice").await.unwrap();
    c.store_b.set_unreachable(true);

    let signed = c.service.sign_transaction("alice", b"tx").await.unwrap();
    assert!(verify(&account.public_key, b"tx", &signed.signature));
}

#[tokio::test]
async fn strict_layout_names_unreachable_store() {
    let c = strict();
    c.service.provision("alice").await.unwrap();
    c.store_b.set_unreachable(true);

    let err = c.service.sign_transaction("alice", b"tx").await.unwrap_err();
    match &err {
        CustodyError::ShareUnavailable(stores) => {
            assert_eq!(stores.len(), 1);
            assert_eq!(stores[0].store, StoreId::B);
            assert_eq!(stores[0].reason, UnavailableReason::Unreachable);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("store-b"));
    assert!(err.is_retriable());

    c.store_b.set_unreachable(false);
    c.service.sign_transaction("alice", b"tx").await.unwrap();
}

#[tokio::test]
async fn strict_layout_times_out_slow_store() {
    let c = strict();
    c.service.provision("alice").await.unwrap();
    c.store_a.set_delay(Duration::from_secs(5));

    let err = c.service.sign_transaction("alice", b"tx").await.unwrap_err();
    assert!(matches!(err, CustodyError::ShareUnavailable(ref s) if s[0].store == StoreId::A));
}

#[tokio::test]
async fn one_corrupted_share_is_tolerated() {
    let c = strict();
    let account = c.service.provision("alice").await.unwrap();
    assert!(c.store_b.corrupt("alice", 4));

    let signed = c.service.sign_transaction("alice", b"tx").await.unwrap();
    assert!(verify(&account.public_key, b"tx", &signed.signature));
}

#[tokio::test]
async fn too_many_corrupted_shares_fail() {
    let c = strict();
    c.service.provision("alice").await.unwrap();
    c.store_a.corrupt("alice", 1);
    c.store_b.corrupt("alice", 4);

    let err = c.service.sign_transaction("alice", b"tx").await.unwrap_err();
    assert!(matches!(
        err,
        CustodyError::InsufficientShares {
            required: 3,
            available: 2
        }
    ));
}

#[tokio::test]
async fn unreadable_share_encoding_is_tolerated_like_corruption() {
    let c = strict();
    let account = c.service.provision("alice").await.unwrap();
    c.store_a.overwrite("alice", 2, "truncated");

    let signed = c.service.sign_transaction("alice", b"tx").await.unwrap();
    assert!(verify(&account.public_key, b"tx", &signed.signature));

    c.store_b.overwrite("alice", 3, "zz:zz");
    let err = c.service.sign_transaction("alice", b"tx").await.unwrap_err();
    assert!(matches!(
        err,
        CustodyError::InsufficientShares {
            required: 3,
            available: 2
        }
    ));
}

#[tokio::test]
async fn failed_provisioning_leaves_nothing_behind() {
    let c = reference();
    c.store_b.set_reject_writes(true);

    let err = c.service.provision("alice").await.unwrap_err();
    assert!(matches!(err, CustodyError::Provisioning(_)));
    assert!(err.to_string().contains("store-b"));

    assert_eq!(c.store_a.share_count("alice"), 0);
    assert_eq!(c.store_b.share_count("alice"), 0);
    assert!(c.records.is_empty());
    assert!(matches!(
        c.service.get_public_key("alice").await,
        Err(CustodyError::NotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_signing_is_independent() {
    let c = reference();
    let account = c.service.provision("alice").await.unwrap();

    let requests: Vec<_> = (0..16u8)
        .map(|i| {
            let service = c.service.clone();
            tokio::spawn(async move {
                let tx = vec![i; 32];
                let signed = service.sign_transaction("alice", &tx).await.unwrap();
                (tx, signed.signature)
            })
        })
        .collect();

    for request in requests {
        let (tx, signature) = request.await.unwrap();
        assert!(verify(&account.public_key, &tx, &signature));
    }
}

#[tokio::test]
async fn cancelled_signing_leaves_service_usable() {
    let c = strict();
    c.service.provision("alice").await.unwrap();
    c.store_b.set_delay(Duration::from_millis(100));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(10),
        c.service.sign_transaction("alice", b"tx"),
    )
    .await;
    assert!(cancelled.is_err());

    c.store_b.set_delay(Duration::ZERO);
    c.service.sign_transaction("alice", b"tx").await.unwrap();
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let c = reference();
    assert!(matches!(
        c.service.sign_transaction("nobody", b"tx").await,
        Err(CustodyError::NotFound(_))
    ));
}

// =============================================================================
// Submission
// =============================================================================

#[derive(Default)]
struct RecordingBroadcaster {
    sent: Mutex<Vec<Vec<u8>>>,
    fail_with_timeout: bool,
}

#[async_trait]
impl TransactionBroadcaster for RecordingBroadcaster {
    async fn broadcast_and_confirm(&self, signed_tx: &[u8]) -> Result<String, BroadcastError> {
        self.sent.lock().unwrap().push(signed_tx.to_vec());
        let signature = bs58::encode(&signed_tx[1..65]).into_string();
        if self.fail_with_timeout {
            return Err(BroadcastError::ConfirmationTimeout(signature));
        }
        Ok(signature)
    }
}

fn with_broadcaster(broadcaster: Arc<RecordingBroadcaster>) -> (CustodyService, String) {
    let key = generate_random_bytes();
    let service = CustodyService::new(
        CustodyConfig::new(key),
        Arc::new(MemoryShareStore::new()),
        Arc::new(MemoryShareStore::new()),
        Arc::new(MemoryCustodyRecordStore::new()),
    )
    .unwrap()
    .with_broadcaster(broadcaster);
    (service, "alice".to_string())
}

#[tokio::test]
async fn submit_broadcasts_signed_wire_transaction() {
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let (service, user) = with_broadcaster(broadcaster.clone());
    let account = service.provision(&user).await.unwrap();

    let message = b"solana message bytes";
    let submitted = service.submit_transaction(&user, message).await.unwrap();

    assert_eq!(submitted.confirmation, submitted.signature);
    assert!(verify(&account.public_key, message, &submitted.signature));

    let sent = broadcaster.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], 1);
    assert_eq!(&sent[0][65..], message);
}

#[tokio::test]
async fn submit_reports_confirmation_timeout_as_final() {
    let broadcaster = Arc::new(RecordingBroadcaster {
        fail_with_timeout: true,
        ..Default::default()
    });
    let (service, user) = with_broadcaster(broadcaster);
    service.provision(&user).await.unwrap();

    let err = service.submit_transaction(&user, b"tx").await.unwrap_err();
    assert!(matches!(err, CustodyError::ConfirmationTimeout(_)));
    assert!(!err.is_retriable());
}
