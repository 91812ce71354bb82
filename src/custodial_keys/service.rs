//! Custody Service
//!
//! Main service exposing the three custody operations to collaborators.
//!
//! # Responsibilities
//!
//! - Provision accounts: generate a keypair, split and encrypt the private
//!   key, distribute the shares, return only the public key
//! - Sign transactions: gather, decrypt and combine shares into a one-shot
//!   key, sign once, discard
//! - Answer public key lookups from the custody record alone

use std::sync::Arc;

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::chain::{assemble_transaction, TransactionBroadcaster};
use crate::config::CustodyConfig;
use crate::stores::{CustodyRecordStore, ShareStore};
use crate::types::{CustodyError, Result};

use super::context::{ReconstructionContext, SigningState};
use super::crypto::{decrypt_share, encrypt_share, EncryptedShare, KeyPair};
use super::router::{CustodyRecord, CustodyRouter, GatheredShare};
use super::sharing::{self, Share};

// =============================================================================
// Responses
// =============================================================================

/// Result of provisioning a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedAccount {
    /// Base58 Ed25519 public key
    pub public_key: String,
}

/// A transaction signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSignature {
    /// Base58 Ed25519 signature
    pub signature: String,
}

/// A broadcast and confirmed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedTransaction {
    /// Base58 Ed25519 signature produced by custody
    pub signature: String,

    /// Confirmation identifier returned by the chain
    pub confirmation: String,
}

// =============================================================================
// Custody Service
// =============================================================================

/// Service for provisioning custodial accounts and signing with them.
///
/// Holds no per-request state: every signing call builds and destroys its
/// own [`ReconstructionContext`].
pub struct CustodyService {
    config: Arc<CustodyConfig>,
    router: CustodyRouter,
    records: Arc<dyn CustodyRecordStore>,
    broadcaster: Option<Arc<dyn TransactionBroadcaster>>,
}

impl CustodyService {
    /// Create a custody service over two share stores and a record store.
    ///
    /// Fails with `UnsafeThreshold` if the configured (N, T) cannot be
    /// partitioned under the configured quorum policy.
    pub fn new(
        config: CustodyConfig,
        store_a: Arc<dyn ShareStore>,
        store_b: Arc<dyn ShareStore>,
        records: Arc<dyn CustodyRecordStore>,
    ) -> Result<Self> {
        let router = CustodyRouter::new(
            store_a,
            store_b,
            config.store_timeout,
            config.allow_single_store_quorum,
        );
        router.check(config.total_shares, config.threshold)?;

        if config.single_store_can_reconstruct() {
            warn!(
                total_shares = config.total_shares,
                threshold = config.threshold,
                "Each store alone holds a reconstructing quorum; compromising one store exposes keys"
            );
        }

        Ok(Self {
            config: Arc::new(config),
            router,
            records,
            broadcaster: None,
        })
    }

    /// Attach a chain client for [`CustodyService::submit_transaction`].
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn TransactionBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    // -------------------------------------------------------------------------
    // Provisioning
    // -------------------------------------------------------------------------

    /// Create a custodial account for `user_id` and return its public key.
    ///
    /// Create-once: an existing account fails with `AlreadyProvisioned` and is
    /// left untouched. Any other failure rolls back the shares written so far
    /// and surfaces as `Provisioning`.
    pub async fn provision(&self, user_id: &str) -> Result<ProvisionedAccount> {
        if user_id.trim().is_empty() {
            return Err(CustodyError::InvalidInput("user id must not be empty".into()));
        }

        match self.records.get(user_id).await {
            Ok(Some(_)) => return Err(CustodyError::AlreadyProvisioned(user_id.to_string())),
            Ok(None) => {}
            Err(e) => {
                return Err(CustodyError::Provisioning(format!(
                    "custody record lookup failed: {e}"
                )))
            }
        }

        // 1. Generate keypair
        let keypair = KeyPair::generate();

        // 2-3. Split and encrypt; plaintext shares never leave this scope
        let encrypted = self.split_and_encrypt(&keypair).map_err(|e| match e {
            CustodyError::Provisioning(_) => e,
            other => CustodyError::Provisioning(other.to_string()),
        })?;

        // 4. Distribute across both stores
        let record = self
            .router
            .distribute(
                user_id,
                &keypair.public_key,
                &encrypted,
                self.config.threshold,
            )
            .await?;

        // 5. Persist the custody record
        let written: Vec<_> = record.locations.iter().copied().zip(&encrypted).collect();
        match self.records.insert(&record).await {
            Ok(true) => {}
            Ok(false) => {
                // Another attempt won; only this attempt's ciphertexts are removed
                self.router.rollback(user_id, &written).await;
                return Err(CustodyError::AlreadyProvisioned(user_id.to_string()));
            }
            Err(e) => {
                self.router.rollback(user_id, &written).await;
                return Err(CustodyError::Provisioning(format!(
                    "custody record write failed: {e}"
                )));
            }
        }

        info!(
            user_id = %user_id,
            public_key = %keypair.public_key,
            total_shares = record.total_shares,
            threshold = record.threshold,
            "Provisioned custodial account"
        );

        Ok(ProvisionedAccount {
            public_key: keypair.public_key.clone(),
        })
    }

    fn split_and_encrypt(&self, keypair: &KeyPair) -> Result<Vec<EncryptedShare>> {
        let shares = sharing::split(
            keypair.private_key(),
            self.config.total_shares,
            self.config.threshold,
        )?;

        let encrypted = shares
            .iter()
            .map(|share| encrypt_share(&share.to_bytes(), self.config.encryption_key()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(shares = encrypted.len(), "Split and encrypted private key");
        Ok(encrypted)
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Public key of `user_id`, read from the custody record only.
    pub async fn get_public_key(&self, user_id: &str) -> Result<String> {
        Ok(self.record(user_id).await?.public_key)
    }

    async fn record(&self, user_id: &str) -> Result<CustodyRecord> {
        self.records
            .get(user_id)
            .await?
            .ok_or_else(|| CustodyError::NotFound(format!("no custody record for {user_id}")))
    }

    // -------------------------------------------------------------------------
    // Signing
    // -------------------------------------------------------------------------

    /// Rebuild the user's key, sign `unsigned_tx` once, and discard the key.
    pub async fn sign_transaction(
        &self,
        user_id: &str,
        unsigned_tx: &[u8],
    ) -> Result<TransactionSignature> {
        let signature = self.sign_raw(user_id, unsigned_tx).await?;
        Ok(TransactionSignature {
            signature: bs58::encode(signature.to_bytes()).into_string(),
        })
    }

    /// Sign `unsigned_tx`, broadcast it, and wait for confirmation.
    pub async fn submit_transaction(
        &self,
        user_id: &str,
        unsigned_tx: &[u8],
    ) -> Result<SubmittedTransaction> {
        let broadcaster = self
            .broadcaster
            .as_ref()
            .ok_or_else(|| CustodyError::Config("no transaction broadcaster configured".into()))?;

        let signature = self.sign_raw(user_id, unsigned_tx).await?;
        let wire = assemble_transaction(&signature, unsigned_tx);
        let confirmation = broadcaster.broadcast_and_confirm(&wire).await?;

        info!(
            user_id = %user_id,
            confirmation = %confirmation,
            "Transaction confirmed"
        );

        Ok(SubmittedTransaction {
            signature: bs58::encode(signature.to_bytes()).into_string(),
            confirmation,
        })
    }

    async fn sign_raw(&self, user_id: &str, unsigned_tx: &[u8]) -> Result<Signature> {
        let record = self.record(user_id).await?;

        let mut ctx = ReconstructionContext::new(user_id);
        match self.reconstruct_and_sign(&mut ctx, &record, unsigned_tx).await {
            Ok(signature) => {
                ctx.advance(SigningState::Succeeded);
                debug!(user_id = %user_id, "Signed transaction");
                Ok(signature)
            }
            Err(e) => {
                ctx.fail(&e);
                warn!(
                    user_id = %user_id,
                    error = %e,
                    retriable = e.is_retriable(),
                    "Signing failed"
                );
                Err(e)
            }
        }
    }

    async fn reconstruct_and_sign(
        &self,
        ctx: &mut ReconstructionContext,
        record: &CustodyRecord,
        unsigned_tx: &[u8],
    ) -> Result<Signature> {
        ctx.advance(SigningState::Gathering);
        let gathered = self.router.gather(record).await?;

        ctx.advance(SigningState::Decrypting);
        for gathered_share in &gathered {
            match self.open_share(gathered_share) {
                Ok(share) => ctx.add_share(share),
                Err(e) => warn!(
                    user_id = %record.user_id,
                    store = %gathered_share.location.store,
                    slot = gathered_share.location.slot,
                    error = %e,
                    "Share failed to decrypt"
                ),
            }
        }

        if ctx.share_count() < record.threshold {
            return Err(CustodyError::InsufficientShares {
                required: record.threshold,
                available: ctx.share_count(),
            });
        }

        ctx.advance(SigningState::Combining);
        ctx.combine(record.threshold)?;
        ctx.verify_public_key(&record.public_key)?;

        ctx.advance(SigningState::Signing);
        ctx.sign(unsigned_tx)
    }

    /// Decrypt one gathered share and check it sits in the slot matching its index.
    fn open_share(&self, gathered: &GatheredShare) -> Result<Share> {
        let encrypted = gathered.share.as_ref().map_err(|e| e.clone())?;
        let plaintext: Zeroizing<Vec<u8>> =
            decrypt_share(encrypted, self.config.encryption_key())?;
        let share = Share::from_bytes(&plaintext)
            .map_err(|e| CustodyError::Decryption(e.to_string()))?;

        if share.index() != gathered.location.slot {
            return Err(CustodyError::Decryption(format!(
                "share index {} stored in slot {}",
                share.index(),
                gathered.location.slot
            )));
        }
        Ok(share)
    }
}

// =============================================================================
// Tests
// =============================================================================
