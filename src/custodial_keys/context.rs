//! Ephemeral reconstruction state for one signing request.
//!
//! A [`ReconstructionContext`] owns every piece of secret material a signing
//! request touches: decrypted shares and the rebuilt signing key. Both are
//! zeroized when the context is dropped, so discard happens on success, on
//! error, and when the request future is cancelled mid-flight.

use ed25519_dalek::{Signature, SigningKey};
use tracing::{debug, warn};

use crate::types::{CustodyError, ErrorClass, Result};

use super::crypto::{encode_public_key, sign_payload, PRIVATE_KEY_LEN};
use super::sharing::{self, Share};

/// Progress of one signing request. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Idle,
    Gathering,
    Decrypting,
    Combining,
    Signing,
    Succeeded,
    Failed(ErrorClass),
}

impl SigningState {
    fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Gathering => 1,
            Self::Decrypting => 2,
            Self::Combining => 3,
            Self::Signing => 4,
            Self::Succeeded | Self::Failed(_) => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// Secret material for exactly one signing request. Never cloned, cached
/// or serialized.
pub struct ReconstructionContext {
    user_id: String,
    state: SigningState,
    shares: Vec<Share>,
    signing_key: Option<SigningKey>,
}

impl ReconstructionContext {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: SigningState::Idle,
            shares: Vec::new(),
            signing_key: None,
        }
    }

    pub fn state(&self) -> SigningState {
        self.state
    }

    /// Move to `next`. Transitions that do not move forward are ignored.
    pub fn advance(&mut self, next: SigningState) {
        if next.rank() <= self.state.rank() {
            warn!(
                user_id = %self.user_id,
                from = ?self.state,
                to = ?next,
                "Ignoring backwards signing state transition"
            );
            return;
        }
        debug!(
            user_id = %self.user_id,
            from = ?self.state,
            to = ?next,
            "Signing state"
        );
        self.state = next;
        if next.is_terminal() {
            self.discard();
        }
    }

    /// Record a failure and drop all secret material.
    pub fn fail(&mut self, err: &CustodyError) {
        self.advance(SigningState::Failed(err.class()));
    }

    /// Keep one decrypted share.
    pub fn add_share(&mut self, share: Share) {
        self.shares.push(share);
    }

    pub fn share_count(&self) -> usize {
        self.shares.len()
    }

    /// Combine the collected shares into the signing key.
    ///
    /// The decrypted shares are dropped as soon as the key is rebuilt.
    pub fn combine(&mut self, threshold: usize) -> Result<()> {
        let secret = sharing::combine(&self.shares, threshold)?;
        self.shares.clear();

        let seed: &[u8; PRIVATE_KEY_LEN] = secret.as_slice().try_into().map_err(|_| {
            CustodyError::ReconstructionMismatch(format!(
                "recovered key has length {}, expected {}",
                secret.len(),
                PRIVATE_KEY_LEN
            ))
        })?;
        self.signing_key = Some(SigningKey::from_bytes(seed));
        Ok(())
    }

    /// Check the rebuilt key against the public key on record.
    pub fn verify_public_key(&self, expected: &str) -> Result<()> {
        let key = self.key()?;
        if encode_public_key(&key.verifying_key()) != expected {
            return Err(CustodyError::ReconstructionMismatch(
                "recovered key does not match the recorded public key".into(),
            ));
        }
        Ok(())
    }

    /// Sign one message with the rebuilt key.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        Ok(sign_payload(self.key()?, message))
    }

    /// Whether any secret material is currently held.
    pub fn holds_secrets(&self) -> bool {
        !self.shares.is_empty() || self.signing_key.is_some()
    }

    fn key(&self) -> Result<&SigningKey> {
        self.signing_key.as_ref().ok_or_else(|| {
            CustodyError::ReconstructionMismatch("no key has been reconstructed".into())
        })
    }

    /// Drop shares and key. `Share` and `SigningKey` zeroize themselves.
    fn discard(&mut self) {
        self.shares.clear();
        self.signing_key = None;
    }
}

impl Drop for ReconstructionContext {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            debug!(
                user_id = %self.user_id,
                state = ?self.state,
                "Reconstruction abandoned, discarding key material"
            );
        }
        self.discard();
    }
}
