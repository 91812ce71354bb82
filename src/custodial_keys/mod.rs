//! Threshold Custody for Account Signing Keys
//!
//! Holds Ed25519 account keys so that no single place ever stores one whole.
//!
//! # Architecture
//!
//! Each account gets its own Ed25519 keypair at provisioning:
//! - Public key is recorded in the custody record and returned to callers
//! - Private key is split into N Shamir shares (any T rebuild it)
//! - Each share is encrypted (ChaCha20-Poly1305, fresh nonce) and written to
//!   one of two independent stores
//!
//! # Signing
//!
//! 1. Gather encrypted shares from both stores in parallel
//! 2. Decrypt, skipping shares that fail authentication
//! 3. Combine any T into the key and check it against the recorded public key
//! 4. Sign once and discard every decrypted share and the key

pub mod context;
pub mod crypto;
pub mod router;
pub mod service;
pub mod sharing;

pub use context::{ReconstructionContext, SigningState};
pub use crypto::{
    decode_public_key, decrypt_share, encode_public_key, encrypt_share, generate_keypair,
    generate_random_bytes, sign_payload, CipherError, EncryptedShare, KeyPair, KEY_LEN,
    NONCE_LEN,
};
pub use router::{CustodyRecord, CustodyRouter, GatheredShare, ShareLocation};
pub use service::{CustodyService, ProvisionedAccount, SubmittedTransaction, TransactionSignature};
pub use sharing::{combine, split, Share, ShareSet, SplitError};
