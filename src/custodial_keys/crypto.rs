//! Cryptographic primitives for share custody.
//!
//! # Algorithms
//!
//! - **Key Generation**: Ed25519 (Solana account keys)
//! - **Share Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//!
//! Every call to [`encrypt_share`] draws a fresh 12-byte nonce from the OS
//! RNG and stores it beside the ciphertext. The process-wide encryption key
//! is shared across shares; a nonce is never reused under it.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

// =============================================================================
// Constants
// =============================================================================

/// Share encryption key length (32 bytes)
pub const KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Ed25519 private key (seed) length (32 bytes)
pub const PRIVATE_KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Errors from the share encryption layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("encryption failed")]
    Encryption,

    #[error("malformed encrypted share: {0}")]
    Malformed(String),

    #[error("authentication failed (wrong key, wrong IV or tampered ciphertext)")]
    Authentication,
}

// =============================================================================
// Encrypted Share
// =============================================================================

/// One encrypted share as persisted in a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedShare {
    /// Ciphertext including the 16-byte auth tag
    pub ciphertext: Vec<u8>,

    /// The nonce used for this ciphertext
    pub iv: Vec<u8>,
}

impl EncryptedShare {
    /// Encode as `hex(iv):hex(ciphertext)`.
    pub fn encode(&self) -> String {
        format!("{}:{}", hex::encode(&self.iv), hex::encode(&self.ciphertext))
    }

    /// Parse the `hex(iv):hex(ciphertext)` form.
    pub fn decode(encoded: &str) -> Result<Self, CipherError> {
        let (iv, ciphertext) = encoded
            .split_once(':')
            .ok_or_else(|| CipherError::Malformed("missing ':' separator".into()))?;

        let iv = hex::decode(iv).map_err(|e| CipherError::Malformed(format!("iv: {e}")))?;
        let ciphertext = hex::decode(ciphertext)
            .map_err(|e| CipherError::Malformed(format!("ciphertext: {e}")))?;

        Ok(Self { ciphertext, iv })
    }
}

// =============================================================================
// Key Generation
// =============================================================================

/// A freshly generated account keypair.
///
/// The private key never leaves this struct unencrypted except by reference,
/// and is zeroized on drop.
pub struct KeyPair {
    /// Base58-encoded Ed25519 public key
    pub public_key: String,

    private_key: Zeroizing<[u8; PRIVATE_KEY_LEN]>,
}

impl KeyPair {
    /// Generate a new Ed25519 keypair from the OS RNG.
    pub fn generate() -> Self {
        let (signing_key, verifying_key) = generate_keypair();
        Self {
            public_key: encode_public_key(&verifying_key),
            private_key: Zeroizing::new(signing_key.to_bytes()),
        }
    }

    /// The raw 32-byte seed.
    pub fn private_key(&self) -> &[u8; PRIVATE_KEY_LEN] {
        &self.private_key
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generate a new Ed25519 signing keypair.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Base58 form of a public key (Solana address).
pub fn encode_public_key(key: &VerifyingKey) -> String {
    bs58::encode(key.to_bytes()).into_string()
}

/// Parse a base58 public key.
pub fn decode_public_key(encoded: &str) -> Option<VerifyingKey> {
    let bytes = bs58::decode(encoded).into_vec().ok()?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

// =============================================================================
// Encryption / Decryption
// =============================================================================

/// Encrypt one share under the process-wide key with a fresh random nonce.
pub fn encrypt_share(
    plaintext: &[u8],
    encryption_key: &[u8; KEY_LEN],
) -> Result<EncryptedShare, CipherError> {
    let nonce: [u8; NONCE_LEN] = generate_random_bytes();
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CipherError::Encryption)?;

    Ok(EncryptedShare {
        ciphertext,
        iv: nonce.to_vec(),
    })
}

/// Decrypt one share.
///
/// # Errors
///
/// Returns an error if:
/// - The IV has the wrong length or the ciphertext is shorter than a tag
/// - The ciphertext is tampered (auth tag verification fails)
/// - The wrong key or IV was used
pub fn decrypt_share(
    share: &EncryptedShare,
    encryption_key: &[u8; KEY_LEN],
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    if share.iv.len() != NONCE_LEN {
        return Err(CipherError::Malformed(format!(
            "iv length: expected {}, got {}",
            NONCE_LEN,
            share.iv.len()
        )));
    }
    if share.ciphertext.len() < AUTH_TAG_LEN {
        return Err(CipherError::Malformed("ciphertext truncated".into()));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&share.iv), share.ciphertext.as_slice())
        .map_err(|_| CipherError::Authentication)?;

    Ok(Zeroizing::new(plaintext))
}

// =============================================================================
// Signing
// =============================================================================

/// Sign a payload with an Ed25519 private key.
pub fn sign_payload(signing_key: &SigningKey, payload: &[u8]) -> Signature {
    signing_key.sign(payload)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_LEN] {
        generate_random_bytes()
    }

    #[test]
    fn test_keypair_generation() {
        let keypair = KeyPair::generate();

        let verifying_key = decode_public_key(&keypair.public_key).unwrap();
        let signing_key = SigningKey::from_bytes(keypair.private_key());
        assert_eq!(signing_key.verifying_key(), verifying_key);
    }

    #[test]
    fn test_keypair_debug_redacts_private_key() {
        let keypair = KeyPair::generate();
        let printed = format!("{keypair:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(&hex::encode(keypair.private_key())));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        for len in [0usize, 1, 41, 200] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let share = encrypt_share(&plaintext, &key).unwrap();

            assert_eq!(share.iv.len(), NONCE_LEN);
            assert_eq!(share.ciphertext.len(), len + AUTH_TAG_LEN);
            assert_eq!(*decrypt_share(&share, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let key = test_key();
        let a = encrypt_share(b"same share", &key).unwrap();
        let b = encrypt_share(b"same share", &key).unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_every_bit_flip_fails() {
        let key = test_key();
        let share = encrypt_share(b"\x01share-payload", &key).unwrap();

        for byte in 0..share.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = share.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(
                    decrypt_share(&tampered, &key),
                    Err(CipherError::Authentication)
                ));
            }
        }
    }

    #[test]
    fn test_wrong_key_or_iv_fails() {
        let key = test_key();
        let share = encrypt_share(b"payload", &key).unwrap();

        assert!(decrypt_share(&share, &test_key()).is_err());

        let mut wrong_iv = share.clone();
        wrong_iv.iv[0] ^= 0xff;
        assert!(decrypt_share(&wrong_iv, &key).is_err());
    }

    #[test]
    fn test_malformed_shares_fail() {
        let key = test_key();
        let mut share = encrypt_share(b"payload", &key).unwrap();

        share.ciphertext.truncate(AUTH_TAG_LEN - 1);
        assert!(matches!(
            decrypt_share(&share, &key),
            Err(CipherError::Malformed(_))
        ));

        let short_iv = EncryptedShare {
            ciphertext: vec![0; 32],
            iv: vec![0; 8],
        };
        assert!(matches!(
            decrypt_share(&short_iv, &key),
            Err(CipherError::Malformed(_))
        ));
    }

    #[test]
    fn test_encoded_form_roundtrip() {
        let key = test_key();
        let share = encrypt_share(b"payload", &key).unwrap();

        let encoded = share.encode();
        assert_eq!(encoded.split(':').count(), 2);

        let decoded = EncryptedShare::decode(&encoded).unwrap();
        assert_eq!(decoded, share);
        assert_eq!(*decrypt_share(&decoded, &key).unwrap(), b"payload");

        assert!(EncryptedShare::decode("no-separator").is_err());
        assert!(EncryptedShare::decode("zz:00").is_err());
    }

    #[test]
    fn test_signing() {
        let (signing_key, verifying_key) = generate_keypair();
        let message = b"transfer 1 SOL";

        let signature = sign_payload(&signing_key, message);

        use ed25519_dalek::Verifier;
        assert!(verifying_key.verify(message, &signature).is_ok());
    }
}
