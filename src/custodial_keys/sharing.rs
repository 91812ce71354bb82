//! Threshold secret sharing over GF(256).
//!
//! Built on `sharks`: each byte of the payload is the constant term of its
//! own random degree-(T-1) polynomial, evaluated at x = 1..=N. Any T shares
//! recover the payload; T-1 shares are uniformly distributed whatever the
//! secret.
//!
//! The payload is the secret followed by an 8-byte SHA-256 checksum. Shamir
//! happily interpolates *some* value from any well-formed shares, so the
//! checksum is what turns swapped indices, corrupted shares or a wrong
//! threshold into [`SplitError::Mismatch`] instead of a silent wrong key.

use std::fmt;

use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use sharks::Sharks;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Bytes of SHA-256 appended to the secret before sharing
pub const CHECKSUM_LEN: usize = 8;

/// GF(256) has 255 nonzero x-coordinates
pub const MAX_SHARES: usize = 255;

/// Errors from splitting and combining.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("invalid threshold {threshold} of {total}")]
    InvalidThreshold { total: usize, threshold: usize },

    #[error("insufficient shares: need {required}, got {provided}")]
    InsufficientShares { required: usize, provided: usize },

    #[error("{0}")]
    Mismatch(String),
}

/// One share: its x-coordinate and one evaluation per payload byte.
///
/// Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    index: u8,
    payload: Vec<u8>,
}

/// The N shares produced by one [`split`].
pub type ShareSet = Vec<Share>;

impl Share {
    pub fn new(index: u8, payload: Vec<u8>) -> Self {
        Self { index, payload }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialised form: index byte followed by the payload.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(1 + self.payload.len()));
        bytes.push(self.index);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse the serialised form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SplitError> {
        match bytes.split_first() {
            None => Err(SplitError::Mismatch("empty share".into())),
            Some((0, _)) => Err(SplitError::Mismatch("share index cannot be 0".into())),
            Some((&index, payload)) => Ok(Self::new(index, payload.to_vec())),
        }
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("len", &self.payload.len())
            .finish()
    }
}

fn checksum(secret: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(secret);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

fn check_threshold(total: usize, threshold: usize) -> Result<(), SplitError> {
    if threshold < 2 || threshold > total || total > MAX_SHARES {
        return Err(SplitError::InvalidThreshold { total, threshold });
    }
    Ok(())
}

/// Split `secret` into `total` shares, any `threshold` of which recover it.
pub fn split(secret: &[u8], total: usize, threshold: usize) -> Result<ShareSet, SplitError> {
    check_threshold(total, threshold)?;

    let mut payload = Zeroizing::new(Vec::with_capacity(secret.len() + CHECKSUM_LEN));
    payload.extend_from_slice(secret);
    payload.extend_from_slice(&checksum(secret));

    let sharks = Sharks(threshold as u8);
    let shares = sharks
        .dealer_rng(&payload, &mut OsRng)
        .take(total)
        .map(|share| {
            let bytes = Zeroizing::new(Vec::<u8>::from(&share));
            Share::from_bytes(&bytes)
        })
        .collect::<Result<ShareSet, _>>()?;

    if shares.len() != total {
        return Err(SplitError::InvalidThreshold { total, threshold });
    }
    Ok(shares)
}

/// Recover the secret from at least `threshold` distinct shares.
///
/// Shares with a repeated index count once. Only the first `threshold`
/// distinct shares are interpolated.
pub fn combine(shares: &[Share], threshold: usize) -> Result<Zeroizing<Vec<u8>>, SplitError> {
    if threshold < 2 || threshold > MAX_SHARES {
        return Err(SplitError::InvalidThreshold {
            total: shares.len(),
            threshold,
        });
    }

    let mut distinct: Vec<&Share> = Vec::with_capacity(shares.len());
    for share in shares {
        if share.index == 0 {
            return Err(SplitError::Mismatch("share index cannot be 0".into()));
        }
        match distinct.iter().find(|s| s.index == share.index) {
            Some(seen) if seen.payload != share.payload => {
                return Err(SplitError::Mismatch(format!(
                    "conflicting shares for index {}",
                    share.index
                )));
            }
            Some(_) => {}
            None => distinct.push(share),
        }
    }

    if distinct.len() < threshold {
        return Err(SplitError::InsufficientShares {
            required: threshold,
            provided: distinct.len(),
        });
    }

    let quorum = &distinct[..threshold];
    let len = quorum[0].payload.len();
    if len < CHECKSUM_LEN || quorum.iter().any(|s| s.payload.len() != len) {
        return Err(SplitError::Mismatch("inconsistent share lengths".into()));
    }

    let points = quorum
        .iter()
        .map(|s| sharks::Share::try_from(s.to_bytes().as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SplitError::Mismatch(e.to_string()))?;

    let payload = Zeroizing::new(
        Sharks(threshold as u8)
            .recover(&points)
            .map_err(|e| SplitError::Mismatch(e.to_string()))?,
    );

    let (secret, tag) = payload.split_at(len - CHECKSUM_LEN);
    if checksum(secret) != tag {
        return Err(SplitError::Mismatch(
            "recovered secret failed its checksum".into(),
        ));
    }

    Ok(Zeroizing::new(secret.to_vec()))
}
