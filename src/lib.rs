//! keyshard - threshold custody for blockchain signing keys
//!
//! Holds account signing keys on behalf of users without ever storing a
//! whole private key. Each key is split into Shamir shares, every share is
//! encrypted, and the shares are spread across two independent stores.
//! Signing rebuilds the key just in time, signs once and discards it.
//!
//! ## Components
//!
//! - **Encryption**: ChaCha20-Poly1305 with a fresh nonce per share
//! - **Splitting**: Shamir secret sharing over GF(256) with an integrity checksum
//! - **Routing**: fixed partition of shares across Store A and Store B
//! - **Service**: provisioning, signing and transaction submission

pub mod chain;
pub mod config;
pub mod custodial_keys;
pub mod db;
pub mod stores;
pub mod types;

pub use config::{Args, CustodyConfig};
pub use custodial_keys::CustodyService;
pub use types::{CustodyError, Result};
