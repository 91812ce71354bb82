//! Configuration for keyshard
//!
//! CLI arguments and environment variable handling using clap, plus the
//! immutable [`CustodyConfig`] handed to the custody service.

use std::fmt;
use std::time::Duration;

use clap::{Parser, Subcommand};
use zeroize::Zeroizing;

use crate::custodial_keys::{CustodyRouter, KEY_LEN};
use crate::types::{CustodyError, Result};

/// Reference share count
pub const DEFAULT_TOTAL_SHARES: usize = 4;

/// Reference threshold
pub const DEFAULT_THRESHOLD: usize = 2;

/// Default bound on a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(3000);

/// keyshard - threshold custody for blockchain signing keys
#[derive(Parser, Debug, Clone)]
#[command(name = "keyshard")]
#[command(about = "Split custodial signing keys across two stores and rebuild them just in time")]
pub struct Args {
    /// Process-wide share encryption key (64 hex chars)
    #[arg(long, env = "CUSTODY_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: String,

    /// Number of shares each private key is split into
    #[arg(long, env = "CUSTODY_TOTAL_SHARES", default_value_t = DEFAULT_TOTAL_SHARES)]
    pub total_shares: usize,

    /// Number of shares needed to rebuild a key
    #[arg(long, env = "CUSTODY_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: usize,

    /// Accept layouts where one store alone holds a quorum.
    /// The reference 2-of-4 layout needs this.
    #[arg(
        long,
        env = "CUSTODY_ALLOW_SINGLE_STORE_QUORUM",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub allow_single_store_quorum: bool,

    /// Timeout for a single store call in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "3000")]
    pub store_timeout_ms: u64,

    /// Store A configuration
    #[command(flatten)]
    pub store_a: StoreAArgs,

    /// Store B configuration
    #[command(flatten)]
    pub store_b: StoreBArgs,

    /// Solana JSON-RPC endpoint for broadcasting
    #[arg(long, env = "RPC_URL", default_value = "https://api.devnet.solana.com")]
    pub rpc_url: String,

    /// How long to wait for a broadcast transaction to confirm
    #[arg(long, env = "CONFIRM_TIMEOUT_MS", default_value = "60000")]
    pub confirm_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Store A (primary database, also holds custody records)
#[derive(Parser, Debug, Clone)]
pub struct StoreAArgs {
    /// MongoDB connection URI for store A
    #[arg(long, env = "STORE_A_MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub store_a_uri: String,

    /// MongoDB database name for store A
    #[arg(long, env = "STORE_A_MONGODB_DB", default_value = "keyshard_a")]
    pub store_a_db: String,
}

/// Store B (independent database)
#[derive(Parser, Debug, Clone)]
pub struct StoreBArgs {
    /// MongoDB connection URI for store B
    #[arg(long, env = "STORE_B_MONGODB_URI", default_value = "mongodb://localhost:27018")]
    pub store_b_uri: String,

    /// MongoDB database name for store B
    #[arg(long, env = "STORE_B_MONGODB_DB", default_value = "keyshard_b")]
    pub store_b_db: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a custodial account and print its public key
    Provision { user_id: String },

    /// Print the public key of an account
    PublicKey { user_id: String },

    /// Sign a hex-encoded transaction message
    Sign { user_id: String, message_hex: String },

    /// Sign a hex-encoded transaction message, broadcast it and wait for confirmation
    Submit { user_id: String, message_hex: String },
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        parse_encryption_key(&self.encryption_key).map_err(|e| e.to_string())?;

        CustodyRouter::plan(
            self.total_shares,
            self.threshold,
            self.allow_single_store_quorum,
        )
        .map_err(|e| e.to_string())?;

        if self.store_timeout_ms == 0 {
            return Err("STORE_TIMEOUT_MS must be greater than 0".into());
        }

        if self.store_a.store_a_uri == self.store_b.store_b_uri
            && self.store_a.store_a_db == self.store_b.store_b_db
        {
            return Err("store A and store B must be independent databases".into());
        }

        Ok(())
    }

    /// Build the custody configuration
    pub fn custody_config(&self) -> Result<CustodyConfig> {
        let key = parse_encryption_key(&self.encryption_key)?;
        Ok(CustodyConfig::new(*key)
            .with_shares(self.total_shares, self.threshold)
            .with_single_store_quorum(self.allow_single_store_quorum)
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms)))
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

/// Parse the 64-hex-char encryption key.
pub fn parse_encryption_key(encoded: &str) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let bytes = Zeroizing::new(
        hex::decode(encoded.trim())
            .map_err(|_| CustodyError::Config("encryption key is not valid hex".into()))?,
    );

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    if bytes.len() != KEY_LEN {
        return Err(CustodyError::Config(format!(
            "encryption key must be {} bytes, got {}",
            KEY_LEN,
            bytes.len()
        )));
    }
    key.copy_from_slice(&bytes);
    Ok(key)
}

// =============================================================================
// Custody Config
// =============================================================================

/// Read-only, process-wide custody settings.
#[derive(Clone)]
pub struct CustodyConfig {
    encryption_key: Zeroizing<[u8; KEY_LEN]>,

    /// Shares per key (N)
    pub total_shares: usize,

    /// Shares needed to rebuild (T)
    pub threshold: usize,

    /// Accept partitions where one store alone reaches T
    pub allow_single_store_quorum: bool,

    /// Bound on each store call
    pub store_timeout: Duration,
}

impl CustodyConfig {
    /// Reference configuration (2 of 4, single-store quorum acknowledged).
    pub fn new(encryption_key: [u8; KEY_LEN]) -> Self {
        Self {
            encryption_key: Zeroizing::new(encryption_key),
            total_shares: DEFAULT_TOTAL_SHARES,
            threshold: DEFAULT_THRESHOLD,
            allow_single_store_quorum: true,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_shares(mut self, total_shares: usize, threshold: usize) -> Self {
        self.total_shares = total_shares;
        self.threshold = threshold;
        self
    }

    pub fn with_single_store_quorum(mut self, allow: bool) -> Self {
        self.allow_single_store_quorum = allow;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn encryption_key(&self) -> &[u8; KEY_LEN] {
        &self.encryption_key
    }

    /// Whether a single store can rebuild keys on its own under this layout.
    pub fn single_store_can_reconstruct(&self) -> bool {
        self.total_shares.div_ceil(2) >= self.threshold
    }
}

impl fmt::Debug for CustodyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyConfig")
            .field("encryption_key", &"<redacted>")
            .field("total_shares", &self.total_shares)
            .field("threshold", &self.threshold)
            .field("allow_single_store_quorum", &self.allow_single_store_quorum)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}
