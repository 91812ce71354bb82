//! Shared types for keyshard

mod error;

pub use error::{CustodyError, ErrorClass, Result, StoreId, UnavailableStore, UnavailableReason};
