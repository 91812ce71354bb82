//! Database schemas for keyshard
//!
//! One collection of encrypted shares per store, plus the custody records
//! kept alongside store A.

mod custody_record;
mod metadata;
mod share;

pub use custody_record::{CustodyRecordDoc, CUSTODY_RECORD_COLLECTION};
pub use metadata::Metadata;
pub use share::{KeyShareDoc, KEY_SHARE_COLLECTION};
