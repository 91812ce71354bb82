//! Custody record document schema
//!
//! Maps a user to their public key and the location of each share.
//! Written once at provisioning; holds no secret material.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::custodial_keys::{CustodyRecord, ShareLocation};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::stores::StoreError;
use crate::types::StoreId;

/// Collection name for custody records
pub const CUSTODY_RECORD_COLLECTION: &str = "custody_records";

/// Location of one share within a custody record document
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ShareLocationDoc {
    pub store: StoreId,
    pub slot: i32,
}

/// Custody record document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CustodyRecordDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Account identifier (unique)
    pub user_id: String,

    /// Base58 Ed25519 public key
    pub public_key: String,

    /// Shares the key was split into (N)
    pub total_shares: i32,

    /// Shares needed to rebuild (T)
    pub threshold: i32,

    /// Where each share lives
    #[serde(default)]
    pub locations: Vec<ShareLocationDoc>,

    /// When the account was provisioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioned_at: Option<DateTime>,
}

impl From<&CustodyRecord> for CustodyRecordDoc {
    fn from(record: &CustodyRecord) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id: record.user_id.clone(),
            public_key: record.public_key.clone(),
            total_shares: record.total_shares as i32,
            threshold: record.threshold as i32,
            locations: record
                .locations
                .iter()
                .map(|l| ShareLocationDoc {
                    store: l.store,
                    slot: i32::from(l.slot),
                })
                .collect(),
            provisioned_at: Some(DateTime::from_chrono(record.created_at)),
        }
    }
}

impl TryFrom<CustodyRecordDoc> for CustodyRecord {
    type Error = StoreError;

    fn try_from(doc: CustodyRecordDoc) -> Result<Self, Self::Error> {
        let invalid = |field: &str| {
            StoreError::Backend(format!(
                "custody record for {} has invalid {}",
                doc.user_id, field
            ))
        };

        let total_shares = usize::try_from(doc.total_shares).map_err(|_| invalid("total_shares"))?;
        let threshold = usize::try_from(doc.threshold).map_err(|_| invalid("threshold"))?;
        let locations = doc
            .locations
            .iter()
            .map(|l| {
                u8::try_from(l.slot)
                    .map(|slot| ShareLocation {
                        store: l.store,
                        slot,
                    })
                    .map_err(|_| invalid("slot"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let created_at = doc
            .provisioned_at
            .or(doc.metadata.created_at)
            .ok_or_else(|| invalid("provisioned_at"))?
            .to_chrono();

        Ok(CustodyRecord {
            user_id: doc.user_id,
            public_key: doc.public_key,
            total_shares,
            threshold,
            locations,
            created_at,
        })
    }
}

impl IntoIndexes for CustodyRecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One record per user; makes provisioning create-once
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_id_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CustodyRecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
