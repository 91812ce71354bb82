//! Encrypted key share document schema
//!
//! One document per (user, slot). Each share store keeps its own collection
//! in its own database; nothing here links the two.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for key shares
pub const KEY_SHARE_COLLECTION: &str = "key_shares";

/// Encrypted share document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct KeyShareDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Account the share belongs to
    pub user_id: String,

    /// Share index (x-coordinate), 1..=255
    pub slot: i32,

    /// `hex(iv):hex(ciphertext)`
    pub encrypted_share: String,
}

impl KeyShareDoc {
    pub fn new(user_id: &str, slot: u8, encrypted_share: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id: user_id.to_string(),
            slot: i32::from(slot),
            encrypted_share,
        }
    }
}

impl IntoIndexes for KeyShareDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One share per slot; makes writes create-only
            (
                doc! { "user_id": 1, "slot": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_slot_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for KeyShareDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
