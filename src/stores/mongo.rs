//! MongoDB-backed stores.
//!
//! Store A and Store B are two [`MongoShareStore`]s over independent
//! databases. Custody records live in their own collection.

use async_trait::async_trait;
use bson::doc;
use tracing::warn;

use crate::custodial_keys::{CustodyRecord, EncryptedShare};
use crate::db::schemas::{
    CustodyRecordDoc, KeyShareDoc, CUSTODY_RECORD_COLLECTION, KEY_SHARE_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};

use super::{CustodyRecordStore, ShareStore, StoreError, StoredShare};

/// Share store over one MongoDB database.
#[derive(Clone)]
pub struct MongoShareStore {
    collection: MongoCollection<KeyShareDoc>,
}

impl MongoShareStore {
    /// Open the share collection and ensure its indexes.
    pub async fn connect(client: &MongoClient) -> Result<Self, StoreError> {
        Ok(Self {
            collection: client.collection(KEY_SHARE_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl ShareStore for MongoShareStore {
    async fn put(
        &self,
        user_id: &str,
        slot: u8,
        share: &EncryptedShare,
    ) -> Result<(), StoreError> {
        let doc = KeyShareDoc::new(user_id, slot, share.encode());
        match self.collection.insert_one(doc).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::Conflict { slot }),
        }
    }

    async fn get(&self, user_id: &str) -> Result<Vec<StoredShare>, StoreError> {
        let docs = self
            .collection
            .find_many(doc! { "user_id": user_id })
            .await?;

        let mut shares = Vec::with_capacity(docs.len());
        for doc in docs {
            let Ok(slot) = u8::try_from(doc.slot) else {
                warn!(user_id = %user_id, slot = doc.slot, "Ignoring share with invalid slot");
                continue;
            };
            // Undecodable content still occupies its slot; the caller decides
            shares.push(StoredShare {
                slot,
                share: EncryptedShare::decode(&doc.encrypted_share),
            });
        }
        Ok(shares)
    }

    async fn delete(
        &self,
        user_id: &str,
        slot: u8,
        share: &EncryptedShare,
    ) -> Result<bool, StoreError> {
        self.collection
            .delete_one(doc! {
                "user_id": user_id,
                "slot": i32::from(slot),
                "encrypted_share": share.encode(),
            })
            .await
    }
}

/// Custody record store over one MongoDB database.
#[derive(Clone)]
pub struct MongoCustodyRecordStore {
    collection: MongoCollection<CustodyRecordDoc>,
}

impl MongoCustodyRecordStore {
    /// Open the custody record collection and ensure its indexes.
    pub async fn connect(client: &MongoClient) -> Result<Self, StoreError> {
        Ok(Self {
            collection: client.collection(CUSTODY_RECORD_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl CustodyRecordStore for MongoCustodyRecordStore {
    async fn insert(&self, record: &CustodyRecord) -> Result<bool, StoreError> {
        let inserted = self
            .collection
            .insert_one(CustodyRecordDoc::from(record))
            .await?;
        Ok(inserted.is_some())
    }

    async fn get(&self, user_id: &str) -> Result<Option<CustodyRecord>, StoreError> {
        self.collection
            .find_one(doc! { "user_id": user_id })
            .await?
            .map(CustodyRecord::try_from)
            .transpose()
    }
}
