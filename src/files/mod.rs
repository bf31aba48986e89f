//! Blob storage facade used by the rest of the application.
//!
//! Callers hand over raw content plus the uploaded file's name and get back an
//! [`ObjectReference`]: the public URL of the stored object. That URL is the
//! only handle callers persist, so every later read or delete starts by
//! recovering the object key from it.

mod key;
mod reference;

pub use key::ObjectKey;
pub use reference::ObjectReference;

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::object_store::{DeleteOutcome, ObjectStore, ObjectStoreError};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Shared, cheaply clonable handle over one configured bucket.
#[derive(Clone)]
pub struct FileStorage {
    store: Arc<dyn ObjectStore>,
    max_upload_size: u64,
}

impl FileStorage {
    pub fn new(store: Arc<dyn ObjectStore>, max_upload_size: u64) -> Self {
        Self {
            store,
            max_upload_size,
        }
    }

    /// Store `data` under a fresh key at the bucket root.
    pub async fn upload(
        &self,
        data: Bytes,
        content_type: &str,
        original_name: &str,
    ) -> Result<ObjectReference, ObjectStoreError> {
        let key = ObjectKey::generate(original_name)?;
        self.store_blob(data, content_type, key).await
    }

    /// Store `data` under a fresh key beginning with `folder`
    /// (e.g. `users/profile/` yields `users/profile/{uuid}_{name}`).
    pub async fn upload_to_folder(
        &self,
        data: Bytes,
        content_type: &str,
        original_name: &str,
        folder: &str,
    ) -> Result<ObjectReference, ObjectStoreError> {
        let key = ObjectKey::generate_in(folder, original_name)?;
        self.store_blob(data, content_type, key).await
    }

    async fn store_blob(
        &self,
        data: Bytes,
        content_type: &str,
        key: ObjectKey,
    ) -> Result<ObjectReference, ObjectStoreError> {
        let size = data.len() as u64;
        if size > self.max_upload_size {
            return Err(ObjectStoreError::TooLarge {
                size,
                limit: self.max_upload_size,
            });
        }

        let content_type = resolve_content_type(content_type, key.as_str());
        let url = self.store.url_for(key.as_str())?;

        self.store.put(key.as_str(), data, &content_type).await?;
        info!(key = %key, size, content_type = %content_type, "Uploaded object");

        Ok(ObjectReference::from(url))
    }

    /// Recover the object key behind a reference.
    pub fn key_of(&self, reference: &ObjectReference) -> Result<ObjectKey, ObjectStoreError> {
        let key = self.store.key_from_url(reference.url())?;
        Ok(ObjectKey::from_existing(key))
    }

    pub async fn download(&self, reference: &ObjectReference) -> Result<Bytes, ObjectStoreError> {
        let key = self.key_of(reference)?;
        let data = self.store.get(key.as_str()).await?;
        debug!(key = %key, size = data.len(), "Downloaded object");
        Ok(data)
    }

    /// `false` only when the store reports the object as absent; every other
    /// failure, including an undecodable reference, is an error.
    pub async fn exists(&self, reference: &ObjectReference) -> Result<bool, ObjectStoreError> {
        let key = self.key_of(reference)?;
        self.store.exists(key.as_str()).await
    }

    /// Idempotent: deleting an absent object succeeds.
    pub async fn delete(&self, reference: &ObjectReference) -> Result<(), ObjectStoreError> {
        let key = self.key_of(reference)?;
        self.store.delete(key.as_str()).await?;
        info!(key = %key, "Deleted object");
        Ok(())
    }

    /// Delete several objects with one batch request. Every reference is
    /// decoded before anything is sent; per-key outcomes are returned in the
    /// store's reporting order.
    pub async fn delete_batch(
        &self,
        references: &[ObjectReference],
    ) -> Result<Vec<DeleteOutcome>, ObjectStoreError> {
        let keys = references
            .iter()
            .map(|r| self.key_of(r).map(ObjectKey::into_string))
            .collect::<Result<Vec<_>, _>>()?;

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = self.store.delete_many(&keys).await?;
        let failed = outcomes.iter().filter(|o| !o.is_deleted()).count();
        if failed > 0 {
            warn!(requested = keys.len(), failed, "Batch delete finished with failures");
        } else {
            info!(requested = keys.len(), "Batch deleted objects");
        }

        Ok(outcomes)
    }
}

/// Guessing uses the key's extension, which is the original file name's.
fn resolve_content_type(content_type: &str, key: &str) -> String {
    let content_type = content_type.trim();
    if !content_type.is_empty() {
        return content_type.to_string();
    }
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}
