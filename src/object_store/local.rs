use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use url::Url;

use super::{
    encode_key, key_from_path, validate_key, DeleteOutcome, ObjectMeta, ObjectStore,
    ObjectStoreError,
};

/// Local filesystem object store for development and testing.
///
/// Blobs live under `{base}/objects/{key}`, their content types under
/// `{base}/types/{key}`. References are served from `public_url`.
///
/// Keys map onto directories, so one key cannot be a `/`-separated prefix of
/// another: once `a` is stored, putting `a/b` fails with an IO error (and the
/// other way round). S3 accepts both.
pub struct LocalStore {
    base_path: PathBuf,
    public_url: Url,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P, public_url: &str) -> Result<Self, ObjectStoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(base_path.join("objects"))?;
        std::fs::create_dir_all(base_path.join("types"))?;

        let mut public_url = Url::parse(public_url).map_err(|e| {
            ObjectStoreError::Config(format!("invalid public URL `{public_url}`: {e}"))
        })?;
        if public_url.cannot_be_a_base() {
            return Err(ObjectStoreError::Config(format!(
                "public URL `{public_url}` cannot be a base"
            )));
        }
        if !public_url.path().ends_with('/') {
            let path = format!("{}/", public_url.path());
            public_url.set_path(&path);
        }

        Ok(Self {
            base_path,
            public_url,
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key)?;
        Ok(self.base_path.join("objects").join(key))
    }

    fn type_path(&self, key: &str) -> PathBuf {
        self.base_path.join("types").join(key)
    }

    async fn write_file(path: &Path, data: &[u8]) -> Result<(), ObjectStoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> Result<(), ObjectStoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        Self::write_file(&path, &data).await?;
        Self::write_file(&self.type_path(key), content_type.as_bytes()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, ObjectStoreError> {
        let path = self.object_path(key)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content_type = match tokio::fs::read_to_string(self.type_path(key)).await {
            Ok(content_type) => Some(content_type),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Some(ObjectMeta {
            size: metadata.len(),
            content_type,
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        Self::remove_if_present(&path).await?;
        Self::remove_if_present(&self.type_path(key)).await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<DeleteOutcome>, ObjectStoreError> {
        for key in keys {
            validate_key(key)?;
        }

        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = match self.delete(key).await {
                Ok(()) => DeleteOutcome::Deleted { key: key.clone() },
                Err(e) => DeleteOutcome::Failed {
                    key: key.clone(),
                    code: "IoError".to_string(),
                    message: e.to_string(),
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn url_for(&self, key: &str) -> Result<Url, ObjectStoreError> {
        validate_key(key)?;
        self.public_url
            .join(&encode_key(key))
            .map_err(|e| ObjectStoreError::InvalidKey(format!("{key}: {e}")))
    }

    fn key_from_url(&self, url: &Url) -> Result<String, ObjectStoreError> {
        // Both paths are still percent-encoded here
        let base = self.public_url.path().trim_end_matches('/');
        match url.path().strip_prefix(base) {
            Some(rest) if rest.starts_with('/') => key_from_path(rest),
            _ => Err(ObjectStoreError::InvalidReference(format!(
                "URL `{url}` is not served by {}",
                self.public_url
            ))),
        }
    }
}
