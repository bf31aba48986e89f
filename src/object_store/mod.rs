mod local;
mod s3;
mod sigv4;

pub use local::LocalStore;
pub use s3::{S3Config, S3Store};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object reference: {0}")]
    InvalidReference(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Object of {size} bytes exceeds the upload limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("Invalid store configuration: {0}")]
    Config(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

impl ObjectStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectStoreError::NotFound(_))
    }
}

/// Metadata returned by a head probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

/// Result of deleting one key inside a batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { key: String },
    Failed { key: String, code: String, message: String },
}

impl DeleteOutcome {
    pub fn key(&self) -> &str {
        match self {
            DeleteOutcome::Deleted { key } | DeleteOutcome::Failed { key, .. } => key,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted { .. })
    }
}

/// Abstraction over bucket-scoped blob storage backends.
///
/// Every backend also owns the mapping between keys and public retrieval
/// URLs, since callers persist the URL and hand it back later.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    /// Metadata-only probe. `None` means the object does not exist; any other
    /// failure is returned as an error.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, ObjectStoreError>;
    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn delete_many(&self, keys: &[String]) -> Result<Vec<DeleteOutcome>, ObjectStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.head(key).await?.is_some())
    }

    /// Public retrieval URL for `key`.
    fn url_for(&self, key: &str) -> Result<Url, ObjectStoreError>;

    /// Recover the key from a URL produced by [`ObjectStore::url_for`].
    fn key_from_url(&self, url: &Url) -> Result<String, ObjectStoreError> {
        key_from_path(url.path())
    }
}

/// Percent-decode a URL path (UTF-8) and strip its single leading `/`.
pub fn key_from_path(path: &str) -> Result<String, ObjectStoreError> {
    let decoded = urlencoding::decode(path)
        .map_err(|e| ObjectStoreError::InvalidReference(format!("{path}: {e}")))?;
    match decoded.strip_prefix('/') {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(ObjectStoreError::InvalidReference(format!(
            "URL path `{path}` does not contain an object key"
        ))),
    }
}

/// Reject keys that cannot survive a trip through a URL path unchanged:
/// URL parsers collapse `.` and `..` segments.
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    if key.is_empty() {
        return Err(ObjectStoreError::InvalidKey("key is empty".to_string()));
    }
    if key.starts_with('/') {
        return Err(ObjectStoreError::InvalidKey(format!(
            "key `{key}` starts with `/`"
        )));
    }
    if key.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(ObjectStoreError::InvalidKey(format!(
            "key `{key}` contains a relative path segment"
        )));
    }
    Ok(())
}

/// Percent-encode a key for use as a URL path, leaving unreserved characters
/// and `/` separators as they are.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_path_strips_leading_slash() {
        assert_eq!(key_from_path("/abc_cover.png").unwrap(), "abc_cover.png");
    }

    #[test]
    fn test_key_from_path_decodes_utf8() {
        let key = key_from_path("/users/profile/%ED%81%B4%EB%A6%B0%20%EC%BD%94%EB%93%9C.png").unwrap();
        assert_eq!(key, "users/profile/클린 코드.png");
    }

    #[test]
    fn test_key_from_path_keeps_plus_literal() {
        assert_eq!(key_from_path("/a+b.txt").unwrap(), "a+b.txt");
    }

    #[test]
    fn test_key_from_path_rejects_empty() {
        assert!(matches!(
            key_from_path("/"),
            Err(ObjectStoreError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_key_from_path_rejects_invalid_utf8() {
        assert!(matches!(
            key_from_path("/%FF%FE"),
            Err(ObjectStoreError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("users/profile/abc_photo.jpg").is_ok());
        assert!(validate_key("a..b/c.d").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("users/../secret").is_err());
        assert!(validate_key("./x").is_err());
    }

    #[test]
    fn test_encode_key_round_trip() {
        let keys = [
            "plain.txt",
            "users/profile/9f1c_photo 1.jpg",
            "a%20b+c?d#e&f=g.gif",
            "책 표지/클린 코드 (2판).png",
            "emoji_🎉.txt",
        ];
        for key in keys {
            let path = format!("/{}", encode_key(key));
            assert_eq!(key_from_path(&path).unwrap(), key);
        }
    }
}
