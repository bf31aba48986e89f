use std::fmt;

use uuid::Uuid;

use crate::object_store::{validate_key, ObjectStoreError};

/// Key of a blob inside the bucket: `[folder]{uuid}_{original name}`.
///
/// Uniqueness comes from the random v4 UUID alone; the store is never
/// consulted before writing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Fresh key at the bucket root.
    pub fn generate(original_name: &str) -> Result<Self, ObjectStoreError> {
        Self::generate_in("", original_name)
    }

    /// Fresh key starting with `folder`, used verbatim as a prefix.
    pub fn generate_in(folder: &str, original_name: &str) -> Result<Self, ObjectStoreError> {
        let key = format!("{folder}{}_{original_name}", Uuid::new_v4());
        validate_key(&key)?;
        Ok(Self(key))
    }

    /// Wrap a key recovered from a stored reference.
    pub(crate) fn from_existing(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_layout() {
        let key = ObjectKey::generate("cover.png").unwrap();
        let (token, name) = key.as_str().split_once('_').unwrap();
        assert!(Uuid::parse_str(token).is_ok());
        assert_eq!(name, "cover.png");
    }

    #[test]
    fn test_generate_in_folder_prefix() {
        let key = ObjectKey::generate_in("users/profile/", "me.jpg").unwrap();
        assert!(key.as_str().starts_with("users/profile/"));
        assert!(key.as_str().ends_with("_me.jpg"));
    }

    #[test]
    fn test_generate_allows_empty_name() {
        let key = ObjectKey::generate("").unwrap();
        assert!(key.as_str().ends_with('_'));
    }

    #[test]
    fn test_generate_rejects_relative_segments() {
        assert!(ObjectKey::generate_in("../", "x.png").is_err());
        assert!(ObjectKey::generate_in("/abs/", "x.png").is_err());
        assert!(ObjectKey::generate("a/../b.png").is_err());
    }

    #[test]
    fn test_keys_unique_for_same_name() {
        let keys: HashSet<ObjectKey> = (0..10_000)
            .map(|_| ObjectKey::generate_in("users/profile/", "same.png").unwrap())
            .collect();
        assert_eq!(keys.len(), 10_000);
    }
}
