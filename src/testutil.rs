//! Shared test helpers for library-backend unit tests.

use std::sync::Arc;

use crate::files::FileStorage;
use crate::library::Library;
use crate::object_store::LocalStore;
use crate::storage::Database;

pub const TEST_PUBLIC_URL: &str = "http://localhost:8080/files/";

/// Create file storage backed by a local store in a temporary directory.
pub fn test_files(temp_dir: &tempfile::TempDir) -> FileStorage {
    let store = LocalStore::new(temp_dir.path().join("files"), TEST_PUBLIC_URL)
        .expect("Failed to create test object store");
    FileStorage::new(Arc::new(store), 10 * 1024 * 1024) // 10MB for tests
}

/// Create a test Library with a temporary database and local object store.
pub fn test_library(temp_dir: &tempfile::TempDir) -> Library {
    let db = Database::open(temp_dir.path().join("data")).expect("Failed to open test database");
    Library::new(db, test_files(temp_dir))
}
