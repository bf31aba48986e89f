use bytes::Bytes;
use library_backend::object_store::{
    DeleteOutcome, LocalStore, ObjectMeta, ObjectStore, ObjectStoreError,
};

const PUBLIC_URL: &str = "http://localhost:8080/files/";

fn local_store(dir: &tempfile::TempDir) -> LocalStore {
    LocalStore::new(dir.path(), PUBLIC_URL).unwrap()
}

#[tokio::test]
async fn test_local_store_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let data = Bytes::from("hello world");
    store.put("test-key", data.clone(), "text/plain").await.unwrap();

    let retrieved = store.get("test-key").await.unwrap();
    assert_eq!(retrieved, data);
}

#[tokio::test]
async fn test_local_store_nested_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    store
        .put("users/profile/abc_me.jpg", Bytes::from("jpeg"), "image/jpeg")
        .await
        .unwrap();
    assert_eq!(
        store.get("users/profile/abc_me.jpg").await.unwrap(),
        Bytes::from("jpeg")
    );
}

#[tokio::test]
async fn test_local_store_head() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    assert_eq!(store.head("missing").await.unwrap(), None);

    store
        .put("present.png", Bytes::from("12345"), "image/png")
        .await
        .unwrap();
    assert_eq!(
        store.head("present.png").await.unwrap(),
        Some(ObjectMeta {
            size: 5,
            content_type: Some("image/png".to_string()),
        })
    );
}

#[tokio::test]
async fn test_local_store_exists() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    assert!(!store.exists("missing").await.unwrap());

    store
        .put("present", Bytes::from("data"), "text/plain")
        .await
        .unwrap();
    assert!(store.exists("present").await.unwrap());
}

#[tokio::test]
async fn test_local_store_folder_is_not_an_object() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    store
        .put("books/covers/a.png", Bytes::from("data"), "image/png")
        .await
        .unwrap();
    assert!(!store.exists("books/covers").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    store
        .put("to-delete", Bytes::from("data"), "text/plain")
        .await
        .unwrap();
    assert!(store.exists("to-delete").await.unwrap());

    store.delete("to-delete").await.unwrap();
    assert!(!store.exists("to-delete").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete_nonexistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    // Deleting a nonexistent key should not error
    store.delete("nonexistent").await.unwrap();
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let result = store.get("missing").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let result = store
        .put("../escape.txt", Bytes::from("data"), "text/plain")
        .await;
    assert!(matches!(result, Err(ObjectStoreError::InvalidKey(_))));
    assert!(matches!(
        store.get("a/../../b").await,
        Err(ObjectStoreError::InvalidKey(_))
    ));
}

#[tokio::test]
async fn test_local_store_delete_many() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    for key in ["a", "b", "c"] {
        store.put(key, Bytes::from(key), "text/plain").await.unwrap();
    }

    let keys = vec!["a".to_string(), "b".to_string(), "never-existed".to_string()];
    let outcomes = store.delete_many(&keys).await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            DeleteOutcome::Deleted {
                key: "a".to_string()
            },
            DeleteOutcome::Deleted {
                key: "b".to_string()
            },
            DeleteOutcome::Deleted {
                key: "never-existed".to_string()
            },
        ]
    );
    assert!(!store.exists("a").await.unwrap());
    assert!(!store.exists("b").await.unwrap());
    assert!(store.exists("c").await.unwrap());
}

#[tokio::test]
async fn test_local_store_url_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let key = "users/profile/0f6d_클린 코드 (2판)+50%.png";
    let url = store.url_for(key).unwrap();
    assert!(url.as_str().starts_with(PUBLIC_URL));
    assert_eq!(store.key_from_url(&url).unwrap(), key);
}
