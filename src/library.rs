//! Application service tying the book catalog to cover storage.

use bytes::Bytes;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, warn};

use crate::files::{FileStorage, ObjectReference};
use crate::object_store::{DeleteOutcome, ObjectStoreError};
use crate::storage::models::Book;
use crate::storage::{BookSearch, Database, DatabaseError};

/// Key prefix for cover images.
pub const COVER_FOLDER: &str = "books/covers/";

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Book not found: {0}")]
    BookNotFound(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

/// Fields supplied when cataloguing a new book.
#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub price: u64,
    pub published_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct Library {
    db: Database,
    files: FileStorage,
}

impl Library {
    pub fn new(db: Database, files: FileStorage) -> Self {
        Self { db, files }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn files(&self) -> &FileStorage {
        &self.files
    }

    pub fn add_book(&self, new: NewBook) -> Result<Book, LibraryError> {
        let mut book = Book::new(new.title, new.author, new.isbn, new.price);
        book.published_date = new.published_date;
        self.db.save_book(&book)?;
        info!(id = %book.id, isbn = %book.isbn, "Book added");
        Ok(book)
    }

    pub fn search(&self, search: &BookSearch) -> Result<Vec<Book>, LibraryError> {
        Ok(self.db.search_books(search)?)
    }

    /// Upload a new cover and point the book at it. A previous cover is
    /// deleted afterwards; failing to delete it only leaves an orphan blob.
    /// The new upload is discarded again if the record cannot be updated.
    pub async fn set_cover(
        &self,
        book_id: &str,
        data: Bytes,
        content_type: &str,
        original_name: &str,
    ) -> Result<ObjectReference, LibraryError> {
        if !self.db.book_exists(book_id)? {
            return Err(LibraryError::BookNotFound(book_id.to_string()));
        }

        let reference = self
            .files
            .upload_to_folder(data, content_type, original_name, COVER_FOLDER)
            .await?;

        let previous = match self.db.update_cover(book_id, Some(reference.as_str())) {
            Ok(Some(previous)) => previous,
            Ok(None) => {
                // Book vanished between lookup and update
                self.discard_cover(reference.as_str()).await;
                return Err(LibraryError::BookNotFound(book_id.to_string()));
            }
            Err(e) => {
                self.discard_cover(reference.as_str()).await;
                return Err(e.into());
            }
        };

        if let Some(old) = previous.cover_url {
            self.discard_cover(&old).await;
        }

        Ok(reference)
    }

    /// Cover bytes, or `None` when the book has no cover.
    pub async fn cover(&self, book_id: &str) -> Result<Option<Bytes>, LibraryError> {
        let book = self
            .db
            .get_book(book_id)?
            .ok_or_else(|| LibraryError::BookNotFound(book_id.to_string()))?;

        match book.cover_url {
            Some(url) => {
                let reference = ObjectReference::parse(&url)?;
                Ok(Some(self.files.download(&reference).await?))
            }
            None => Ok(None),
        }
    }

    /// Delete a book record, then its cover. Returns `false` if the book did
    /// not exist.
    pub async fn remove_book(&self, book_id: &str) -> Result<bool, LibraryError> {
        let Some(book) = self.db.delete_book(book_id)? else {
            return Ok(false);
        };

        if let Some(reference) = self.stored_cover(&book) {
            self.files.delete(&reference).await?;
        }

        info!(id = %book_id, "Book removed");
        Ok(true)
    }

    /// Delete several book records, then all of their covers in one batch.
    pub async fn remove_books(&self, book_ids: &[String]) -> Result<Vec<DeleteOutcome>, LibraryError> {
        let mut covers = Vec::new();
        for book_id in book_ids {
            if let Some(book) = self.db.delete_book(book_id)? {
                covers.extend(self.stored_cover(&book));
            }
        }

        Ok(self.files.delete_batch(&covers).await?)
    }

    /// Reference to a book's cover blob. A stored URL that does not resolve
    /// to a key in this store cannot locate anything and is skipped.
    fn stored_cover(&self, book: &Book) -> Option<ObjectReference> {
        let url = book.cover_url.as_deref()?;
        let resolved = ObjectReference::parse(url)
            .and_then(|reference| self.files.key_of(&reference).map(|_| reference));
        match resolved {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(id = %book.id, url, error = %e, "Skipping unresolvable cover URL");
                None
            }
        }
    }

    async fn discard_cover(&self, url: &str) {
        let result = match ObjectReference::parse(url) {
            Ok(reference) => self.files.delete(&reference).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(url, error = %e, "Failed to delete cover");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_library;

    fn new_book(isbn: &str) -> NewBook {
        NewBook {
            title: "클린 코드".to_string(),
            author: "로버트 마틴".to_string(),
            isbn: isbn.to_string(),
            price: 30000,
            published_date: NaiveDate::from_ymd_opt(2013, 12, 24),
        }
    }

    #[tokio::test]
    async fn test_set_cover_stores_reference_on_book() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);
        let book = library.add_book(new_book("123")).unwrap();

        let reference = library
            .set_cover(&book.id, Bytes::from("png-bytes"), "image/png", "cover.png")
            .await
            .unwrap();

        let key = library.files().key_of(&reference).unwrap();
        assert!(key.as_str().starts_with(COVER_FOLDER));

        let stored = library.db().get_book(&book.id).unwrap().unwrap();
        assert_eq!(stored.cover_url.as_deref(), Some(reference.as_str()));
        assert_eq!(
            library.cover(&book.id).await.unwrap(),
            Some(Bytes::from("png-bytes"))
        );
    }

    #[tokio::test]
    async fn test_replacing_cover_deletes_previous_blob() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);
        let book = library.add_book(new_book("123")).unwrap();

        let first = library
            .set_cover(&book.id, Bytes::from("v1"), "image/png", "cover.png")
            .await
            .unwrap();
        let second = library
            .set_cover(&book.id, Bytes::from("v2"), "image/png", "cover.png")
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(!library.files().exists(&first).await.unwrap());
        assert!(library.files().exists(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_cover_unknown_book() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);

        let result = library
            .set_cover("missing", Bytes::from("x"), "image/png", "cover.png")
            .await;
        assert!(matches!(result, Err(LibraryError::BookNotFound(_))));
    }

    #[tokio::test]
    async fn test_cover_absent() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);
        let book = library.add_book(new_book("123")).unwrap();

        assert_eq!(library.cover(&book.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_book_deletes_cover() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);
        let book = library.add_book(new_book("123")).unwrap();
        let reference = library
            .set_cover(&book.id, Bytes::from("x"), "", "cover.jpg")
            .await
            .unwrap();

        assert!(library.remove_book(&book.id).await.unwrap());
        assert!(library.db().get_book(&book.id).unwrap().is_none());
        assert!(!library.files().exists(&reference).await.unwrap());
        assert!(!library.remove_book(&book.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_books_batch_deletes_covers() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);

        let mut ids = Vec::new();
        let mut references = Vec::new();
        for isbn in ["1", "2", "3"] {
            let book = library.add_book(new_book(isbn)).unwrap();
            references.push(
                library
                    .set_cover(&book.id, Bytes::from(isbn), "image/png", "cover.png")
                    .await
                    .unwrap(),
            );
            ids.push(book.id);
        }
        // A book without a cover contributes nothing to the batch
        ids.push(library.add_book(new_book("4")).unwrap().id);

        let outcomes = library.remove_books(&ids).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(DeleteOutcome::is_deleted));
        for reference in &references {
            assert!(!library.files().exists(reference).await.unwrap());
        }
        assert!(library.db().get_all_books().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_books_skips_unresolvable_cover() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);

        let first = library.add_book(new_book("1")).unwrap();
        let reference = library
            .set_cover(&first.id, Bytes::from("x"), "image/png", "cover.png")
            .await
            .unwrap();
        let second = library.add_book(new_book("2")).unwrap();
        library
            .db()
            .update_cover(&second.id, Some("not a url"))
            .unwrap();
        let third = library.add_book(new_book("3")).unwrap();
        library
            .db()
            .update_cover(&third.id, Some("http://elsewhere.example/cover.png"))
            .unwrap();

        let outcomes = library
            .remove_books(&[first.id, second.id, third.id])
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_deleted());
        assert!(!library.files().exists(&reference).await.unwrap());
        assert!(library.db().get_all_books().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_book_with_unresolvable_cover() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);
        let book = library.add_book(new_book("123")).unwrap();
        library.db().update_cover(&book.id, Some("not a url")).unwrap();

        assert!(library.remove_book(&book.id).await.unwrap());
        assert!(library.db().get_book(&book.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_cover_discards_upload_when_record_update_fails() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);

        // A record that exists but cannot be decoded
        let write_txn = library.db().begin_write().unwrap();
        {
            let mut table = write_txn.open_table(crate::storage::BOOKS).unwrap();
            table.insert("corrupt", [0xc1u8].as_slice()).unwrap();
        }
        write_txn.commit().unwrap();

        let result = library
            .set_cover("corrupt", Bytes::from("x"), "image/png", "cover.png")
            .await;
        assert!(matches!(result, Err(LibraryError::Database(_))));

        let covers = dir.path().join("files/objects").join(COVER_FOLDER);
        assert_eq!(std::fs::read_dir(covers).unwrap().count(), 0);
    }

    #[test]
    fn test_add_book_rejects_duplicate_isbn() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(&dir);
        library.add_book(new_book("123")).unwrap();

        assert!(matches!(
            library.add_book(new_book("123")),
            Err(LibraryError::Database(DatabaseError::DuplicateIsbn { .. }))
        ));
    }
}
