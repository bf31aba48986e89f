use chrono::NaiveDate;
use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::Book;
use super::tables::*;

/// Optional predicates for [`Database::search_books`]. An absent predicate
/// matches every book; price bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct BookSearch {
    pub author: Option<String>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
}

impl BookSearch {
    fn matches(&self, book: &Book) -> bool {
        self.author.as_deref().is_none_or(|a| book.author == a)
            && self.min_price.is_none_or(|min| book.price >= min)
            && self.max_price.is_none_or(|max| book.price <= max)
    }
}

impl Database {
    // ========================================================================
    // Book operations
    // ========================================================================

    /// Insert or replace a book and maintain the ISBN and author indexes.
    pub fn save_book(&self, book: &Book) -> Result<(), DatabaseError> {
        debug_assert!(!book.id.is_empty(), "book id must not be empty");

        let write_txn = self.begin_write()?;
        {
            let isbn_owner = {
                let isbn_table = write_txn.open_table(BOOK_ISBNS)?;
                let owner = isbn_table
                    .get(book.isbn.as_str())?
                    .map(|v| v.value().to_string());
                owner
            };
            if let Some(owner) = isbn_owner {
                if owner != book.id {
                    return Err(DatabaseError::DuplicateIsbn {
                        isbn: book.isbn.clone(),
                        book_id: owner,
                    });
                }
            }

            // Drop stale index entries when an existing record changes
            if let Some(previous) = read_book(&write_txn, &book.id)? {
                if previous.isbn != book.isbn {
                    let mut isbn_table = write_txn.open_table(BOOK_ISBNS)?;
                    isbn_table.remove(previous.isbn.as_str())?;
                }
                if previous.author != book.author {
                    remove_from_author_index(&write_txn, &previous.author, &book.id)?;
                }
            }

            let mut table = write_txn.open_table(BOOKS)?;
            let data = rmp_serde::to_vec_named(book)?;
            table.insert(book.id.as_str(), data.as_slice())?;

            let mut isbn_table = write_txn.open_table(BOOK_ISBNS)?;
            isbn_table.insert(book.isbn.as_str(), book.id.as_str())?;

            add_to_author_index(&write_txn, &book.author, &book.id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a book by its UUID
    pub fn get_book(&self, id: &str) -> Result<Option<Book>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BOOKS)?;

        let book = match table.get(id)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        Ok(book)
    }

    /// Get a book by its ISBN (resolves isbn -> uuid -> book)
    pub fn find_by_isbn(&self, isbn: &str) -> Result<Option<Book>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let isbn_table = read_txn.open_table(BOOK_ISBNS)?;

        let id = match isbn_table.get(isbn)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let books_table = read_txn.open_table(BOOKS)?;
        let book = match books_table.get(id.as_str())? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        Ok(book)
    }

    /// All books written by exactly `author`
    pub fn find_by_author(&self, author: &str) -> Result<Vec<Book>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let author_table = read_txn.open_table(AUTHOR_BOOKS)?;
        let books_table = read_txn.open_table(BOOKS)?;

        let book_ids: Vec<String> = match author_table.get(author)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut books: Vec<Book> = Vec::with_capacity(book_ids.len());
        for book_id in book_ids {
            if let Some(data) = books_table.get(book_id.as_str())? {
                books.push(rmp_serde::from_slice(data.value())?);
            }
        }

        sort_books(&mut books);
        Ok(books)
    }

    /// Every book in the catalog, oldest first
    pub fn get_all_books(&self) -> Result<Vec<Book>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BOOKS)?;

        let mut books: Vec<Book> = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            books.push(rmp_serde::from_slice(value.value())?);
        }

        sort_books(&mut books);
        Ok(books)
    }

    /// Books priced above `min_price` and published after `cutoff`.
    /// Books without a publish date never match.
    pub fn find_expensive_recent_books(
        &self,
        min_price: u64,
        cutoff: NaiveDate,
    ) -> Result<Vec<Book>, DatabaseError> {
        Ok(self
            .get_all_books()?
            .into_iter()
            .filter(|b| b.price > min_price && b.published_date.is_some_and(|d| d > cutoff))
            .collect())
    }

    /// Combine the optional predicates of `search`; no predicates returns
    /// every book.
    pub fn search_books(&self, search: &BookSearch) -> Result<Vec<Book>, DatabaseError> {
        // Use author index when author is provided
        let candidates = match search.author.as_deref() {
            Some(author) => self.find_by_author(author)?,
            None => self.get_all_books()?,
        };

        Ok(candidates
            .into_iter()
            .filter(|b| search.matches(b))
            .collect())
    }

    /// Set or clear a book's cover reference. Returns the record as it was
    /// before the change, or `None` when the book does not exist.
    pub fn update_cover(
        &self,
        id: &str,
        cover_url: Option<&str>,
    ) -> Result<Option<Book>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let previous = read_book(&write_txn, id)?;
        if let Some(ref previous) = previous {
            let mut book = previous.clone();
            book.cover_url = cover_url.map(|s| s.to_string());
            book.updated_at = chrono::Utc::now();

            let data = rmp_serde::to_vec_named(&book)?;
            let mut table = write_txn.open_table(BOOKS)?;
            table.insert(id, data.as_slice())?;
        }

        write_txn.commit()?;
        Ok(previous)
    }

    /// Delete a book by its UUID and clean up the ISBN and author indexes.
    /// Returns the deleted record.
    pub fn delete_book(&self, id: &str) -> Result<Option<Book>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let deleted = read_book(&write_txn, id)?;
        if let Some(ref book) = deleted {
            {
                let mut table = write_txn.open_table(BOOKS)?;
                table.remove(id)?;
            }
            {
                let mut isbn_table = write_txn.open_table(BOOK_ISBNS)?;
                isbn_table.remove(book.isbn.as_str())?;
            }
            remove_from_author_index(&write_txn, &book.author, id)?;
        }

        write_txn.commit()?;
        Ok(deleted)
    }

    /// Check if an ISBN is already in use
    pub fn isbn_exists(&self, isbn: &str) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BOOK_ISBNS)?;
        let exists = table.get(isbn)?.is_some();
        Ok(exists)
    }

    /// Check if a book record exists without decoding it
    pub fn book_exists(&self, id: &str) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BOOKS)?;
        let exists = table.get(id)?.is_some();
        Ok(exists)
    }
}

fn read_book(write_txn: &WriteTransaction, id: &str) -> Result<Option<Book>, DatabaseError> {
    let table = write_txn.open_table(BOOKS)?;
    let book = match table.get(id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(book)
}

fn add_to_author_index(
    write_txn: &WriteTransaction,
    author: &str,
    id: &str,
) -> Result<(), DatabaseError> {
    let mut author_table = write_txn.open_table(AUTHOR_BOOKS)?;
    let mut book_ids: Vec<String> = match author_table.get(author)? {
        Some(data) => rmp_serde::from_slice(data.value())?,
        None => Vec::new(),
    };

    if !book_ids.iter().any(|b| b == id) {
        book_ids.push(id.to_string());
        let data = rmp_serde::to_vec_named(&book_ids)?;
        author_table.insert(author, data.as_slice())?;
    }
    Ok(())
}

fn remove_from_author_index(
    write_txn: &WriteTransaction,
    author: &str,
    id: &str,
) -> Result<(), DatabaseError> {
    let mut author_table = write_txn.open_table(AUTHOR_BOOKS)?;
    let book_ids: Option<Vec<String>> = match author_table.get(author)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };

    if let Some(mut ids) = book_ids {
        ids.retain(|b| b != id);
        if ids.is_empty() {
            author_table.remove(author)?;
        } else {
            let data = rmp_serde::to_vec_named(&ids)?;
            author_table.insert(author, data.as_slice())?;
        }
    }
    Ok(())
}

fn sort_books(books: &mut [Book]) {
    books.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
