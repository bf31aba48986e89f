//! library-backend - Book catalog with S3-compatible storage for covers and attachments
//!
//! This crate provides:
//! - Swappable object storage backends (S3-compatible, local filesystem)
//! - A file storage facade that issues public URLs as persisted references
//! - redb embedded database for the book catalog (ISBN and author indexes)
//! - A library service that keeps book covers and catalog records in step

pub mod config;
pub mod files;
pub mod library;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;

pub use files::{FileStorage, ObjectKey, ObjectReference};
pub use library::{Library, LibraryError, NewBook};
