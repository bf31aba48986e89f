mod books;
pub mod db;
pub mod models;
mod tables;

pub use books::BookSearch;
pub use db::{Database, DatabaseError};
pub use tables::*;
