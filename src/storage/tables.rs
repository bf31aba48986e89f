use redb::TableDefinition;

/// Book records: uuid -> Book (msgpack)
pub const BOOKS: TableDefinition<&str, &[u8]> = TableDefinition::new("books");

/// ISBN index: isbn -> uuid (unique)
pub const BOOK_ISBNS: TableDefinition<&str, &str> = TableDefinition::new("book_isbns");

/// Author index: author -> msgpack Vec of book UUIDs
pub const AUTHOR_BOOKS: TableDefinition<&str, &[u8]> = TableDefinition::new("author_books");
