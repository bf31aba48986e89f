use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A book record stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    /// Unique across the catalog
    pub isbn: String,
    /// Price in the smallest currency unit
    pub price: u64,
    #[serde(default)]
    pub published_date: Option<NaiveDate>,
    /// Reference URL of the cover image in object storage
    #[serde(default)]
    pub cover_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// New record with a fresh id and timestamps.
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        isbn: impl Into<String>,
        price: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            author: author.into(),
            isbn: isbn.into(),
            price,
            published_date: None,
            cover_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn published(mut self, date: NaiveDate) -> Self {
        self.published_date = Some(date);
        self
    }
}
