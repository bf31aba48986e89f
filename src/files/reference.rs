use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::object_store::ObjectStoreError;

/// Public retrieval URL of a stored object, as persisted by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectReference(Url);

impl ObjectReference {
    pub fn parse(reference: &str) -> Result<Self, ObjectStoreError> {
        let url = Url::parse(reference)
            .map_err(|e| ObjectStoreError::InvalidReference(format!("{reference}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ObjectStoreError::InvalidReference(format!(
                "{reference}: not a hierarchical URL"
            )));
        }
        Ok(Self(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<Url> for ObjectReference {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

impl FromStr for ObjectReference {
    type Err = ObjectStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectReference {
    type Error = ObjectStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectReference> for String {
    fn from(reference: ObjectReference) -> Self {
        reference.0.into()
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}
