//! Document store call surface.
//!
//! The guard meters calls made through [`DocumentStore`]; it never looks at
//! the documents themselves. [`MemoryStore`] is an in-process implementation
//! used by tests and the CLI.

mod memory;

pub use memory::{MemoryBatch, MemoryStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_stream::wrappers::WatchStream;

use crate::error::LimitExceeded;
use crate::ratelimit::{AsResource, HasPath, Resource};

/// Document contents.
pub type Document = serde_json::Map<String, Value>;

/// Stream of document states, starting with the current one. `None` means
/// the document does not exist.
pub type SnapshotStream = WatchStream<Option<Document>>;

/// Errors surfaced by store calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Update of a document that does not exist
    #[error("No document to update: {0}")]
    NotFound(String),

    /// Malformed document or collection path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The call was refused before reaching the store
    #[error(transparent)]
    Limit(#[from] LimitExceeded),
}

/// Validate `path` and return its segment count.
fn segment_count(path: &str) -> Result<usize, StoreError> {
    if path.is_empty() || path.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(path.split('/').count())
}

/// Handle to a single document, e.g. `users/alice`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    /// Create a document handle. The path must have an even number of segments.
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into().trim_matches('/').to_string();
        if segment_count(&path)? % 2 != 0 {
            return Err(StoreError::InvalidPath(path));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// The collection holding this document.
    pub fn parent(&self) -> CollectionRef {
        let parent = self.path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        CollectionRef {
            path: parent.to_string(),
        }
    }
}

/// Handle to a collection, e.g. `users`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    path: String,
}

impl CollectionRef {
    /// Create a collection handle. The path must have an odd number of segments.
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into().trim_matches('/').to_string();
        if segment_count(&path)? % 2 != 1 {
            return Err(StoreError::InvalidPath(path));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Handle to the document `id` in this collection.
    pub fn doc(&self, id: &str) -> Result<DocumentRef, StoreError> {
        if id.is_empty() || id.contains('/') {
            return Err(StoreError::InvalidPath(format!("{}/{}", self.path, id)));
        }
        Ok(DocumentRef {
            path: format!("{}/{}", self.path, id),
        })
    }

    /// Query over every document in the collection.
    pub fn query(&self) -> Query {
        Query::from(self.clone())
    }
}

/// A read over one collection with optional equality filters and limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionRef,
    filters: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl Query {
    /// Only match documents whose `field` equals `value`.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Return at most `n` documents.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Whether the query narrows the bare collection.
    pub fn is_constrained(&self) -> bool {
        !self.filters.is_empty() || self.limit.is_some()
    }

    /// Whether `data` satisfies every filter.
    pub fn matches(&self, data: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| data.get(field) == Some(value))
    }
}

impl From<CollectionRef> for Query {
    fn from(collection: CollectionRef) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            limit: None,
        }
    }
}

impl HasPath for DocumentRef {
    fn path(&self) -> Option<&str> {
        Some(&self.path)
    }
}

impl HasPath for CollectionRef {
    fn path(&self) -> Option<&str> {
        Some(&self.path)
    }
}

/// Only a bare collection query carries a path; a constrained query does not.
impl HasPath for Query {
    fn path(&self) -> Option<&str> {
        (!self.is_constrained()).then(|| self.collection.path())
    }
}

impl AsResource for DocumentRef {
    fn as_resource(&self) -> Resource<'_> {
        Resource::Reference(self)
    }
}

impl AsResource for CollectionRef {
    fn as_resource(&self) -> Resource<'_> {
        Resource::Reference(self)
    }
}

impl AsResource for Query {
    fn as_resource(&self) -> Resource<'_> {
        Resource::Reference(self)
    }
}

/// A document returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub reference: DocumentRef,
    pub data: Document,
}

/// Read and write primitives of a document database client.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Batch type returned by [`DocumentStore::write_batch`].
    type Batch: WriteBatch;

    /// Fetch a single document.
    async fn get_doc(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError>;

    /// Fetch every document matching `query`, ordered by path.
    async fn get_docs(&self, query: &Query) -> Result<Vec<DocumentSnapshot>, StoreError>;

    /// Create or overwrite a document.
    async fn set_doc(&self, doc: &DocumentRef, data: Document) -> Result<(), StoreError>;

    /// Merge fields into an existing document.
    async fn update_doc(&self, doc: &DocumentRef, data: Document) -> Result<(), StoreError>;

    /// Create a document with a generated id.
    async fn add_doc(
        &self,
        collection: &CollectionRef,
        data: Document,
    ) -> Result<DocumentRef, StoreError>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete_doc(&self, doc: &DocumentRef) -> Result<(), StoreError>;

    /// Listen to a document's state.
    async fn on_snapshot(&self, doc: &DocumentRef) -> Result<SnapshotStream, StoreError>;

    /// Start a batch of writes applied together on commit.
    fn write_batch(&self) -> Self::Batch;
}

/// Writes staged locally and applied together.
#[async_trait]
pub trait WriteBatch: Send + Sized {
    fn set(&mut self, doc: &DocumentRef, data: Document);

    fn update(&mut self, doc: &DocumentRef, data: Document);

    fn delete(&mut self, doc: &DocumentRef);

    /// Number of staged writes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply every staged write.
    async fn commit(self) -> Result<(), StoreError>;
}
