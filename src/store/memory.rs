//! In-memory document store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;
use uuid::Uuid;

use super::{
    CollectionRef, Document, DocumentRef, DocumentSnapshot, DocumentStore, Query, SnapshotStream,
    StoreError, WriteBatch,
};

fn empty_slot() -> watch::Sender<Option<Document>> {
    watch::channel(None).0
}

/// Documents keyed by path. Each slot is a watch channel so listeners see
/// every change.
#[derive(Debug, Default)]
struct Documents {
    slots: DashMap<String, watch::Sender<Option<Document>>>,
}

impl Documents {
    fn get(&self, path: &str) -> Option<Document> {
        self.slots.get(path).and_then(|slot| slot.borrow().clone())
    }

    fn exists(&self, path: &str) -> bool {
        self.slots
            .get(path)
            .map(|slot| slot.borrow().is_some())
            .unwrap_or(false)
    }

    fn set(&self, path: &str, data: Document) {
        self.slots
            .entry(path.to_owned())
            .or_insert_with(empty_slot)
            .send_replace(Some(data));
    }

    fn update(&self, path: &str, data: Document) -> Result<(), StoreError> {
        let slot = self
            .slots
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
        let updated = slot.send_if_modified(|current| match current {
            Some(doc) => {
                doc.extend(data);
                true
            }
            None => false,
        });
        if updated {
            Ok(())
        } else {
            Err(StoreError::NotFound(path.to_owned()))
        }
    }

    fn delete(&self, path: &str) {
        if let Some(slot) = self.slots.get(path) {
            slot.send_replace(None);
        }
    }

    fn subscribe(&self, path: &str) -> watch::Receiver<Option<Document>> {
        self.slots
            .entry(path.to_owned())
            .or_insert_with(empty_slot)
            .subscribe()
    }

    fn query(&self, query: &Query) -> Vec<DocumentSnapshot> {
        let collection = query.collection().path();
        let mut matches: Vec<(String, Document)> = self
            .slots
            .iter()
            .filter(|entry| {
                entry
                    .key()
                    .rsplit_once('/')
                    .map(|(parent, _)| parent == collection)
                    .unwrap_or(false)
            })
            .filter_map(|entry| {
                let data = entry.value().borrow().clone()?;
                query.matches(&data).then(|| (entry.key().clone(), data))
            })
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        matches
            .into_iter()
            .take(query.max_results().unwrap_or(usize::MAX))
            .map(|(path, data)| DocumentSnapshot {
                reference: DocumentRef { path },
                data,
            })
            .collect()
    }
}

/// A document store held entirely in process memory.
///
/// Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    docs: Arc<Documents>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of existing documents.
    pub fn len(&self) -> usize {
        self.docs
            .slots
            .iter()
            .filter(|entry| entry.value().borrow().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Batch = MemoryBatch;

    async fn get_doc(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError> {
        Ok(self.docs.get(doc.path()))
    }

    async fn get_docs(&self, query: &Query) -> Result<Vec<DocumentSnapshot>, StoreError> {
        Ok(self.docs.query(query))
    }

    async fn set_doc(&self, doc: &DocumentRef, data: Document) -> Result<(), StoreError> {
        trace!(path = %doc.path(), "Setting document");
        self.docs.set(doc.path(), data);
        Ok(())
    }

    async fn update_doc(&self, doc: &DocumentRef, data: Document) -> Result<(), StoreError> {
        trace!(path = %doc.path(), "Updating document");
        self.docs.update(doc.path(), data)
    }

    async fn add_doc(
        &self,
        collection: &CollectionRef,
        data: Document,
    ) -> Result<DocumentRef, StoreError> {
        let doc = collection.doc(&Uuid::new_v4().simple().to_string())?;
        trace!(path = %doc.path(), "Adding document");
        self.docs.set(doc.path(), data);
        Ok(doc)
    }

    async fn delete_doc(&self, doc: &DocumentRef) -> Result<(), StoreError> {
        trace!(path = %doc.path(), "Deleting document");
        self.docs.delete(doc.path());
        Ok(())
    }

    async fn on_snapshot(&self, doc: &DocumentRef) -> Result<SnapshotStream, StoreError> {
        Ok(WatchStream::new(self.docs.subscribe(doc.path())))
    }

    fn write_batch(&self) -> MemoryBatch {
        MemoryBatch {
            docs: self.docs.clone(),
            writes: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum BatchWrite {
    Set(DocumentRef, Document),
    Update(DocumentRef, Document),
    Delete(DocumentRef),
}

/// Batch of writes against a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryBatch {
    docs: Arc<Documents>,
    writes: Vec<BatchWrite>,
}

impl MemoryBatch {
    /// Check every staged update targets a document that will exist.
    fn validate(&self) -> Result<(), StoreError> {
        let mut staged: HashMap<&str, bool> = HashMap::new();
        for write in &self.writes {
            match write {
                BatchWrite::Set(doc, _) => {
                    staged.insert(doc.path(), true);
                }
                BatchWrite::Delete(doc) => {
                    staged.insert(doc.path(), false);
                }
                BatchWrite::Update(doc, _) => {
                    let exists = staged
                        .get(doc.path())
                        .copied()
                        .unwrap_or_else(|| self.docs.exists(doc.path()));
                    if !exists {
                        return Err(StoreError::NotFound(doc.path().to_owned()));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WriteBatch for MemoryBatch {
    fn set(&mut self, doc: &DocumentRef, data: Document) {
        self.writes.push(BatchWrite::Set(doc.clone(), data));
    }

    fn update(&mut self, doc: &DocumentRef, data: Document) {
        self.writes.push(BatchWrite::Update(doc.clone(), data));
    }

    fn delete(&mut self, doc: &DocumentRef) {
        self.writes.push(BatchWrite::Delete(doc.clone()));
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.validate()?;
        trace!(writes = self.writes.len(), "Committing batch");
        for write in self.writes {
            match write {
                BatchWrite::Set(doc, data) => self.docs.set(doc.path(), data),
                BatchWrite::Update(doc, data) => self.docs.update(doc.path(), data)?,
                BatchWrite::Delete(doc) => self.docs.delete(doc.path()),
            }
        }
        Ok(())
    }
}
