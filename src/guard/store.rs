//! Guarded document store.

use async_trait::async_trait;
use std::sync::Arc;

use super::batch::GuardedBatch;
use super::wrap::guarded;
use crate::ratelimit::{Admission, Operation};
use crate::store::{
    CollectionRef, Document, DocumentRef, DocumentSnapshot, DocumentStore, Query, SnapshotStream,
    StoreError,
};

/// A [`DocumentStore`] whose reads and writes pass through an admission check.
///
/// `get_doc`, `get_docs` and `on_snapshot` are charged as reads; `set_doc`,
/// `update_doc`, `add_doc` and `delete_doc` as writes. A snapshot listener is
/// charged once when it is opened, not per update it delivers. Batches are
/// charged once per commit.
pub struct GuardedStore<S, A: ?Sized> {
    inner: S,
    admission: Arc<A>,
}

impl<S, A: ?Sized> GuardedStore<S, A> {
    /// Guard `inner` with `admission`.
    pub fn new(inner: S, admission: Arc<A>) -> Self {
        Self { inner, admission }
    }

    /// The unguarded store, for calls that are not metered.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn admission(&self) -> &Arc<A> {
        &self.admission
    }
}

#[async_trait]
impl<S, A> DocumentStore for GuardedStore<S, A>
where
    S: DocumentStore,
    A: Admission + ?Sized + 'static,
{
    type Batch = GuardedBatch<S::Batch, A>;

    async fn get_doc(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError> {
        guarded(&*self.admission, Operation::Read, doc, |doc| self.inner.get_doc(doc)).await
    }

    async fn get_docs(&self, query: &Query) -> Result<Vec<DocumentSnapshot>, StoreError> {
        guarded(&*self.admission, Operation::Read, query, |query| {
            self.inner.get_docs(query)
        })
        .await
    }

    async fn set_doc(&self, doc: &DocumentRef, data: Document) -> Result<(), StoreError> {
        guarded(&*self.admission, Operation::Write, doc, |doc| {
            self.inner.set_doc(doc, data)
        })
        .await
    }

    async fn update_doc(&self, doc: &DocumentRef, data: Document) -> Result<(), StoreError> {
        guarded(&*self.admission, Operation::Write, doc, |doc| {
            self.inner.update_doc(doc, data)
        })
        .await
    }

    async fn add_doc(
        &self,
        collection: &CollectionRef,
        data: Document,
    ) -> Result<DocumentRef, StoreError> {
        guarded(&*self.admission, Operation::Write, collection, |collection| {
            self.inner.add_doc(collection, data)
        })
        .await
    }

    async fn delete_doc(&self, doc: &DocumentRef) -> Result<(), StoreError> {
        guarded(&*self.admission, Operation::Write, doc, |doc| {
            self.inner.delete_doc(doc)
        })
        .await
    }

    async fn on_snapshot(&self, doc: &DocumentRef) -> Result<SnapshotStream, StoreError> {
        guarded(&*self.admission, Operation::Read, doc, |doc| {
            self.inner.on_snapshot(doc)
        })
        .await
    }

    fn write_batch(&self) -> Self::Batch {
        GuardedBatch::new(self.inner.write_batch(), self.admission.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::BATCH_PATH;
    use crate::ratelimit::{Behavior, LimitConfigUpdate, RateLimiter};
    use crate::store::{MemoryStore, WriteBatch};
    use serde_json::json;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    fn doc_ref(path: &str) -> DocumentRef {
        DocumentRef::new(path).unwrap()
    }

    fn guarded_store(update: LimitConfigUpdate) -> GuardedStore<MemoryStore, RateLimiter> {
        GuardedStore::new(MemoryStore::new(), Arc::new(RateLimiter::with_config(update)))
    }

    #[tokio::test]
    async fn test_reads_and_writes_are_classified() {
        let store = guarded_store(LimitConfigUpdate::new());
        let alice = doc_ref("users/alice");
        let users = CollectionRef::new("users").unwrap();

        store.set_doc(&alice, doc(json!({"a": 1}))).await.unwrap();
        store.update_doc(&alice, doc(json!({"b": 2}))).await.unwrap();
        store.add_doc(&users, Document::new()).await.unwrap();
        store.get_doc(&alice).await.unwrap();
        store.get_docs(&users.query()).await.unwrap();
        store.delete_doc(&alice).await.unwrap();

        let limiter = store.admission();
        assert_eq!(limiter.global_count(Operation::Write), 4);
        assert_eq!(limiter.global_count(Operation::Read), 2);
        assert_eq!(limiter.collection_count("users/alice", Operation::Write), Some(3));
        assert_eq!(limiter.collection_count("users", Operation::Write), Some(1));
        assert_eq!(limiter.collection_count("users", Operation::Read), Some(1));
    }

    #[tokio::test]
    async fn test_throw_blocks_underlying_write() {
        let store = guarded_store(LimitConfigUpdate::new().global_limit(Operation::Write, 1));
        let a = doc_ref("users/a");
        let b = doc_ref("users/b");

        store.set_doc(&a, Document::new()).await.unwrap();
        let err = store.set_doc(&b, Document::new()).await.unwrap_err();

        assert!(matches!(err, StoreError::Limit(_)));
        assert_eq!(err.to_string(), "write limit exceeded for users/b (2/1)");
        assert_eq!(store.inner().get_doc(&b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_log_never_blocks() {
        let store = guarded_store(
            LimitConfigUpdate::new()
                .global_limit(Operation::Write, 1)
                .behavior(Behavior::Log),
        );

        for i in 0..5 {
            let target = doc_ref(&format!("users/{i}"));
            store.set_doc(&target, Document::new()).await.unwrap();
        }
        assert_eq!(store.inner().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_eventually_runs() {
        let store = guarded_store(
            LimitConfigUpdate::new()
                .collection_limit("orders/1", Operation::Write, 1)
                .window_ms(100)
                .behavior(Behavior::Queue),
        );
        let order = doc_ref("orders/1");

        let start = tokio::time::Instant::now();
        store.set_doc(&order, doc(json!({"v": 1}))).await.unwrap();
        store.set_doc(&order, doc(json!({"v": 2}))).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(store.inner().get_doc(&order).await.unwrap(), Some(doc(json!({"v": 2}))));
    }

    #[tokio::test]
    async fn test_store_errors_pass_through() {
        let store = guarded_store(LimitConfigUpdate::new());

        let err = store
            .update_doc(&doc_ref("users/ghost"), Document::new())
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::NotFound("users/ghost".to_string()));
    }

    #[tokio::test]
    async fn test_snapshot_charged_once() {
        let store = guarded_store(LimitConfigUpdate::new().global_limit(Operation::Read, 1));
        let alice = doc_ref("users/alice");

        let mut stream = store.on_snapshot(&alice).await.unwrap();
        assert_eq!(stream.next().await, Some(None));

        for v in 0..3 {
            store.inner().set_doc(&alice, doc(json!({"v": v}))).await.unwrap();
            assert_eq!(stream.next().await, Some(Some(doc(json!({"v": v})))));
        }
        assert_eq!(store.admission().global_count(Operation::Read), 1);

        // The single read slot is spent by the listener
        assert!(store.get_doc(&alice).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_from_guarded_store() {
        let store = guarded_store(LimitConfigUpdate::new());

        let mut batch = store.write_batch();
        batch.set(&doc_ref("users/a"), Document::new());
        batch.set(&doc_ref("orders/b"), Document::new());
        assert!(!batch.is_empty());
        batch.commit().await.unwrap();

        let limiter = store.admission();
        assert_eq!(limiter.global_count(Operation::Write), 1);
        assert_eq!(limiter.collection_count(BATCH_PATH, Operation::Write), Some(1));
        assert_eq!(store.inner().len(), 2);
    }

    #[tokio::test]
    async fn test_constrained_query_charged_to_unknown() {
        let store = guarded_store(LimitConfigUpdate::new());
        let users = CollectionRef::new("users").unwrap();

        store
            .get_docs(&users.query().where_eq("active", true))
            .await
            .unwrap();

        assert_eq!(
            store.admission().collection_count("_unknown_", Operation::Read),
            Some(1)
        );
    }
}
