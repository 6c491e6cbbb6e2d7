//! Metered write batches.

use async_trait::async_trait;
use std::sync::Arc;

use super::wrap::guarded;
use crate::ratelimit::{Admission, Operation};
use crate::store::{Document, DocumentRef, StoreError, WriteBatch};

/// Resource path charged for batch commits.
pub const BATCH_PATH: &str = "_batch_";

/// A batch whose commit is metered as a single write.
///
/// Staging writes is free; `commit` registers one write under
/// [`BATCH_PATH`] however many documents the batch touches, then delegates
/// to the wrapped batch.
pub struct GuardedBatch<B, A: ?Sized> {
    inner: B,
    admission: Arc<A>,
}

impl<B, A: ?Sized> GuardedBatch<B, A> {
    pub fn new(inner: B, admission: Arc<A>) -> Self {
        Self { inner, admission }
    }

    /// The wrapped batch.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B, A> WriteBatch for GuardedBatch<B, A>
where
    B: WriteBatch,
    A: Admission + ?Sized + 'static,
{
    fn set(&mut self, doc: &DocumentRef, data: Document) {
        self.inner.set(doc, data);
    }

    fn update(&mut self, doc: &DocumentRef, data: Document) {
        self.inner.update(doc, data);
    }

    fn delete(&mut self, doc: &DocumentRef) {
        self.inner.delete(doc);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn commit(self) -> Result<(), StoreError> {
        let Self { inner, admission } = self;
        guarded(&*admission, Operation::Write, BATCH_PATH, move |_| inner.commit()).await
    }
}
