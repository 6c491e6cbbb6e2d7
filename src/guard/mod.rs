//! Guard adapter: composes store calls with an [`Admission`] check.
//!
//! Every guarded call registers its target with the limiter first and only
//! reaches the underlying operation once admitted. Results and errors from the
//! operation are returned unchanged.
//!
//! [`Admission`]: crate::ratelimit::Admission

mod batch;
mod store;
mod wrap;

pub use batch::{GuardedBatch, BATCH_PATH};
pub use store::GuardedStore;
pub use wrap::{guarded, wrap, Guarded};
