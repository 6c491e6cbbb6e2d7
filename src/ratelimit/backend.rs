//! Admission trait for injecting a limiter into guarded call sites.

use async_trait::async_trait;

use super::resource::Resource;
use super::rules::Operation;
use crate::error::LimitExceeded;

/// Something that decides whether a call may proceed.
///
/// Guarded operations hold an implementation of this trait rather than a
/// process-wide limiter, so tests and separate tenants can each use their
/// own instance.
#[async_trait]
pub trait Admission: Send + Sync {
    /// Register an attempt of `op` against `resource`.
    ///
    /// Resolves once the attempt is admitted (possibly after a delay), or
    /// fails when the attempt must be rejected.
    async fn register(&self, op: Operation, resource: Resource<'_>) -> Result<(), LimitExceeded>;
}
