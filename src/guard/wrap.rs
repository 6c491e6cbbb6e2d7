//! Wrapping arbitrary async operations.

use std::future::Future;
use std::sync::Arc;

use crate::error::LimitExceeded;
use crate::ratelimit::{Admission, AsResource, Operation};

/// Register `target` under `op`, then run `operation(target)`.
///
/// If admission fails the operation is never called and the failure is
/// returned through `E`. Otherwise the operation's own result is returned
/// as-is.
pub async fn guarded<A, T, F, Fut, R, E>(
    admission: &A,
    op: Operation,
    target: T,
    operation: F,
) -> Result<R, E>
where
    A: Admission + ?Sized,
    T: AsResource,
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: From<LimitExceeded>,
{
    admission.register(op, target.as_resource()).await?;
    operation(target).await
}

/// Wrap `operation` so every call is metered as `op`.
pub fn wrap<A, F>(admission: Arc<A>, op: Operation, operation: F) -> Guarded<A, F>
where
    A: Admission + ?Sized,
{
    Guarded {
        admission,
        op,
        operation,
    }
}

/// An operation metered by an [`Admission`] on every call.
///
/// The wrapped operation takes its target first and the remaining arguments
/// second; the target decides which resource bucket is charged.
pub struct Guarded<A: ?Sized, F> {
    admission: Arc<A>,
    op: Operation,
    operation: F,
}

impl<A, F> Guarded<A, F>
where
    A: Admission + ?Sized,
{
    /// Invoke the wrapped operation with the same arguments it normally takes.
    pub async fn call<T, Args, Fut, R, E>(&self, target: T, args: Args) -> Result<R, E>
    where
        F: Fn(T, Args) -> Fut,
        T: AsResource,
        Fut: Future<Output = Result<R, E>>,
        E: From<LimitExceeded>,
    {
        guarded(&*self.admission, self.op, target, |target| {
            (self.operation)(target, args)
        })
        .await
    }

    /// The operation kind charged per call.
    pub fn op(&self) -> Operation {
        self.op
    }
}

impl<A: ?Sized, F: Clone> Clone for Guarded<A, F> {
    fn clone(&self) -> Self {
        Self {
            admission: self.admission.clone(),
            op: self.op,
            operation: self.operation.clone(),
        }
    }
}
