//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod clock;
mod limiter;
mod resource;
mod rules;

pub use backend::Admission;
pub use bucket::{Bucket, OpBuckets};
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::RateLimiter;
pub use resource::{AsResource, HasPath, Resource, UNKNOWN_PATH};
pub use rules::{
    Behavior, CollectionLimits, GlobalLimits, GlobalLimitsUpdate, LimitConfig, LimitConfigUpdate,
    Operation, Violation, ViolationHook, DEFAULT_WINDOW_MS,
};
