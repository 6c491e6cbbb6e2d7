//! Resource identification.
//!
//! Every metered call names a target. The target is classified into a
//! [`Resource`] and resolved to the path string that keys per-resource
//! buckets.

use std::fmt;

/// Path used when a target exposes no path.
pub const UNKNOWN_PATH: &str = "_unknown_";

/// A reference type that may carry a path, such as a document handle.
pub trait HasPath: Send + Sync {
    /// The reference's path, if it has one.
    fn path(&self) -> Option<&str>;
}

/// A classified call target.
#[derive(Clone, Copy)]
pub enum Resource<'a> {
    /// An explicit path string
    Path(&'a str),
    /// A reference object that may expose a path
    Reference(&'a dyn HasPath),
    /// Anything else
    Unknown,
}

impl<'a> Resource<'a> {
    /// Resolve to a path: strings are used as-is, references yield their
    /// path, and everything else falls back to [`UNKNOWN_PATH`].
    pub fn resolve(&self) -> &'a str {
        match *self {
            Resource::Path(path) => path,
            Resource::Reference(reference) => reference.path().unwrap_or(UNKNOWN_PATH),
            Resource::Unknown => UNKNOWN_PATH,
        }
    }
}

impl fmt::Debug for Resource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Resource::Reference(reference) => {
                f.debug_tuple("Reference").field(&reference.path()).finish()
            }
            Resource::Unknown => f.write_str("Unknown"),
        }
    }
}

impl fmt::Display for Resource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resolve())
    }
}

/// Anything that can act as the first argument of a metered call.
pub trait AsResource {
    fn as_resource(&self) -> Resource<'_>;
}

impl AsResource for str {
    fn as_resource(&self) -> Resource<'_> {
        Resource::Path(self)
    }
}

impl AsResource for String {
    fn as_resource(&self) -> Resource<'_> {
        Resource::Path(self)
    }
}

impl AsResource for Resource<'_> {
    fn as_resource(&self) -> Resource<'_> {
        *self
    }
}

impl<T: AsResource> AsResource for Option<T> {
    fn as_resource(&self) -> Resource<'_> {
        match self {
            Some(inner) => inner.as_resource(),
            None => Resource::Unknown,
        }
    }
}

impl<T: AsResource + ?Sized> AsResource for &T {
    fn as_resource(&self) -> Resource<'_> {
        (**self).as_resource()
    }
}
