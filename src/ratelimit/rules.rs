//! Limit configuration and merging.
//!
//! A [`LimitConfig`] holds the effective ceilings read by every admission
//! check. It is only ever changed by merging a [`LimitConfigUpdate`] over it,
//! so configuring twice never forgets fields the second update leaves out.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Default sliding window when none is configured.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// The kind of call being metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    /// Lowercase name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do once a ceiling is exceeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Fail the call with [`LimitExceeded`](crate::error::LimitExceeded).
    #[default]
    Throw,
    /// Pause the caller until a slot frees up, then let it through.
    Queue,
    /// Emit a warning and let the call through.
    Log,
}

/// Ceilings shared by every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalLimits {
    /// Reads allowed per window (`None` means unlimited)
    pub read: Option<u64>,
    /// Writes allowed per window (`None` means unlimited)
    pub write: Option<u64>,
    /// Window length in milliseconds, shared by every bucket
    pub window_ms: u64,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            read: None,
            write: None,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl GlobalLimits {
    /// Ceiling for `op`, if any.
    pub fn limit(&self, op: Operation) -> Option<u64> {
        match op {
            Operation::Read => self.read,
            Operation::Write => self.write,
        }
    }
}

/// Partial form of [`GlobalLimits`]; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalLimitsUpdate {
    pub read: Option<u64>,
    pub write: Option<u64>,
    pub window_ms: Option<u64>,
}

/// Ceilings for a single resource path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionLimits {
    pub read: Option<u64>,
    pub write: Option<u64>,
}

impl CollectionLimits {
    /// Ceiling for `op`, if any.
    pub fn limit(&self, op: Operation) -> Option<u64> {
        match op {
            Operation::Read => self.read,
            Operation::Write => self.write,
        }
    }

    fn set(&mut self, op: Operation, limit: u64) {
        match op {
            Operation::Read => self.read = Some(limit),
            Operation::Write => self.write = Some(limit),
        }
    }
}

/// Details of a ceiling violation, handed to the `on_limit_exceeded` hook.
///
/// The serialized field names are a stable contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub op: Operation,
    pub path: String,
    /// Epoch milliseconds of the attempt
    pub ts: u64,
    /// Attempts in the window, including this one
    pub count: u64,
    pub limit: u64,
}

/// Callback invoked on every violation, whatever the behavior.
pub type ViolationHook = Arc<dyn Fn(&Violation) + Send + Sync>;

/// The effective limit configuration.
#[derive(Clone, Default)]
pub struct LimitConfig {
    /// Global ceilings and the shared window
    pub global: GlobalLimits,
    /// Per-path ceilings; unlisted paths only face the global ceiling
    pub per_collection: HashMap<String, CollectionLimits>,
    /// Action on violation
    pub behavior: Behavior,
    /// Violation hook
    pub on_limit_exceeded: Option<ViolationHook>,
}

impl LimitConfig {
    /// Merge `update` over the current values.
    ///
    /// Global fields merge one by one. Per-collection entries merge by path,
    /// so a new entry for a path replaces that path's previous entry.
    pub fn merge(&mut self, update: LimitConfigUpdate) {
        if let Some(global) = update.global {
            if let Some(read) = global.read {
                self.global.read = Some(read);
            }
            if let Some(write) = global.write {
                self.global.write = Some(write);
            }
            if let Some(window_ms) = global.window_ms {
                self.global.window_ms = window_ms;
            }
        }
        if let Some(per_collection) = update.per_collection {
            self.per_collection.extend(per_collection);
        }
        if let Some(behavior) = update.behavior {
            self.behavior = behavior;
        }
        if let Some(hook) = update.on_limit_exceeded {
            self.on_limit_exceeded = Some(hook);
        }
    }

    /// Per-path ceiling for `op`, if one is configured for exactly `path`.
    pub fn collection_limit(&self, path: &str, op: Operation) -> Option<u64> {
        self.per_collection.get(path).and_then(|l| l.limit(op))
    }
}

impl fmt::Debug for LimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitConfig")
            .field("global", &self.global)
            .field("per_collection", &self.per_collection)
            .field("behavior", &self.behavior)
            .field("on_limit_exceeded", &self.on_limit_exceeded.is_some())
            .finish()
    }
}

/// Partial limit configuration accepted by `configure`.
///
/// Deserializable from the `limits` section of a settings file; the hook can
/// only be set from code.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct LimitConfigUpdate {
    pub global: Option<GlobalLimitsUpdate>,
    pub per_collection: Option<HashMap<String, CollectionLimits>>,
    pub behavior: Option<Behavior>,
    #[serde(skip)]
    pub on_limit_exceeded: Option<ViolationHook>,
}

impl LimitConfigUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global ceiling for `op`.
    pub fn global_limit(mut self, op: Operation, limit: u64) -> Self {
        let global = self.global.get_or_insert_with(Default::default);
        match op {
            Operation::Read => global.read = Some(limit),
            Operation::Write => global.write = Some(limit),
        }
        self
    }

    /// Set the shared window length.
    pub fn window_ms(mut self, window_ms: u64) -> Self {
        self.global.get_or_insert_with(Default::default).window_ms = Some(window_ms);
        self
    }

    /// Set the ceiling for `op` on exactly `path`.
    pub fn collection_limit(mut self, path: impl Into<String>, op: Operation, limit: u64) -> Self {
        self.per_collection
            .get_or_insert_with(HashMap::new)
            .entry(path.into())
            .or_default()
            .set(op, limit);
        self
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Register a violation hook.
    pub fn on_limit_exceeded<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Violation) + Send + Sync + 'static,
    {
        self.on_limit_exceeded = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for LimitConfigUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitConfigUpdate")
            .field("global", &self.global)
            .field("per_collection", &self.per_collection)
            .field("behavior", &self.behavior)
            .field("on_limit_exceeded", &self.on_limit_exceeded.is_some())
            .finish()
    }
}
