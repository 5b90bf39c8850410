//! Handle types for objects owned by the physics engine.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for body handles.
static BODY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Global counter for shovel handles.
static SHOVEL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a rigid body living in the physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BodyHandle(u64);

impl BodyHandle {
    /// Creates a new unique body handle.
    #[must_use]
    pub fn new() -> Self {
        Self(BODY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a handle from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Null/invalid body handle.
    pub const NULL: Self = Self(0);

    /// Checks if this handle refers to a body (non-null).
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for BodyHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque handle to a shovel living in the physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShovelHandle(u64);

impl ShovelHandle {
    /// Creates a new unique shovel handle.
    #[must_use]
    pub fn new() -> Self {
        Self(SHOVEL_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl Default for ShovelHandle {
    fn default() -> Self {
        Self::new()
    }
}
