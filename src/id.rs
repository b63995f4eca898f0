//! Entry identifiers
//!
//! Ids are assigned by the registry from a monotonically increasing counter,
//! so an id is never reused for the lifetime of a scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, unique identifier of a scheduled entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    /// Wrap a raw id value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntryId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Monotonic id source owned by a registry
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Create an allocator starting at id 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next id
    pub fn allocate(&mut self) -> EntryId {
        let id = EntryId(self.next);
        self.next += 1;
        id
    }

    /// Whether `id` has ever been handed out by this allocator
    pub fn was_issued(&self, id: EntryId) -> bool {
        id.0 < self.next
    }

    /// Number of ids issued so far
    pub fn issued(&self) -> u64 {
        self.next
    }
}
