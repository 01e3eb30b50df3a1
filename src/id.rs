//! Identifier types.
//!
//! An [`IntId`] is the fixed-width integer handed out by the registry. An
//! [`Oid`] is the storage address the object store assigned to an object; weak
//! references keep it to detect ids that were recycled onto another object.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer id assigned to a persistent object by an [`IntIds`](crate::IntIds) registry.
///
/// # Examples
///
/// ```
/// use intids::IntId;
///
/// let id = IntId::new(7);
/// assert_eq!(id.get(), 7);
/// assert_eq!(id.to_string(), "7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntId(u64);

impl IntId {
    /// Wraps a raw id value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IntId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for IntId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<IntId> for u64 {
    fn from(id: IntId) -> Self {
        id.0
    }
}

/// Storage address of an object inside the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(u64);

impl Oid {
    /// Wraps a raw storage address.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw storage address.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl From<u64> for Oid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
