//! Storage trait for the persistent object store the registry indexes.
//!
//! The registry never indexes raw object identity. It asks the store for a
//! stable key, indexes that, and asks the store to turn keys back into live
//! objects. Proxy stripping is the store's job too: every identity-sensitive
//! operation first passes the object through [`ObjectStore::unwrap`].

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::id::Oid;

/// Adapter over a persistent object store.
///
/// Implementations are external collaborators: the store owns durability
/// and key derivation; the registry owns ids.
pub trait ObjectStore: Send + Sync {
    /// Live object handle. Cloning must be cheap (typically an `Arc`).
    type Object: Clone + fmt::Debug + Send + Sync;

    /// Stable key: fixed for the object's lifetime and comparable without
    /// consulting the object's own equality.
    type Key: Clone + Eq + Hash + Ord + fmt::Debug + Send + Sync;

    /// Strips transient wrappers so two views of one object compare equal.
    fn unwrap(&self, ob: &Self::Object) -> Self::Object {
        ob.clone()
    }

    /// Derives the stable key. `None` means the object is not eligible for ids.
    fn key_of(&self, ob: &Self::Object) -> Option<Self::Key>;

    /// Resolves a key back to its live object, if it still exists.
    fn resolve(&self, key: &Self::Key) -> Option<Self::Object>;

    /// Storage address of the object, if it has been persisted.
    fn oid_of(&self, ob: &Self::Object) -> Option<Oid>;
}

/// Objects that know which container they belong to.
pub trait Contained {
    /// The container key this object files under, if it carries one.
    fn container_id(&self) -> Option<&str>;
}

impl<C: Contained + ?Sized> Contained for Arc<C> {
    fn container_id(&self) -> Option<&str> {
        (**self).container_id()
    }
}
