//! In-memory object store.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`ObjectStore`]. It is intended for embedded usage, tests, and as a
//! reference for adapting a real persistent store.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{lock_err, IntIdResult};
use crate::id::Oid;
use crate::storage::traits::{Contained, ObjectStore};

/// Stable key for objects in an [`InMemoryObjectStore`]: database name plus oid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyReference {
    /// Name of the database the object lives in.
    pub database: String,
    /// Storage address inside that database.
    pub oid: Oid,
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database, self.oid)
    }
}

/// A value with an optional storage address.
///
/// Values without an oid were never added to a store and cannot be given an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persistent<T> {
    oid: Option<Oid>,
    value: T,
}

impl<T> Persistent<T> {
    /// Storage address, if persisted.
    #[must_use]
    pub const fn oid(&self) -> Option<Oid> {
        self.oid
    }

    /// Borrows the wrapped value.
    #[must_use]
    pub const fn value(&self) -> &T {
        &self.value
    }
}

impl<T> Deref for Persistent<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Contained> Contained for Persistent<T> {
    fn container_id(&self) -> Option<&str> {
        self.value.container_id()
    }
}

#[derive(Debug)]
struct ObjectState<T> {
    next_oid: u64,
    objects: BTreeMap<Oid, Arc<Persistent<T>>>,
}

impl<T> Default for ObjectState<T> {
    fn default() -> Self {
        Self {
            next_oid: 1,
            objects: BTreeMap::new(),
        }
    }
}

/// Thread-safe in-memory object store handing out sequential oids.
#[derive(Debug)]
pub struct InMemoryObjectStore<T> {
    database: String,
    state: RwLock<ObjectState<T>>,
}

impl<T> InMemoryObjectStore<T> {
    /// Create a new empty store for the named database.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            state: RwLock::new(ObjectState::default()),
        }
    }

    /// Name of the database.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Persist a value, assigning it the next oid.
    ///
    /// # Errors
    /// Returns `Internal` if the store lock is poisoned.
    pub fn add(&self, value: T) -> IntIdResult<Arc<Persistent<T>>> {
        let mut state = self.state.write().map_err(|_| lock_err("objects.add"))?;
        let oid = Oid::new(state.next_oid);
        state.next_oid += 1;
        let ob = Arc::new(Persistent {
            oid: Some(oid),
            value,
        });
        state.objects.insert(oid, Arc::clone(&ob));
        Ok(ob)
    }

    /// Wrap a value without persisting it. Such objects have no stable key.
    #[must_use]
    pub fn transient(value: T) -> Arc<Persistent<T>> {
        Arc::new(Persistent { oid: None, value })
    }

    /// Delete an object; its key stops resolving.
    ///
    /// # Errors
    /// Returns `Internal` if the store lock is poisoned.
    pub fn remove(&self, oid: Oid) -> IntIdResult<Option<Arc<Persistent<T>>>> {
        let mut state = self.state.write().map_err(|_| lock_err("objects.remove"))?;
        Ok(state.objects.remove(&oid))
    }

    /// Look up an object by oid.
    ///
    /// # Errors
    /// Returns `Internal` if the store lock is poisoned.
    pub fn get(&self, oid: Oid) -> IntIdResult<Option<Arc<Persistent<T>>>> {
        let state = self.state.read().map_err(|_| lock_err("objects.get"))?;
        Ok(state.objects.get(&oid).cloned())
    }

    /// Number of persisted objects.
    ///
    /// # Errors
    /// Returns `Internal` if the store lock is poisoned.
    pub fn len(&self) -> IntIdResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("objects.len"))?;
        Ok(state.objects.len())
    }

    /// Whether the store holds no objects.
    ///
    /// # Errors
    /// Returns `Internal` if the store lock is poisoned.
    pub fn is_empty(&self) -> IntIdResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl<T> ObjectStore for InMemoryObjectStore<T>
where
    T: fmt::Debug + Send + Sync,
{
    type Object = Arc<Persistent<T>>;
    type Key = KeyReference;

    fn key_of(&self, ob: &Self::Object) -> Option<KeyReference> {
        ob.oid.map(|oid| KeyReference {
            database: self.database.clone(),
            oid,
        })
    }

    fn resolve(&self, key: &KeyReference) -> Option<Self::Object> {
        if key.database != self.database {
            return None;
        }
        let state = self.state.read().ok()?;
        state.objects.get(&key.oid).cloned()
    }

    fn oid_of(&self, ob: &Self::Object) -> Option<Oid> {
        ob.oid
    }
}
