//! Id-set-per-key container storage.
//!
//! Each container key maps to a set of intids. Alongside the sets the
//! storage keeps:
//! - a container count, maintained on key creation and pop, so `count()`
//!   never scans
//! - a key -> last-modified map, kept apart from the sets because the sets
//!   carry nothing but ids
//!
//! Sets are copy-on-write: facades handed out by `get` keep iterating the
//! snapshot they were created from, however the storage changes afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::containers::facade::{
    IntidResolvingIterable, IntidResolvingMappingFacade, MissingPolicy,
};
use crate::error::{lock_err, IntIdError, IntIdResult};
use crate::id::IntId;
use crate::registry::IntIds;
use crate::storage::{Contained, ObjectStore};

/// Encode a timestamp as microseconds since the Unix epoch.
#[must_use]
pub fn encode_time(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Decode a value produced by [`encode_time`].
#[must_use]
pub fn decode_time(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Serializable container state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    /// Container key -> member ids.
    pub containers: BTreeMap<String, BTreeSet<IntId>>,
    /// Container key -> last-modified (encoded).
    pub modified: BTreeMap<String, i64>,
    /// Cached number of containers.
    pub count: usize,
    /// Last modification of the storage as a whole (encoded).
    pub last_modified: i64,
}

#[derive(Debug, Default)]
struct ContainerState {
    containers: BTreeMap<String, Arc<BTreeSet<IntId>>>,
    modified: BTreeMap<String, i64>,
    count: usize,
    last_modified: i64,
}

impl ContainerState {
    fn touch(&mut self, container: &str) {
        let now = encode_time(Utc::now());
        self.modified.insert(container.to_string(), now);
        self.last_modified = now;
    }

    fn insert(&mut self, container: &str, id: IntId) -> bool {
        if !self.containers.contains_key(container) {
            self.containers
                .insert(container.to_string(), Arc::new(BTreeSet::new()));
            self.count += 1;
        }
        let added = self
            .containers
            .get_mut(container)
            .is_some_and(|set| Arc::make_mut(set).insert(id));
        self.touch(container);
        added
    }

    fn remove(&mut self, container: &str, id: IntId) -> bool {
        let Some(set) = self.containers.get_mut(container) else {
            return false;
        };
        let removed = Arc::make_mut(set).remove(&id);
        // Refreshed even when the id was absent.
        self.touch(container);
        removed
    }

    fn pop(&mut self, container: &str) -> Option<Arc<BTreeSet<IntId>>> {
        let set = self.containers.remove(container)?;
        self.modified.remove(container);
        self.count -= 1;
        self.last_modified = encode_time(Utc::now());
        Some(set)
    }
}

/// Container index: named groups of objects stored as intid sets.
pub struct IntidContainedStorage<S: ObjectStore> {
    intids: Arc<IntIds<S>>,
    policy: MissingPolicy,
    name: Option<String>,
    state: RwLock<ContainerState>,
}

impl<S: ObjectStore + 'static> IntidContainedStorage<S> {
    /// Create an empty storage resolving through `intids`.
    ///
    /// Facades from this storage tolerate ids that no longer resolve.
    #[must_use]
    pub fn new(intids: Arc<IntIds<S>>) -> Self {
        Self {
            intids,
            policy: MissingPolicy::Tolerant,
            name: None,
            state: RwLock::new(ContainerState::default()),
        }
    }

    /// Use a different resolution policy for facades.
    #[must_use]
    pub fn with_policy(mut self, policy: MissingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Diagnostic name, used as the parent label of facades.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The registry ids are resolved through.
    #[must_use]
    pub fn intids(&self) -> &Arc<IntIds<S>> {
        &self.intids
    }

    /// Add `ob` to `container`, creating the container if needed.
    ///
    /// # Errors
    /// - `IdMissing`: `ob` has no id in the registry
    /// - `Internal`: a lock is poisoned
    pub fn add(&self, container: &str, ob: &S::Object) -> IntIdResult<IntId> {
        let id = self.intids.get_id(ob)?;
        self.add_id(container, id)?;
        Ok(id)
    }

    /// Add an already-known id to `container`. Returns false if it was present.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn add_id(&self, container: &str, id: IntId) -> IntIdResult<bool> {
        let mut state = self.state.write().map_err(|_| lock_err("containers.add"))?;
        let added = state.insert(container, id);
        debug!(container, %id, added, "added id to container");
        Ok(added)
    }

    /// Remove `id` from `container`. Returns whether it was present.
    ///
    /// The container's modification time is refreshed either way. An
    /// unknown container returns false and is not created.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn remove_by_id(&self, container: &str, id: IntId) -> IntIdResult<bool> {
        let mut state = self.state.write().map_err(|_| lock_err("containers.remove"))?;
        let removed = state.remove(container, id);
        debug!(container, %id, removed, "removed id from container");
        Ok(removed)
    }

    /// Remove `ob` from `container` by its current id.
    ///
    /// An object without an id was never a member; returns false.
    ///
    /// # Errors
    /// Returns `Internal` if a lock is poisoned.
    pub fn remove_equal(&self, container: &str, ob: &S::Object) -> IntIdResult<bool> {
        match self.intids.query_id(ob)? {
            Some(id) => self.remove_by_id(container, id),
            None => Ok(false),
        }
    }

    /// Remove a whole container and return a facade over its members.
    ///
    /// # Errors
    /// - `KeyMissing`: no such container
    /// - `Internal`: the storage lock is poisoned
    pub fn pop_container(&self, container: &str) -> IntIdResult<IntidResolvingIterable<S>> {
        self.pop_container_opt(container)?
            .ok_or_else(|| IntIdError::KeyMissing {
                container: container.to_string(),
            })
    }

    /// Like [`pop_container`](Self::pop_container) but an absent container is `None`.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn pop_container_opt(
        &self,
        container: &str,
    ) -> IntIdResult<Option<IntidResolvingIterable<S>>> {
        let mut state = self.state.write().map_err(|_| lock_err("containers.pop"))?;
        let popped = state.pop(container);
        drop(state);
        if popped.is_some() {
            debug!(container, "popped container");
        }
        Ok(popped.map(|ids| self.facade_for(container, ids)))
    }

    /// Number of containers. Maintained incrementally; never scans.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn count(&self) -> IntIdResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("containers.count"))?;
        Ok(state.count)
    }

    /// Whether there are no containers.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn is_empty(&self) -> IntIdResult<bool> {
        Ok(self.count()? == 0)
    }

    /// Facade over `container`'s members, or `None` if there is no such container.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn get(&self, container: &str) -> IntIdResult<Option<IntidResolvingIterable<S>>> {
        let state = self.state.read().map_err(|_| lock_err("containers.get"))?;
        let ids = state.containers.get(container).cloned();
        drop(state);
        Ok(ids.map(|ids| self.facade_for(container, ids)))
    }

    /// Whether `container` exists.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn contains_container(&self, container: &str) -> IntIdResult<bool> {
        let state = self.state.read().map_err(|_| lock_err("containers.contains"))?;
        Ok(state.containers.contains_key(container))
    }

    /// Container keys in sorted order.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn container_ids(&self) -> IntIdResult<Vec<String>> {
        let state = self.state.read().map_err(|_| lock_err("containers.keys"))?;
        Ok(state.containers.keys().cloned().collect())
    }

    /// When `container` was last modified.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn last_modified(&self, container: &str) -> IntIdResult<Option<DateTime<Utc>>> {
        let state = self.state.read().map_err(|_| lock_err("containers.last_modified"))?;
        Ok(state.modified.get(container).copied().and_then(decode_time))
    }

    /// When any container was last modified, if ever.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn storage_last_modified(&self) -> IntIdResult<Option<DateTime<Utc>>> {
        let state = self.state.read().map_err(|_| lock_err("containers.last_modified"))?;
        if state.last_modified == 0 {
            return Ok(None);
        }
        Ok(decode_time(state.last_modified))
    }

    /// Read-only view over every container.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn facade(&self) -> IntIdResult<IntidResolvingMappingFacade<S>> {
        let state = self.state.read().map_err(|_| lock_err("containers.facade"))?;
        let containers = state.containers.clone();
        drop(state);
        let mut facade = IntidResolvingMappingFacade::new(containers, self.policy)
            .with_intids(Arc::clone(&self.intids));
        if let Some(name) = &self.name {
            facade = facade.with_name(name.clone());
        }
        Ok(facade)
    }

    /// Capture the persistent state.
    ///
    /// # Errors
    /// Returns `Internal` if the storage lock is poisoned.
    pub fn snapshot(&self) -> IntIdResult<ContainerSnapshot> {
        let state = self.state.read().map_err(|_| lock_err("containers.snapshot"))?;
        Ok(ContainerSnapshot {
            containers: state
                .containers
                .iter()
                .map(|(k, v)| (k.clone(), (**v).clone()))
                .collect(),
            modified: state.modified.clone(),
            count: state.count,
            last_modified: state.last_modified,
        })
    }

    /// Rebuild storage from a snapshot, validating its invariants.
    ///
    /// A snapshot holds container data only. The result starts out like
    /// [`new`](Self::new) (tolerant, unnamed); chain
    /// [`with_policy`](Self::with_policy) and [`with_name`](Self::with_name)
    /// to configure it again.
    ///
    /// # Errors
    /// Returns `CorruptSnapshot` if the cached count or the modification
    /// times disagree with the container keys.
    pub fn restore(intids: Arc<IntIds<S>>, snapshot: ContainerSnapshot) -> IntIdResult<Self> {
        if snapshot.count != snapshot.containers.len() {
            return Err(IntIdError::CorruptSnapshot {
                reason: format!(
                    "container count {} does not match {} containers",
                    snapshot.count,
                    snapshot.containers.len()
                ),
            });
        }
        if !snapshot.containers.keys().eq(snapshot.modified.keys()) {
            return Err(IntIdError::CorruptSnapshot {
                reason: "modification times do not match container keys".to_string(),
            });
        }

        let storage = Self::new(intids);
        {
            let mut state = storage.state.write().map_err(|_| lock_err("containers.restore"))?;
            state.containers = snapshot
                .containers
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect();
            state.modified = snapshot.modified;
            state.count = snapshot.count;
            state.last_modified = snapshot.last_modified;
        }
        Ok(storage)
    }

    fn facade_for(&self, container: &str, ids: Arc<BTreeSet<IntId>>) -> IntidResolvingIterable<S> {
        let mut facade = IntidResolvingIterable::new(ids, self.policy)
            .with_intids(Arc::clone(&self.intids))
            .with_name(container);
        if let Some(name) = &self.name {
            facade = facade.with_parent(name.clone());
        }
        facade
    }
}

impl<S> IntidContainedStorage<S>
where
    S: ObjectStore + 'static,
    S::Object: Contained,
{
    /// Add `ob` to `container`, or to the container it names itself
    /// (`""` if it names none).
    ///
    /// # Errors
    /// As for [`add`](Self::add).
    pub fn add_contained_object(
        &self,
        ob: &S::Object,
        container: Option<&str>,
    ) -> IntIdResult<IntId> {
        let container = container_key(ob, container);
        self.add(&container, ob)
    }

    /// Remove `ob` from `container` (or its own container). Returns the
    /// object if it was a member.
    ///
    /// # Errors
    /// As for [`remove_equal`](Self::remove_equal).
    pub fn delete_equal_contained_object(
        &self,
        ob: &S::Object,
        container: Option<&str>,
    ) -> IntIdResult<Option<S::Object>> {
        let container = container_key(ob, container);
        if self.remove_equal(&container, ob)? {
            Ok(Some(ob.clone()))
        } else {
            Ok(None)
        }
    }
}

fn container_key<O: Contained>(ob: &O, container: Option<&str>) -> String {
    container
        .or_else(|| ob.container_id())
        .unwrap_or_default()
        .to_string()
}

impl<S: ObjectStore> fmt::Debug for IntidContainedStorage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntidContainedStorage")
            .field("registry", &self.intids.attribute())
            .field("policy", &self.policy)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
