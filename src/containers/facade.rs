//! Lazy views that turn id sets back into live objects.
//!
//! Facades are transient: they hold a live registry handle and a snapshot of
//! an id set, and refuse to be serialized.

use std::collections::{btree_set, BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use tracing::trace;

use crate::error::{IntIdError, IntIdResult};
use crate::id::IntId;
use crate::registry::{locator, IntIds};
use crate::storage::ObjectStore;

/// What a facade does with ids that no longer resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MissingPolicy {
    /// An unresolvable id ends iteration with `ObjectMissing`.
    #[default]
    Strict,
    /// Unresolvable ids are logged and skipped.
    Tolerant,
}

/// An id set that resolves to objects as it is iterated.
///
/// `len()` is the size of the id set. It only equals the number of objects
/// produced under [`MissingPolicy::Strict`].
pub struct IntidResolvingIterable<S: ObjectStore> {
    ids: Arc<BTreeSet<IntId>>,
    intids: Option<Arc<IntIds<S>>>,
    policy: MissingPolicy,
    parent: Option<String>,
    name: Option<String>,
}

impl<S: ObjectStore> Clone for IntidResolvingIterable<S> {
    fn clone(&self) -> Self {
        Self {
            ids: Arc::clone(&self.ids),
            intids: self.intids.clone(),
            policy: self.policy,
            parent: self.parent.clone(),
            name: self.name.clone(),
        }
    }
}

impl<S: ObjectStore + 'static> IntidResolvingIterable<S> {
    /// Wrap an id set. Without [`with_intids`](Self::with_intids) the
    /// registry is looked up from the locator at iteration time.
    #[must_use]
    pub fn new(ids: Arc<BTreeSet<IntId>>, policy: MissingPolicy) -> Self {
        Self {
            ids,
            intids: None,
            policy,
            parent: None,
            name: None,
        }
    }

    /// Resolve against this registry.
    #[must_use]
    pub fn with_intids(mut self, intids: Arc<IntIds<S>>) -> Self {
        self.intids = Some(intids);
        self
    }

    /// Diagnostic parent label.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Diagnostic name (usually the container key).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The wrapped ids.
    #[must_use]
    pub fn ids(&self) -> &BTreeSet<IntId> {
        &self.ids
    }

    /// Resolution policy.
    #[must_use]
    pub const fn policy(&self) -> MissingPolicy {
        self.policy
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of ids in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the id set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate objects in ascending id order.
    ///
    /// # Errors
    /// Returns `NoRegistry` if none was injected and none is installed.
    pub fn iter(&self) -> IntIdResult<ResolvingIter<'_, S>> {
        let intids = match &self.intids {
            Some(intids) => Arc::clone(intids),
            None => locator::installed::<S>().ok_or(IntIdError::NoRegistry)?,
        };
        Ok(ResolvingIter {
            ids: self.ids.iter(),
            intids,
            facade: self,
            done: false,
        })
    }

    /// Resolve every id.
    ///
    /// # Errors
    /// - `ObjectMissing`: under `Strict`, the first unresolvable id
    /// - `NoRegistry` / `Internal`: as for [`iter`](Self::iter)
    pub fn resolve_all(&self) -> IntIdResult<Vec<S::Object>> {
        self.iter()?.collect()
    }

    /// Whether `ob` is among the resolved objects. A linear scan.
    ///
    /// # Errors
    /// As for [`resolve_all`](Self::resolve_all).
    pub fn contains(&self, ob: &S::Object) -> IntIdResult<bool>
    where
        S::Object: PartialEq,
    {
        for item in self.iter()? {
            if item? == *ob {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<S: ObjectStore> fmt::Debug for IntidResolvingIterable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntidResolvingIterable")
            .field("len", &self.ids.len())
            .field("policy", &self.policy)
            .field("parent", &self.parent)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> Serialize for IntidResolvingIterable<S> {
    fn serialize<Ser: Serializer>(&self, _serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        Err(Ser::Error::custom(
            "IntidResolvingIterable is a transient view and cannot be serialized",
        ))
    }
}

/// Iterator returned by [`IntidResolvingIterable::iter`].
pub struct ResolvingIter<'a, S: ObjectStore> {
    ids: btree_set::Iter<'a, IntId>,
    intids: Arc<IntIds<S>>,
    facade: &'a IntidResolvingIterable<S>,
    done: bool,
}

impl<S: ObjectStore> Iterator for ResolvingIter<'_, S> {
    type Item = IntIdResult<S::Object>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        for &id in self.ids.by_ref() {
            match self.intids.get_object(id) {
                Ok(ob) => return Some(Ok(ob)),
                Err(err)
                    if err.is_object_missing()
                        && self.facade.policy == MissingPolicy::Tolerant =>
                {
                    trace!(
                        %id,
                        name = ?self.facade.name,
                        parent = ?self.facade.parent,
                        "failed to resolve id; skipping"
                    );
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        self.done = true;
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        (0, Some(self.ids.len()))
    }
}

/// Read-only view over a whole container map: key -> resolving facade.
pub struct IntidResolvingMappingFacade<S: ObjectStore> {
    containers: BTreeMap<String, Arc<BTreeSet<IntId>>>,
    intids: Option<Arc<IntIds<S>>>,
    policy: MissingPolicy,
    name: Option<String>,
}

impl<S: ObjectStore + 'static> IntidResolvingMappingFacade<S> {
    /// Wrap a container map.
    #[must_use]
    pub fn new(containers: BTreeMap<String, Arc<BTreeSet<IntId>>>, policy: MissingPolicy) -> Self {
        Self {
            containers,
            intids: None,
            policy,
            name: None,
        }
    }

    /// Resolve against this registry.
    #[must_use]
    pub fn with_intids(mut self, intids: Arc<IntIds<S>>) -> Self {
        self.intids = Some(intids);
        self
    }

    /// Diagnostic name, used as the parent label of produced facades.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Container keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.containers.keys().map(String::as_str)
    }

    /// Whether `key` is a container.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.containers.contains_key(key)
    }

    /// Number of containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Whether there are no containers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Facade over one container.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<IntidResolvingIterable<S>> {
        self.containers.get(key).map(|ids| self.facade_for(key, ids))
    }

    /// Facades in key order.
    pub fn values(&self) -> impl Iterator<Item = IntidResolvingIterable<S>> + '_ {
        self.containers.iter().map(|(key, ids)| self.facade_for(key, ids))
    }

    /// `(key, facade)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, IntidResolvingIterable<S>)> + '_ {
        self.containers
            .iter()
            .map(|(key, ids)| (key.as_str(), self.facade_for(key, ids)))
    }

    fn facade_for(&self, key: &str, ids: &Arc<BTreeSet<IntId>>) -> IntidResolvingIterable<S> {
        let mut facade = IntidResolvingIterable::new(Arc::clone(ids), self.policy).with_name(key);
        if let Some(intids) = &self.intids {
            facade = facade.with_intids(Arc::clone(intids));
        }
        if let Some(name) = &self.name {
            facade = facade.with_parent(name.clone());
        }
        facade
    }
}

impl<S: ObjectStore> fmt::Debug for IntidResolvingMappingFacade<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntidResolvingMappingFacade")
            .field("keys", &self.containers.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> Serialize for IntidResolvingMappingFacade<S> {
    fn serialize<Ser: Serializer>(&self, _serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        Err(Ser::Error::custom(
            "IntidResolvingMappingFacade is a transient view and cannot be serialized",
        ))
    }
}
