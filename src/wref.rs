//! Weak references: persistable handles that find an object by intid.
//!
//! A `WeakRef` does not keep its target alive. It remembers the target's
//! intid and, when known, its oid; resolving goes back through a registry.
//! Only the id and oid are serialized, so a restored reference starts with
//! an empty cache.
//!
//! Two references are equal when they currently resolve to equal objects.
//! Each side answers from its cache, else through the installed registry;
//! only when neither side resolves are the stored id and oid compared.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{lock_err, IntIdError, IntIdResult};
use crate::id::{IntId, Oid};
use crate::registry::locator::{self, ObjectResolver};
use crate::registry::IntIds;
use crate::storage::ObjectStore;

/// Weak reference to a registered object.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct WeakRef<O> {
    entity_id: IntId,
    entity_oid: Option<Oid>,
    #[serde(skip)]
    cache: RwLock<Option<O>>,
}

impl<O: Clone> WeakRef<O> {
    /// Reference `ob`, which must already have an id in `intids`.
    ///
    /// # Errors
    /// - `IdMissing`: `ob` is not registered
    /// - `Internal`: a registry lock is poisoned
    pub fn new<S>(intids: &IntIds<S>, ob: &O) -> IntIdResult<Self>
    where
        S: ObjectStore<Object = O>,
    {
        let ob = intids.store().unwrap(ob);
        let entity_id = intids.get_id(&ob)?;
        let entity_oid = intids.store().oid_of(&ob);
        Ok(Self {
            entity_id,
            entity_oid,
            cache: RwLock::new(Some(ob)),
        })
    }

    /// Rebuild a reference from its persisted parts.
    #[must_use]
    pub const fn from_parts(entity_id: IntId, entity_oid: Option<Oid>) -> Self {
        Self {
            entity_id,
            entity_oid,
            cache: RwLock::new(None),
        }
    }

    /// The target's intid.
    #[must_use]
    pub const fn entity_id(&self) -> IntId {
        self.entity_id
    }

    /// The target's oid at the time the reference was made.
    #[must_use]
    pub const fn entity_oid(&self) -> Option<Oid> {
        self.entity_oid
    }

    /// Whether a resolved object is cached.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cache.read().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Forget the cached object.
    pub fn clear_cache(&self) {
        let mut cache = match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cache = None;
    }

    /// Resolve the target through `intids`.
    ///
    /// Returns `None` when the id no longer resolves, or when it resolves
    /// to an object with a different oid (the id was reused). With
    /// `allow_cached` a cached object is returned directly and a fresh
    /// result is cached.
    ///
    /// # Errors
    /// Returns `Internal` if a lock is poisoned.
    pub fn resolve<S>(&self, intids: &IntIds<S>, allow_cached: bool) -> IntIdResult<Option<O>>
    where
        S: ObjectStore<Object = O>,
    {
        if allow_cached {
            let cache = self.cache.read().map_err(|_| lock_err("wref.cache"))?;
            if let Some(ob) = cache.as_ref() {
                return Ok(Some(ob.clone()));
            }
        }

        let resolved = intids.resolve_id(self.entity_id, self.entity_oid)?;

        if allow_cached {
            let mut cache = self.cache.write().map_err(|_| lock_err("wref.cache"))?;
            *cache = resolved.clone();
        }
        Ok(resolved)
    }

    /// Resolve through the process-wide registry.
    ///
    /// # Errors
    /// - `NoRegistry`: no registry of store type `S` is installed
    /// - `Internal`: a lock is poisoned
    pub fn get<S>(&self, allow_cached: bool) -> IntIdResult<Option<O>>
    where
        S: ObjectStore<Object = O> + 'static,
    {
        let intids = locator::installed::<S>().ok_or(IntIdError::NoRegistry)?;
        self.resolve(&intids, allow_cached)
    }

    /// Whether both references currently resolve to the same stored object.
    ///
    /// Two references that both fail to resolve are not the same.
    ///
    /// # Errors
    /// Returns `Internal` if a lock is poisoned.
    pub fn resolves_to_same<S>(&self, other: &Self, intids: &IntIds<S>) -> IntIdResult<bool>
    where
        S: ObjectStore<Object = O>,
    {
        let (Some(a), Some(b)) = (self.resolve(intids, false)?, other.resolve(intids, false)?)
        else {
            return Ok(false);
        };
        let store = intids.store();
        Ok(match (store.key_of(&a), store.key_of(&b)) {
            (Some(ka), Some(kb)) => ka == kb,
            _ => false,
        })
    }
}

impl<O: Clone> Clone for WeakRef<O> {
    fn clone(&self) -> Self {
        let cached = self.cache.read().ok().and_then(|c| c.clone());
        Self {
            entity_id: self.entity_id,
            entity_oid: self.entity_oid,
            cache: RwLock::new(cached),
        }
    }
}

impl<O: Clone + 'static> WeakRef<O> {
    /// The cached object, else whatever the installed registry resolves.
    fn current(&self) -> Option<O> {
        let cached = match self.cache.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        cached.or_else(|| {
            locator::installed_resolver::<O>()?
                .resolve_id(self.entity_id, self.entity_oid)
                .ok()
                .flatten()
        })
    }
}

impl<O: Clone + PartialEq + 'static> PartialEq for WeakRef<O> {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        match (self.current(), other.current()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                self.entity_id == other.entity_id && self.entity_oid == other.entity_oid
            }
            _ => false,
        }
    }
}

impl<O: Clone + Eq + 'static> Eq for WeakRef<O> {}

// Equal references share a target, and a registered target has one id.
impl<O> Hash for WeakRef<O> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_id.hash(state);
    }
}

impl<O: Clone + Eq + 'static> PartialOrd for WeakRef<O> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by id; references that share an id but are not equal are
/// ordered by oid, then unresolved before resolved.
impl<O: Clone + Eq + 'static> Ord for WeakRef<O> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entity_id.cmp(&other.entity_id).then_with(|| {
            if self == other {
                return Ordering::Equal;
            }
            self.entity_oid
                .cmp(&other.entity_oid)
                .then_with(|| self.current().is_some().cmp(&other.current().is_some()))
        })
    }
}

impl<O> fmt::Debug for WeakRef<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("entity_id", &self.entity_id)
            .field("entity_oid", &self.entity_oid)
            .finish_non_exhaustive()
    }
}

impl<O> fmt::Display for WeakRef<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity_oid {
            Some(oid) => write!(f, "<WeakRef {}/{}>", self.entity_id, oid),
            None => write!(f, "<WeakRef {}/->", self.entity_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::storage::memory::{InMemoryObjectStore, Persistent};

    type Store = InMemoryObjectStore<&'static str>;
    type Ob = Arc<Persistent<&'static str>>;

    fn setup() -> (Arc<Store>, IntIds<Store>) {
        let store = Arc::new(Store::new("Users"));
        let intids = IntIds::new("_ds_id", Arc::clone(&store));
        (store, intids)
    }

    fn registered(store: &Store, intids: &IntIds<Store>, value: &'static str) -> Ob {
        let ob = store.add(value).unwrap();
        intids.register(&ob).unwrap();
        ob
    }

    #[test]
    fn test_resolve_and_cache() {
        let (store, intids) = setup();
        let ob = registered(&store, &intids, "root");
        let wref = WeakRef::new(&intids, &ob).unwrap();

        assert!(wref.is_cached());
        assert_eq!(wref.entity_id(), intids.get_id(&ob).unwrap());
        assert_eq!(wref.entity_oid(), ob.oid());
        assert_eq!(wref.resolve(&intids, true).unwrap(), Some(ob.clone()));

        wref.clear_cache();
        assert!(!wref.is_cached());
        assert_eq!(wref.resolve(&intids, false).unwrap(), Some(ob.clone()));
        assert!(!wref.is_cached());
        assert_eq!(wref.resolve(&intids, true).unwrap(), Some(ob));
        assert!(wref.is_cached());
    }

    #[test]
    fn test_serde_drops_cache() {
        let (store, intids) = setup();
        let ob = registered(&store, &intids, "root");
        let wref = WeakRef::new(&intids, &ob).unwrap();

        let json = serde_json::to_string(&wref).unwrap();
        let restored: WeakRef<Ob> = serde_json::from_str(&json).unwrap();
        assert!(!restored.is_cached());
        assert_eq!(
            (restored.entity_id(), restored.entity_oid()),
            (wref.entity_id(), wref.entity_oid())
        );
        assert_eq!(restored.to_string(), wref.to_string());
        assert_eq!(restored.resolve(&intids, true).unwrap(), Some(ob));
        assert_eq!(restored, wref);
    }

    #[test]
    fn test_unregistered_object_cannot_be_referenced() {
        let (store, intids) = setup();
        let ob = store.add("loose").unwrap();
        let err = WeakRef::new(&intids, &ob).unwrap_err();
        assert!(err.is_id_missing());
    }

    #[test]
    fn test_missing_targets_resolve_to_none() {
        let (store, intids) = setup();
        let ob = registered(&store, &intids, "root");
        let wref = WeakRef::new(&intids, &ob).unwrap();

        intids.unregister(&ob).unwrap();
        assert_eq!(wref.resolve(&intids, false).unwrap(), None);
        // The cache still answers until cleared.
        assert_eq!(wref.resolve(&intids, true).unwrap(), Some(ob));

        let dangling: WeakRef<Ob> = WeakRef::from_parts(IntId::new(12345), None);
        assert_eq!(dangling.resolve(&intids, true).unwrap(), None);
    }

    #[test]
    fn test_reused_id_with_other_oid_is_rejected() {
        let (store, intids) = setup();
        let first = registered(&store, &intids, "first");
        let id = intids.get_id(&first).unwrap();
        let wref = WeakRef::new(&intids, &first).unwrap();

        intids.unregister(&first).unwrap();
        let second = store.add("second").unwrap();
        intids.force_register(id, &second, true).unwrap();

        assert_eq!(wref.resolve(&intids, false).unwrap(), None);

        // Without a remembered oid the check is skipped.
        let no_oid: WeakRef<Ob> = WeakRef::from_parts(id, None);
        assert_eq!(no_oid.resolve(&intids, false).unwrap(), Some(second));
    }

    #[test]
    fn test_equality_and_ordering() {
        let (store, intids) = setup();
        let a = registered(&store, &intids, "a");
        let b = registered(&store, &intids, "b");

        let wa = WeakRef::new(&intids, &a).unwrap();
        let wa2 = WeakRef::new(&intids, &a).unwrap();
        let wb = WeakRef::new(&intids, &b).unwrap();

        assert_eq!(wa, wa2);
        assert_ne!(wa, wb);
        assert!(wa.resolves_to_same(&wa2, &intids).unwrap());
        assert!(!wa.resolves_to_same(&wb, &intids).unwrap());

        let mut map = BTreeMap::new();
        map.insert(wa.clone(), 1);
        map.insert(wb.clone(), 2);
        map.insert(wa2, 3);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&wa), Some(&3));
        assert_eq!(map.get(&wb), Some(&2));
    }

    #[test]
    fn test_equality_follows_resolved_objects() {
        let (store, intids) = setup();
        let ob = registered(&store, &intids, "root");
        let id = intids.get_id(&ob).unwrap();
        let full = WeakRef::new(&intids, &ob).unwrap();

        // Same target, remembered without an oid.
        let bare: WeakRef<Ob> = WeakRef::from_parts(id, None);
        assert_eq!(bare.resolve(&intids, true).unwrap(), Some(ob.clone()));
        assert_eq!(bare, full);
        assert_eq!(full.cmp(&bare), Ordering::Equal);

        // Neither side resolves: fall back to the stored parts.
        let a: WeakRef<Ob> = WeakRef::from_parts(IntId::new(900), None);
        let b: WeakRef<Ob> = WeakRef::from_parts(IntId::new(900), None);
        let c: WeakRef<Ob> = WeakRef::from_parts(IntId::new(900), Some(Oid::new(4)));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.cmp(&c), Ordering::Less);
        assert_ne!(a, full);
    }

    #[test]
    fn test_display() {
        let wref: WeakRef<Ob> = WeakRef::from_parts(IntId::new(7), Some(Oid::new(1)));
        assert_eq!(wref.to_string(), "<WeakRef 7/0x0000000000000001>");
        let bare: WeakRef<Ob> = WeakRef::from_parts(IntId::new(7), None);
        assert_eq!(bare.to_string(), "<WeakRef 7/->");
    }
}
