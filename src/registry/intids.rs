//! The identity registry: bidirectional object <-> intid mapping.
//!
//! State is two maps:
//! - `refs`: id -> stable key (the canonical mapping; objects are reached by
//!   resolving the key through the object store)
//! - `ids`: stable key -> id (the back-pointer side table)
//!
//! A back-pointer is only trusted if `refs` agrees with it; otherwise it is
//! stale and treated as absent.
//!
//! Event ordering: on add, the new mapping is stored before any event is
//! dispatched. On remove, the removal event is dispatched first and the
//! mapping is deleted only after every subscriber has returned. No lock is
//! held during dispatch.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{lock_err, IntIdError, IntIdResult};
use crate::events::{
    EventDispatcher, IdAddedEvent, IdRemovedEvent, IdSubscriber, Notify, SubscriberId, Tier,
};
use crate::id::IntId;
use crate::registry::generator::IdGenerator;
use crate::storage::ObjectStore;

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntIdsConfig {
    /// Exclusive upper bound of the id domain. Ids are drawn from `[0, max_id)`.
    pub max_id: u64,
    /// Maximum random draws per registration before reporting `DomainExhausted`.
    pub max_attempts: u32,
    /// Seed for the id sequence; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for IntIdsConfig {
    fn default() -> Self {
        Self {
            // Matches a 64-bit signed id family.
            max_id: i64::MAX as u64,
            max_attempts: 1024,
            seed: None,
        }
    }
}

impl IntIdsConfig {
    /// Returns a copy with a fixed seed (reproducible id sequences).
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Returns a copy with a different id domain bound.
    #[must_use]
    pub fn with_max_id(mut self, max_id: u64) -> Self {
        self.max_id = max_id;
        self
    }
}

/// Serializable registry state.
///
/// Only `refs` is stored; the back-pointer table is derived on restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot<K> {
    /// Registry attribute name.
    pub attribute: String,
    /// id -> stable key.
    pub refs: BTreeMap<IntId, K>,
}

#[derive(Debug)]
struct RefState<K> {
    refs: BTreeMap<IntId, K>,
    ids: HashMap<K, IntId>,
}

impl<K> Default for RefState<K> {
    fn default() -> Self {
        Self {
            refs: BTreeMap::new(),
            ids: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + std::hash::Hash> RefState<K> {
    /// The id for `key`, if its back-pointer is still backed by `refs`.
    fn current_id(&self, key: &K) -> Option<IntId> {
        let id = *self.ids.get(key)?;
        (self.refs.get(&id) == Some(key)).then_some(id)
    }

    fn drop_back_pointer(&mut self, key: &K, id: IntId) {
        if self.ids.get(key) == Some(&id) {
            self.ids.remove(key);
        }
    }
}

/// Identity registry assigning stable integer ids to persistent objects.
pub struct IntIds<S: ObjectStore> {
    attribute: String,
    store: Arc<S>,
    cfg: IntIdsConfig,
    state: RwLock<RefState<S::Key>>,
    generator: Mutex<IdGenerator>,
    events: Arc<EventDispatcher<S::Object>>,
}

impl<S: ObjectStore> IntIds<S> {
    /// Create a registry with the default configuration.
    ///
    /// `attribute` names the registry; it keys the idmap of add events.
    #[must_use]
    pub fn new(attribute: impl Into<String>, store: Arc<S>) -> Self {
        Self::with_config(attribute, store, IntIdsConfig::default())
    }

    /// Create a registry with an explicit configuration.
    #[must_use]
    pub fn with_config(attribute: impl Into<String>, store: Arc<S>, cfg: IntIdsConfig) -> Self {
        let generator = IdGenerator::new(cfg.seed, cfg.max_id, cfg.max_attempts);
        Self {
            attribute: attribute.into(),
            store,
            cfg,
            state: RwLock::new(RefState::default()),
            generator: Mutex::new(generator),
            events: Arc::new(EventDispatcher::new()),
        }
    }

    /// Replace the event dispatcher, e.g. to share one across registries.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventDispatcher<S::Object>>) -> Self {
        self.events = events;
        self
    }

    /// Registry attribute name.
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// The object store this registry indexes.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The dispatcher events are raised through.
    #[must_use]
    pub fn events(&self) -> &Arc<EventDispatcher<S::Object>> {
        &self.events
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &IntIdsConfig {
        &self.cfg
    }

    /// Subscribe to this registry's events.
    pub fn subscribe(
        &self,
        tier: Tier,
        subscriber: Arc<dyn IdSubscriber<S::Object>>,
    ) -> SubscriberId {
        self.events.subscribe(tier, subscriber)
    }

    /// Number of registered ids.
    ///
    /// # Errors
    /// Returns `Internal` if the registry lock is poisoned.
    pub fn len(&self) -> IntIdResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("intids.len"))?;
        Ok(state.refs.len())
    }

    /// Whether no ids are registered.
    ///
    /// # Errors
    /// Returns `Internal` if the registry lock is poisoned.
    pub fn is_empty(&self) -> IntIdResult<bool> {
        Ok(self.len()? == 0)
    }

    /// All registered ids in ascending order.
    ///
    /// # Errors
    /// Returns `Internal` if the registry lock is poisoned.
    pub fn ids(&self) -> IntIdResult<Vec<IntId>> {
        let state = self.state.read().map_err(|_| lock_err("intids.ids"))?;
        Ok(state.refs.keys().copied().collect())
    }

    /// The id of `ob`, or `None` if it has none (or cannot have one).
    ///
    /// # Errors
    /// Returns `Internal` if the registry lock is poisoned.
    pub fn query_id(&self, ob: &S::Object) -> IntIdResult<Option<IntId>> {
        let ob = self.store.unwrap(ob);
        let Some(key) = self.store.key_of(&ob) else {
            return Ok(None);
        };
        let state = self.state.read().map_err(|_| lock_err("intids.query_id"))?;
        Ok(state.current_id(&key))
    }

    /// The id of `ob`.
    ///
    /// # Errors
    /// - `IdMissing`: the object has no id in this registry
    /// - `Internal`: the registry lock is poisoned
    pub fn get_id(&self, ob: &S::Object) -> IntIdResult<IntId> {
        self.query_id(ob)?.ok_or_else(|| IntIdError::IdMissing {
            object: format!("{:?}", self.store.unwrap(ob)),
            registry: self.attribute.clone(),
        })
    }

    /// The object registered under `id`, or `None`.
    ///
    /// # Errors
    /// Returns `Internal` if the registry lock is poisoned.
    pub fn query_object(&self, id: IntId) -> IntIdResult<Option<S::Object>> {
        let key = {
            let state = self.state.read().map_err(|_| lock_err("intids.query_object"))?;
            match state.refs.get(&id) {
                Some(key) => key.clone(),
                None => return Ok(None),
            }
        };
        Ok(self.store.resolve(&key))
    }

    /// The object registered under `id`.
    ///
    /// # Errors
    /// - `ObjectMissing`: the id is unknown or its key no longer resolves
    /// - `Internal`: the registry lock is poisoned
    pub fn get_object(&self, id: IntId) -> IntIdResult<S::Object> {
        self.query_object(id)?.ok_or_else(|| IntIdError::ObjectMissing {
            id,
            registry: self.attribute.clone(),
        })
    }

    /// Register `ob`, returning its (possibly existing) id.
    ///
    /// # Errors
    /// See [`IntIds::register_with`].
    pub fn register(&self, ob: &S::Object) -> IntIdResult<IntId> {
        self.register_with(ob, Notify::Plain)
    }

    /// Register `ob`, controlling event dispatch.
    ///
    /// An object that already has a valid id gets it back and no event fires.
    ///
    /// # Errors
    /// - `NotPersistable`: the object has no stable key
    /// - `DomainExhausted`: no free id could be found
    /// - `Internal`: a registry lock is poisoned
    pub fn register_with(&self, ob: &S::Object, notify: Notify) -> IntIdResult<IntId> {
        self.register_new(ob, notify).map(|(id, _)| id)
    }

    /// Register `ob` and report whether the id was assigned by this call.
    ///
    /// Returns `(id, false)` for an object that already had a valid id; no
    /// event fires in that case.
    ///
    /// # Errors
    /// See [`IntIds::register_with`].
    pub fn register_new(&self, ob: &S::Object, notify: Notify) -> IntIdResult<(IntId, bool)> {
        let ob = self.store.unwrap(ob);
        let key = self.key_for_registration(&ob)?;

        let id = {
            let mut state = self.state.write().map_err(|_| lock_err("intids.register"))?;
            if let Some(existing) = state.current_id(&key) {
                return Ok((existing, false));
            }

            let id = {
                let mut generator = self
                    .generator
                    .lock()
                    .map_err(|_| lock_err("intids.generator"))?;
                let occupied = state.refs.len();
                let refs = &state.refs;
                generator.generate(occupied, |candidate| refs.contains_key(&candidate))?
            };

            state.refs.insert(id, key.clone());
            state.ids.insert(key, id);
            id
        };

        debug!(registry = %self.attribute, %id, "registered object");

        if let Some(original) = notify.into_original() {
            let mut idmap = BTreeMap::new();
            idmap.insert(self.attribute.clone(), id);
            self.events.notify_added(&IdAddedEvent {
                object: ob,
                idmap,
                original,
            });
        }
        Ok((id, true))
    }

    /// Remove `ob`'s id. A no-op (returning `None`) if it has none.
    ///
    /// # Errors
    /// See [`IntIds::unregister_with`].
    pub fn unregister(&self, ob: &S::Object) -> IntIdResult<Option<IntId>> {
        self.unregister_with(ob, Notify::Plain)
    }

    /// Remove `ob`'s id, controlling event dispatch.
    ///
    /// The removal event fires while the id still resolves; the mapping is
    /// deleted afterwards.
    ///
    /// # Errors
    /// Returns `Internal` if the registry lock is poisoned.
    pub fn unregister_with(&self, ob: &S::Object, notify: Notify) -> IntIdResult<Option<IntId>> {
        let ob = self.store.unwrap(ob);
        let Some(key) = self.store.key_of(&ob) else {
            return Ok(None);
        };
        let id = {
            let state = self.state.read().map_err(|_| lock_err("intids.unregister"))?;
            match state.current_id(&key) {
                Some(id) => id,
                None => return Ok(None),
            }
        };

        if let Some(original) = notify.into_original() {
            self.events.notify_removed(&IdRemovedEvent {
                object: ob,
                original,
            });
        }

        let mut state = self.state.write().map_err(|_| lock_err("intids.unregister"))?;
        if state.refs.get(&id) == Some(&key) {
            state.refs.remove(&id);
        }
        state.drop_back_pointer(&key, id);
        debug!(registry = %self.attribute, %id, "unregistered object");
        Ok(Some(id))
    }

    /// Install `ob` under a caller-chosen id (migration / repair).
    ///
    /// With `check` the call fails if `uid` is taken; without it an existing
    /// mapping for `uid` is silently replaced. An object already registered
    /// under another id is moved to `uid`. No event fires.
    ///
    /// # Errors
    /// - `IdInUse`: `check` is set and `uid` is assigned
    /// - `NotPersistable`: the object has no stable key
    /// - `Internal`: the registry lock is poisoned
    pub fn force_register(&self, uid: IntId, ob: &S::Object, check: bool) -> IntIdResult<()> {
        let ob = self.store.unwrap(ob);
        let key = self.key_for_registration(&ob)?;

        let mut state = self.state.write().map_err(|_| lock_err("intids.force_register"))?;
        if let Some(previous) = state.refs.get(&uid).cloned() {
            if check {
                return Err(IntIdError::IdInUse { id: uid });
            }
            if previous != key {
                warn!(
                    registry = %self.attribute,
                    id = %uid,
                    "force_register overwrote an existing mapping"
                );
                state.drop_back_pointer(&previous, uid);
            }
        }
        if let Some(old) = state.current_id(&key).filter(|old| *old != uid) {
            debug!(registry = %self.attribute, from = %old, to = %uid, "moving object to new id");
            state.refs.remove(&old);
        }
        state.refs.insert(uid, key.clone());
        state.ids.insert(key, uid);
        info!(registry = %self.attribute, id = %uid, "force registered object");
        Ok(())
    }

    /// Remove the mapping for `uid` directly (migration / repair).
    ///
    /// If `ob` is given it must be the object registered under `uid`.
    /// `notify` fires the removal event before deletion; `remove_attribute`
    /// also clears the object's back-pointer (leave it unset when the
    /// object is already gone).
    ///
    /// # Errors
    /// - `ObjectMissing`: `uid` is not assigned
    /// - `KeyMismatch`: `ob` is not the object registered under `uid`
    /// - `Internal`: the registry lock is poisoned
    pub fn force_unregister(
        &self,
        uid: IntId,
        ob: Option<&S::Object>,
        notify: bool,
        remove_attribute: bool,
    ) -> IntIdResult<()> {
        let key = {
            let state = self.state.read().map_err(|_| lock_err("intids.force_unregister"))?;
            state.refs.get(&uid).cloned().ok_or_else(|| IntIdError::ObjectMissing {
                id: uid,
                registry: self.attribute.clone(),
            })?
        };

        let ob = ob.map(|ob| self.store.unwrap(ob));
        if let Some(ob) = &ob {
            if self.store.key_of(ob).as_ref() != Some(&key) {
                return Err(IntIdError::KeyMismatch {
                    id: uid,
                    object: format!("{ob:?}"),
                });
            }
        }

        if notify {
            match ob.clone().or_else(|| self.store.resolve(&key)) {
                Some(object) => self.events.notify_removed(&IdRemovedEvent {
                    object,
                    original: None,
                }),
                None => {
                    debug!(
                        registry = %self.attribute,
                        id = %uid,
                        "no object to notify about; skipping removal event"
                    );
                }
            }
        }

        let mut state = self.state.write().map_err(|_| lock_err("intids.force_unregister"))?;
        state.refs.remove(&uid);
        if remove_attribute {
            state.drop_back_pointer(&key, uid);
        }
        info!(registry = %self.attribute, id = %uid, remove_attribute, "force unregistered id");
        Ok(())
    }

    /// Restart id generation from a fresh random point. Mappings are untouched.
    ///
    /// # Errors
    /// Returns `Internal` if the generator lock is poisoned.
    pub fn randomize(&self) -> IntIdResult<()> {
        let mut generator = self
            .generator
            .lock()
            .map_err(|_| lock_err("intids.randomize"))?;
        generator.randomize();
        debug!(registry = %self.attribute, "randomized id sequence");
        Ok(())
    }

    /// Capture the persistent part of the registry.
    ///
    /// # Errors
    /// Returns `Internal` if the registry lock is poisoned.
    pub fn snapshot(&self) -> IntIdResult<RegistrySnapshot<S::Key>> {
        let state = self.state.read().map_err(|_| lock_err("intids.snapshot"))?;
        Ok(RegistrySnapshot {
            attribute: self.attribute.clone(),
            refs: state.refs.clone(),
        })
    }

    /// Rebuild a registry from a snapshot.
    ///
    /// # Errors
    /// Returns `CorruptSnapshot` if two ids share one stable key.
    pub fn restore(
        snapshot: RegistrySnapshot<S::Key>,
        store: Arc<S>,
        cfg: IntIdsConfig,
    ) -> IntIdResult<Self> {
        let mut ids = HashMap::with_capacity(snapshot.refs.len());
        for (id, key) in &snapshot.refs {
            if let Some(other) = ids.insert(key.clone(), *id) {
                return Err(IntIdError::CorruptSnapshot {
                    reason: format!("key {key:?} registered under both {other} and {id}"),
                });
            }
        }

        let registry = Self::with_config(snapshot.attribute, store, cfg);
        {
            let mut state = registry.state.write().map_err(|_| lock_err("intids.restore"))?;
            state.refs = snapshot.refs;
            state.ids = ids;
        }
        Ok(registry)
    }

    fn key_for_registration(&self, ob: &S::Object) -> IntIdResult<S::Key> {
        self.store
            .key_of(ob)
            .ok_or_else(|| IntIdError::NotPersistable {
                object: format!("{ob:?}"),
            })
    }
}

impl<S: ObjectStore> fmt::Debug for IntIds<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntIds")
            .field("attribute", &self.attribute)
            .field("cfg", &self.cfg)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> fmt::Display for IntIds<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.len() {
            Ok(n) => write!(f, "<IntIds ({}) {n} ids>", self.attribute),
            Err(_) => write!(f, "<IntIds ({}) unavailable>", self.attribute),
        }
    }
}
