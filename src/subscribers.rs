//! Lifecycle glue between the object store and the id registries.
//!
//! The host calls [`add_intid`] when an object is added to the store and
//! [`remove_intid`] when it is about to be removed. Both work across every
//! registry of one store type and emit a single combined event per
//! dispatcher. [`ContainerIndexer`] is the index-tier subscriber that keeps
//! an [`IntidContainedStorage`] in step with registration.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::containers::IntidContainedStorage;
use crate::error::IntIdResult;
use crate::events::{
    EventDispatcher, IdAddedEvent, IdRemovedEvent, IdSubscriber, Notify, OriginalEvent,
    SubscriberId, Tier,
};
use crate::id::IntId;
use crate::registry::IntIds;
use crate::storage::{Contained, ObjectStore};

/// Distinct dispatchers across `registries`, in first-seen order.
fn dispatchers<S: ObjectStore>(
    registries: &[Arc<IntIds<S>>],
) -> Vec<Arc<EventDispatcher<S::Object>>> {
    let mut seen: Vec<Arc<EventDispatcher<S::Object>>> = Vec::new();
    for registry in registries {
        if !seen.iter().any(|d| Arc::ptr_eq(d, registry.events())) {
            seen.push(Arc::clone(registry.events()));
        }
    }
    seen
}

/// Give `ob` an id in every registry, then announce it once.
///
/// Registries whose store cannot key the object are skipped. The event is
/// dispatched only if at least one registry assigned a new id; an object
/// already known everywhere is returned silently. If a registry fails, ids
/// assigned by this call are withdrawn before the error is returned.
/// Returns registry attribute -> id.
///
/// # Errors
/// - `DomainExhausted`: a registry could not find a free id
/// - `Internal`: a registry lock is poisoned
pub fn add_intid<S: ObjectStore>(
    registries: &[Arc<IntIds<S>>],
    ob: &S::Object,
    original: Option<OriginalEvent>,
) -> IntIdResult<BTreeMap<String, IntId>> {
    let mut idmap = BTreeMap::new();
    let mut assigned: Vec<&Arc<IntIds<S>>> = Vec::new();
    let mut object = None;
    for registry in registries {
        let unwrapped = registry.store().unwrap(ob);
        if registry.store().key_of(&unwrapped).is_none() {
            debug!(registry = registry.attribute(), "object has no stable key; not registering");
            continue;
        }
        let (id, fresh) = match registry.register_new(&unwrapped, Notify::Silent) {
            Ok(outcome) => outcome,
            Err(err) => {
                roll_back(&assigned, ob);
                return Err(err);
            }
        };
        if fresh {
            assigned.push(registry);
        }
        idmap.insert(registry.attribute().to_string(), id);
        object.get_or_insert(unwrapped);
    }

    let Some(object) = object.filter(|_| !assigned.is_empty()) else {
        return Ok(idmap);
    };
    let event = IdAddedEvent {
        object,
        idmap: idmap.clone(),
        original,
    };
    for dispatcher in dispatchers(registries) {
        dispatcher.notify_added(&event);
    }
    Ok(idmap)
}

/// Withdraw ids handed out by a failed [`add_intid`].
fn roll_back<S: ObjectStore>(assigned: &[&Arc<IntIds<S>>], ob: &S::Object) {
    for registry in assigned {
        if let Err(err) = registry.unregister_with(ob, Notify::Silent) {
            warn!(registry = registry.attribute(), error = %err, "failed to withdraw id");
        }
    }
}

/// Announce `ob`'s removal once, then drop its id from every registry.
///
/// Subscribers run while the ids still resolve. Registries that do not know
/// the object are left alone. Returns registry attribute -> removed id.
///
/// # Errors
/// Returns `Internal` if a registry lock is poisoned.
pub fn remove_intid<S: ObjectStore>(
    registries: &[Arc<IntIds<S>>],
    ob: &S::Object,
    original: Option<OriginalEvent>,
) -> IntIdResult<BTreeMap<String, IntId>> {
    let mut known = Vec::new();
    for registry in registries {
        if registry.query_id(ob)?.is_some() {
            known.push(Arc::clone(registry));
        }
    }
    let Some(first) = known.first() else {
        return Ok(BTreeMap::new());
    };

    let event = IdRemovedEvent {
        object: first.store().unwrap(ob),
        original,
    };
    for dispatcher in dispatchers(&known) {
        dispatcher.notify_removed(&event);
    }

    let mut removed = BTreeMap::new();
    for registry in &known {
        if let Some(id) = registry.unregister_with(ob, Notify::Silent)? {
            removed.insert(registry.attribute().to_string(), id);
        }
    }
    Ok(removed)
}

/// Index-tier subscriber that files objects into their containers.
///
/// Holds the storage weakly; once the storage is dropped the indexer does
/// nothing.
pub struct ContainerIndexer<S: ObjectStore> {
    storage: Weak<IntidContainedStorage<S>>,
}

impl<S> ContainerIndexer<S>
where
    S: ObjectStore + 'static,
    S::Object: Contained,
{
    /// Indexer for `storage`.
    #[must_use]
    pub fn new(storage: &Arc<IntidContainedStorage<S>>) -> Self {
        Self {
            storage: Arc::downgrade(storage),
        }
    }

    /// Subscribe an indexer for `storage` to its own registry's dispatcher.
    pub fn attach(storage: &Arc<IntidContainedStorage<S>>) -> SubscriberId {
        let indexer = Arc::new(Self::new(storage));
        storage.intids().subscribe(Tier::Index, indexer)
    }
}

impl<S> IdSubscriber<S::Object> for ContainerIndexer<S>
where
    S: ObjectStore + 'static,
    S::Object: Contained,
{
    fn name(&self) -> &str {
        "container-indexer"
    }

    fn id_added(&self, event: &IdAddedEvent<S::Object>) {
        let Some(storage) = self.storage.upgrade() else {
            debug!("container storage dropped; skipping add");
            return;
        };
        if let Err(err) = storage.add_contained_object(&event.object, None) {
            warn!(
                error = %err,
                object = ?event.object,
                "failed to index object into its container"
            );
        }
    }

    fn id_removed(&self, event: &IdRemovedEvent<S::Object>) {
        let Some(storage) = self.storage.upgrade() else {
            debug!("container storage dropped; skipping remove");
            return;
        };
        if let Err(err) = storage.delete_equal_contained_object(&event.object, None) {
            warn!(
                error = %err,
                object = ?event.object,
                "failed to remove object from its container"
            );
        }
    }
}
