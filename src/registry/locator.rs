//! Optional process-wide registry lookup.
//!
//! The core API always takes a registry explicitly. This locator exists for
//! callers (facades, weak references) that were not handed one; they fall
//! back to whatever registry is installed here. Facades look it up by store
//! type; weak references only know their object type and go through the
//! installed [`ObjectResolver`].

use std::any::Any;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::IntIdResult;
use crate::id::{IntId, Oid};
use crate::registry::intids::IntIds;
use crate::storage::ObjectStore;

/// Resolves an id to a live object of type `O`.
pub trait ObjectResolver<O>: Send + Sync {
    /// The object registered under `id`.
    ///
    /// Returns `None` if the id does not resolve, or if both `oid` and the
    /// resolved object's oid are known and differ.
    ///
    /// # Errors
    /// Returns `Internal` if a lock is poisoned.
    fn resolve_id(&self, id: IntId, oid: Option<Oid>) -> IntIdResult<Option<O>>;
}

impl<S: ObjectStore> ObjectResolver<S::Object> for IntIds<S> {
    fn resolve_id(&self, id: IntId, oid: Option<Oid>) -> IntIdResult<Option<S::Object>> {
        Ok(self
            .query_object(id)?
            .filter(|ob| match (oid, self.store().oid_of(ob)) {
                (Some(expected), Some(actual)) => expected == actual,
                _ => true,
            }))
    }
}

struct Installed {
    /// `IntIds<S>`
    registry: Arc<dyn Any + Send + Sync>,
    /// `Arc<dyn ObjectResolver<S::Object>>`
    resolver: Arc<dyn Any + Send + Sync>,
}

fn slot() -> &'static RwLock<Option<Installed>> {
    static SLOT: OnceLock<RwLock<Option<Installed>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(None))
}

/// Install `registry` as the process-wide registry, replacing any previous one.
pub fn install<S>(registry: Arc<IntIds<S>>)
where
    S: ObjectStore + 'static,
{
    let resolver: Arc<dyn ObjectResolver<S::Object>> = Arc::clone(&registry) as _;
    let mut slot = match slot().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *slot = Some(Installed {
        registry,
        resolver: Arc::new(resolver),
    });
}

/// The installed registry, if one of store type `S` is installed.
#[must_use]
pub fn installed<S>() -> Option<Arc<IntIds<S>>>
where
    S: ObjectStore + 'static,
{
    let slot = slot().read().ok()?;
    let any = Arc::clone(&slot.as_ref()?.registry);
    any.downcast::<IntIds<S>>().ok()
}

/// The installed registry as a resolver for objects of type `O`, if its
/// store hands out `O`.
#[must_use]
pub fn installed_resolver<O: 'static>() -> Option<Arc<dyn ObjectResolver<O>>> {
    let slot = slot().read().ok()?;
    let any = Arc::clone(&slot.as_ref()?.resolver);
    let resolver = any.downcast::<Arc<dyn ObjectResolver<O>>>().ok()?;
    Some(Arc::clone(resolver.as_ref()))
}

/// Remove the installed registry. Returns true if one was installed.
pub fn uninstall() -> bool {
    let mut slot = match slot().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    slot.take().is_some()
}
