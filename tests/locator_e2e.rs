//! Fallback to the process-wide registry.
//!
//! The locator is global state, so everything that installs a registry
//! lives in this binary's single test.

use std::collections::BTreeSet;
use std::sync::Arc;

use intids::registry::locator;
use intids::{
    InMemoryObjectStore, IntIdError, IntIds, IntidResolvingIterable, MissingPolicy, Persistent,
    WeakRef,
};

type Store = InMemoryObjectStore<String>;
type Ob = Arc<Persistent<String>>;

#[test]
fn test_facades_and_references_fall_back_to_installed_registry() {
    let store = Arc::new(Store::new("Users"));
    let intids = Arc::new(IntIds::new("_ds_id", Arc::clone(&store)));
    let alice = store.add("alice".to_string()).unwrap();
    let bob = store.add("bob".to_string()).unwrap();
    let ia = intids.register(&alice).unwrap();
    let ib = intids.register(&bob).unwrap();

    let ids: BTreeSet<_> = [ia, ib].into_iter().collect();
    let facade: IntidResolvingIterable<Store> =
        IntidResolvingIterable::new(Arc::new(ids), MissingPolicy::Strict);
    let wref = WeakRef::new(&intids, &alice).unwrap();
    wref.clear_cache();
    let bare: WeakRef<Ob> = WeakRef::from_parts(ia, None);

    // Nothing installed yet.
    assert!(matches!(facade.iter(), Err(IntIdError::NoRegistry)));
    assert!(matches!(facade.resolve_all(), Err(IntIdError::NoRegistry)));
    assert!(matches!(wref.get::<Store>(true), Err(IntIdError::NoRegistry)));
    assert_ne!(bare, wref);

    locator::install(Arc::clone(&intids));

    let mut expected = vec![(ia, alice.clone()), (ib, bob.clone())];
    expected.sort_by_key(|(id, _)| *id);
    let expected: Vec<Ob> = expected.into_iter().map(|(_, ob)| ob).collect();
    assert_eq!(facade.resolve_all().unwrap(), expected);
    assert!(facade.contains(&bob).unwrap());

    // Neither reference is cached; equality resolves both through the registry.
    assert!(!wref.is_cached() && !bare.is_cached());
    assert_eq!(bare, wref);
    assert_ne!(WeakRef::<Ob>::from_parts(ib, None), wref);

    assert_eq!(wref.get::<Store>(true).unwrap(), Some(alice));
    assert!(wref.is_cached());

    assert!(locator::uninstall());
    assert!(matches!(facade.iter(), Err(IntIdError::NoRegistry)));
}
