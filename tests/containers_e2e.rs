//! End-to-end tests for the container index and its facades.

use std::collections::BTreeSet;
use std::sync::Arc;

use intids::{
    add_intid, remove_intid, Contained, ContainerIndexer, InMemoryObjectStore, IntId, IntIdError,
    IntIds, IntIdsConfig, IntidContainedStorage, IntidResolvingIterable, MissingPolicy, Persistent,
};

#[derive(Debug, PartialEq, Eq)]
struct Message {
    subject: &'static str,
    folder: Option<&'static str>,
}

impl Contained for Message {
    fn container_id(&self) -> Option<&str> {
        self.folder
    }
}

type Store = InMemoryObjectStore<Message>;
type Ob = Arc<Persistent<Message>>;

struct Mailbox {
    store: Arc<Store>,
    intids: Arc<IntIds<Store>>,
    storage: Arc<IntidContainedStorage<Store>>,
}

impl Mailbox {
    fn new() -> Self {
        let store = Arc::new(Store::new("Mail"));
        let intids = Arc::new(IntIds::with_config(
            "_ds_id",
            Arc::clone(&store),
            IntIdsConfig::default().with_seed(17),
        ));
        let storage =
            Arc::new(IntidContainedStorage::new(Arc::clone(&intids)).with_name("folders"));
        Self {
            store,
            intids,
            storage,
        }
    }

    fn message(&self, subject: &'static str, folder: Option<&'static str>) -> Ob {
        let ob = self.store.add(Message { subject, folder }).unwrap();
        self.intids.register(&ob).unwrap();
        ob
    }
}

#[test]
fn test_container_count() {
    let mb = Mailbox::new();
    let o1 = mb.message("one", None);
    let o2 = mb.message("two", None);

    assert_eq!(mb.storage.count().unwrap(), 0);
    mb.storage.add("a", &o1).unwrap();
    assert_eq!(mb.storage.count().unwrap(), 1);
    mb.storage.add("b", &o2).unwrap();
    assert_eq!(mb.storage.count().unwrap(), 2);
    mb.storage.pop_container("a").unwrap();
    assert_eq!(mb.storage.count().unwrap(), 1);
    assert!(mb.storage.pop_container_opt("missing").unwrap().is_none());
    assert_eq!(mb.storage.count().unwrap(), 1);
}

#[test]
fn test_container_membership() {
    let mb = Mailbox::new();
    let o1 = mb.message("one", None);
    let o2 = mb.message("two", None);

    mb.storage.add("a", &o1).unwrap();
    mb.storage.add("a", &o2).unwrap();
    let id1 = mb.intids.get_id(&o1).unwrap();

    assert!(mb.storage.remove_by_id("a", id1).unwrap());
    let members = mb.storage.get("a").unwrap().unwrap();
    assert_eq!(members.resolve_all().unwrap(), vec![o2.clone()]);
    assert!(members.contains(&o2).unwrap());
    assert!(!members.contains(&o1).unwrap());

    assert!(!mb.storage.remove_by_id("a", id1).unwrap());
    assert!(mb.storage.remove_equal("a", &o2).unwrap());
    assert!(mb.storage.get("a").unwrap().unwrap().is_empty());
}

#[test]
fn test_facade_tolerant_and_strict() {
    let store = Arc::new(Store::new("Mail"));
    let intids = Arc::new(IntIds::new("_ds_id", Arc::clone(&store)));
    let mut obs = Vec::new();
    for (n, subject) in ["one", "two", "three"].into_iter().enumerate() {
        let ob = store.add(Message { subject, folder: None }).unwrap();
        intids
            .force_register(IntId::new(n as u64 + 1), &ob, true)
            .unwrap();
        obs.push(ob);
    }
    store.remove(obs[1].oid().unwrap()).unwrap();

    let ids: BTreeSet<IntId> = (1..=3).map(IntId::new).collect();
    let ids = Arc::new(ids);

    let tolerant = IntidResolvingIterable::new(Arc::clone(&ids), MissingPolicy::Tolerant)
        .with_intids(Arc::clone(&intids));
    let subjects: Vec<_> = tolerant
        .resolve_all()
        .unwrap()
        .iter()
        .map(|ob| ob.subject)
        .collect();
    assert_eq!(subjects, vec!["one", "three"]);

    let strict = IntidResolvingIterable::new(ids, MissingPolicy::Strict).with_intids(intids);
    let mut iter = strict.iter().unwrap();
    assert_eq!(iter.next().unwrap().unwrap().subject, "one");
    let err = iter.next().unwrap().unwrap_err();
    assert!(matches!(err, IntIdError::ObjectMissing { id, .. } if id == IntId::new(2)));
    assert!(iter.next().is_none());
    assert!(strict.resolve_all().is_err());
}

#[test]
fn test_strict_storage_surfaces_missing_objects() {
    let store = Arc::new(Store::new("Mail"));
    let intids = Arc::new(IntIds::new("_ds_id", Arc::clone(&store)));
    let storage =
        IntidContainedStorage::new(Arc::clone(&intids)).with_policy(MissingPolicy::Strict);

    let ob = store.add(Message { subject: "gone", folder: None }).unwrap();
    intids.register(&ob).unwrap();
    storage.add("inbox", &ob).unwrap();
    store.remove(ob.oid().unwrap()).unwrap();

    let facade = storage.get("inbox").unwrap().unwrap();
    assert_eq!(facade.policy(), MissingPolicy::Strict);
    assert!(facade.resolve_all().unwrap_err().is_object_missing());
}

#[test]
fn test_facades_refuse_serialization() {
    let mb = Mailbox::new();
    let ob = mb.message("one", Some("inbox"));
    mb.storage.add_contained_object(&ob, None).unwrap();

    let facade = mb.storage.get("inbox").unwrap().unwrap();
    let err = serde_json::to_string(&facade).unwrap_err();
    assert!(err.to_string().contains("transient"));
    assert!(serde_json::to_string(&mb.storage.facade().unwrap()).is_err());
}

#[test]
fn test_indexer_keeps_folders_in_step() {
    let store = Arc::new(Store::new("Mail"));
    let intids = Arc::new(IntIds::with_config(
        "_ds_id",
        Arc::clone(&store),
        IntIdsConfig::default().with_seed(23),
    ));
    let storage = Arc::new(IntidContainedStorage::new(Arc::clone(&intids)));
    ContainerIndexer::attach(&storage);
    let registries = [Arc::clone(&intids)];

    let inbox = store.add(Message { subject: "hi", folder: Some("inbox") }).unwrap();
    let loose = store.add(Message { subject: "loose", folder: None }).unwrap();
    add_intid(&registries, &inbox, None).unwrap();
    add_intid(&registries, &loose, None).unwrap();

    assert_eq!(storage.container_ids().unwrap(), vec!["", "inbox"]);
    let facade = storage.facade().unwrap();
    let inbox_members = facade.get("inbox").unwrap().resolve_all().unwrap();
    assert_eq!(inbox_members, vec![inbox.clone()]);

    remove_intid(&registries, &inbox, None).unwrap();
    assert!(storage.get("inbox").unwrap().unwrap().is_empty());
    assert_eq!(intids.query_id(&inbox).unwrap(), None);
    assert_eq!(storage.count().unwrap(), 2);
}

#[test]
fn test_container_snapshot_roundtrip() {
    let mb = Mailbox::new();
    let o1 = mb.message("one", Some("inbox"));
    let o2 = mb.message("two", Some("sent"));
    mb.storage.add_contained_object(&o1, None).unwrap();
    mb.storage.add_contained_object(&o2, None).unwrap();

    let snap = mb.storage.snapshot().unwrap();
    let restored = IntidContainedStorage::restore(Arc::clone(&mb.intids), snap).unwrap();
    assert_eq!(restored.count().unwrap(), 2);
    assert_eq!(
        restored.last_modified("sent").unwrap(),
        mb.storage.last_modified("sent").unwrap()
    );
    assert_eq!(
        restored.get("inbox").unwrap().unwrap().resolve_all().unwrap(),
        vec![o1]
    );
}
