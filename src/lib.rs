//! # intids - integer ids for persistent objects
//!
//! An identity registry hands out compact, stable integer ids ("intids") for
//! objects living in a persistent object store, and resolves ids back to live
//! objects. On top of the registry sit a container index (named groups of
//! objects kept as id sets) and weak references that survive serialization.
//!
//! ## Core Concepts
//!
//! - **`IntIds`**: bidirectional object <-> id registry over an [`ObjectStore`]
//! - **`IntidContainedStorage`**: container key -> id set, with O(1) count
//! - **Facades**: read-only views that resolve ids to objects lazily
//! - **`WeakRef`**: a persistable handle that finds its target by id
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use intids::{InMemoryObjectStore, IntIds};
//!
//! let store = Arc::new(InMemoryObjectStore::new("Users"));
//! let intids = IntIds::new("_ds_id", Arc::clone(&store));
//!
//! let ob = store.add("alice")?;
//! let id = intids.register(&ob)?;
//! assert_eq!(intids.get_object(id)?, ob);
//! # Ok::<(), intids::IntIdError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod events;
pub mod id;
pub mod storage;

// Registry and the structures built on it
pub mod containers;
pub mod registry;
pub mod subscribers;
pub mod wref;

pub use containers::{
    ContainerSnapshot, IntidContainedStorage, IntidResolvingIterable, IntidResolvingMappingFacade,
    MissingPolicy,
};
pub use error::{IntIdError, IntIdResult};
pub use events::{
    EventDispatcher, IdAddedEvent, IdRemovedEvent, IdSubscriber, Notify, OriginalEvent,
    SubscriberId, Tier,
};
pub use id::{IntId, Oid};
pub use registry::{IntIds, IntIdsConfig, RegistrySnapshot};
pub use storage::{Contained, InMemoryObjectStore, KeyReference, ObjectStore, Persistent};
pub use subscribers::{add_intid, remove_intid, ContainerIndexer};
pub use wref::WeakRef;
