//! Container index and its resolving facades.

pub mod facade;
pub mod storage;

pub use facade::{IntidResolvingIterable, IntidResolvingMappingFacade, MissingPolicy, ResolvingIter};
pub use storage::{ContainerSnapshot, IntidContainedStorage};
