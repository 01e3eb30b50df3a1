//! Object store seam and its implementations.
//!
//! The registry is generic over [`ObjectStore`]; [`memory`] provides an
//! in-process store and, with the `persistent` feature, [`persistent`]
//! saves registry and container state to disk.

mod traits;

pub mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{InMemoryObjectStore, KeyReference, Persistent};
pub use traits::{Contained, ObjectStore};
