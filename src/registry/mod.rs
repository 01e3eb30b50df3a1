//! Identity registry modules.
//!
//! This module groups the registry, its id generator, and the optional
//! process-wide locator.

mod generator;
pub mod intids;
pub mod locator;

pub use intids::{IntIds, IntIdsConfig, RegistrySnapshot};
