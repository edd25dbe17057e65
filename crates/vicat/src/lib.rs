#![doc = include_str!("../README.md")]

pub mod attributes;
pub mod catalog;
pub mod error;
pub mod graph;
pub mod lock;
pub mod markers;
pub mod memory;
pub mod policy;
pub mod saga;

pub use attributes::{AttributeInstance, AttributeStore};
pub use catalog::{
    Catalog, CatalogError, DatasetParameter, Entity, EntityId, EntityRef, IdRef, MAX_MARKER_ID,
    ParameterTypeSpec, Query, ValueKind,
};
pub use error::{LineageError, Result};
pub use graph::{Lineage, VersionGraph};
pub use lock::{LocalLocks, LockGuard, NoLock, VersionLock};
pub use markers::{CatalogMarkers, MANY_SUCCESSORS, Marker, MarkerKind, MarkerStore, MarkerValue};
pub use policy::{PolicyConfig, ScopeSelector};
pub use saga::{CreateVersionStep, VersionSaga};
