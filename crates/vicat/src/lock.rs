//! Optional serialization of version creation per source dataset.
//!
//! Creating a version reads the source's `superseded` marker, clones, then
//! writes markers. Two writers interleaving on the same source can both see
//! "no successor yet". A [`VersionLock`] closes that window for writers that
//! share it; the catalog itself offers no such guarantee.

use crate::catalog::EntityId;
use crate::error::Result;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

/// Held for the duration of a create-version sequence. Releases on drop.
pub struct LockGuard<'a> {
    release: Option<Box<dyn FnOnce() + 'a>>,
}

impl<'a> LockGuard<'a> {
    pub fn new(release: impl FnOnce() + 'a) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard that releases nothing.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Mutual exclusion keyed by source dataset id.
pub trait VersionLock: Send + Sync {
    /// Block until `entity` is exclusively held by the caller.
    fn lock(&self, entity: EntityId) -> Result<LockGuard<'_>>;
}

/// No serialization at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLock;

impl VersionLock for NoLock {
    fn lock(&self, _entity: EntityId) -> Result<LockGuard<'_>> {
        Ok(LockGuard::noop())
    }
}

/// Per-dataset locks shared by graphs within one process.
#[derive(Debug, Default)]
pub struct LocalLocks {
    held: Mutex<HashSet<EntityId>>,
    released: Condvar,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, entity: EntityId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&entity)
    }
}

impl VersionLock for LocalLocks {
    fn lock(&self, entity: EntityId) -> Result<LockGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(&entity) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(entity);
        drop(held);

        Ok(LockGuard::new(move || {
            self.held
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&entity);
            self.released.notify_all();
        }))
    }
}
