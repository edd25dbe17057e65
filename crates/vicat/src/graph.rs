//! The version graph: creating versions and walking lineage.
//!
//! Every dataset has at most one parent (its `supersedes` marker), so the
//! datasets in a facility form a forest. Without branching each dataset
//! also has at most one child and every tree is a chain.
//!
//! ```text
//! no successor  --create-->                 superseded = child id (0 with branching)
//! one successor --create, branching-->      superseded = 0
//! one successor --create, no branching-->   BranchingNotPermitted
//! many (0)      --create-->                 superseded = 0
//! ```

use crate::catalog::{Catalog, EntityId};
use crate::error::{LineageError, Result};
use crate::lock::{NoLock, VersionLock};
use crate::markers::{CatalogMarkers, MANY_SUCCESSORS, MarkerKind, MarkerStore, MarkerValue};
use crate::policy::PolicyConfig;
use crate::saga::{CreateVersionStep, VersionSaga};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Catalog entity type that versions are made of.
pub const DATASET: &str = "Dataset";

/// Everything known about one dataset's place in the version graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lineage {
    pub dataset: EntityId,
    /// Oldest first.
    pub ancestors: Vec<EntityId>,
    pub superseded: bool,
    /// Nearest first; `None` when branching makes a single chain unanswerable.
    pub descendants: Option<Vec<EntityId>>,
    pub comment: Option<String>,
}

/// Creates dataset versions and answers lineage queries for one facility.
///
/// Nothing is cached: every query reads the catalog afresh.
///
/// # Example
///
/// ```
/// use vicat::memory::MemoryCatalog;
/// use vicat::{PolicyConfig, VersionGraph};
///
/// let catalog = MemoryCatalog::new();
/// catalog.add_facility("LSF");
/// let v1 = catalog.add_dataset("ds1", &[]);
///
/// let graph = VersionGraph::new(&catalog, PolicyConfig::default())?;
/// let v2 = graph.create_version(v1, "ds1_v2", Some("recalibrated"))?;
/// let v3 = graph.create_version(v2, "ds1_v3", None)?;
///
/// assert_eq!(graph.ancestors(v3)?, vec![v1, v2]);
/// assert_eq!(graph.descendants(v1)?, vec![v2, v3]);
/// assert_eq!(graph.version_comment(v2)?.as_deref(), Some("recalibrated"));
/// # Ok::<(), vicat::LineageError>(())
/// ```
pub struct VersionGraph<C, M = CatalogMarkers<C>> {
    catalog: C,
    markers: M,
    facility: EntityId,
    policy: PolicyConfig,
    lock: Arc<dyn VersionLock>,
}

impl<C, M> std::fmt::Debug for VersionGraph<C, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionGraph")
            .field("facility", &self.facility)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<C: Catalog + Clone> VersionGraph<C> {
    /// Resolve the facility and the marker parameter types (defining any
    /// that are missing).
    pub fn new(catalog: C, policy: PolicyConfig) -> Result<Self> {
        let facility = policy.scope.resolve(&catalog)?;
        let markers = CatalogMarkers::resolve(catalog.clone(), facility)?;
        debug!(facility, branching = policy.branching, "version graph ready");
        Ok(Self::with_markers(catalog, markers, facility, policy))
    }
}

impl<C: Catalog, M: MarkerStore> VersionGraph<C, M> {
    /// Use an already-built marker store.
    pub fn with_markers(catalog: C, markers: M, facility: EntityId, policy: PolicyConfig) -> Self {
        Self {
            catalog,
            markers,
            facility,
            policy,
            lock: Arc::new(NoLock),
        }
    }

    /// Serialize version creation per source dataset through `lock`.
    pub fn with_lock(mut self, lock: Arc<dyn VersionLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn facility_id(&self) -> EntityId {
        self.facility
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn markers(&self) -> &M {
        &self.markers
    }

    /// Clone `source` as `new_name` and record it as the newest version.
    ///
    /// Not transactional. If a catalog call fails part way, the clone may
    /// exist without all its markers; use [`Self::begin_version`] and
    /// [`Self::resume`] to be able to inspect and finish such a request.
    pub fn create_version(
        &self,
        source: EntityId,
        new_name: &str,
        comment: Option<&str>,
    ) -> Result<EntityId> {
        let mut saga = self.begin_version(source, new_name, comment);
        self.resume(&mut saga)
    }

    pub fn begin_version(
        &self,
        source: EntityId,
        new_name: &str,
        comment: Option<&str>,
    ) -> VersionSaga {
        VersionSaga::new(source, new_name, comment.map(str::to_string))
    }

    /// Run the remaining steps of `saga`, returning the new version's id.
    pub fn resume(&self, saga: &mut VersionSaga) -> Result<EntityId> {
        let _guard = self.lock.lock(saga.source())?;

        while let Some(step) = saga.next_step() {
            self.run_step(saga, step)?;
            saga.record(step);
            debug!(source = saga.source(), %step, "create-version step done");
        }

        let new_id = saga.new_id().ok_or_else(|| {
            LineageError::Inconsistent("create-version finished without a clone".into())
        })?;
        info!(
            source = saga.source(),
            new_id,
            name = saga.name(),
            "created version"
        );
        Ok(new_id)
    }

    fn run_step(&self, saga: &mut VersionSaga, step: CreateVersionStep) -> Result<()> {
        let source = saga.source();
        match step {
            CreateVersionStep::CheckBranching => {
                let has_successor = self.markers.exists(source, MarkerKind::Superseded)?;
                if has_successor && !self.policy.branching {
                    return Err(LineageError::BranchingNotPermitted(source));
                }
                saga.source_had_successor = Some(has_successor);
            }
            CreateVersionStep::Clone => {
                let mut overrides = Map::new();
                overrides.insert("name".to_string(), Value::String(saga.name().to_string()));
                let new_id = self.catalog.clone_entity(DATASET, source, &overrides)?;
                debug!(source, new_id, "cloned dataset");
                saga.new_id = Some(new_id);
            }
            CreateVersionStep::MarkSource => {
                let new_id = Self::clone_id(saga)?;
                // Re-read: a resumed saga may find a successor written by
                // another creator since the branching check.
                if let Some(value) = self.source_marker_update(source, new_id)? {
                    self.markers.set_or_replace(
                        source,
                        MarkerKind::Superseded,
                        Some(MarkerValue::Id(value)),
                    )?;
                }
            }
            CreateVersionStep::StripInherited => {
                let new_id = Self::clone_id(saga)?;
                self.markers.clear(new_id, MarkerKind::Superseded)?;
            }
            CreateVersionStep::LinkPredecessor => {
                let new_id = Self::clone_id(saga)?;
                self.markers.set_or_replace(
                    new_id,
                    MarkerKind::Supersedes,
                    Some(MarkerValue::Id(source)),
                )?;
            }
            CreateVersionStep::SetComment => {
                let new_id = Self::clone_id(saga)?;
                let value = saga.comment().map(|c| MarkerValue::Text(c.to_string()));
                self.markers
                    .set_or_replace(new_id, MarkerKind::Comment, value)?;
            }
        }
        Ok(())
    }

    /// The `superseded` value `source` must hold once `new_id` is one of its
    /// successors, or `None` if it already holds it.
    fn source_marker_update(
        &self,
        source: EntityId,
        new_id: EntityId,
    ) -> Result<Option<EntityId>> {
        if !self.markers.exists(source, MarkerKind::Superseded)? {
            let value = if self.policy.branching {
                MANY_SUCCESSORS
            } else {
                new_id
            };
            return Ok(Some(value));
        }

        // Legacy string values and duplicates read as "some other successor".
        let current = match self.markers.get(source, MarkerKind::Superseded) {
            Ok(value) => value.and_then(|v| v.as_id()),
            Err(LineageError::Inconsistent(_)) => None,
            Err(e) => return Err(e),
        };
        match current {
            Some(id) if id == new_id => Ok(None),
            Some(MANY_SUCCESSORS) if self.policy.branching => Ok(None),
            _ if self.policy.branching => Ok(Some(MANY_SUCCESSORS)),
            _ => Err(LineageError::BranchingNotPermitted(source)),
        }
    }

    fn clone_id(saga: &VersionSaga) -> Result<EntityId> {
        saga.new_id().ok_or_else(|| {
            LineageError::Inconsistent(format!(
                "no clone recorded for version of dataset {}",
                saga.source()
            ))
        })
    }

    /// True if one or more newer versions have been created from `id`.
    pub fn is_superseded(&self, id: EntityId) -> Result<bool> {
        self.markers.exists(id, MarkerKind::Superseded)
    }

    /// The dataset `id` is an immediate newer version of, if any.
    pub fn supersedes(&self, id: EntityId) -> Result<Option<EntityId>> {
        self.id_marker(id, MarkerKind::Supersedes)
    }

    /// The single immediate newer version of `id`, if any.
    ///
    /// Fails with [`LineageError::BranchingPermitted`] when this graph allows
    /// branching, or when the catalog records that `id` has several newer
    /// versions.
    pub fn superseded(&self, id: EntityId) -> Result<Option<EntityId>> {
        if self.policy.branching {
            return Err(LineageError::BranchingPermitted(id));
        }
        match self.id_marker(id, MarkerKind::Superseded)? {
            Some(MANY_SUCCESSORS) => Err(LineageError::BranchingPermitted(id)),
            other => Ok(other),
        }
    }

    /// Older versions of `id`, oldest first. Empty for an original.
    pub fn ancestors(&self, id: EntityId) -> Result<Vec<EntityId>> {
        let mut chain = self.walk(id, |current| self.supersedes(current))?;
        chain.reverse();
        Ok(chain)
    }

    /// Newer versions of `id`, nearest first. Empty for the latest version.
    pub fn descendants(&self, id: EntityId) -> Result<Vec<EntityId>> {
        self.walk(id, |current| self.superseded(current))
    }

    /// Why `id` was created, if a reason was given.
    pub fn version_comment(&self, id: EntityId) -> Result<Option<String>> {
        match self.markers.get(id, MarkerKind::Comment)? {
            None => Ok(None),
            Some(MarkerValue::Text(text)) => Ok(Some(text)),
            Some(other) => Err(LineageError::Inconsistent(format!(
                "comment on dataset {} is {:?}",
                id, other
            ))),
        }
    }

    /// Collect ancestors, descendants and comment for `id`.
    pub fn lineage(&self, id: EntityId) -> Result<Lineage> {
        let descendants = match self.descendants(id) {
            Ok(chain) => Some(chain),
            Err(LineageError::BranchingPermitted(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(Lineage {
            dataset: id,
            ancestors: self.ancestors(id)?,
            superseded: self.is_superseded(id)?,
            descendants,
            comment: self.version_comment(id)?,
        })
    }

    fn id_marker(&self, id: EntityId, kind: MarkerKind) -> Result<Option<EntityId>> {
        match self.markers.get(id, kind)? {
            None => Ok(None),
            Some(MarkerValue::Id(target)) => Ok(Some(target)),
            Some(other) => Err(LineageError::Inconsistent(format!(
                "'{}' on dataset {} is {:?}",
                kind, id, other
            ))),
        }
    }

    fn walk<F>(&self, start: EntityId, mut next: F) -> Result<Vec<EntityId>>
    where
        F: FnMut(EntityId) -> Result<Option<EntityId>>,
    {
        let limit = self.policy.max_depth;
        let mut chain = Vec::new();
        let mut current = start;
        while let Some(id) = next(current)? {
            if chain.len() >= limit {
                return Err(LineageError::DepthExceeded { start, limit });
            }
            chain.push(id);
            current = id;
        }
        Ok(chain)
    }
}
