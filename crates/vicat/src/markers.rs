//! Lineage markers: the parameters that encode the version graph.
//!
//! Each dataset carries at most one instance of each [`MarkerKind`]. Writes
//! always delete whatever is there first, so a marker is either absent or
//! holds exactly the last value set.

use crate::attributes::{AttributeInstance, AttributeStore, numeric_id};
use crate::catalog::{Catalog, EntityId, MAX_MARKER_ID, ValueKind};
use crate::error::{LineageError, Result};
use tracing::warn;

/// The three facts recorded about a dataset's lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Id of the dataset this one is a newer version of.
    Supersedes,
    /// Id of the single newer version, or [`MANY_SUCCESSORS`].
    Superseded,
    /// Why this version was created.
    Comment,
}

/// `superseded` value meaning "two or more newer versions exist".
pub const MANY_SUCCESSORS: EntityId = 0;

impl MarkerKind {
    pub const ALL: [MarkerKind; 3] = [
        MarkerKind::Supersedes,
        MarkerKind::Superseded,
        MarkerKind::Comment,
    ];

    /// Parameter type name in the catalog.
    pub fn name(self) -> &'static str {
        match self {
            MarkerKind::Supersedes => "supersedes",
            MarkerKind::Superseded => "superseded",
            MarkerKind::Comment => "comment",
        }
    }

    pub fn value_kind(self) -> ValueKind {
        match self {
            MarkerKind::Supersedes | MarkerKind::Superseded => ValueKind::Numeric,
            MarkerKind::Comment => ValueKind::String,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            MarkerKind::Supersedes => {
                "indicates this dataset is a newer version of the given datasetId"
            }
            MarkerKind::Superseded => "indicates there are newer versions of this dataset",
            MarkerKind::Comment => "describes why this version of the dataset was created",
        }
    }

    fn index(self) -> usize {
        match self {
            MarkerKind::Supersedes => 0,
            MarkerKind::Superseded => 1,
            MarkerKind::Comment => 2,
        }
    }
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoded marker value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
    /// Stored as a double; must lie within `0..=MAX_MARKER_ID`.
    Id(EntityId),
    Text(String),
}

impl MarkerValue {
    pub fn as_id(&self) -> Option<EntityId> {
        match self {
            MarkerValue::Id(id) => Some(*id),
            MarkerValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MarkerValue::Text(s) => Some(s),
            MarkerValue::Id(_) => None,
        }
    }
}

/// One marker instance attached to a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub instance: EntityId,
    pub value: MarkerValue,
}

/// Storage for lineage markers.
///
/// [`CatalogMarkers`] keeps them as catalog parameters; another store only
/// has to provide `find` and `set_or_replace`.
pub trait MarkerStore {
    /// Every instance of `kind` on `entity`. Normally zero or one.
    fn find(&self, entity: EntityId, kind: MarkerKind) -> Result<Vec<Marker>>;

    /// Remove any existing instance, then write `value` if given.
    fn set_or_replace(
        &self,
        entity: EntityId,
        kind: MarkerKind,
        value: Option<MarkerValue>,
    ) -> Result<()>;

    /// The single value of `kind` on `entity`, if any.
    fn get(&self, entity: EntityId, kind: MarkerKind) -> Result<Option<MarkerValue>> {
        let mut found = self.find(entity, kind)?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop().map(|m| m.value)),
            n => Err(LineageError::Inconsistent(format!(
                "dataset {} has {} '{}' markers",
                entity, n, kind
            ))),
        }
    }

    fn exists(&self, entity: EntityId, kind: MarkerKind) -> Result<bool> {
        Ok(!self.find(entity, kind)?.is_empty())
    }

    fn clear(&self, entity: EntityId, kind: MarkerKind) -> Result<()> {
        self.set_or_replace(entity, kind, None)
    }
}

/// Markers stored as dataset parameters in one facility.
#[derive(Debug, Clone)]
pub struct CatalogMarkers<C> {
    attributes: AttributeStore<C>,
    type_ids: [EntityId; 3],
}

impl<C: Catalog> CatalogMarkers<C> {
    /// Resolve (defining where missing) the three marker parameter types.
    pub fn resolve(catalog: C, facility: EntityId) -> Result<Self> {
        let attributes = AttributeStore::new(catalog, facility);
        let mut type_ids = [0; 3];
        for kind in MarkerKind::ALL {
            type_ids[kind.index()] =
                attributes.resolve_or_define(kind.name(), kind.value_kind(), kind.description())?;
        }
        Ok(Self {
            attributes,
            type_ids,
        })
    }

    pub fn type_id(&self, kind: MarkerKind) -> EntityId {
        self.type_ids[kind.index()]
    }

    pub fn attributes(&self) -> &AttributeStore<C> {
        &self.attributes
    }

    fn decode(
        entity: EntityId,
        kind: MarkerKind,
        instance: &AttributeInstance,
    ) -> Result<MarkerValue> {
        let value = match kind.value_kind() {
            ValueKind::Numeric => numeric_id(instance).map(MarkerValue::Id),
            ValueKind::String => instance.string_value.clone().map(MarkerValue::Text),
        };
        value.ok_or_else(|| {
            LineageError::Inconsistent(format!(
                "'{}' marker {} on dataset {} has no usable value",
                kind, instance.id, entity
            ))
        })
    }
}

impl<C: Catalog> MarkerStore for CatalogMarkers<C> {
    fn find(&self, entity: EntityId, kind: MarkerKind) -> Result<Vec<Marker>> {
        self.attributes
            .instances(entity, self.type_id(kind))?
            .iter()
            .map(|inst| -> Result<Marker> {
                Ok(Marker {
                    instance: inst.id,
                    value: Self::decode(entity, kind, inst)?,
                })
            })
            .collect()
    }

    fn set_or_replace(
        &self,
        entity: EntityId,
        kind: MarkerKind,
        value: Option<MarkerValue>,
    ) -> Result<()> {
        match (kind.value_kind(), &value) {
            (_, None) | (ValueKind::String, Some(MarkerValue::Text(_))) => {}
            (ValueKind::Numeric, Some(MarkerValue::Id(id))) => {
                if !(0..=MAX_MARKER_ID).contains(id) {
                    return Err(LineageError::Inconsistent(format!(
                        "'{}' marker cannot hold id {} exactly",
                        kind, id
                    )));
                }
            }
            (_, Some(other)) => {
                return Err(LineageError::Inconsistent(format!(
                    "'{}' marker cannot hold {:?}",
                    kind, other
                )));
            }
        }

        let type_id = self.type_id(kind);
        let existing = self.attributes.instances(entity, type_id)?;
        if existing.len() > 1 {
            warn!(
                dataset = entity,
                marker = kind.name(),
                count = existing.len(),
                "removing duplicate markers"
            );
        }
        for inst in &existing {
            self.attributes.detach(inst.id)?;
        }

        let (numeric, text) = match value {
            None => return Ok(()),
            Some(MarkerValue::Id(id)) => (Some(id as f64), None),
            Some(MarkerValue::Text(text)) => (None, Some(text)),
        };
        self.attributes
            .attach(entity, type_id, numeric, text)
            .map(|_| ())
    }

    /// Presence only; a value that does not decode still counts.
    fn exists(&self, entity: EntityId, kind: MarkerKind) -> Result<bool> {
        Ok(!self
            .attributes
            .instances(entity, self.type_id(kind))?
            .is_empty())
    }
}
