//! The slice of the metadata catalog that lineage tracking depends on.
//!
//! Lineage is stored entirely through four primitives: `search`, `write`,
//! `delete` and `clone_entity`. Anything that can answer those, whether a
//! live ICAT server or [`crate::memory::MemoryCatalog`], can host a version
//! graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Identifier the catalog assigns to every entity. The catalog never
/// issues `0`.
///
/// Ids stored as marker values go through ICAT's double-precision
/// `numericValue` column, so only ids up to [`MAX_MARKER_ID`] survive
/// exactly.
pub type EntityId = i64;

/// Largest id a numeric marker can hold without rounding (2^53).
pub const MAX_MARKER_ID: EntityId = 1 << 53;

/// Failures reported by a catalog backend. Lineage operations pass these
/// through untouched.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog request failed: {0}")]
    Transport(String),

    #[error("Catalog rejected request ({code}): {message}")]
    Server { code: String, message: String },

    #[error("Unexpected catalog response: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// A `{"id": n}` reference to another entity, as used inside envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRef {
    pub id: EntityId,
}

impl From<EntityId> for IdRef {
    fn from(id: EntityId) -> Self {
        IdRef { id }
    }
}

/// The lookups lineage tracking issues against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Ids of facilities with an exact name. Rows are scalar ids.
    FacilityByName(String),
    /// Ids of parameter types with an exact name within a facility. Rows are
    /// scalar ids.
    ParameterTypeByName { facility: EntityId, name: String },
    /// Parameters of one type attached to a dataset. Rows are
    /// `[id, numericValue, stringValue]`.
    DatasetParameters { dataset: EntityId, type_id: EntityId },
}

impl Query {
    /// Render as ICAT JPQL.
    pub fn to_jpql(&self) -> String {
        match self {
            Query::FacilityByName(name) => format!(
                "SELECT f.id FROM Facility f WHERE f.name = {}",
                quote(name)
            ),
            Query::ParameterTypeByName { facility, name } => format!(
                "SELECT pt.id FROM ParameterType pt WHERE pt.facility.id = {} AND pt.name = {}",
                facility,
                quote(name)
            ),
            Query::DatasetParameters { dataset, type_id } => format!(
                "SELECT dp.id, dp.numericValue, dp.stringValue FROM DatasetParameter dp \
                 WHERE dp.dataset.id = {} AND dp.type.id = {}",
                dataset, type_id
            ),
        }
    }
}

fn quote(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''"))
}

/// Storage type of a parameter's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueKind {
    Numeric,
    String,
}

/// A parameter type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterTypeSpec {
    pub name: String,
    pub facility: IdRef,
    pub value_type: ValueKind,
    pub description: String,
    pub applicable_to_dataset: bool,
    pub units: String,
}

/// One parameter instance attached to a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetParameter {
    pub dataset: IdRef,
    #[serde(rename = "type")]
    pub type_ref: IdRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
}

/// Entities this crate creates, in the catalog's externally tagged envelope
/// form (`{"DatasetParameter": {...}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    ParameterType(ParameterTypeSpec),
    DatasetParameter(DatasetParameter),
}

impl Entity {
    pub fn type_name(&self) -> &'static str {
        match self {
            Entity::ParameterType(_) => "ParameterType",
            Entity::DatasetParameter(_) => "DatasetParameter",
        }
    }
}

/// Identifies an existing entity for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: String,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: EntityId) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    /// `{"<kind>": {"id": <id>}}`
    pub fn envelope(&self) -> Value {
        let mut outer = Map::new();
        outer.insert(self.kind.clone(), serde_json::json!({ "id": self.id }));
        Value::Object(outer)
    }
}

/// The catalog primitives lineage tracking is built on.
pub trait Catalog {
    /// Run a query. Each row is a scalar or a tuple in select order.
    fn search(&self, query: &Query) -> Result<Vec<Value>, CatalogError>;

    /// Create an entity, returning the generated ids.
    fn write(&self, entity: &Entity) -> Result<Vec<EntityId>, CatalogError>;

    /// Remove an entity by id.
    fn delete(&self, entity: &EntityRef) -> Result<(), CatalogError>;

    /// Copy an entity, its child records and its attached parameters,
    /// applying `overrides` to the copy's own fields.
    fn clone_entity(
        &self,
        type_name: &str,
        id: EntityId,
        overrides: &Map<String, Value>,
    ) -> Result<EntityId, CatalogError>;
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn search(&self, query: &Query) -> Result<Vec<Value>, CatalogError> {
        (**self).search(query)
    }

    fn write(&self, entity: &Entity) -> Result<Vec<EntityId>, CatalogError> {
        (**self).write(entity)
    }

    fn delete(&self, entity: &EntityRef) -> Result<(), CatalogError> {
        (**self).delete(entity)
    }

    fn clone_entity(
        &self,
        type_name: &str,
        id: EntityId,
        overrides: &Map<String, Value>,
    ) -> Result<EntityId, CatalogError> {
        (**self).clone_entity(type_name, id, overrides)
    }
}

/// Read an id out of a search row: either the row itself or its first column.
///
/// Ids may arrive as JSON integers or as integral floats.
pub fn row_id(row: &Value) -> Result<EntityId, CatalogError> {
    let cell = match row {
        Value::Array(cols) => cols
            .first()
            .ok_or_else(|| CatalogError::Decode("empty row".into()))?,
        other => other,
    };
    as_id(cell).ok_or_else(|| CatalogError::Decode(format!("expected an id, got {}", cell)))
}

/// Interpret a JSON number as an id, accepting integral floats.
pub fn as_id(value: &Value) -> Option<EntityId> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// The id returned by a single-entity write.
pub fn single_id(ids: Vec<EntityId>, what: &str) -> Result<EntityId, CatalogError> {
    match ids.as_slice() {
        [id] => Ok(*id),
        _ => Err(CatalogError::Decode(format!(
            "writing {} returned {} ids, expected 1",
            what,
            ids.len()
        ))),
    }
}
