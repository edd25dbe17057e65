//! Named parameter types and the parameter instances attached to datasets.

use crate::catalog::{
    Catalog, CatalogError, DatasetParameter, Entity, EntityId, EntityRef, ParameterTypeSpec, Query,
    ValueKind, as_id, row_id, single_id,
};
use crate::error::{LineageError, Result};
use serde_json::Value;
use tracing::{debug, info};

/// A parameter instance as read back from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInstance {
    pub id: EntityId,
    pub numeric_value: Option<f64>,
    pub string_value: Option<String>,
}

impl AttributeInstance {
    fn from_row(row: &Value) -> std::result::Result<Self, CatalogError> {
        let id = row_id(row)?;
        let cols = row.as_array().map(Vec::as_slice).unwrap_or_default();
        Ok(Self {
            id,
            numeric_value: cols.get(1).and_then(Value::as_f64),
            string_value: cols.get(2).and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// Maps parameter type names to catalog ids within one facility and reads,
/// attaches and detaches parameter instances.
#[derive(Debug, Clone)]
pub struct AttributeStore<C> {
    catalog: C,
    facility: EntityId,
}

impl<C: Catalog> AttributeStore<C> {
    pub fn new(catalog: C, facility: EntityId) -> Self {
        Self { catalog, facility }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn facility(&self) -> EntityId {
        self.facility
    }

    /// Look up a parameter type by exact name, defining it if absent.
    ///
    /// Two definers racing on a fresh facility can both miss the lookup; the
    /// loser then gets whatever the catalog says about the duplicate.
    pub fn resolve_or_define(
        &self,
        name: &str,
        kind: ValueKind,
        description: &str,
    ) -> Result<EntityId> {
        let rows = self.catalog.search(&Query::ParameterTypeByName {
            facility: self.facility,
            name: name.to_string(),
        })?;

        match rows.as_slice() {
            [] => {
                let spec = ParameterTypeSpec {
                    name: name.to_string(),
                    facility: self.facility.into(),
                    value_type: kind,
                    description: description.to_string(),
                    applicable_to_dataset: true,
                    units: "N/A".to_string(),
                };
                let id = single_id(
                    self.catalog.write(&Entity::ParameterType(spec))?,
                    "ParameterType",
                )?;
                info!(name, id, facility = self.facility, "defined parameter type");
                Ok(id)
            }
            [row] => Ok(row_id(row)?),
            many => Err(LineageError::Inconsistent(format!(
                "{} parameter types named '{}' in facility {}",
                many.len(),
                name,
                self.facility
            ))),
        }
    }

    /// Every instance of `type_id` attached to `dataset`.
    pub fn instances(&self, dataset: EntityId, type_id: EntityId) -> Result<Vec<AttributeInstance>> {
        let rows = self
            .catalog
            .search(&Query::DatasetParameters { dataset, type_id })?;
        rows.iter()
            .map(|row| AttributeInstance::from_row(row).map_err(LineageError::from))
            .collect()
    }

    /// Attach a new instance of `type_id` to `dataset`.
    pub fn attach(
        &self,
        dataset: EntityId,
        type_id: EntityId,
        numeric_value: Option<f64>,
        string_value: Option<String>,
    ) -> Result<EntityId> {
        let param = DatasetParameter {
            dataset: dataset.into(),
            type_ref: type_id.into(),
            numeric_value,
            string_value,
        };
        let id = single_id(
            self.catalog.write(&Entity::DatasetParameter(param))?,
            "DatasetParameter",
        )?;
        debug!(dataset, type_id, id, "attached parameter");
        Ok(id)
    }

    /// Remove one parameter instance.
    pub fn detach(&self, instance: EntityId) -> Result<()> {
        self.catalog
            .delete(&EntityRef::new("DatasetParameter", instance))?;
        debug!(instance, "detached parameter");
        Ok(())
    }
}

/// Numeric parameter values hold ids; anything non-integral is corrupt.
pub(crate) fn numeric_id(instance: &AttributeInstance) -> Option<EntityId> {
    instance
        .numeric_value
        .and_then(|v| as_id(&Value::from(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCatalog;

    fn setup() -> (MemoryCatalog, EntityId) {
        let catalog = MemoryCatalog::new();
        let facility = catalog.add_facility("LSF");
        (catalog, facility)
    }

    #[test]
    fn test_defines_missing_type() {
        let (catalog, facility) = setup();
        let store = AttributeStore::new(&catalog, facility);
        let id = store
            .resolve_or_define("supersedes", ValueKind::Numeric, "d")
            .unwrap();
        assert_eq!(catalog.parameter_types_named(facility, "supersedes"), vec![id]);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let (catalog, facility) = setup();
        let store = AttributeStore::new(&catalog, facility);
        let first = store
            .resolve_or_define("comment", ValueKind::String, "d")
            .unwrap();
        let second = store
            .resolve_or_define("comment", ValueKind::String, "d")
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(catalog.parameter_type_count(), 1);
        assert_eq!(catalog.stats().writes, 1);
    }

    #[test]
    fn test_types_are_scoped_to_facility() {
        let (catalog, lsf) = setup();
        let isis = catalog.add_facility("ISIS");
        let a = AttributeStore::new(&catalog, lsf)
            .resolve_or_define("superseded", ValueKind::Numeric, "d")
            .unwrap();
        let b = AttributeStore::new(&catalog, isis)
            .resolve_or_define("superseded", ValueKind::Numeric, "d")
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_duplicate_types_are_inconsistent() {
        let (catalog, facility) = setup();
        let spec = ParameterTypeSpec {
            name: "superseded".into(),
            facility: facility.into(),
            value_type: ValueKind::Numeric,
            description: String::new(),
            applicable_to_dataset: true,
            units: "N/A".into(),
        };
        catalog.add_parameter_type(spec.clone());
        catalog.add_parameter_type(spec);

        let err = AttributeStore::new(&catalog, facility)
            .resolve_or_define("superseded", ValueKind::Numeric, "d")
            .unwrap_err();
        assert!(matches!(err, LineageError::Inconsistent(_)));
    }

    #[test]
    fn test_attach_instances_detach() {
        let (catalog, facility) = setup();
        let ds = catalog.add_dataset("ds", &[]);
        let store = AttributeStore::new(&catalog, facility);
        let pt = store
            .resolve_or_define("comment", ValueKind::String, "d")
            .unwrap();

        assert!(store.instances(ds, pt).unwrap().is_empty());
        let id = store.attach(ds, pt, None, Some("why".into())).unwrap();

        let found = store.instances(ds, pt).unwrap();
        assert_eq!(
            found,
            vec![AttributeInstance {
                id,
                numeric_value: None,
                string_value: Some("why".into()),
            }]
        );

        store.detach(id).unwrap();
        assert!(store.instances(ds, pt).unwrap().is_empty());
    }

    #[test]
    fn test_numeric_id() {
        let inst = |v: Option<f64>| AttributeInstance {
            id: 1,
            numeric_value: v,
            string_value: None,
        };
        assert_eq!(numeric_id(&inst(Some(42.0))), Some(42));
        assert_eq!(numeric_id(&inst(Some(0.0))), Some(0));
        assert_eq!(numeric_id(&inst(Some(1.5))), None);
        assert_eq!(numeric_id(&inst(None)), None);
    }
}
