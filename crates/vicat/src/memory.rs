//! In-memory catalog.
//!
//! Behaves like the parts of ICAT that lineage tracking touches: facilities,
//! parameter types, datasets with their datafiles, and dataset parameters.
//! Cloning a dataset copies its datafiles *and* its parameters, so lineage
//! code is exercised against the naive clone it has to defend against.
//!
//! # Example
//!
//! ```
//! use vicat::memory::MemoryCatalog;
//! use vicat::{PolicyConfig, VersionGraph};
//!
//! let catalog = MemoryCatalog::new();
//! catalog.add_facility("LSF");
//! let ds = catalog.add_dataset("ds1", &[("df1", "loc1")]);
//!
//! let graph = VersionGraph::new(&catalog, PolicyConfig::default())?;
//! let v2 = graph.create_version(ds, "ds1_v2", None)?;
//! assert_eq!(graph.supersedes(v2)?, Some(ds));
//! assert_eq!(catalog.datafiles(v2).len(), 1);
//! # Ok::<(), vicat::LineageError>(())
//! ```

use crate::catalog::{
    Catalog, CatalogError, DatasetParameter, Entity, EntityId, EntityRef, ParameterTypeSpec, Query,
};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Number of primitive calls served, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub searches: usize,
    pub writes: usize,
    pub deletes: usize,
    pub clones: usize,
}

impl CallStats {
    /// Writes, deletes and clones.
    pub fn mutations(&self) -> usize {
        self.writes + self.deletes + self.clones
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datafile {
    pub id: EntityId,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone)]
struct Dataset {
    name: String,
    datafiles: Vec<Datafile>,
}

#[derive(Debug, Default)]
struct State {
    next_id: EntityId,
    facilities: BTreeMap<EntityId, String>,
    parameter_types: BTreeMap<EntityId, ParameterTypeSpec>,
    datasets: BTreeMap<EntityId, Dataset>,
    parameters: BTreeMap<EntityId, DatasetParameter>,
    stats: CallStats,
    /// Mutations still allowed before the injected failure fires.
    fail_after: Option<usize>,
}

impl State {
    fn allocate(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }

    fn check_fault(&mut self) -> Result<(), CatalogError> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                Err(CatalogError::Transport("injected failure".into()))
            }
            Some(n) => {
                self.fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// A thread-safe in-memory [`Catalog`].
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_facility(&self, name: &str) -> EntityId {
        let mut state = self.state();
        let id = state.allocate();
        state.facilities.insert(id, name.to_string());
        id
    }

    /// Add a dataset with `(name, location)` datafiles.
    pub fn add_dataset(&self, name: &str, datafiles: &[(&str, &str)]) -> EntityId {
        let mut state = self.state();
        let id = state.allocate();
        let files = datafiles
            .iter()
            .map(|(name, location)| Datafile {
                id: state.allocate(),
                name: name.to_string(),
                location: location.to_string(),
            })
            .collect();
        state.datasets.insert(
            id,
            Dataset {
                name: name.to_string(),
                datafiles: files,
            },
        );
        id
    }

    /// Insert a parameter type without the uniqueness check `write` applies.
    pub fn add_parameter_type(&self, spec: ParameterTypeSpec) -> EntityId {
        let mut state = self.state();
        let id = state.allocate();
        state.parameter_types.insert(id, spec);
        id
    }

    /// Attach a raw parameter, bypassing every lineage rule.
    pub fn add_parameter(&self, parameter: DatasetParameter) -> EntityId {
        let mut state = self.state();
        let id = state.allocate();
        state.parameters.insert(id, parameter);
        id
    }

    pub fn dataset_name(&self, id: EntityId) -> Option<String> {
        self.state().datasets.get(&id).map(|d| d.name.clone())
    }

    pub fn dataset_count(&self) -> usize {
        self.state().datasets.len()
    }

    pub fn datafiles(&self, dataset: EntityId) -> Vec<Datafile> {
        self.state()
            .datasets
            .get(&dataset)
            .map(|d| d.datafiles.clone())
            .unwrap_or_default()
    }

    /// All parameters attached to a dataset, by parameter id.
    pub fn parameters(&self, dataset: EntityId) -> Vec<(EntityId, DatasetParameter)> {
        self.state()
            .parameters
            .iter()
            .filter(|(_, p)| p.dataset.id == dataset)
            .map(|(id, p)| (*id, p.clone()))
            .collect()
    }

    /// Parameter types named `name` within `facility`.
    pub fn parameter_types_named(&self, facility: EntityId, name: &str) -> Vec<EntityId> {
        self.state()
            .parameter_types
            .iter()
            .filter(|(_, t)| t.facility.id == facility && t.name == name)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn parameter_type_count(&self) -> usize {
        self.state().parameter_types.len()
    }

    pub fn stats(&self) -> CallStats {
        self.state().stats
    }

    /// Let the next `n` mutations succeed and fail the one after.
    pub fn fail_mutation_after(&self, n: usize) {
        self.state().fail_after = Some(n);
    }
}

impl Catalog for MemoryCatalog {
    fn search(&self, query: &Query) -> Result<Vec<Value>, CatalogError> {
        let mut state = self.state();
        state.stats.searches += 1;

        let rows = match query {
            Query::FacilityByName(name) => state
                .facilities
                .iter()
                .filter(|(_, n)| *n == name)
                .map(|(id, _)| json!(id))
                .collect(),
            Query::ParameterTypeByName { facility, name } => state
                .parameter_types
                .iter()
                .filter(|(_, t)| t.facility.id == *facility && &t.name == name)
                .map(|(id, _)| json!(id))
                .collect(),
            Query::DatasetParameters { dataset, type_id } => state
                .parameters
                .iter()
                .filter(|(_, p)| p.dataset.id == *dataset && p.type_ref.id == *type_id)
                .map(|(id, p)| json!([id, p.numeric_value, p.string_value]))
                .collect(),
        };
        Ok(rows)
    }

    fn write(&self, entity: &Entity) -> Result<Vec<EntityId>, CatalogError> {
        let mut state = self.state();
        state.stats.writes += 1;
        state.check_fault()?;

        match entity {
            Entity::ParameterType(spec) => {
                if !state.facilities.contains_key(&spec.facility.id) {
                    return Err(CatalogError::NotFound(format!(
                        "Facility {}",
                        spec.facility.id
                    )));
                }
                let duplicate = state
                    .parameter_types
                    .values()
                    .any(|t| t.facility == spec.facility && t.name == spec.name);
                if duplicate {
                    return Err(CatalogError::Server {
                        code: "OBJECT_ALREADY_EXISTS".into(),
                        message: format!("ParameterType {} already exists", spec.name),
                    });
                }
                let id = state.allocate();
                state.parameter_types.insert(id, spec.clone());
                Ok(vec![id])
            }
            Entity::DatasetParameter(param) => {
                if !state.datasets.contains_key(&param.dataset.id) {
                    return Err(CatalogError::NotFound(format!(
                        "Dataset {}",
                        param.dataset.id
                    )));
                }
                if !state.parameter_types.contains_key(&param.type_ref.id) {
                    return Err(CatalogError::NotFound(format!(
                        "ParameterType {}",
                        param.type_ref.id
                    )));
                }
                let id = state.allocate();
                state.parameters.insert(id, param.clone());
                Ok(vec![id])
            }
        }
    }

    fn delete(&self, entity: &EntityRef) -> Result<(), CatalogError> {
        let mut state = self.state();
        state.stats.deletes += 1;
        state.check_fault()?;

        let removed = match entity.kind.as_str() {
            "DatasetParameter" => state.parameters.remove(&entity.id).is_some(),
            "ParameterType" => state.parameter_types.remove(&entity.id).is_some(),
            "Dataset" => {
                let found = state.datasets.remove(&entity.id).is_some();
                state.parameters.retain(|_, p| p.dataset.id != entity.id);
                found
            }
            other => {
                return Err(CatalogError::Server {
                    code: "BAD_PARAMETER".into(),
                    message: format!("cannot delete {}", other),
                });
            }
        };

        if removed {
            Ok(())
        } else {
            Err(CatalogError::NotFound(format!(
                "{} {}",
                entity.kind, entity.id
            )))
        }
    }

    fn clone_entity(
        &self,
        type_name: &str,
        id: EntityId,
        overrides: &Map<String, Value>,
    ) -> Result<EntityId, CatalogError> {
        let mut state = self.state();
        state.stats.clones += 1;
        state.check_fault()?;

        if type_name != "Dataset" {
            return Err(CatalogError::Server {
                code: "BAD_PARAMETER".into(),
                message: format!("cloning {} is not supported", type_name),
            });
        }
        let source = state
            .datasets
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("Dataset {}", id)))?;

        let new_id = state.allocate();
        let name = overrides
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(source.name);
        let datafiles = source
            .datafiles
            .into_iter()
            .map(|f| Datafile {
                id: state.allocate(),
                ..f
            })
            .collect();
        state.datasets.insert(new_id, Dataset { name, datafiles });

        let inherited: Vec<DatasetParameter> = state
            .parameters
            .values()
            .filter(|p| p.dataset.id == id)
            .cloned()
            .collect();
        for param in inherited {
            let param_id = state.allocate();
            state.parameters.insert(
                param_id,
                DatasetParameter {
                    dataset: new_id.into(),
                    ..param
                },
            );
        }

        Ok(new_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ValueKind, row_id};

    fn numeric_type(facility: EntityId, name: &str) -> ParameterTypeSpec {
        ParameterTypeSpec {
            name: name.into(),
            facility: facility.into(),
            value_type: ValueKind::Numeric,
            description: String::new(),
            applicable_to_dataset: true,
            units: "N/A".into(),
        }
    }

    #[test]
    fn test_ids_are_never_zero() {
        let catalog = MemoryCatalog::new();
        let f = catalog.add_facility("LSF");
        assert!(f > 0);
    }

    #[test]
    fn test_search_facility_by_name() {
        let catalog = MemoryCatalog::new();
        let f = catalog.add_facility("LSF");
        catalog.add_facility("ISIS");
        let rows = catalog
            .search(&Query::FacilityByName("LSF".into()))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(row_id(&rows[0]).unwrap(), f);
        assert_eq!(catalog.stats().searches, 1);
    }

    #[test]
    fn test_write_parameter_type_rejects_duplicates() {
        let catalog = MemoryCatalog::new();
        let f = catalog.add_facility("LSF");
        let entity = Entity::ParameterType(numeric_type(f, "supersedes"));
        catalog.write(&entity).unwrap();
        let err = catalog.write(&entity).unwrap_err();
        assert!(matches!(err, CatalogError::Server { .. }));
    }

    #[test]
    fn test_write_parameter_type_unknown_facility() {
        let catalog = MemoryCatalog::new();
        let err = catalog
            .write(&Entity::ParameterType(numeric_type(99, "x")))
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn test_parameter_rows_are_tuples() {
        let catalog = MemoryCatalog::new();
        let f = catalog.add_facility("LSF");
        let ds = catalog.add_dataset("ds", &[]);
        let pt = catalog.add_parameter_type(numeric_type(f, "supersedes"));
        let param = catalog
            .write(&Entity::DatasetParameter(DatasetParameter {
                dataset: ds.into(),
                type_ref: pt.into(),
                numeric_value: Some(5.0),
                string_value: None,
            }))
            .unwrap()[0];

        let rows = catalog
            .search(&Query::DatasetParameters {
                dataset: ds,
                type_id: pt,
            })
            .unwrap();
        assert_eq!(rows, vec![json!([param, 5.0, null])]);
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let catalog = MemoryCatalog::new();
        let err = catalog
            .delete(&EntityRef::new("DatasetParameter", 3))
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn test_clone_copies_datafiles_and_parameters() {
        let catalog = MemoryCatalog::new();
        let f = catalog.add_facility("LSF");
        let pt = catalog.add_parameter_type(numeric_type(f, "superseded"));
        let ds = catalog.add_dataset("ds1", &[("df1", "loc1"), ("df2", "loc2")]);
        catalog.add_parameter(DatasetParameter {
            dataset: ds.into(),
            type_ref: pt.into(),
            numeric_value: Some(0.0),
            string_value: None,
        });

        let mut overrides = Map::new();
        overrides.insert("name".into(), json!("ds1_v2"));
        let copy = catalog.clone_entity("Dataset", ds, &overrides).unwrap();

        assert_ne!(copy, ds);
        assert_eq!(catalog.dataset_name(copy).as_deref(), Some("ds1_v2"));

        let old_files = catalog.datafiles(ds);
        let new_files = catalog.datafiles(copy);
        assert_eq!(old_files.len(), new_files.len());
        for (old, new) in old_files.iter().zip(&new_files) {
            assert_ne!(old.id, new.id);
            assert_eq!(old.name, new.name);
            assert_eq!(old.location, new.location);
        }

        let params = catalog.parameters(copy);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].1.numeric_value, Some(0.0));
    }

    #[test]
    fn test_clone_unknown_dataset() {
        let catalog = MemoryCatalog::new();
        let err = catalog.clone_entity("Dataset", 1, &Map::new()).unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let catalog = MemoryCatalog::new();
        let ds = catalog.add_dataset("ds", &[]);
        catalog.fail_mutation_after(1);
        assert!(catalog.clone_entity("Dataset", ds, &Map::new()).is_ok());
        assert!(catalog.clone_entity("Dataset", ds, &Map::new()).is_err());
        assert!(catalog.clone_entity("Dataset", ds, &Map::new()).is_ok());
        assert_eq!(catalog.stats().clones, 3);
        assert_eq!(catalog.dataset_count(), 3);
    }
}
