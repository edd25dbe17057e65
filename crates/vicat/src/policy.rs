//! Branching policy and facility selection, fixed when a graph is built.

use crate::catalog::{Catalog, EntityId, Query, row_id};
use crate::error::{LineageError, Result};

/// Facility looked up when none is given explicitly.
pub const DEFAULT_FACILITY: &str = "LSF";

/// Upper bound on ancestor/descendant walks.
pub const DEFAULT_MAX_DEPTH: usize = 10_000;

/// Which facility owns the marker parameter types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeSelector {
    Id(EntityId),
    /// Resolved by exact name; exactly one facility must match.
    Named(String),
}

impl Default for ScopeSelector {
    fn default() -> Self {
        ScopeSelector::Named(DEFAULT_FACILITY.to_string())
    }
}

impl ScopeSelector {
    pub fn resolve<C: Catalog>(&self, catalog: &C) -> Result<EntityId> {
        match self {
            ScopeSelector::Id(id) => Ok(*id),
            ScopeSelector::Named(name) => {
                let rows = catalog.search(&Query::FacilityByName(name.clone()))?;
                match rows.as_slice() {
                    [row] => Ok(row_id(row)?),
                    _ => Err(LineageError::NoFacility(name.clone())),
                }
            }
        }
    }
}

/// Versioning policy for one [`crate::VersionGraph`].
///
/// `branching` is a belief held by this process, not something stored in or
/// checked against the catalog. Two graphs over the same facility built
/// with different `branching` values will each behave consistently with
/// their own setting and disagree with each other. The only history-derived
/// check is the many-successors sentinel, which makes single-successor
/// queries fail with [`LineageError::BranchingPermitted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub scope: ScopeSelector,
    /// Allow a dataset to have more than one direct newer version.
    pub branching: bool,
    pub max_depth: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            scope: ScopeSelector::default(),
            branching: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl PolicyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope_id(mut self, id: EntityId) -> Self {
        self.scope = ScopeSelector::Id(id);
        self
    }

    pub fn with_scope_name(mut self, name: impl Into<String>) -> Self {
        self.scope = ScopeSelector::Named(name.into());
        self
    }

    pub fn with_branching(mut self, branching: bool) -> Self {
        self.branching = branching;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Read `VICAT_FACILITY_ID`, `VICAT_FACILITY_NAME`, `VICAT_BRANCHING` and
    /// `VICAT_MAX_DEPTH`. Unset variables keep their defaults; a facility id
    /// takes precedence over a name.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("VICAT_FACILITY_NAME") {
            config.scope = ScopeSelector::Named(name);
        }
        if let Some(id) = lookup("VICAT_FACILITY_ID") {
            let id = id
                .trim()
                .parse()
                .map_err(|_| LineageError::Config(format!("VICAT_FACILITY_ID: bad id '{}'", id)))?;
            config.scope = ScopeSelector::Id(id);
        }
        if let Some(flag) = lookup("VICAT_BRANCHING") {
            config.branching = parse_flag(&flag).ok_or_else(|| {
                LineageError::Config(format!("VICAT_BRANCHING: expected a boolean, got '{}'", flag))
            })?;
        }
        if let Some(depth) = lookup("VICAT_MAX_DEPTH") {
            config.max_depth = depth.trim().parse().map_err(|_| {
                LineageError::Config(format!("VICAT_MAX_DEPTH: bad number '{}'", depth))
            })?;
        }

        Ok(config)
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
