use crate::catalog::{CatalogError, EntityId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LineageError>;

#[derive(Debug, Error)]
pub enum LineageError {
    #[error("No facility specified and can't find a unique facility called {0}")]
    NoFacility(String),

    #[error("Dataset {0} already has a newer version and branching is not permitted")]
    BranchingNotPermitted(EntityId),

    #[error("Dataset {0} may have several newer versions; branching is permitted")]
    BranchingPermitted(EntityId),

    #[error("Catalog consistency error: {0}")]
    Inconsistent(String),

    #[error("Lineage walk from dataset {start} exceeded {limit} steps")]
    DepthExceeded { start: EntityId, limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
