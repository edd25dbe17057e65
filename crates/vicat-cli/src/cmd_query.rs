use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{Value, json};
use vicat::{Catalog, EntityId, VersionGraph};

#[derive(Subcommand, Debug)]
pub enum QueryOp {
    /// Show ancestors, descendants and comment of a dataset
    Show {
        dataset: EntityId,
    },
    /// List older versions, oldest first
    Ancestors {
        dataset: EntityId,
    },
    /// List newer versions, nearest first
    Descendants {
        dataset: EntityId,
    },
    /// Print the dataset this one is a newer version of
    Supersedes {
        dataset: EntityId,
    },
    /// Print the single newer version of a dataset
    Superseded {
        dataset: EntityId,
    },
    /// Print whether newer versions of a dataset exist
    IsSuperseded {
        dataset: EntityId,
    },
    /// Print why a version was created
    Comment {
        dataset: EntityId,
    },
}

impl QueryOp {
    fn dataset(&self) -> EntityId {
        match self {
            QueryOp::Show { dataset }
            | QueryOp::Ancestors { dataset }
            | QueryOp::Descendants { dataset }
            | QueryOp::Supersedes { dataset }
            | QueryOp::Superseded { dataset }
            | QueryOp::IsSuperseded { dataset }
            | QueryOp::Comment { dataset } => *dataset,
        }
    }
}

pub fn run<C: Catalog>(graph: &VersionGraph<C>, op: QueryOp) -> Result<Value> {
    let dataset = op.dataset();
    query(graph, op).with_context(|| format!("Failed to query dataset {}", dataset))
}

fn query<C: Catalog>(graph: &VersionGraph<C>, op: QueryOp) -> Result<Value> {
    let dataset = op.dataset();
    let value = match op {
        QueryOp::Show { .. } => serde_json::to_value(graph.lineage(dataset)?)?,
        QueryOp::Ancestors { .. } => json!(graph.ancestors(dataset)?),
        QueryOp::Descendants { .. } => json!(graph.descendants(dataset)?),
        QueryOp::Supersedes { .. } => json!(graph.supersedes(dataset)?),
        QueryOp::Superseded { .. } => json!(graph.superseded(dataset)?),
        QueryOp::IsSuperseded { .. } => json!(graph.is_superseded(dataset)?),
        QueryOp::Comment { .. } => json!(graph.version_comment(dataset)?),
    };
    Ok(value)
}
