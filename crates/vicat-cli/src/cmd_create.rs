use anyhow::{Context, Result};
use serde_json::{Value, json};
use vicat::{Catalog, EntityId, VersionGraph};

pub fn run<C: Catalog>(
    graph: &VersionGraph<C>,
    dataset: EntityId,
    name: &str,
    comment: Option<&str>,
) -> Result<Value> {
    let new_id = graph
        .create_version(dataset, name, comment)
        .with_context(|| format!("Failed to create a new version of dataset {}", dataset))?;

    Ok(json!({
        "dataset": new_id,
        "name": name,
        "supersedes": dataset,
        "comment": comment,
    }))
}
