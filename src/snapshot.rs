use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::graph::KnowledgeGraph;

fn validate_json_path(path: &Path) -> Result<()> {
    match path.extension() {
        Some(ext) if ext == "json" => Ok(()),
        _ => bail!("Snapshot path must have .json extension: {}", path.display()),
    }
}

/// Write `graph` as pretty-printed JSON, creating parent directories.
pub fn save_graph(graph: &KnowledgeGraph, path: &Path) -> Result<()> {
    validate_json_path(path)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(graph).context("Failed to serialize graph")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        path = %path.display(),
        entities = graph.entities.len(),
        relationships = graph.relationships.len(),
        "graph exported"
    );
    Ok(())
}

/// Read a graph written by [`save_graph`] (or any document of the same shape).
///
/// Relationship endpoints are relinked to the graph's entities, so a snapshot
/// with dangling endpoints is rejected.
pub fn load_graph(path: &Path) -> Result<KnowledgeGraph> {
    validate_json_path(path)?;
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut graph: KnowledgeGraph = serde_json::from_str(&json)
        .with_context(|| format!("Malformed graph document {}", path.display()))?;
    graph
        .relink()
        .with_context(|| format!("Inconsistent graph document {}", path.display()))?;
    Ok(graph)
}
