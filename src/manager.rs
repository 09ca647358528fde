use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use crate::builder::{merge_graphs, BuildOptions, GraphBuilder};
use crate::extract::{ExtractedBatch, PrecomputedExtractor};
use crate::graph::KnowledgeGraph;
use crate::snapshot;
use crate::storage::{validate_batches, validate_graph, Database};

/// Sizes of the stored graph before and after a merge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MergeSummary {
    pub entities_before: usize,
    pub relationships_before: usize,
    pub entities: usize,
    pub relationships: usize,
}

/// Manager for knowledge graph merges
/// Provides async API wrapping the SQLite store and the merge engine
pub struct KnowledgeGraphManager {
    db: Arc<Database>,
    defaults: BuildOptions,
    // load -> merge -> save must not interleave
    merge_lock: Mutex<()>,
}

impl KnowledgeGraphManager {
    /// Create new manager with database at given path
    pub fn new(db_path: PathBuf, defaults: BuildOptions) -> Result<Self> {
        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(db),
            defaults,
            merge_lock: Mutex::new(()),
        })
    }

    /// Options used when a caller does not override them
    pub fn defaults(&self) -> BuildOptions {
        self.defaults
    }

    /// Fold batches into the stored graph, which serves as the existing graph
    pub async fn merge_batches(
        &self,
        batches: Vec<ExtractedBatch>,
        options: BuildOptions,
    ) -> Result<MergeSummary> {
        validate_batches(&batches)?;

        let _guard = self.merge_lock.lock().await;
        let existing = self.db.read_graph().context("Failed to load stored graph")?;
        let (entities_before, relationships_before) =
            (existing.entities.len(), existing.relationships.len());

        let existing = (!existing.is_empty()).then_some(existing);
        let graph = GraphBuilder::new(PrecomputedExtractor)
            .build_graph(&batches, existing, &options)
            .context("Failed to merge batches")?;

        self.db.replace_graph(&graph)?;
        info!(
            batches = batches.len(),
            entities = graph.entities.len(),
            relationships = graph.relationships.len(),
            "stored merged graph"
        );

        Ok(MergeSummary {
            entities_before,
            relationships_before,
            entities: graph.entities.len(),
            relationships: graph.relationships.len(),
        })
    }

    /// Reconcile a JSON snapshot into the stored graph
    pub async fn import_graph(&self, path: &Path, options: BuildOptions) -> Result<MergeSummary> {
        let incoming = snapshot::load_graph(path)?;
        validate_graph(&incoming)
            .with_context(|| format!("Invalid graph in {}", path.display()))?;

        let _guard = self.merge_lock.lock().await;
        let existing = self.db.read_graph().context("Failed to load stored graph")?;
        let (entities_before, relationships_before) =
            (existing.entities.len(), existing.relationships.len());

        let existing = (!existing.is_empty()).then_some(existing);
        let graph = merge_graphs(incoming, existing, &options)
            .with_context(|| format!("Failed to reconcile {}", path.display()))?;

        self.db.replace_graph(&graph)?;

        Ok(MergeSummary {
            entities_before,
            relationships_before,
            entities: graph.entities.len(),
            relationships: graph.relationships.len(),
        })
    }

    /// Write the stored graph as JSON
    pub async fn export_graph(&self, path: &Path) -> Result<KnowledgeGraph> {
        let graph = self.db.read_graph()?;
        snapshot::save_graph(&graph, path)?;
        Ok(graph)
    }

    /// Read entire knowledge graph
    pub async fn read_graph(&self) -> Result<KnowledgeGraph> {
        self.db.read_graph()
    }

    /// Remove every entity and relationship, returning how many there were
    pub async fn clear_graph(&self) -> Result<(usize, usize)> {
        let _guard = self.merge_lock.lock().await;
        let counts = self.db.counts()?;
        self.db.clear()?;
        info!(entities = counts.0, relationships = counts.1, "graph cleared");
        Ok(counts)
    }
}
