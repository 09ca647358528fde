use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ExtractionError, MergeError, MergeResult};
use crate::graph::{Entity, KnowledgeGraph, Relationship};
use crate::matcher::Matcher;
use crate::similarity::EntityWeights;

/// Tunables of a `build_graph` call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BuildOptions {
    /// Entity similarity cutoff, `[0, 1]` recommended
    pub ent_threshold: f32,

    /// Relationship similarity cutoff, `[0, 1]` recommended
    pub rel_threshold: f32,

    /// Name/label weights of entity similarity, expected to sum to 1
    pub weights: EntityWeights,

    /// Passed through to the extractor
    pub max_tries: usize,

    /// Passed through to the extractor
    pub max_tries_isolated_entities: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            ent_threshold: 0.7,
            rel_threshold: 0.7,
            weights: EntityWeights::default(),
            max_tries: 5,
            max_tries_isolated_entities: 3,
        }
    }
}

impl BuildOptions {
    pub fn extraction(&self) -> ExtractionOptions {
        ExtractionOptions {
            rel_threshold: self.rel_threshold,
            weights: self.weights,
            max_tries: self.max_tries,
            max_tries_isolated_entities: self.max_tries_isolated_entities,
        }
    }
}

/// What the builder hands to relation extraction, unchanged from the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionOptions {
    pub rel_threshold: f32,
    pub weights: EntityWeights,
    pub max_tries: usize,
    pub max_tries_isolated_entities: usize,
}

/// Source of entities and relationships for a batch.
///
/// Implementations own retries and rate limiting. An error returned here means
/// the batch is lost and aborts the whole build.
pub trait Extractor {
    type Batch;

    fn extract_entities(
        &self,
        batch: &Self::Batch,
        weights: EntityWeights,
    ) -> Result<Vec<Entity>, ExtractionError>;

    /// `entities` is what `extract_entities` returned for this batch, each
    /// element replaced by its canonical form (same length and order).
    fn extract_relationships(
        &self,
        batch: &Self::Batch,
        entities: &[Entity],
        options: &ExtractionOptions,
    ) -> Result<Vec<Relationship>, ExtractionError>;
}

/// Canonical entities and relationships accumulated so far.
#[derive(Debug, Clone, Default)]
pub struct CanonicalState {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

pub struct GraphBuilder<X> {
    extractor: X,
}

impl<X: Extractor> GraphBuilder<X> {
    pub fn new(extractor: X) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &X {
        &self.extractor
    }

    /// Build one deduplicated graph from `batches`, optionally reconciled with
    /// `existing_graph`.
    ///
    /// The first batch seeds the canonical state; each later batch is matched
    /// against everything before it.
    pub fn build_graph(
        &self,
        batches: &[X::Batch],
        existing_graph: Option<KnowledgeGraph>,
        options: &BuildOptions,
    ) -> MergeResult<KnowledgeGraph> {
        let matcher = Matcher::new(options.weights);

        let state = batches
            .iter()
            .enumerate()
            .try_fold(CanonicalState::default(), |state, (index, batch)| {
                self.fold_batch(&matcher, state, index, batch, options)
            })?;

        info!(
            batches = batches.len(),
            entities = state.entities.len(),
            relationships = state.relationships.len(),
            "batches folded"
        );

        merge_graphs(
            KnowledgeGraph::new(state.entities, state.relationships),
            existing_graph,
            options,
        )
    }

    /// Fold one batch into the canonical state.
    ///
    /// A batch without entities returns `state` untouched.
    pub fn fold_batch(
        &self,
        matcher: &Matcher,
        state: CanonicalState,
        index: usize,
        batch: &X::Batch,
        options: &BuildOptions,
    ) -> MergeResult<CanonicalState> {
        let batch_no = index + 1;
        info!(batch = batch_no, "extracting entities");
        let entities = self
            .extractor
            .extract_entities(batch, options.weights)
            .map_err(|source| MergeError::Extraction {
                batch: batch_no,
                source,
            })?;

        if entities.is_empty() {
            debug!(batch = batch_no, "no entities extracted, skipping batch");
            return Ok(state);
        }

        let (matched_entities, entities) =
            matcher.process_lists(entities, state.entities, options.ent_threshold)?;

        info!(batch = batch_no, "extracting relationships");
        let relationships = self
            .extractor
            .extract_relationships(batch, &matched_entities, &options.extraction())
            .map_err(|source| MergeError::Extraction {
                batch: batch_no,
                source,
            })?;

        let (_, relationships) =
            matcher.process_lists(relationships, state.relationships, options.rel_threshold)?;

        debug!(
            batch = batch_no,
            entities = entities.len(),
            relationships = relationships.len(),
            "batch merged"
        );

        Ok(CanonicalState {
            entities,
            relationships,
        })
    }
}

/// Reconcile `graph` with `existing` (when given), then run the exact-key pass.
///
/// The result has no duplicate keys, no dangling endpoints, and every endpoint
/// is a snapshot of the graph's own entity record.
pub fn merge_graphs(
    graph: KnowledgeGraph,
    existing: Option<KnowledgeGraph>,
    options: &BuildOptions,
) -> MergeResult<KnowledgeGraph> {
    let graph = match existing {
        Some(existing) => {
            info!(
                entities = existing.entities.len(),
                relationships = existing.relationships.len(),
                "matching against existing graph"
            );
            let (entities, relationships) = Matcher::new(options.weights)
                .match_entities_and_update_relationships(
                    graph.entities,
                    existing.entities,
                    graph.relationships,
                    existing.relationships,
                    options.ent_threshold,
                    options.rel_threshold,
                )?;
            KnowledgeGraph::new(entities, relationships)
        }
        None => graph,
    };

    finalize(graph)
}

/// Exact-key deduplication of entities then relationships, then the
/// reference check.
pub fn finalize(mut graph: KnowledgeGraph) -> MergeResult<KnowledgeGraph> {
    graph.remove_duplicate_entities();
    graph.relink()?;
    graph.remove_duplicate_relationships();
    graph.check_references()?;
    Ok(graph)
}
