use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::builder::{ExtractionOptions, Extractor};
use crate::error::ExtractionError;
use crate::graph::{Entity, EntityKey, Relationship};
use crate::similarity::EntityWeights;

/// One text section's worth of extracted records
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedBatch {
    #[serde(default)]
    pub entities: Vec<Entity>,

    /// Endpoints refer to `entities` by name (and label, when given)
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl ExtractedBatch {
    pub fn new(entities: Vec<Entity>, relationships: Vec<Relationship>) -> Self {
        Self {
            entities,
            relationships,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrecomputedExtractor;

impl Extractor for PrecomputedExtractor {
    type Batch = ExtractedBatch;

    fn extract_entities(
        &self,
        batch: &ExtractedBatch,
        _weights: EntityWeights,
    ) -> Result<Vec<Entity>, ExtractionError> {
        Ok(batch.entities.clone())
    }

    /// Relationships come back with each endpoint replaced by the canonical
    /// entity of the batch entity it names.
    fn extract_relationships(
        &self,
        batch: &ExtractedBatch,
        entities: &[Entity],
        _options: &ExtractionOptions,
    ) -> Result<Vec<Relationship>, ExtractionError> {
        let mut by_key: HashMap<EntityKey, &Entity> = HashMap::new();
        let mut by_name: HashMap<&str, &Entity> = HashMap::new();
        for (raw, canonical) in batch.entities.iter().zip(entities) {
            by_key.entry(raw.key()).or_insert(canonical);
            by_name.entry(raw.name.as_str()).or_insert(canonical);
        }

        let resolve = |rel: &Relationship, endpoint: &Entity| {
            let found = if endpoint.label.is_empty() {
                by_name.get(endpoint.name.as_str())
            } else {
                by_key.get(&endpoint.key())
            };
            found
                .map(|entity| (*entity).clone())
                .ok_or_else(|| ExtractionError::UnknownEndpoint {
                    relationship: rel.name.clone(),
                    endpoint: endpoint.name.clone(),
                })
        };

        batch
            .relationships
            .iter()
            .map(|rel| {
                let mut rel = rel.clone();
                rel.start_entity = resolve(&rel, &rel.start_entity)?;
                rel.end_entity = resolve(&rel, &rel.end_entity)?;
                Ok(rel)
            })
            .collect()
    }
}
