use std::collections::HashMap;

use tracing::{debug, info};

use crate::dedup::{dedup_by_key, dedup_by_key_with};
use crate::error::MergeResult;
use crate::graph::{Entity, EntityId, Relationship};
use crate::matcher::Matcher;
use crate::similarity::entity_similarity;

impl Matcher {
    /// Merge `entities1`/`relationships1` (the new graph) into
    /// `entities2`/`relationships2` (the existing graph).
    ///
    /// Entity identity is resolved first; relationships of the new graph then
    /// have their endpoints rewritten to the canonical entities before both
    /// relationship sets are merged by exact key, existing ones first.
    pub fn match_entities_and_update_relationships(
        &self,
        entities1: Vec<Entity>,
        entities2: Vec<Entity>,
        relationships1: Vec<Relationship>,
        relationships2: Vec<Relationship>,
        ent_threshold: f32,
        rel_threshold: f32,
    ) -> MergeResult<(Vec<Entity>, Vec<Relationship>)> {
        let originals: Vec<EntityId> = entities1.iter().map(Entity::id).collect();

        let (matched_entities, global_entities) =
            self.process_lists(entities1, entities2, ent_threshold)?;
        let (matched_relationships, _) =
            self.process_lists(relationships1, relationships2.clone(), rel_threshold)?;

        // Colliding (name, label) keys: the later entity wins only if it is
        // close enough to the kept one.
        let weights = self.weights();
        let entities = dedup_by_key_with(global_entities, Entity::key, |kept, incoming| {
            Ok(entity_similarity(incoming, kept, weights)? > ent_threshold)
        })?;

        let renames: HashMap<EntityId, Entity> = originals
            .into_iter()
            .zip(matched_entities)
            .filter(|(original, matched)| *original != matched.id())
            .collect();
        debug!(renamed = renames.len(), "entity rename map built");

        let rewritten = dedup_by_key(
            matched_relationships
                .into_iter()
                .map(|rel| rewrite_endpoints(rel, &renames)),
            Relationship::key,
        );

        let relationships = dedup_by_key(
            relationships2.into_iter().chain(rewritten),
            Relationship::key,
        );

        info!(
            entities = entities.len(),
            relationships = relationships.len(),
            "reconciled with existing graph"
        );

        Ok((entities, relationships))
    }
}

/// Point endpoints at their canonical entities; untouched when not renamed.
pub fn rewrite_endpoints(mut rel: Relationship, renames: &HashMap<EntityId, Entity>) -> Relationship {
    if let Some(canonical) = renames.get(&rel.start_entity.id()) {
        rel.start_entity = canonical.clone();
    }
    if let Some(canonical) = renames.get(&rel.end_entity.id()) {
        rel.end_entity = canonical.clone();
    }
    rel
}
