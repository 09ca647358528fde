use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dedup::dedup_by_key;
use crate::error::{MergeError, MergeResult};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// Identity token of an entity record.
///
/// Clones share the token; two records deserialized from identical JSON do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
pub struct EntityId(u64);

impl EntityId {
    pub fn fresh() -> Self {
        Self(next_token())
    }
}

/// Identity token of a relationship record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
pub struct RelationshipId(u64);

impl RelationshipId {
    pub fn fresh() -> Self {
        Self(next_token())
    }
}

/// Embedding vectors computed by the extractor for an entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EntityEmbeddings {
    /// Embedding of the entity name
    pub name: Vec<f32>,

    /// Embedding of the entity label
    pub label: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EntityProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<EntityEmbeddings>,

    /// Extraction provenance and any other attributes, kept verbatim
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RelationshipProperties {
    /// Embedding of the relationship name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<f32>>,

    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Entity in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    #[serde(skip, default = "EntityId::fresh")]
    id: EntityId,

    /// Canonical surface form
    pub name: String,

    /// Type of entity (Person, Organization, Concept, ...)
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub properties: EntityProperties,
}

impl Entity {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: EntityId::fresh(),
            name: name.into(),
            label: label.into(),
            properties: EntityProperties::default(),
        }
    }

    pub fn with_embeddings(mut self, name: Vec<f32>, label: Vec<f32>) -> Self {
        self.properties.embeddings = Some(EntityEmbeddings { name, label });
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            name: self.name.clone(),
            label: self.label.clone(),
        }
    }

    /// True when both values are the same record (token equality).
    pub fn same_record(&self, other: &Entity) -> bool {
        self.id == other.id
    }

    pub fn embeddings(&self) -> MergeResult<&EntityEmbeddings> {
        self.properties
            .embeddings
            .as_ref()
            .ok_or_else(|| MergeError::MissingEmbedding {
                kind: "entity",
                name: self.name.clone(),
            })
    }
}

/// Relation between two entities
///
/// Endpoints are owned snapshots of graph entities. They are kept in sync by
/// rewriting, never by shared ownership.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Relationship {
    #[serde(skip, default = "RelationshipId::fresh")]
    id: RelationshipId,

    /// Predicate (founded, works_at, ...)
    pub name: String,

    #[serde(rename = "startEntity")]
    pub start_entity: Entity,

    #[serde(rename = "endEntity")]
    pub end_entity: Entity,

    #[serde(default)]
    pub properties: RelationshipProperties,
}

impl Relationship {
    pub fn new(name: impl Into<String>, start_entity: Entity, end_entity: Entity) -> Self {
        Self {
            id: RelationshipId::fresh(),
            name: name.into(),
            start_entity,
            end_entity,
            properties: RelationshipProperties::default(),
        }
    }

    pub fn with_embeddings(mut self, embeddings: Vec<f32>) -> Self {
        self.properties.embeddings = Some(embeddings);
        self
    }

    pub fn id(&self) -> RelationshipId {
        self.id
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey {
            name: self.name.clone(),
            start: self.start_entity.name.clone(),
            end: self.end_entity.name.clone(),
        }
    }

    pub fn same_record(&self, other: &Relationship) -> bool {
        self.id == other.id
    }

    pub fn same_endpoints(&self, other: &Relationship) -> bool {
        self.start_entity.name == other.start_entity.name
            && self.end_entity.name == other.end_entity.name
    }

    pub fn embeddings(&self) -> MergeResult<&[f32]> {
        self.properties
            .embeddings
            .as_deref()
            .ok_or_else(|| MergeError::MissingEmbedding {
                kind: "relationship",
                name: self.name.clone(),
            })
    }
}

/// Exact-dedup key of an entity: `(name, label)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub name: String,
    pub label: String,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.label)
    }
}

/// Exact-dedup key of a relationship: `(name, start.name, end.name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipKey {
    pub name: String,
    pub start: String,
    pub end: String,
}

impl fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[{}]->({})", self.start, self.name, self.end)
    }
}

/// Complete knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl KnowledgeGraph {
    pub fn new(entities: Vec<Entity>, relationships: Vec<Relationship>) -> Self {
        Self {
            entities,
            relationships,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// Drop entities sharing a `(name, label)` key, first seen wins.
    pub fn remove_duplicate_entities(&mut self) {
        let entities = std::mem::take(&mut self.entities);
        self.entities = dedup_by_key(entities, Entity::key);
    }

    /// Drop relationships sharing a `(name, start, end)` key, first seen wins.
    pub fn remove_duplicate_relationships(&mut self) {
        let relationships = std::mem::take(&mut self.relationships);
        self.relationships = dedup_by_key(relationships, Relationship::key);
    }

    /// Fails on the first relationship endpoint naming no entity of the graph.
    pub fn check_references(&self) -> MergeResult<()> {
        let names: std::collections::HashSet<&str> =
            self.entities.iter().map(|e| e.name.as_str()).collect();

        for rel in &self.relationships {
            for endpoint in [&rel.start_entity, &rel.end_entity] {
                if !names.contains(endpoint.name.as_str()) {
                    return Err(MergeError::DanglingReference {
                        relationship: rel.key().to_string(),
                        entity: endpoint.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Replace every relationship endpoint with the graph's own entity record.
    ///
    /// Lookup is by `(name, label)` first, then by name alone (an endpoint
    /// without a label, or one whose entity was relabelled by a merge).
    /// Deserialized graphs need this because identity tokens are not persisted.
    pub fn relink(&mut self) -> MergeResult<()> {
        let mut by_key: HashMap<EntityKey, usize> = HashMap::new();
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (idx, entity) in self.entities.iter().enumerate() {
            by_key.entry(entity.key()).or_insert(idx);
            by_name.entry(entity.name.as_str()).or_insert(idx);
        }

        for rel in &mut self.relationships {
            let rel_key = rel.key().to_string();
            for endpoint in [&mut rel.start_entity, &mut rel.end_entity] {
                let idx = by_key
                    .get(&endpoint.key())
                    .or_else(|| by_name.get(endpoint.name.as_str()))
                    .copied()
                    .ok_or_else(|| MergeError::DanglingReference {
                        relationship: rel_key.clone(),
                        entity: endpoint.name.clone(),
                    })?;
                *endpoint = self.entities[idx].clone();
            }
        }
        Ok(())
    }
}
