#![allow(dead_code)]

use kg_merge_mcp_rs::{Entity, Relationship};

/// 2D unit vector at `degrees` from the x axis.
pub fn dir(degrees: f32) -> Vec<f32> {
    let rad = degrees.to_radians();
    vec![rad.cos(), rad.sin()]
}

/// Unit vector whose cosine with `dir(0.0)` is `cos`.
pub fn with_cos(cos: f32) -> Vec<f32> {
    vec![cos, (1.0 - cos * cos).sqrt()]
}

pub fn organization() -> Vec<f32> {
    dir(0.0)
}

pub fn person() -> Vec<f32> {
    dir(90.0)
}

/// "Apple", "Organization"
pub fn apple() -> Entity {
    Entity::new("Apple", "Organization").with_embeddings(dir(0.0), organization())
}

/// "Apple Inc.", "Organization": entity similarity with `apple()` is 0.92
/// under the default weights.
pub fn apple_inc() -> Entity {
    Entity::new("Apple Inc.", "Organization")
        .with_embeddings(with_cos(0.52 / 0.6), organization())
}

pub fn steve_jobs() -> Entity {
    Entity::new("Steve Jobs", "Person").with_embeddings(dir(90.0), person())
}

pub fn relationship(name: &str, start: &Entity, end: &Entity, embedding: Vec<f32>) -> Relationship {
    Relationship::new(name, start.clone(), end.clone()).with_embeddings(embedding)
}

/// Endpoint reference carrying only a name, as clients send it.
pub fn by_name(name: &str) -> Entity {
    Entity::new(name, "")
}

pub fn names(entities: &[Entity]) -> Vec<&str> {
    entities.iter().map(|e| e.name.as_str()).collect()
}
