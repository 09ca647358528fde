use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};
use crate::graph::{Entity, Relationship};

/// Weights of the name and label embeddings in [`entity_similarity`].
///
/// Callers are expected to keep `name + label == 1.0`. Nothing normalizes or
/// clamps the weights, so other sums yield scores outside `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityWeights {
    pub name: f32,
    pub label: f32,
}

impl Default for EntityWeights {
    fn default() -> Self {
        Self {
            name: 0.6,
            label: 0.4,
        }
    }
}

impl EntityWeights {
    pub fn new(name: f32, label: f32) -> Self {
        Self { name, label }
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector has zero magnitude (or is empty).
pub fn cosine(u: &[f32], v: &[f32]) -> MergeResult<f32> {
    if u.len() != v.len() {
        return Err(MergeError::DimensionMismatch {
            left: u.len(),
            right: v.len(),
        });
    }

    let dot: f32 = u.iter().zip(v).map(|(x, y)| x * y).sum();
    let norm_u: f32 = u.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_v: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_u == 0.0 || norm_v == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_u * norm_v))
}

/// Weighted sum of name and label embedding similarity.
pub fn entity_similarity(a: &Entity, b: &Entity, weights: EntityWeights) -> MergeResult<f32> {
    let ea = a.embeddings()?;
    let eb = b.embeddings()?;
    Ok(weights.name * cosine(&ea.name, &eb.name)? + weights.label * cosine(&ea.label, &eb.label)?)
}

/// Cosine similarity of the relationship-name embeddings.
pub fn relationship_similarity(a: &Relationship, b: &Relationship) -> MergeResult<f32> {
    cosine(a.embeddings()?, b.embeddings()?)
}
