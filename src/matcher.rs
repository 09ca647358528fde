use std::collections::HashSet;
use std::hash::Hash;

use tracing::debug;

use crate::error::MergeResult;
use crate::graph::{Entity, EntityId, Relationship, RelationshipId};
use crate::similarity::{entity_similarity, relationship_similarity, EntityWeights};

/// A record the matcher can compare and canonicalize.
pub trait Matchable: Clone {
    type Id: Copy + Eq + Hash;

    /// Identity token, distinct from the record's value fields.
    fn identity(&self) -> Self::Id;

    /// Fails when the record cannot be scored (no embeddings).
    fn validate(&self) -> MergeResult<()>;

    /// Canonical form of `self` once `best` is known to be its match.
    fn canonicalize(&self, best: &Self) -> Self;

    /// Human readable label for logs.
    fn describe(&self) -> String;
}

impl Matchable for Entity {
    type Id = EntityId;

    fn identity(&self) -> EntityId {
        self.id()
    }

    fn validate(&self) -> MergeResult<()> {
        self.embeddings().map(|_| ())
    }

    fn canonicalize(&self, best: &Self) -> Self {
        best.clone()
    }

    fn describe(&self) -> String {
        self.key().to_string()
    }
}

impl Matchable for Relationship {
    type Id = RelationshipId;

    fn identity(&self) -> RelationshipId {
        self.id()
    }

    fn validate(&self) -> MergeResult<()> {
        self.embeddings().map(|_| ())
    }

    /// The predicate and its embedding come from `best`. With the same
    /// endpoints the result is `best` itself; otherwise it is a distinct fact
    /// keeping its own endpoints and identity.
    fn canonicalize(&self, best: &Self) -> Self {
        if self.same_endpoints(best) {
            return best.clone();
        }
        let mut canonical = self.clone();
        canonical.name = best.name.clone();
        canonical.properties.embeddings = best.properties.embeddings.clone();
        canonical
    }

    fn describe(&self) -> String {
        self.key().to_string()
    }
}

/// Pairwise similarity of two records of the same kind.
pub trait Score<T> {
    fn score(&self, a: &T, b: &T) -> MergeResult<f32>;
}

impl Score<Entity> for Matcher {
    fn score(&self, a: &Entity, b: &Entity) -> MergeResult<f32> {
        entity_similarity(a, b, self.weights)
    }
}

impl Score<Relationship> for Matcher {
    fn score(&self, a: &Relationship, b: &Relationship) -> MergeResult<f32> {
        relationship_similarity(a, b)
    }
}

/// Reconciles freshly extracted records against a canonical list.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    weights: EntityWeights,
}

impl Matcher {
    pub fn new(weights: EntityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> EntityWeights {
        self.weights
    }

    /// Highest scoring candidate, the earliest one on ties.
    pub fn best_match<'a, T>(
        &self,
        item: &T,
        candidates: &'a [T],
    ) -> MergeResult<Option<(&'a T, f32)>>
    where
        T: Matchable,
        Self: Score<T>,
    {
        let mut best: Option<(&'a T, f32)> = None;
        for candidate in candidates {
            let score = self.score(item, candidate)?;
            let better = match best {
                None => true,
                Some((_, top)) => score > top,
            };
            if better {
                best = Some((candidate, score));
            }
        }
        Ok(best)
    }

    /// Reconcile `list1` against `list2`.
    ///
    /// Every item of `list1` is compared with the members `list2` had when the
    /// call began. An item scoring at least `threshold` against its best match
    /// is replaced by its canonical form; any other item is its own canonical
    /// form. Canonical forms not yet in `list2` are appended to it.
    ///
    /// Returns `list1` rewritten in canonical form (same length and order)
    /// and the grown `list2`. Every item of `list1` must carry embeddings,
    /// even when `list2` leaves nothing to score against.
    pub fn process_lists<T>(
        &self,
        list1: Vec<T>,
        list2: Vec<T>,
        threshold: f32,
    ) -> MergeResult<(Vec<T>, Vec<T>)>
    where
        T: Matchable,
        Self: Score<T>,
    {
        if list1.is_empty() {
            return Ok((list1, list2));
        }
        list1.iter().try_for_each(T::validate)?;

        let existing = list2.len();
        let mut known: HashSet<T::Id> = list2.iter().map(T::identity).collect();
        let mut global = list2;
        let mut matched = Vec::with_capacity(list1.len());

        for item in list1 {
            let canonical = match self.best_match(&item, &global[..existing])? {
                Some((best, score)) if score >= threshold => {
                    debug!(
                        item = %item.describe(),
                        canonical = %best.describe(),
                        score,
                        "matched"
                    );
                    item.canonicalize(best)
                }
                _ => item,
            };

            if known.insert(canonical.identity()) {
                global.push(canonical.clone());
            }
            matched.push(canonical);
        }

        Ok((matched, global))
    }
}
