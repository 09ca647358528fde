//! Incremental knowledge graph construction with embedding-based entity
//! resolution.
//!
//! Batches of extracted entities and relationships are folded one at a time
//! into a canonical graph ([`builder::GraphBuilder`]). Records similar enough
//! to an existing canonical record are replaced by it ([`matcher::Matcher`]),
//! a finished graph can be reconciled with a previously persisted one
//! ([`matcher::Matcher::match_entities_and_update_relationships`]), and an
//! exact-key pass removes what similarity matching leaves behind.

pub mod builder;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod graph;
pub mod logging;
pub mod manager;
pub mod matcher;
pub mod reconcile;
pub mod similarity;
pub mod snapshot;
pub mod storage;

pub use builder::{BuildOptions, Extractor, GraphBuilder};
pub use error::{ExtractionError, MergeError, MergeResult};
pub use extract::{ExtractedBatch, PrecomputedExtractor};
pub use graph::{Entity, KnowledgeGraph, Relationship};
pub use matcher::Matcher;
pub use similarity::EntityWeights;
