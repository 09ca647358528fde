mod common;

use std::cell::RefCell;
use std::collections::HashSet;

use common::{apple, apple_inc, by_name, dir, names, person, relationship, steve_jobs};
use kg_merge_mcp_rs::builder::{finalize, CanonicalState, ExtractionOptions};
use kg_merge_mcp_rs::graph::{EntityKey, RelationshipKey};
use kg_merge_mcp_rs::{
    BuildOptions, Entity, EntityWeights, ExtractedBatch, ExtractionError, Extractor, GraphBuilder,
    KnowledgeGraph, Matcher, MergeError, PrecomputedExtractor, Relationship,
};

fn founded_by_name(start: &str, end: &str) -> Relationship {
    Relationship::new("founded", by_name(start), by_name(end)).with_embeddings(dir(0.0))
}

fn assert_consistent(graph: &KnowledgeGraph) {
    graph.check_references().unwrap();

    let entity_keys: HashSet<EntityKey> = graph.entities.iter().map(Entity::key).collect();
    assert_eq!(entity_keys.len(), graph.entities.len(), "duplicate entity keys");

    let rel_keys: HashSet<RelationshipKey> =
        graph.relationships.iter().map(Relationship::key).collect();
    assert_eq!(rel_keys.len(), graph.relationships.len(), "duplicate relationship keys");
}

#[test]
fn test_first_batch_seeds_graph() {
    let batch = ExtractedBatch::new(
        vec![apple(), steve_jobs()],
        vec![founded_by_name("Steve Jobs", "Apple")],
    );

    let graph = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[batch], None, &BuildOptions::default())
        .unwrap();

    assert_eq!(names(&graph.entities), vec!["Apple", "Steve Jobs"]);
    assert_eq!(graph.relationships.len(), 1);
    let rel = &graph.relationships[0];
    assert!(rel.start_entity.same_record(&graph.entities[1]));
    assert!(rel.end_entity.same_record(&graph.entities[0]));
    assert_consistent(&graph);
}

#[test]
fn test_later_batches_resolve_to_canonical_entities() {
    let first = ExtractedBatch::new(
        vec![apple(), steve_jobs()],
        vec![founded_by_name("Steve Jobs", "Apple")],
    );
    // Same fact, different surface forms
    let second = ExtractedBatch::new(
        vec![apple_inc(), steve_jobs()],
        vec![Relationship::new("co-founded", by_name("Steve Jobs"), by_name("Apple Inc."))
            .with_embeddings(dir(15.0))],
    );

    let graph = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[first, second], None, &BuildOptions::default())
        .unwrap();

    assert_eq!(names(&graph.entities), vec!["Apple", "Steve Jobs"]);
    assert_eq!(graph.relationships.len(), 1);
    assert_eq!(graph.relationships[0].key().to_string(), "(Steve Jobs)-[founded]->(Apple)");
    assert_consistent(&graph);
}

#[test]
fn test_strict_threshold_keeps_variants_apart() {
    let first = ExtractedBatch::new(vec![apple()], Vec::new());
    let second = ExtractedBatch::new(vec![apple_inc()], Vec::new());
    let options = BuildOptions {
        ent_threshold: 0.95,
        ..BuildOptions::default()
    };

    let graph = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[first, second], None, &options)
        .unwrap();
    assert_eq!(names(&graph.entities), vec!["Apple", "Apple Inc."]);
}

#[test]
fn test_empty_batch_leaves_state_untouched() {
    let builder = GraphBuilder::new(PrecomputedExtractor);
    let options = BuildOptions::default();
    let matcher = Matcher::new(options.weights);

    let seed = ExtractedBatch::new(
        vec![apple(), steve_jobs()],
        vec![founded_by_name("Steve Jobs", "Apple")],
    );
    let state = builder
        .fold_batch(&matcher, CanonicalState::default(), 0, &seed, &options)
        .unwrap();
    let entity_ids: Vec<_> = state.entities.iter().map(Entity::id).collect();
    let rel_ids: Vec<_> = state.relationships.iter().map(Relationship::id).collect();
    let before = serde_json::to_string(&(&state.entities, &state.relationships)).unwrap();

    // Relationships without entities are never looked at
    let empty = ExtractedBatch::new(Vec::new(), vec![founded_by_name("Nobody", "Nowhere")]);
    let state = builder
        .fold_batch(&matcher, state, 1, &empty, &options)
        .unwrap();

    assert_eq!(state.entities.iter().map(Entity::id).collect::<Vec<_>>(), entity_ids);
    assert_eq!(state.relationships.iter().map(Relationship::id).collect::<Vec<_>>(), rel_ids);
    let after = serde_json::to_string(&(&state.entities, &state.relationships)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_no_batches_yields_existing_graph() {
    let existing = KnowledgeGraph::new(vec![apple(), apple()], Vec::new());
    let graph = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[], Some(existing), &BuildOptions::default())
        .unwrap();
    assert_eq!(names(&graph.entities), vec!["Apple"]);

    let graph = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[], None, &BuildOptions::default())
        .unwrap();
    assert!(graph.is_empty());
}

#[test]
fn test_merge_with_existing_graph() {
    let (old_apple, old_jobs) = (apple(), steve_jobs());
    let existing = KnowledgeGraph::new(
        vec![old_apple.clone(), old_jobs.clone()],
        vec![relationship("founded", &old_jobs, &old_apple, dir(0.0))],
    );

    let wozniak = Entity::new("Steve Wozniak", "Person").with_embeddings(dir(180.0), person());
    let batch = ExtractedBatch::new(
        vec![apple_inc(), wozniak],
        vec![Relationship::new("founded", by_name("Steve Wozniak"), by_name("Apple Inc."))
            .with_embeddings(dir(0.0))],
    );

    let graph = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[batch], Some(existing), &BuildOptions::default())
        .unwrap();

    assert_eq!(names(&graph.entities), vec!["Apple", "Steve Jobs", "Steve Wozniak"]);
    let keys: Vec<String> = graph.relationships.iter().map(|r| r.key().to_string()).collect();
    assert_eq!(
        keys,
        vec!["(Steve Jobs)-[founded]->(Apple)", "(Steve Wozniak)-[founded]->(Apple)"]
    );
    assert_consistent(&graph);
}

#[test]
fn test_finalize_is_idempotent() {
    let (a, jobs) = (apple(), steve_jobs());
    let graph = KnowledgeGraph::new(
        vec![a.clone(), jobs.clone(), apple()],
        vec![
            relationship("founded", &jobs, &a, dir(0.0)),
            relationship("founded", &jobs, &a, dir(3.0)),
        ],
    );

    let once = finalize(graph).unwrap();
    let twice = finalize(once.clone()).unwrap();

    assert_eq!(once.entities.len(), 2);
    assert_eq!(once.relationships.len(), 1);
    assert_eq!(
        serde_json::to_value(&once).unwrap(),
        serde_json::to_value(&twice).unwrap()
    );
}

#[test]
fn test_finalize_reports_dangling_reference() {
    let (a, jobs) = (apple(), steve_jobs());
    let graph = KnowledgeGraph::new(
        vec![a.clone()],
        vec![relationship("founded", &jobs, &a, dir(0.0))],
    );

    let err = finalize(graph).unwrap_err();
    assert!(matches!(
        err,
        MergeError::DanglingReference { ref entity, .. } if entity == "Steve Jobs"
    ));
}

#[test]
fn test_unknown_endpoint_rejects_batch() {
    let batch = ExtractedBatch::new(vec![apple()], vec![founded_by_name("Steve Jobs", "Apple")]);

    let err = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[batch], None, &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        MergeError::Extraction {
            batch: 1,
            source: ExtractionError::UnknownEndpoint { .. }
        }
    ));
}

#[test]
fn test_missing_embeddings_abort_build() {
    let first = ExtractedBatch::new(vec![apple()], Vec::new());
    let second = ExtractedBatch::new(vec![Entity::new("Apple Inc.", "Organization")], Vec::new());

    let err = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[first, second], None, &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, MergeError::MissingEmbedding { .. }));
}

#[test]
fn test_first_batch_requires_entity_embeddings() {
    let batch = ExtractedBatch::new(
        vec![Entity::new("Apple", "Organization"), Entity::new("Steve Jobs", "Person")],
        Vec::new(),
    );

    let err = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[batch], None, &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, MergeError::MissingEmbedding { kind: "entity", .. }));
}

#[test]
fn test_first_batch_requires_relationship_embeddings() {
    let batch = ExtractedBatch::new(
        vec![apple(), steve_jobs()],
        vec![Relationship::new("founded", by_name("Steve Jobs"), by_name("Apple"))],
    );

    let err = GraphBuilder::new(PrecomputedExtractor)
        .build_graph(&[batch], None, &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, MergeError::MissingEmbedding { kind: "relationship", .. }));
}

/// Fails relation extraction on one batch and records what it was given
struct ScriptedExtractor {
    fail_on: Option<usize>,
    seen: RefCell<Vec<ExtractionOptions>>,
}

impl Extractor for ScriptedExtractor {
    type Batch = (usize, ExtractedBatch);

    fn extract_entities(
        &self,
        batch: &Self::Batch,
        weights: EntityWeights,
    ) -> Result<Vec<Entity>, ExtractionError> {
        PrecomputedExtractor.extract_entities(&batch.1, weights)
    }

    fn extract_relationships(
        &self,
        batch: &Self::Batch,
        entities: &[Entity],
        options: &ExtractionOptions,
    ) -> Result<Vec<Relationship>, ExtractionError> {
        self.seen.borrow_mut().push(*options);
        if self.fail_on == Some(batch.0) {
            return Err(ExtractionError::Failed {
                message: "rate limited".to_string(),
                attempts: options.max_tries,
            });
        }
        PrecomputedExtractor.extract_relationships(&batch.1, entities, options)
    }
}

#[test]
fn test_extraction_failure_aborts_build() {
    let extractor = ScriptedExtractor {
        fail_on: Some(2),
        seen: RefCell::new(Vec::new()),
    };
    let batches = vec![
        (1, ExtractedBatch::new(vec![apple()], Vec::new())),
        (2, ExtractedBatch::new(vec![steve_jobs()], Vec::new())),
        (3, ExtractedBatch::new(vec![apple_inc()], Vec::new())),
    ];

    let err = GraphBuilder::new(extractor)
        .build_graph(&batches, None, &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        MergeError::Extraction {
            batch: 2,
            source: ExtractionError::Failed { attempts: 5, .. }
        }
    ));
}

#[test]
fn test_retry_limits_pass_through() {
    let builder = GraphBuilder::new(ScriptedExtractor {
        fail_on: None,
        seen: RefCell::new(Vec::new()),
    });
    let options = BuildOptions {
        rel_threshold: 0.8,
        max_tries: 9,
        max_tries_isolated_entities: 4,
        ..BuildOptions::default()
    };
    let batches = vec![
        (1, ExtractedBatch::new(vec![apple()], Vec::new())),
        (2, ExtractedBatch::new(Vec::new(), Vec::new())),
        (3, ExtractedBatch::new(vec![steve_jobs()], Vec::new())),
    ];

    builder.build_graph(&batches, None, &options).unwrap();

    let seen = builder.extractor().seen.borrow();
    // The empty batch never reaches relation extraction
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|o| o.max_tries == 9
        && o.max_tries_isolated_entities == 4
        && o.rel_threshold == 0.8));
}
