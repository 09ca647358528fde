use rusqlite::params;
use anyhow::{Result, Context, bail};
use std::collections::HashMap;
use std::path::Path;
use r2d2_sqlite::SqliteConnectionManager;
use r2d2::Pool;
use crate::graph::{Entity, EntityKey, EntityProperties, KnowledgeGraph, Relationship, RelationshipProperties};
use crate::extract::ExtractedBatch;

// Validation constants
const MAX_NAME_LENGTH: usize = 256;
const MAX_LABEL_LENGTH: usize = 128;

/// Validate entity/relationship name (any printable text)
fn validate_name(name: &str, field: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("{} cannot be empty", field);
    }
    if name.len() > MAX_NAME_LENGTH {
        bail!("{} too long (max {} chars)", field, MAX_NAME_LENGTH);
    }
    // Check for control characters and null bytes
    if name.chars().any(|c| c.is_control()) {
        bail!("{} contains invalid characters", field);
    }
    Ok(())
}

/// Validate entity label
fn validate_label(label: &str, field: &str) -> Result<()> {
    if label.trim().is_empty() {
        bail!("{} cannot be empty", field);
    }
    if label.len() > MAX_LABEL_LENGTH {
        bail!("{} too long (max {} chars)", field, MAX_LABEL_LENGTH);
    }
    if label.chars().any(|c| c.is_control()) {
        bail!("{} contains invalid characters", field);
    }
    Ok(())
}

/// Entities must carry both embeddings with matching dimensions
fn validate_entity(entity: &Entity) -> Result<()> {
    validate_name(&entity.name, "Entity name")?;
    validate_label(&entity.label, "Entity label")?;
    let embeddings = entity.embeddings()?;
    if embeddings.name.is_empty() || embeddings.label.is_empty() {
        bail!("Entity '{}' has an empty embedding", entity.name);
    }
    Ok(())
}

fn validate_relationship(rel: &Relationship) -> Result<()> {
    validate_name(&rel.name, "Relationship name")?;
    validate_name(&rel.start_entity.name, "Start entity")?;
    validate_name(&rel.end_entity.name, "End entity")?;
    if rel.embeddings()?.is_empty() {
        bail!("Relationship '{}' has an empty embedding", rel.name);
    }
    Ok(())
}

/// Validate extracted batches before anything is merged
pub fn validate_batches(batches: &[ExtractedBatch]) -> Result<()> {
    for (idx, batch) in batches.iter().enumerate() {
        for entity in &batch.entities {
            validate_entity(entity).with_context(|| format!("Invalid entity in batch {}", idx + 1))?;
        }
        for rel in &batch.relationships {
            validate_relationship(rel)
                .with_context(|| format!("Invalid relationship in batch {}", idx + 1))?;
        }
    }
    Ok(())
}

/// Validate a complete graph (imported snapshots)
pub fn validate_graph(graph: &KnowledgeGraph) -> Result<()> {
    for entity in &graph.entities {
        validate_entity(entity)?;
    }
    for rel in &graph.relationships {
        validate_relationship(rel)?;
    }
    Ok(())
}

/// Validate database file path
fn validate_db_path(path: &Path) -> Result<()> {
    // Check file extension FIRST (before any filesystem operations)
    if let Some(ext) = path.extension() {
        if ext != "db" {
            bail!("Invalid database file extension (must be .db)");
        }
    } else {
        bail!("Database path must have .db extension");
    }
    Ok(())
}

const SCHEMA: &str = r#"
-- Entities table, keyed like the exact-dedup pass
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    label TEXT NOT NULL,
    properties TEXT NOT NULL,
    UNIQUE(name, label)
) STRICT;

-- Relationships; endpoints reference entities by (name, label)
CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    start_name TEXT NOT NULL,
    start_label TEXT NOT NULL,
    end_name TEXT NOT NULL,
    end_label TEXT NOT NULL,
    properties TEXT NOT NULL,
    UNIQUE(name, start_name, end_name),
    FOREIGN KEY(start_name, start_label) REFERENCES entities(name, label) ON DELETE CASCADE,
    FOREIGN KEY(end_name, end_label) REFERENCES entities(name, label) ON DELETE CASCADE
) STRICT;

CREATE INDEX IF NOT EXISTS idx_entity_label ON entities(label);
CREATE INDEX IF NOT EXISTS idx_relationship_name ON relationships(name);
CREATE INDEX IF NOT EXISTS idx_start ON relationships(start_name, start_label);
CREATE INDEX IF NOT EXISTS idx_end ON relationships(end_name, end_label);
"#;

pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create database with connection pool
    pub fn open(path: &Path) -> Result<Self> {
        validate_db_path(path)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Pragmas are per connection, so every pooled connection gets them
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(15)
            .build(manager)
            .context("Failed to create connection pool")?;

        {
            let conn = pool.get().context("Failed to get connection from pool")?;

            // WAL mode for concurrent reads
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;

            conn.execute_batch(SCHEMA)?;
        }

        Ok(Self { pool })
    }

    /// Replace the stored graph with `graph`
    /// Wrapped in transaction for atomicity
    pub fn replace_graph(&self, graph: &KnowledgeGraph) -> Result<()> {
        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let tx = conn.unchecked_transaction()
            .context("Failed to start transaction for replacing graph")?;

        // Cascades to relationships
        tx.execute("DELETE FROM entities", [])
            .context("Failed to clear entities")?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO entities (name, label, properties) VALUES (?1, ?2, ?3)"
            )
            .context("Failed to prepare insert statement for entities")?;

            for entity in &graph.entities {
                let props = serde_json::to_string(&entity.properties)
                    .with_context(|| format!("Failed to serialize properties for entity '{}'", entity.name))?;
                stmt.execute(params![&entity.name, &entity.label, &props])
                    .with_context(|| format!("Failed to insert entity '{}'", entity.key()))?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO relationships (name, start_name, start_label, end_name, end_label, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            )
            .context("Failed to prepare insert statement for relationships")?;

            for rel in &graph.relationships {
                let props = serde_json::to_string(&rel.properties)
                    .with_context(|| format!("Failed to serialize properties for relationship '{}'", rel.key()))?;
                match stmt.execute(params![
                    &rel.name,
                    &rel.start_entity.name,
                    &rel.start_entity.label,
                    &rel.end_entity.name,
                    &rel.end_entity.label,
                    &props,
                ]) {
                    Ok(_) => {}
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        bail!(
                            "Cannot store relationship {}: duplicate key or missing endpoint entity",
                            rel.key()
                        );
                    }
                    Err(e) => return Err(e).with_context(|| format!(
                        "Failed to insert relationship {}",
                        rel.key()
                    )),
                }
            }
        }

        tx.commit()
            .context("Failed to commit transaction for replacing graph")?;
        Ok(())
    }

    /// Read entire graph in insertion order
    pub fn read_graph(&self) -> Result<KnowledgeGraph> {
        let conn = self.pool.get()?;

        let mut entities = Vec::new();
        let mut stmt = conn.prepare("SELECT name, label, properties FROM entities ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        for row in rows {
            let (name, label, props_json) = row?;
            let properties: EntityProperties = serde_json::from_str(&props_json)
                .with_context(|| format!("Corrupted properties for entity '{}'", name))?;
            let mut entity = Entity::new(name, label);
            entity.properties = properties;
            entities.push(entity);
        }

        // Endpoints share the identity of the entity rows they reference
        let by_key: HashMap<EntityKey, &Entity> =
            entities.iter().map(|e| (e.key(), e)).collect();

        let mut relationships = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT name, start_name, start_label, end_name, end_label, properties
             FROM relationships ORDER BY id"
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                EntityKey { name: row.get(1)?, label: row.get(2)? },
                EntityKey { name: row.get(3)?, label: row.get(4)? },
                row.get::<_, String>(5)?,
            ))
        })?;

        for row in rows {
            let (name, start, end, props_json) = row?;
            let endpoint = |key: &EntityKey| {
                by_key.get(key).map(|e| (*e).clone()).with_context(|| format!(
                    "Relationship '{}' references missing entity '{}'",
                    name, key
                ))
            };
            let properties: RelationshipProperties = serde_json::from_str(&props_json)
                .with_context(|| format!("Corrupted properties for relationship '{}'", name))?;
            let mut rel = Relationship::new(name.clone(), endpoint(&start)?, endpoint(&end)?);
            rel.properties = properties;
            relationships.push(rel);
        }

        Ok(KnowledgeGraph::new(entities, relationships))
    }

    /// Entity and relationship counts
    pub fn counts(&self) -> Result<(usize, usize)> {
        let conn = self.pool.get()?;
        let entities: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        let relationships: i64 =
            conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        Ok((entities as usize, relationships as usize))
    }

    /// Delete everything
    pub fn clear(&self) -> Result<()> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM relationships", [])?;
        tx.execute("DELETE FROM entities", [])?;
        tx.commit()?;
        Ok(())
    }
}
