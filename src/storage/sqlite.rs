//! SQLite storage backend for stockflow

use super::traits::{
    AddOutcome, CleanCounts, CleanupScope, GraphStore, MergeCounts, NodeFields, OpenStore,
    ResetCounts, RelationshipStatusCount, StorageError, StorageResult,
};
use crate::consolidation::{RunId, RunRecord};
use crate::graph::{
    ConceptNode, Direction, IncidentRelationship, InvalidRelationship, Narrative, NodeId,
    NodeKind, Relationship, RelationshipKey, RelationshipProperties, RelationshipType,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const CONCEPT_COLUMNS: &str = "id, kind, name, description, embedding_json, consolidated, \
     consolidation_score, last_consolidated_at, created_at";

const RELATIONSHIP_COLUMNS: &str =
    "rel_type, from_id, to_id, consolidated, consolidation_score, properties_json, created_at";

type ConceptRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    bool,
    i64,
    Option<String>,
    String,
);

type RelationshipRow = (String, String, String, bool, i64, String, String);

/// SQLite-backed graph store
///
/// One database file holds narratives, concept nodes, relationships and
/// consolidation run records. Thread-safe via internal mutex on the
/// connection, which also gives every caller read-your-writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS narratives (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Concept nodes; rowid order is insertion order
            CREATE TABLE IF NOT EXISTS concepts (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                embedding_json TEXT,
                embedded INTEGER NOT NULL DEFAULT 0,
                consolidated INTEGER NOT NULL DEFAULT 0,
                consolidation_score INTEGER NOT NULL DEFAULT 0,
                last_consolidated_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_concepts_partition
                ON concepts(kind, consolidated, embedded);

            -- Relationships; at most one edge per (type, from, to)
            CREATE TABLE IF NOT EXISTS relationships (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                rel_type TEXT NOT NULL,
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                consolidated INTEGER NOT NULL DEFAULT 0,
                consolidation_score INTEGER NOT NULL DEFAULT 0,
                properties_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_relationships_key
                ON relationships(rel_type, from_id, to_id);
            CREATE INDEX IF NOT EXISTS idx_relationships_from
                ON relationships(from_id);
            CREATE INDEX IF NOT EXISTS idx_relationships_to
                ON relationships(to_id);
            CREATE INDEX IF NOT EXISTS idx_relationships_status
                ON relationships(consolidated, rel_type);

            CREATE TABLE IF NOT EXISTS consolidation_runs (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                record_json TEXT NOT NULL
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(e.to_string()))
    }

    fn read_concept_row(row: &Row<'_>) -> rusqlite::Result<ConceptRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
        ))
    }

    /// Deserialize a concept node from database columns
    fn row_to_node(row: ConceptRow) -> StorageResult<ConceptNode> {
        let (id, kind, name, description, embedding_json, consolidated, score, last, created_at) =
            row;

        let embedding = match embedding_json {
            Some(json) => Some(serde_json::from_str::<Vec<f32>>(&json)?),
            None => None,
        };
        let last_consolidated_at = match last {
            Some(ts) => Some(Self::parse_timestamp(&ts)?),
            None => None,
        };

        Ok(ConceptNode {
            id: NodeId::from_string(id),
            kind: kind.parse::<NodeKind>()?,
            name,
            description,
            embedding,
            consolidated,
            consolidation_score: score.max(0) as u32,
            last_consolidated_at,
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }

    fn read_relationship_row(row: &Row<'_>) -> rusqlite::Result<RelationshipRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    /// Deserialize a relationship, validating its type against the closed set
    fn row_to_relationship(row: RelationshipRow) -> StorageResult<Relationship> {
        let (rel_type, from_id, to_id, consolidated, score, properties_json, created_at) = row;

        Ok(Relationship {
            rel_type: rel_type.parse::<RelationshipType>()?,
            from: NodeId::from_string(from_id),
            to: NodeId::from_string(to_id),
            consolidated,
            consolidation_score: score.max(0) as u32,
            properties: serde_json::from_str(&properties_json)?,
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }

    fn load_node(conn: &Connection, id: &NodeId) -> StorageResult<Option<ConceptNode>> {
        let row = conn
            .query_row(
                &format!("SELECT {CONCEPT_COLUMNS} FROM concepts WHERE id = ?1"),
                params![id.as_str()],
                Self::read_concept_row,
            )
            .optional()?;
        row.map(Self::row_to_node).transpose()
    }

    fn load_nodes(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> StorageResult<Vec<ConceptNode>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, Self::read_concept_row)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(Self::row_to_node(row?)?);
        }
        Ok(nodes)
    }

    fn write_node(conn: &Connection, node: &ConceptNode) -> StorageResult<()> {
        let embedding_json = node
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO concepts (id, kind, name, description, embedding_json, embedded,
                                  consolidated, consolidation_score, last_consolidated_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                description = excluded.description,
                embedding_json = excluded.embedding_json,
                embedded = excluded.embedded,
                consolidated = excluded.consolidated,
                consolidation_score = excluded.consolidation_score,
                last_consolidated_at = excluded.last_consolidated_at
            "#,
            params![
                node.id.as_str(),
                node.kind.label(),
                node.name,
                node.description,
                embedding_json,
                node.is_embedded(),
                node.consolidated,
                node.consolidation_score as i64,
                node.last_consolidated_at.map(|t| t.to_rfc3339()),
                node.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn endpoint_exists(conn: &Connection, id: &NodeId) -> StorageResult<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM concepts WHERE id = ?1)
                 OR EXISTS(SELECT 1 FROM narratives WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn require_endpoints(conn: &Connection, relationship: &Relationship) -> StorageResult<()> {
        for id in [&relationship.from, &relationship.to] {
            if !Self::endpoint_exists(conn, id)? {
                return Err(StorageError::NodeNotFound(id.to_string()));
            }
        }
        Ok(())
    }

    fn load_relationship(conn: &Connection, key: &RelationshipKey) -> StorageResult<Option<Relationship>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {RELATIONSHIP_COLUMNS} FROM relationships
                     WHERE rel_type = ?1 AND from_id = ?2 AND to_id = ?3"
                ),
                params![key.rel_type.as_str(), key.from.as_str(), key.to.as_str()],
                Self::read_relationship_row,
            )
            .optional()?;
        row.map(Self::row_to_relationship).transpose()
    }

    fn load_relationships(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> StorageResult<Vec<Relationship>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, Self::read_relationship_row)?;

        let mut relationships = Vec::new();
        for row in rows {
            relationships.push(Self::row_to_relationship(row?)?);
        }
        Ok(relationships)
    }

    fn insert_relationship(conn: &Connection, relationship: &Relationship) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT INTO relationships (rel_type, from_id, to_id, consolidated,
                                       consolidation_score, properties_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                relationship.rel_type.as_str(),
                relationship.from.as_str(),
                relationship.to.as_str(),
                relationship.consolidated,
                relationship.consolidation_score as i64,
                serde_json::to_string(&relationship.properties)?,
                relationship.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn append_evidence_with(
        conn: &Connection,
        key: &RelationshipKey,
        questions: &[String],
    ) -> StorageResult<bool> {
        let Some(mut existing) = Self::load_relationship(conn, key)? else {
            return Ok(false);
        };

        match &mut existing.properties {
            RelationshipProperties::CausalLink { questions: evidence, .. } => {
                evidence.extend(questions.iter().cloned());
            }
            _ => {
                return Err(InvalidRelationship::PropertiesMismatch {
                    rel_type: key.rel_type,
                    found: "evidence",
                }
                .into())
            }
        }

        conn.execute(
            "UPDATE relationships SET properties_json = ?4
             WHERE rel_type = ?1 AND from_id = ?2 AND to_id = ?3",
            params![
                key.rel_type.as_str(),
                key.from.as_str(),
                key.to.as_str(),
                serde_json::to_string(&existing.properties)?,
            ],
        )?;
        Ok(true)
    }

    fn load_incident(conn: &Connection, id: &NodeId) -> StorageResult<Vec<IncidentRelationship>> {
        let outgoing = Self::load_relationships(
            conn,
            &format!("SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE from_id = ?1 ORDER BY seq"),
            params![id.as_str()],
        )?;
        // Self-loops are reported once, as outgoing
        let incoming = Self::load_relationships(
            conn,
            &format!(
                "SELECT {RELATIONSHIP_COLUMNS} FROM relationships
                 WHERE to_id = ?1 AND from_id != ?1 ORDER BY seq"
            ),
            params![id.as_str()],
        )?;

        let mut incident = Vec::with_capacity(outgoing.len() + incoming.len());
        for relationship in outgoing {
            incident.push(IncidentRelationship {
                other: relationship.to.clone(),
                direction: Direction::Outgoing,
                relationship,
            });
        }
        for relationship in incoming {
            incident.push(IncidentRelationship {
                other: relationship.from.clone(),
                direction: Direction::Incoming,
                relationship,
            });
        }
        Ok(incident)
    }

    /// Re-point one of the source's edges at the canonical node
    fn transfer_edge(
        conn: &Connection,
        incident: &IncidentRelationship,
        source: &NodeId,
        canonical: &NodeId,
        counts: &mut MergeCounts,
    ) -> StorageResult<()> {
        let rel = &incident.relationship;
        let other = if &incident.other == source {
            canonical
        } else {
            &incident.other
        };
        let moved = match incident.direction {
            Direction::Outgoing => rel.with_endpoints(canonical.clone(), other.clone()),
            Direction::Incoming => rel.with_endpoints(other.clone(), canonical.clone()),
        };

        if moved.from == moved.to && !rel.rel_type.is_evidence_bearing() {
            counts
                .dropped
                .push((rel.key(), "endpoints merged into one node".to_string()));
            return Ok(());
        }
        if !Self::endpoint_exists(conn, other)? {
            let reason = StorageError::NodeNotFound(other.to_string()).to_string();
            counts.dropped.push((rel.key(), reason));
            return Ok(());
        }

        match Self::load_relationship(conn, &moved.key())? {
            None => {
                Self::insert_relationship(conn, &moved)?;
                counts.transferred += 1;
            }
            Some(_) if rel.rel_type.is_evidence_bearing() && !rel.evidence().is_empty() => {
                Self::append_evidence_with(conn, &moved.key(), rel.evidence())?;
                counts.evidence_appended += 1;
            }
            // A scored edge already at the target absorbs the duplicate
            Some(_) => {}
        }
        Ok(())
    }

    fn row_to_run(record_json: String) -> StorageResult<RunRecord> {
        Ok(serde_json::from_str(&record_json)?)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    // === Narratives ===

    fn save_narrative(&self, narrative: &Narrative) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO narratives (id, title, content, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content
            "#,
            params![
                narrative.id.as_str(),
                narrative.title,
                narrative.content,
                narrative.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_narrative(&self, id: &NodeId) -> StorageResult<Option<Narrative>> {
        let conn = self.conn()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT title, content, created_at FROM narratives WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((title, content, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Narrative {
            id: id.clone(),
            title,
            content,
            created_at: Self::parse_timestamp(&created_at)?,
        }))
    }

    fn count_narratives(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM narratives", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // === Concept nodes ===

    fn save_node(&self, node: &ConceptNode) -> StorageResult<()> {
        let conn = self.conn()?;
        Self::write_node(&conn, node)
    }

    fn get_node_by_id(&self, id: &NodeId) -> StorageResult<Option<ConceptNode>> {
        let conn = self.conn()?;
        Self::load_node(&conn, id)
    }

    fn query_nodes_by_kind_and_status(
        &self,
        kind: NodeKind,
        consolidated: bool,
    ) -> StorageResult<Vec<ConceptNode>> {
        let conn = self.conn()?;
        Self::load_nodes(
            &conn,
            &format!(
                "SELECT {CONCEPT_COLUMNS} FROM concepts
                 WHERE kind = ?1 AND consolidated = ?2 AND embedded = 1
                 ORDER BY rowid"
            ),
            params![kind.label(), consolidated],
        )
    }

    fn list_unembedded_nodes(&self) -> StorageResult<Vec<ConceptNode>> {
        let conn = self.conn()?;
        Self::load_nodes(
            &conn,
            &format!("SELECT {CONCEPT_COLUMNS} FROM concepts WHERE embedded = 0 ORDER BY rowid"),
            [],
        )
    }

    fn set_node_fields(&self, id: &NodeId, fields: &NodeFields) -> StorageResult<bool> {
        let conn = self.conn()?;
        let Some(mut node) = Self::load_node(&conn, id)? else {
            return Ok(false);
        };
        fields.apply_to(&mut node);
        Self::write_node(&conn, &node)?;
        Ok(true)
    }

    fn delete_node_and_incident_edges(&self, id: &NodeId) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM relationships WHERE from_id = ?1 OR to_id = ?1",
            params![id.as_str()],
        )?;
        let deleted = tx.execute("DELETE FROM concepts WHERE id = ?1", params![id.as_str()])?;

        tx.commit()?;
        Ok(deleted > 0)
    }

    fn merge_node(
        &self,
        source: &NodeId,
        canonical: &NodeId,
        fields: &NodeFields,
    ) -> StorageResult<MergeCounts> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let Some(mut survivor) = Self::load_node(&tx, canonical)? else {
            return Err(StorageError::NodeNotFound(canonical.to_string()));
        };
        if Self::load_node(&tx, source)?.is_none() {
            return Err(StorageError::NodeNotFound(source.to_string()));
        }
        fields.apply_to(&mut survivor);
        Self::write_node(&tx, &survivor)?;

        let mut counts = MergeCounts::default();
        for incident in Self::load_incident(&tx, source)? {
            Self::transfer_edge(&tx, &incident, source, canonical, &mut counts)?;
        }

        tx.execute(
            "DELETE FROM relationships WHERE from_id = ?1 OR to_id = ?1",
            params![source.as_str()],
        )?;
        tx.execute("DELETE FROM concepts WHERE id = ?1", params![source.as_str()])?;

        tx.commit()?;
        Ok(counts)
    }

    // === Relationships ===

    fn add_relationship(&self, relationship: &Relationship) -> StorageResult<AddOutcome> {
        relationship.validate()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::require_endpoints(&tx, relationship)?;

        let outcome = match Self::load_relationship(&tx, &relationship.key())? {
            None => {
                Self::insert_relationship(&tx, relationship)?;
                AddOutcome::Inserted
            }
            Some(_) if relationship.rel_type.is_evidence_bearing() => {
                Self::append_evidence_with(&tx, &relationship.key(), relationship.evidence())?;
                AddOutcome::EvidenceAppended
            }
            Some(_) => AddOutcome::Duplicate,
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get_relationship(&self, key: &RelationshipKey) -> StorageResult<Option<Relationship>> {
        let conn = self.conn()?;
        Self::load_relationship(&conn, key)
    }

    fn find_incident_relationships(&self, id: &NodeId) -> StorageResult<Vec<IncidentRelationship>> {
        let conn = self.conn()?;
        Self::load_incident(&conn, id)
    }

    fn create_relationship_if_absent(&self, relationship: &Relationship) -> StorageResult<bool> {
        relationship.validate()?;

        let conn = self.conn()?;
        Self::require_endpoints(&conn, relationship)?;
        if Self::load_relationship(&conn, &relationship.key())?.is_some() {
            return Ok(false);
        }
        Self::insert_relationship(&conn, relationship)?;
        Ok(true)
    }

    fn upsert_scored_relationship(&self, relationship: &Relationship) -> StorageResult<u32> {
        relationship.validate()?;

        let conn = self.conn()?;
        Self::require_endpoints(&conn, relationship)?;
        let score: i64 = conn.query_row(
            r#"
            INSERT INTO relationships (rel_type, from_id, to_id, consolidated,
                                       consolidation_score, properties_json, created_at)
            VALUES (?1, ?2, ?3, 1, 1, ?4, ?5)
            ON CONFLICT(rel_type, from_id, to_id) DO UPDATE SET
                consolidated = 1,
                consolidation_score = consolidation_score + 1
            RETURNING consolidation_score
            "#,
            params![
                relationship.rel_type.as_str(),
                relationship.from.as_str(),
                relationship.to.as_str(),
                serde_json::to_string(&relationship.properties)?,
                relationship.created_at.to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        Ok(score.max(0) as u32)
    }

    fn append_evidence(&self, key: &RelationshipKey, questions: &[String]) -> StorageResult<bool> {
        let conn = self.conn()?;
        Self::append_evidence_with(&conn, key, questions)
    }

    fn mark_relationship_consolidated(&self, key: &RelationshipKey) -> StorageResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE relationships SET consolidated = 1
             WHERE rel_type = ?1 AND from_id = ?2 AND to_id = ?3",
            params![key.rel_type.as_str(), key.from.as_str(), key.to.as_str()],
        )?;
        Ok(updated > 0)
    }

    fn delete_relationship(&self, key: &RelationshipKey) -> StorageResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM relationships WHERE rel_type = ?1 AND from_id = ?2 AND to_id = ?3",
            params![key.rel_type.as_str(), key.from.as_str(), key.to.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn list_distinct_unconsolidated_relationship_types(&self) -> StorageResult<Vec<RelationshipType>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT rel_type FROM relationships WHERE consolidated = 0
             GROUP BY rel_type ORDER BY MIN(seq)",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut types = Vec::new();
        for row in rows {
            types.push(row?.parse::<RelationshipType>()?);
        }
        Ok(types)
    }

    fn list_unconsolidated_relationships(
        &self,
        rel_type: RelationshipType,
    ) -> StorageResult<Vec<Relationship>> {
        let conn = self.conn()?;
        Self::load_relationships(
            &conn,
            &format!(
                "SELECT {RELATIONSHIP_COLUMNS} FROM relationships
                 WHERE rel_type = ?1 AND consolidated = 0 ORDER BY seq"
            ),
            params![rel_type.as_str()],
        )
    }

    fn relationship_status(&self) -> StorageResult<Vec<RelationshipStatusCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT rel_type, SUM(consolidated), COUNT(*) - SUM(consolidated), MAX(consolidation_score)
             FROM relationships GROUP BY rel_type ORDER BY rel_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (rel_type, consolidated, unconsolidated, max_score) = row?;
            counts.push(RelationshipStatusCount {
                rel_type: rel_type.parse()?,
                consolidated: consolidated as usize,
                unconsolidated: unconsolidated as usize,
                max_score: max_score.max(0) as u32,
            });
        }
        Ok(counts)
    }

    // === Maintenance ===

    fn sweep_unconsolidated_nodes(&self, scope: CleanupScope) -> StorageResult<usize> {
        let condition = match scope {
            CleanupScope::AllUnconsolidated => "consolidated = 0",
            CleanupScope::EmbeddedOnly => "consolidated = 0 AND embedded = 1",
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "DELETE FROM relationships
                 WHERE from_id IN (SELECT id FROM concepts WHERE {condition})
                    OR to_id IN (SELECT id FROM concepts WHERE {condition})"
            ),
            [],
        )?;
        let swept = tx.execute(&format!("DELETE FROM concepts WHERE {condition}"), [])?;

        tx.commit()?;
        Ok(swept)
    }

    fn reset_consolidation_state(&self) -> StorageResult<ResetCounts> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let nodes = tx.execute(
            "UPDATE concepts SET consolidated = 0, consolidation_score = 0, last_consolidated_at = NULL",
            [],
        )?;
        let relationships = tx.execute(
            "UPDATE relationships SET consolidated = 0, consolidation_score = 0",
            [],
        )?;

        tx.commit()?;
        Ok(ResetCounts {
            nodes,
            relationships,
        })
    }

    fn clean_non_narrative_data(&self) -> StorageResult<CleanCounts> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let relationships_deleted = tx.execute("DELETE FROM relationships", [])?;
        let nodes_deleted = tx.execute("DELETE FROM concepts", [])?;
        let narratives: i64 = tx.query_row("SELECT COUNT(*) FROM narratives", [], |row| row.get(0))?;

        tx.commit()?;
        Ok(CleanCounts {
            nodes_deleted,
            relationships_deleted,
            narratives_preserved: narratives as usize,
        })
    }

    // === Consolidation runs ===

    fn save_run(&self, run: &RunRecord) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO consolidation_runs (id, started_at, record_json)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET record_json = excluded.record_json
            "#,
            params![
                run.id.as_str(),
                run.started_at.to_rfc3339(),
                serde_json::to_string(run)?,
            ],
        )?;
        Ok(())
    }

    fn load_run(&self, id: &RunId) -> StorageResult<Option<RunRecord>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM consolidation_runs WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(Self::row_to_run).transpose()
    }

    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_json FROM consolidation_runs ORDER BY started_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(Self::row_to_run(row?)?);
        }
        Ok(runs)
    }
}
