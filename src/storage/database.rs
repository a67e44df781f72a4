//! SQLite side-table for the vector store
//!
//! Holds the authoritative copy of every document, its embedding and its
//! stable `faiss_id`. The similarity index can always be rebuilt from here.

use ahash::AHashMap;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

use super::document::{DocumentMetadata, SearchScope, VectorDocument};
use super::VectorStoreError;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

const NEXT_FAISS_ID: &str = "next_faiss_id";

const DOCUMENT_COLUMNS: &str =
    "id, asset_id, project_id, chunk_index, text, embedding, metadata, faiss_id";

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) the database and apply pending migrations
    pub fn open(db_path: &Path) -> Result<Self, VectorStoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| VectorStoreError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Pragmas run on every pooled connection, not just the first
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(VectorStoreError::Pool)?;

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<DbConn, VectorStoreError> {
        self.pool.get().map_err(VectorStoreError::Pool)
    }

    fn migrate(&self) -> Result<(), VectorStoreError> {
        let conn = self.get_conn()?;
        let db_err = |source| VectorStoreError::Database {
            operation: "migrate".to_string(),
            source,
        };

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(db_err)?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration).map_err(db_err)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )
                .map_err(db_err)?;
            }
        }

        Ok(())
    }
}

/// Next `faiss_id` to hand out: the persisted high-water mark or one past
/// the largest id in the table, whichever is greater
pub fn next_faiss_id(conn: &Connection) -> rusqlite::Result<u64> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![NEXT_FAISS_ID],
            |row| row.get(0),
        )
        .optional()?;
    let stored = stored.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);

    let max: Option<i64> =
        conn.query_row("SELECT MAX(faiss_id) FROM vectors", [], |row| row.get(0))?;

    Ok(stored.max(max.map(|m| m as u64 + 1).unwrap_or(0)))
}

pub fn set_next_faiss_id(conn: &Connection, next: u64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![NEXT_FAISS_ID, next.to_string()],
    )?;
    Ok(())
}

pub fn insert_document(
    conn: &Connection,
    doc: &VectorDocument,
    faiss_id: u64,
    created_at: &str,
) -> rusqlite::Result<()> {
    let metadata = doc
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO vectors (id, asset_id, project_id, chunk_index, text, embedding, metadata, faiss_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            doc.id,
            doc.asset_id.to_string(),
            doc.project_id.to_string(),
            doc.chunk_index as i64,
            doc.text,
            embedding_to_blob(&doc.embedding),
            metadata,
            faiss_id as i64,
            created_at,
        ],
    )?;
    Ok(())
}

/// Delete rows with the given document ids, returning how many existed
pub fn delete_ids<'a>(
    conn: &Connection,
    ids: impl IntoIterator<Item = &'a str>,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached("DELETE FROM vectors WHERE id = ?1")?;
    let mut removed = 0;
    for id in ids {
        removed += stmt.execute(params![id])?;
    }
    Ok(removed)
}

pub fn delete_by_asset(conn: &Connection, asset_id: Uuid) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM vectors WHERE asset_id = ?1",
        params![asset_id.to_string()],
    )
}

pub fn delete_by_project(conn: &Connection, project_id: Uuid) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM vectors WHERE project_id = ?1",
        params![project_id.to_string()],
    )
}

pub fn delete_all(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM vectors", [])
}

pub fn count(conn: &Connection, project_id: Option<Uuid>) -> rusqlite::Result<usize> {
    let count: i64 = match project_id {
        Some(project_id) => conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE project_id = ?1",
            params![project_id.to_string()],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?,
    };
    Ok(count as usize)
}

/// All stored vectors in `faiss_id` order
pub fn load_vectors(conn: &Connection) -> rusqlite::Result<(Vec<u64>, Vec<Vec<f32>>)> {
    let mut stmt = conn.prepare("SELECT faiss_id, embedding FROM vectors ORDER BY faiss_id")?;
    let rows = stmt.query_map([], |row| {
        let faiss_id: i64 = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((faiss_id as u64, blob_to_embedding(&blob, 1)?))
    })?;

    let mut ids = Vec::new();
    let mut vectors = Vec::new();
    for row in rows {
        let (id, vector) = row?;
        ids.push(id);
        vectors.push(vector);
    }
    Ok((ids, vectors))
}

/// Documents for the given `faiss_id`s that fall within `scope`
pub fn fetch_by_faiss_ids(
    conn: &Connection,
    faiss_ids: &[u64],
    scope: &SearchScope,
) -> rusqlite::Result<AHashMap<u64, VectorDocument>> {
    if faiss_ids.is_empty() {
        return Ok(AHashMap::new());
    }

    let placeholders = vec!["?"; faiss_ids.len()].join(", ");
    let mut sql = format!(
        "SELECT {} FROM vectors WHERE faiss_id IN ({})",
        DOCUMENT_COLUMNS, placeholders
    );
    let mut values: Vec<Value> = faiss_ids
        .iter()
        .map(|&id| Value::Integer(id as i64))
        .collect();

    if let Some(project_id) = scope.project_id {
        sql.push_str(" AND project_id = ?");
        values.push(Value::Text(project_id.to_string()));
    }
    if let Some(asset_id) = scope.asset_id {
        sql.push_str(" AND asset_id = ?");
        values.push(Value::Text(asset_id.to_string()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), document_from_row)?;
    rows.collect()
}

/// BLAKE3 over the dimension and the ordered `faiss_id` list
pub fn fingerprint(conn: &Connection, dimension: usize) -> rusqlite::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(dimension as u64).to_le_bytes());

    let mut stmt = conn.prepare("SELECT faiss_id FROM vectors ORDER BY faiss_id")?;
    let ids = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    for id in ids {
        hasher.update(&(id? as u64).to_le_bytes());
    }

    Ok(hasher.finalize().to_hex().to_string())
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<(u64, VectorDocument)> {
    let metadata: Option<String> = row.get(6)?;
    let metadata = metadata
        .map(|json| serde_json::from_str::<DocumentMetadata>(&json))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let blob: Vec<u8> = row.get(5)?;
    let chunk_index: i64 = row.get(3)?;
    let faiss_id: i64 = row.get(7)?;

    Ok((
        faiss_id as u64,
        VectorDocument {
            id: row.get(0)?,
            asset_id: uuid_column(row, 1)?,
            project_id: uuid_column(row, 2)?,
            chunk_index: chunk_index as usize,
            text: row.get(4)?,
            embedding: blob_to_embedding(&blob, 5)?,
            metadata,
        },
    ))
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Little-endian f32 bytes
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8], idx: usize) -> rusqlite::Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("embedding blob of {} bytes is not a multiple of 4", blob.len()).into(),
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Chunk rows; faiss_id is the stable similarity-index id
    CREATE TABLE vectors (
        id TEXT PRIMARY KEY,
        asset_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        embedding BLOB NOT NULL,
        metadata TEXT,  -- JSON metadata
        faiss_id INTEGER NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );

    CREATE INDEX idx_vectors_asset ON vectors(asset_id);
    CREATE INDEX idx_vectors_project ON vectors(project_id);

    -- Store-level counters
    CREATE TABLE store_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, asset: Uuid, project: Uuid) -> VectorDocument {
        VectorDocument {
            id: id.to_string(),
            asset_id: asset,
            project_id: project,
            chunk_index: 0,
            text: format!("text for {}", id),
            embedding: vec![0.25, -1.5, 3.0],
            metadata: Some(DocumentMetadata {
                filename: Some("brief.md".to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::open(&db_path).unwrap();
        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);

        // reopening does not re-apply
        drop(conn);
        drop(db);
        let db = Database::open(&db_path).unwrap();
        let conn = db.get_conn().unwrap();
        let rows: i32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_unreadable_migration_version_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE _migrations (version TEXT, applied_at TEXT NOT NULL);
                 INSERT INTO _migrations VALUES ('not-a-version', datetime('now'));",
            )
            .unwrap();
        }

        let result = Database::open(&db_path);
        assert!(matches!(
            result,
            Err(VectorStoreError::Database { ref operation, .. }) if operation == "migrate"
        ));
    }

    #[test]
    fn test_pragmas_on_every_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("test.db")).unwrap();

        let first = db.get_conn().unwrap();
        let second = db.get_conn().unwrap();
        for conn in [&first, &second] {
            let timeout: i64 = conn
                .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
                .unwrap();
            assert_eq!(timeout, 5000);
        }
    }

    #[test]
    fn test_insert_fetch_and_faiss_ids() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("test.db")).unwrap();
        let conn = db.get_conn().unwrap();
        let (asset, project) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(next_faiss_id(&conn).unwrap(), 0);
        insert_document(&conn, &doc("a", asset, project), 0, "now").unwrap();
        insert_document(&conn, &doc("b", asset, project), 1, "now").unwrap();
        assert_eq!(next_faiss_id(&conn).unwrap(), 2);

        let docs = fetch_by_faiss_ids(&conn, &[0, 1, 7], &SearchScope::default()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[&1].id, "b");
        assert_eq!(docs[&0].embedding, vec![0.25, -1.5, 3.0]);
        assert_eq!(
            docs[&0].metadata.as_ref().unwrap().filename.as_deref(),
            Some("brief.md")
        );

        let scoped = fetch_by_faiss_ids(&conn, &[0, 1], &SearchScope::project(Uuid::new_v4()))
            .unwrap();
        assert!(scoped.is_empty());
    }

    #[test]
    fn test_high_water_mark_survives_delete() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("test.db")).unwrap();
        let conn = db.get_conn().unwrap();
        let (asset, project) = (Uuid::new_v4(), Uuid::new_v4());

        insert_document(&conn, &doc("a", asset, project), 0, "now").unwrap();
        insert_document(&conn, &doc("b", asset, project), 1, "now").unwrap();
        set_next_faiss_id(&conn, 2).unwrap();

        assert_eq!(delete_ids(&conn, ["b"]).unwrap(), 1);
        assert_eq!(next_faiss_id(&conn).unwrap(), 2);

        delete_all(&conn).unwrap();
        assert_eq!(next_faiss_id(&conn).unwrap(), 2);
    }

    #[test]
    fn test_scoped_deletes_and_count() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("test.db")).unwrap();
        let conn = db.get_conn().unwrap();
        let (a1, a2, p1, p2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        insert_document(&conn, &doc("x", a1, p1), 0, "now").unwrap();
        insert_document(&conn, &doc("y", a2, p1), 1, "now").unwrap();
        insert_document(&conn, &doc("z", Uuid::new_v4(), p2), 2, "now").unwrap();

        assert_eq!(count(&conn, None).unwrap(), 3);
        assert_eq!(count(&conn, Some(p1)).unwrap(), 2);
        assert_eq!(delete_by_asset(&conn, a1).unwrap(), 1);
        assert_eq!(delete_by_project(&conn, p1).unwrap(), 1);
        assert_eq!(delete_by_project(&conn, p1).unwrap(), 0);
        assert_eq!(count(&conn, None).unwrap(), 1);
    }

    #[test]
    fn test_fingerprint_tracks_ids() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("test.db")).unwrap();
        let conn = db.get_conn().unwrap();
        let (asset, project) = (Uuid::new_v4(), Uuid::new_v4());

        let empty = fingerprint(&conn, 3).unwrap();
        insert_document(&conn, &doc("a", asset, project), 0, "now").unwrap();
        let one = fingerprint(&conn, 3).unwrap();

        assert_ne!(empty, one);
        assert_ne!(one, fingerprint(&conn, 4).unwrap());
        assert_eq!(one, fingerprint(&conn, 3).unwrap());
    }

    #[test]
    fn test_load_vectors_ordered() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("test.db")).unwrap();
        let conn = db.get_conn().unwrap();
        let (asset, project) = (Uuid::new_v4(), Uuid::new_v4());

        insert_document(&conn, &doc("b", asset, project), 9, "now").unwrap();
        insert_document(&conn, &doc("a", asset, project), 4, "now").unwrap();

        let (ids, vectors) = load_vectors(&conn).unwrap();
        assert_eq!(ids, vec![4, 9]);
        assert_eq!(vectors.len(), 2);
    }
}
