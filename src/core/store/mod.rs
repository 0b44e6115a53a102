use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::error::{SmithError, SmithResult};
use crate::core::models::{EndpointInfo, EndpointMeta, EndpointRecord};

/// Write failures the registry needs to tell apart: an id collision is
/// retried with a fresh suffix, anything else with backoff.
#[derive(Debug)]
pub enum StoreWriteError {
    Conflict,
    Failure(String),
}

/// SQLite-backed persistence for endpoint rows. Owns the sole database
/// handle; all access funnels through the connection mutex.
#[derive(Clone)]
pub struct DataStore {
    db: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl DataStore {
    /// Open (or create) the database file and ensure the schema exists.
    /// Opening an existing file restores all previously created endpoints.
    pub async fn open<P: AsRef<Path>>(path: P) -> SmithResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SmithError::Internal(format!("cannot create data dir: {e}")))?;
            }
        }

        let db = Connection::open(&path)?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS endpoints (
                endpoint_id TEXT PRIMARY KEY,
                json_data TEXT NOT NULL,
                description TEXT,
                source_urls TEXT,
                records_count INTEGER,
                fields TEXT,
                parsing_timestamp TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_endpoints_created_at ON endpoints(created_at)",
            [],
        )?;

        info!(path = %path.display(), "endpoint store ready");
        Ok(DataStore {
            db: Arc::new(Mutex::new(db)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert one endpoint row. The insert is a single transaction: it is
    /// either fully committed or not visible at all.
    pub async fn insert(&self, record: &EndpointRecord) -> Result<(), StoreWriteError> {
        let json_data = serde_json::to_string(&record.json_data)
            .map_err(|e| StoreWriteError::Failure(format!("cannot serialize data: {e}")))?;
        let source_urls = serde_json::to_string(&record.meta.source_urls)
            .map_err(|e| StoreWriteError::Failure(format!("cannot serialize urls: {e}")))?;
        let fields = serde_json::to_string(&record.meta.fields)
            .map_err(|e| StoreWriteError::Failure(format!("cannot serialize fields: {e}")))?;

        let db = self.db.lock().await;
        let result = db.execute(
            "INSERT INTO endpoints (
                endpoint_id, json_data, description, source_urls,
                records_count, fields, parsing_timestamp, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.endpoint_id,
                json_data,
                record.meta.description,
                source_urls,
                record.meta.records_count as i64,
                fields,
                record.meta.parsing_timestamp.to_rfc3339(),
                record.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreWriteError::Conflict)
            }
            Err(e) => Err(StoreWriteError::Failure(e.to_string())),
        }
    }

    pub async fn get(&self, endpoint_id: &str) -> SmithResult<Option<EndpointRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT endpoint_id, json_data, description, source_urls,
                    records_count, fields, parsing_timestamp, created_at
             FROM endpoints WHERE endpoint_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![endpoint_id], row_to_raw)?;

        match rows.next() {
            Some(raw) => Ok(Some(raw_to_record(raw?)?)),
            None => Ok(None),
        }
    }

    /// Summaries of every endpoint, newest first. Access URLs are filled in
    /// by the registry.
    pub async fn list(&self) -> SmithResult<Vec<EndpointInfo>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT endpoint_id, description, records_count, created_at
             FROM endpoints ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut endpoints = Vec::new();
        for row in rows {
            let (endpoint_id, description, records_count, created_at) = row?;
            endpoints.push(EndpointInfo {
                endpoint_id,
                access_url: String::new(),
                description: description.unwrap_or_default(),
                created_at: parse_timestamp(&created_at)?,
                records_count: records_count.unwrap_or(0).max(0) as usize,
            });
        }
        Ok(endpoints)
    }

    /// True iff a row was removed.
    pub async fn delete(&self, endpoint_id: &str) -> SmithResult<bool> {
        let db = self.db.lock().await;
        let removed = db.execute(
            "DELETE FROM endpoints WHERE endpoint_id = ?1",
            params![endpoint_id],
        )?;
        Ok(removed > 0)
    }
}

type RawRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn raw_to_record(raw: RawRow) -> SmithResult<EndpointRecord> {
    let (endpoint_id, json_data, description, source_urls, records_count, fields, parsing_ts, created_at) =
        raw;

    let json_data: Value = serde_json::from_str(&json_data)
        .map_err(|e| SmithError::Internal(format!("corrupt json_data for {endpoint_id}: {e}")))?;
    let source_urls: Vec<String> = source_urls
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| SmithError::Internal(format!("corrupt source_urls for {endpoint_id}: {e}")))?
        .unwrap_or_default();
    let fields: Vec<String> = fields
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| SmithError::Internal(format!("corrupt fields for {endpoint_id}: {e}")))?
        .unwrap_or_default();

    let parsing_timestamp = match parsing_ts {
        Some(ts) => parse_timestamp(&ts)?,
        None => parse_timestamp(&created_at)?,
    };

    Ok(EndpointRecord {
        endpoint_id,
        json_data,
        meta: EndpointMeta {
            description: description.unwrap_or_default(),
            source_urls,
            records_count: records_count.unwrap_or(0).max(0) as usize,
            fields,
            parsing_timestamp,
        },
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_timestamp(raw: &str) -> SmithResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SmithError::Internal(format!("corrupt timestamp {raw:?}: {e}")))
}
