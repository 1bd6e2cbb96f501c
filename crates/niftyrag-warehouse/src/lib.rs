//! # niftyrag warehouse
//!
//! DuckDB-backed persistence for the niftyrag ingestion pipeline.
//!
//! ## Tables
//!
//! | Table | Semantics |
//! |-------|-----------|
//! | `market_stats` | Latest market snapshot; fully replaced on every run |
//! | `document_chunks` | Semantic chunks keyed by a dedup key; never pruned |
//! | `ingestion_logs` | One audit row per pipeline run; append-only |
//! | `schema_migrations` | Applied migration versions |
//!
//! ## Example
//!
//! ```rust,no_run
//! use niftyrag_warehouse::{Warehouse, WarehouseConfig};
//!
//! let warehouse = Warehouse::open(WarehouseConfig::default())?;
//! let rows = warehouse.market_stats()?;
//! println!("{} instruments in the latest snapshot", rows.len());
//! # Ok::<(), niftyrag_warehouse::WarehouseError>(())
//! ```

pub mod migrations;
pub mod pool;
pub mod semantic;

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{Connection, ToSql};
use serde::Serialize;
use serde_json::{Number, Value};
use thiserror::Error;

pub use pool::{AccessMode, ConnectionPool, PooledConnection};
pub use semantic::{cosine_similarity, fingerprint, Embedder, HashingEmbedder};

/// Errors raised by warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode column value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },
}

/// Location and sizing of the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for niftyrag state.
    pub home: PathBuf,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
    /// Width of chunk embeddings. Changing it orphans existing embeddings.
    pub embedding_dimensions: usize,
}

impl WarehouseConfig {
    pub fn for_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            db_path: home.join("warehouse.duckdb"),
            home,
            max_pool_size: 4,
            embedding_dimensions: HashingEmbedder::DEFAULT_DIMENSIONS,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::for_home(resolve_home())
    }
}

/// Limits applied to ad-hoc audit queries.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 1_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

/// One row of the latest market snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketStatRow {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub ltp: f64,
    pub change_percent: f64,
    pub volume: u64,
    /// `YYYY-MM-DD`.
    pub as_of: String,
    /// Which acquisition path produced the row.
    pub origin: String,
}

/// A semantic chunk as stored (embedding omitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRow {
    pub dedup_key: String,
    pub content: String,
    pub source: String,
    pub record_type: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: ChunkRow,
    pub score: f32,
}

/// Outcome of a chunk upsert: new keys versus rewritten keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkUpsertReport {
    pub added: usize,
    pub replaced: usize,
}

/// Audit row for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionLogRow {
    pub run_id: String,
    pub status: String,
    pub item_count: u64,
    pub strategy: Option<String>,
    pub errors: Vec<String>,
    pub started_at: String,
    pub finished_at: String,
}

/// Handle to the niftyrag DuckDB database.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
    embedder: Arc<dyn Embedder>,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        let embedder = Arc::new(HashingEmbedder::new(config.embedding_dimensions));
        Self::open_with_embedder(config, embedder)
    }

    /// Open with a caller-supplied embedder.
    pub fn open_with_embedder(
        config: WarehouseConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self {
            config,
            pool,
            embedder,
        };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// A raw pooled connection, for maintenance outside the typed API.
    pub fn connection(&self, mode: AccessMode) -> Result<PooledConnection, WarehouseError> {
        Ok(self.pool.acquire(mode)?)
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn home(&self) -> &Path {
        &self.config.home
    }

    pub fn schema_versions(&self) -> Result<Vec<String>, WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadOnly)?;
        Ok(migrations::applied_versions(&connection)?)
    }

    /// Delete every snapshot row and insert `rows`, in one transaction.
    ///
    /// Readers observe either the previous snapshot or the new one.
    pub fn replace_market_stats(&self, rows: &[MarketStatRow]) -> Result<usize, WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let removed = connection.execute("DELETE FROM market_stats", [])?;
            tracing::debug!(removed, "cleared previous market snapshot");

            for row in rows {
                let volume = i64::try_from(row.volume).unwrap_or(i64::MAX);
                let params: [&dyn ToSql; 9] = [
                    &row.symbol,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.ltp,
                    &row.change_percent,
                    &volume,
                    &row.as_of,
                    &row.origin,
                ];
                connection.execute(
                    "INSERT INTO market_stats \
                     (symbol, open, high, low, ltp, change_percent, volume, as_of, origin) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, CAST(? AS DATE), ?)",
                    params.as_slice(),
                )?;
            }
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    pub fn market_stats(&self) -> Result<Vec<MarketStatRow>, WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT symbol, open, high, low, ltp, change_percent, volume, \
             CAST(as_of AS VARCHAR), origin FROM market_stats ORDER BY symbol",
        )?;
        let rows = statement
            .query_map([], |row| {
                let volume: i64 = row.get(6)?;
                Ok(MarketStatRow {
                    symbol: row.get(0)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    ltp: row.get(4)?,
                    change_percent: row.get(5)?,
                    volume: u64::try_from(volume).unwrap_or(0),
                    as_of: row.get(7)?,
                    origin: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn market_stat_count(&self) -> Result<usize, WarehouseError> {
        self.count_rows("SELECT COUNT(*) FROM market_stats")
    }

    /// Insert chunks, replacing the content of keys that already exist.
    ///
    /// Duplicate keys within `rows` collapse to the last occurrence.
    pub fn upsert_chunks(&self, rows: &[ChunkRow]) -> Result<ChunkUpsertReport, WarehouseError> {
        let rows = collapse_duplicate_keys(rows);
        if rows.is_empty() {
            return Ok(ChunkUpsertReport::default());
        }

        let connection = self.pool.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<ChunkUpsertReport, WarehouseError> {
            let mut report = ChunkUpsertReport::default();
            for row in rows {
                let existing: i64 = connection.query_row(
                    "SELECT COUNT(*) FROM document_chunks WHERE dedup_key = ?",
                    [&row.dedup_key],
                    |r| r.get(0),
                )?;
                let embedding = serde_json::to_string(&self.embedder.embed(&row.content))?;

                if existing == 0 {
                    let params: [&dyn ToSql; 6] = [
                        &row.dedup_key,
                        &row.content,
                        &row.source,
                        &row.record_type,
                        &row.label,
                        &embedding,
                    ];
                    connection.execute(
                        "INSERT INTO document_chunks \
                         (dedup_key, content, source, record_type, label, embedding) \
                         VALUES (?, ?, ?, ?, ?, ?)",
                        params.as_slice(),
                    )?;
                    report.added += 1;
                } else {
                    let params: [&dyn ToSql; 6] = [
                        &row.content,
                        &row.source,
                        &row.record_type,
                        &row.label,
                        &embedding,
                        &row.dedup_key,
                    ];
                    connection.execute(
                        "UPDATE document_chunks SET content = ?, source = ?, record_type = ?, \
                         label = ?, embedding = ?, created_at = CURRENT_TIMESTAMP \
                         WHERE dedup_key = ?",
                        params.as_slice(),
                    )?;
                    report.replaced += 1;
                }
            }
            Ok(report)
        })();

        finalize_transaction(&connection, result)
    }

    pub fn chunk_count(&self) -> Result<usize, WarehouseError> {
        self.count_rows("SELECT COUNT(*) FROM document_chunks")
    }

    /// Rank stored chunks by cosine similarity to `query`.
    pub fn search_chunks(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, WarehouseError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let needle = self.embedder.embed(query);

        let connection = self.pool.acquire(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT dedup_key, content, source, record_type, label, embedding FROM document_chunks",
        )?;
        let stored = statement
            .query_map([], |row| {
                Ok((
                    ChunkRow {
                        dedup_key: row.get(0)?,
                        content: row.get(1)?,
                        source: row.get(2)?,
                        record_type: row.get(3)?,
                        label: row.get(4)?,
                    },
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut scored = Vec::with_capacity(stored.len());
        for (chunk, embedding) in stored {
            let vector: Vec<f32> = match serde_json::from_str(&embedding) {
                Ok(vector) => vector,
                Err(error) => {
                    tracing::warn!(
                        key = %chunk.dedup_key,
                        %error,
                        "skipping chunk with corrupt embedding"
                    );
                    continue;
                }
            };
            let score = cosine_similarity(&needle, &vector);
            scored.push(ScoredChunk { chunk, score });
        }

        scored.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk.dedup_key.cmp(&right.chunk.dedup_key))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn append_ingestion_log(&self, row: &IngestionLogRow) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadWrite)?;
        let errors = serde_json::to_string(&row.errors)?;
        let item_count = i64::try_from(row.item_count).unwrap_or(i64::MAX);
        let params: [&dyn ToSql; 7] = [
            &row.run_id,
            &row.status,
            &item_count,
            &row.strategy,
            &errors,
            &row.started_at,
            &row.finished_at,
        ];
        connection.execute(
            "INSERT INTO ingestion_logs \
             (run_id, status, item_count, strategy, errors, started_at, finished_at) \
             VALUES (?, ?, ?, ?, ?, \
             COALESCE(TRY_CAST(? AS TIMESTAMP), CURRENT_TIMESTAMP), \
             COALESCE(TRY_CAST(? AS TIMESTAMP), CURRENT_TIMESTAMP))",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn ingestion_logs(&self, limit: usize) -> Result<Vec<IngestionLogRow>, WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadOnly)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut statement = connection.prepare(
            "SELECT run_id, status, item_count, strategy, errors, \
             CAST(started_at AS VARCHAR), CAST(finished_at AS VARCHAR) \
             FROM ingestion_logs ORDER BY started_at DESC, run_id LIMIT ?",
        )?;
        let raw = statement
            .query_map([limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(
                |(run_id, status, item_count, strategy, errors, started_at, finished_at)| {
                    Ok::<_, WarehouseError>(IngestionLogRow {
                        run_id,
                        status,
                        item_count: u64::try_from(item_count).unwrap_or(0),
                        strategy,
                        errors: serde_json::from_str(&errors)?,
                        started_at,
                        finished_at,
                    })
                },
            )
            .collect()
    }

    /// Run a read-only audit query (SELECT/WITH/DESCRIBE/SHOW/EXPLAIN only).
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
    ) -> Result<QueryResult, WarehouseError> {
        if guardrails.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "max rows must be greater than zero",
            )));
        }
        let sql = enforce_read_only(sql)?;
        let connection = self.pool.acquire(AccessMode::ReadOnly)?;
        // Anything the statement manages to change is discarded.
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = run_select(&connection, sql, guardrails);
        let rolled_back = connection.execute_batch("ROLLBACK");
        let result = result?;
        rolled_back?;
        Ok(result)
    }

    fn count_rows(&self, sql: &str) -> Result<usize, WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadOnly)?;
        let count: i64 = connection.query_row(sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn collapse_duplicate_keys(rows: &[ChunkRow]) -> Vec<&ChunkRow> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut output: Vec<&ChunkRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match positions.get(row.dedup_key.as_str()) {
            Some(&index) => output[index] = row,
            None => {
                positions.insert(row.dedup_key.as_str(), output.len());
                output.push(row);
            }
        }
    }
    output
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn run_select(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
) -> Result<QueryResult, WarehouseError> {
    let started = Instant::now();
    let mut statement = connection.prepare(sql)?;
    // Column metadata is only populated once the statement has run.
    let _ = statement.query([] as [&dyn ToSql; 0])?;
    let width = statement.column_count();
    let columns = (0..width)
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map(ToString::to_string)
                .unwrap_or_default(),
            r#type: statement.column_type(index).to_string(),
        })
        .collect();

    let mut cursor = statement.query([] as [&dyn ToSql; 0])?;
    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = cursor.next()? {
        check_deadline(started, guardrails.timeout())?;
        if rows.len() >= guardrails.max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            let value: DuckValue = row.get(index)?;
            values.push(to_json_value(value));
        }
        rows.push(values);
    }

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::from(value),
        DuckValue::SmallInt(value) => Value::from(value),
        DuckValue::Int(value) => Value::from(value),
        DuckValue::BigInt(value) => Value::from(value),
        DuckValue::UTinyInt(value) => Value::from(value),
        DuckValue::USmallInt(value) => Value::from(value),
        DuckValue::UInt(value) => Value::from(value),
        DuckValue::UBigInt(value) => Value::from(value),
        DuckValue::Float(value) => finite_number(f64::from(value)),
        DuckValue::Double(value) => finite_number(value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        other => Value::String(format!("{other:?}")),
    }
}

fn finite_number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "COPY", "ATTACH", "DETACH",
    "TRUNCATE", "MERGE", "EXPORT", "IMPORT", "INSTALL", "LOAD", "PRAGMA", "SET", "CHECKPOINT",
    "VACUUM",
];

fn enforce_read_only(sql: &str) -> Result<&str, WarehouseError> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "query must not be empty",
        )));
    }

    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if !matches!(
        keyword.as_str(),
        "SELECT" | "WITH" | "EXPLAIN" | "SHOW" | "DESCRIBE"
    ) {
        return Err(WarehouseError::QueryRejected(format!(
            "only read-only queries are accepted, got '{keyword}'"
        )));
    }
    if sql.split(';').filter(|part| !part.trim().is_empty()).count() > 1 {
        return Err(WarehouseError::QueryRejected(String::from(
            "multiple statements are not allowed",
        )));
    }

    let tokens: Vec<String> = sql
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_uppercase)
        .collect();
    if keyword == "EXPLAIN" && tokens.get(1).map(String::as_str) == Some("ANALYZE") {
        return Err(WarehouseError::QueryRejected(String::from(
            "EXPLAIN ANALYZE executes its statement and is not allowed",
        )));
    }
    if let Some(token) = tokens
        .iter()
        .find(|token| WRITE_KEYWORDS.contains(&token.as_str()))
    {
        return Err(WarehouseError::QueryRejected(format!(
            "statement contains the write keyword '{token}'"
        )));
    }
    Ok(sql)
}

fn check_deadline(started: Instant, timeout: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > timeout {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        });
    }
    Ok(())
}

/// `NIFTYRAG_HOME`, else `$HOME/.niftyrag`, else `./.niftyrag`.
pub fn resolve_home() -> PathBuf {
    if let Some(path) = env::var_os("NIFTYRAG_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".niftyrag");
    }

    PathBuf::from(".niftyrag")
}
