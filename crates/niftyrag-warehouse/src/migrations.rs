use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_market_snapshot",
        sql: r#"
CREATE TABLE IF NOT EXISTS market_stats (
    symbol TEXT NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    ltp DOUBLE NOT NULL,
    change_percent DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    as_of DATE NOT NULL,
    origin TEXT NOT NULL,
    inserted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS ingestion_logs (
    run_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    item_count BIGINT NOT NULL,
    strategy TEXT,
    errors TEXT NOT NULL,
    started_at TIMESTAMP NOT NULL,
    finished_at TIMESTAMP NOT NULL
);
"#,
    },
    Migration {
        version: "0002_document_chunks",
        sql: r#"
CREATE TABLE IF NOT EXISTS document_chunks (
    dedup_key TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    source TEXT NOT NULL,
    record_type TEXT NOT NULL,
    label TEXT NOT NULL,
    embedding TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0003_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_market_stats_change ON market_stats(change_percent);
CREATE INDEX IF NOT EXISTS idx_ingestion_logs_started ON ingestion_logs(started_at);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied == 0 {
            tracing::info!(version = migration.version, "applying warehouse migration");
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(versions)
}
