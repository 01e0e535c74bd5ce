//! Versioned schema migrations.
//!
//! A hard-coded ordered list; the `schema_migrations` table records what
//! has been applied. Each migration runs in its own transaction, and every
//! statement carries an `IF NOT EXISTS` guard so re-opening a database is
//! idempotent even against a half-recorded history.

use rusqlite::{params, Connection};

use crate::{now_ts, Result};

/// One versioned DDL step.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial",
    sql: r#"
CREATE TABLE IF NOT EXISTS clients (
    client_id    TEXT PRIMARY KEY,
    created_at   TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS threads (
    thread_id          TEXT PRIMARY KEY,
    client_id          TEXT NOT NULL REFERENCES clients(client_id),
    agent_id           TEXT NOT NULL,
    cwd                TEXT NOT NULL,
    title              TEXT NOT NULL DEFAULT '',
    agent_options_json TEXT NOT NULL DEFAULT '{}',
    summary            TEXT NOT NULL DEFAULT '',
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_threads_client ON threads(client_id);

CREATE TABLE IF NOT EXISTS turns (
    turn_id       TEXT PRIMARY KEY,
    thread_id     TEXT NOT NULL REFERENCES threads(thread_id),
    request_text  TEXT NOT NULL,
    response_text TEXT NOT NULL DEFAULT '',
    is_internal   INTEGER NOT NULL DEFAULT 0,
    status        TEXT NOT NULL,
    stop_reason   TEXT NOT NULL DEFAULT '',
    error_message TEXT NOT NULL DEFAULT '',
    created_at    TEXT NOT NULL,
    completed_at  TEXT
);
CREATE INDEX IF NOT EXISTS idx_turns_thread_created ON turns(thread_id, created_at);

CREATE TABLE IF NOT EXISTS events (
    event_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    turn_id    TEXT NOT NULL REFERENCES turns(turn_id),
    seq        INTEGER NOT NULL,
    type       TEXT NOT NULL,
    data_json  TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_turn_seq ON events(turn_id, seq);
"#,
}];

/// Apply all pending migrations.
pub fn run(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    for migration in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            params![migration.version],
            |row| row.get(0),
        )?;
        if applied {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_ts()],
        )?;
        tx.commit()?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
    }

    Ok(())
}
