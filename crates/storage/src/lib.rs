//! SQLite-backed repository for clients, threads, turns, and the
//! append-only event log.
//!
//! A single connection (WAL mode, 5 s busy timeout, foreign keys on) sits
//! behind a mutex, so SQL-level access is serialized; callers from any
//! number of request tasks may share one [`Storage`]. Timestamps are
//! stored as RFC-3339 UTC strings with nanosecond precision; booleans as
//! 0/1 integers.

pub mod migrations;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use hub_domain::turn::{EventType, TurnStatus, TurnStopReason};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Repository errors. `NotFound` is typed so the HTTP layer can map it to
/// 404 while everything else stays a 500.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub client_id: String,
    pub agent_id: String,
    pub cwd: String,
    pub title: String,
    /// Opaque JSON object, `"{}"` when the client sent none.
    pub agent_options_json: String,
    /// Rolling compacted summary; empty until the first compact.
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub turn_id: String,
    pub thread_id: String,
    /// The injected prompt actually sent to the provider.
    pub request_text: String,
    pub response_text: String,
    pub is_internal: bool,
    pub status: String,
    pub stop_reason: String,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event_id: i64,
    pub turn_id: String,
    /// 1-based, contiguous per turn.
    pub seq: i64,
    pub event_type: String,
    pub data_json: String,
    pub created_at: DateTime<Utc>,
}

// ── write parameters ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CreateThreadParams {
    pub thread_id: String,
    pub client_id: String,
    pub agent_id: String,
    pub cwd: String,
    pub title: String,
    pub agent_options_json: String,
}

#[derive(Debug, Clone)]
pub struct CreateTurnParams {
    pub turn_id: String,
    pub thread_id: String,
    pub request_text: String,
    pub is_internal: bool,
}

#[derive(Debug, Clone)]
pub struct FinalizeTurnParams {
    pub turn_id: String,
    pub response_text: String,
    pub status: TurnStatus,
    pub stop_reason: TurnStopReason,
    pub error_message: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The durable repository. One open connection, serialized by a mutex.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open (or create) the database at `path`, apply pragmas and run all
    /// pending migrations. The parent directory is auto-created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&mut conn)?;

        tracing::info!(path = %path.display(), "storage ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── clients ─────────────────────────────────────────────────────

    /// Idempotent heartbeat: insert the client or bump `last_seen_at`.
    pub fn upsert_client(&self, client_id: &str) -> Result<()> {
        let now = now_ts();
        self.conn.lock().execute(
            "INSERT INTO clients (client_id, created_at, last_seen_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(client_id) DO UPDATE SET last_seen_at = excluded.last_seen_at",
            params![client_id, now],
        )?;
        Ok(())
    }

    pub fn get_client(&self, client_id: &str) -> Result<ClientRecord> {
        self.conn
            .lock()
            .query_row(
                "SELECT client_id, created_at, last_seen_at FROM clients WHERE client_id = ?1",
                params![client_id],
                map_client,
            )
            .optional()?
            .ok_or(StorageError::NotFound("client"))
    }

    // ── threads ─────────────────────────────────────────────────────

    pub fn create_thread(&self, p: &CreateThreadParams) -> Result<ThreadRecord> {
        let now = now_ts();
        self.conn.lock().execute(
            "INSERT INTO threads
                 (thread_id, client_id, agent_id, cwd, title, agent_options_json, summary,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', ?7, ?7)",
            params![
                p.thread_id,
                p.client_id,
                p.agent_id,
                p.cwd,
                p.title,
                p.agent_options_json,
                now
            ],
        )?;
        self.get_thread(&p.thread_id)
    }

    pub fn get_thread(&self, thread_id: &str) -> Result<ThreadRecord> {
        self.conn
            .lock()
            .query_row(
                &format!("{THREAD_SELECT} WHERE thread_id = ?1"),
                params![thread_id],
                map_thread,
            )
            .optional()?
            .ok_or(StorageError::NotFound("thread"))
    }

    pub fn list_threads_by_client(&self, client_id: &str) -> Result<Vec<ThreadRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{THREAD_SELECT} WHERE client_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![client_id], map_thread)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Overwrite the rolling summary and bump `updated_at`.
    pub fn update_thread_summary(&self, thread_id: &str, summary: &str) -> Result<()> {
        let affected = self.conn.lock().execute(
            "UPDATE threads SET summary = ?2, updated_at = ?3 WHERE thread_id = ?1",
            params![thread_id, summary, now_ts()],
        )?;
        if affected == 0 {
            return Err(StorageError::NotFound("thread"));
        }
        Ok(())
    }

    // ── turns ───────────────────────────────────────────────────────

    /// Create a turn in `running` status with an empty response.
    pub fn create_turn(&self, p: &CreateTurnParams) -> Result<TurnRecord> {
        self.conn.lock().execute(
            "INSERT INTO turns
                 (turn_id, thread_id, request_text, response_text, is_internal,
                  status, stop_reason, error_message, created_at, completed_at)
             VALUES (?1, ?2, ?3, '', ?4, ?5, '', '', ?6, NULL)",
            params![
                p.turn_id,
                p.thread_id,
                p.request_text,
                p.is_internal as i64,
                TurnStatus::Running.as_str(),
                now_ts()
            ],
        )?;
        self.get_turn(&p.turn_id)
    }

    pub fn get_turn(&self, turn_id: &str) -> Result<TurnRecord> {
        self.conn
            .lock()
            .query_row(
                &format!("{TURN_SELECT} WHERE turn_id = ?1"),
                params![turn_id],
                map_turn,
            )
            .optional()?
            .ok_or(StorageError::NotFound("turn"))
    }

    /// List a thread's turns in creation order. `include_internal = false`
    /// omits compact/system turns.
    pub fn list_turns_by_thread(
        &self,
        thread_id: &str,
        include_internal: bool,
    ) -> Result<Vec<TurnRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{TURN_SELECT} WHERE thread_id = ?1 AND (?2 OR is_internal = 0)
             ORDER BY created_at ASC, turn_id ASC"
        ))?;
        let rows = stmt.query_map(params![thread_id, include_internal], map_turn)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Write the terminal fields of a turn and stamp `completed_at`.
    pub fn finalize_turn(&self, p: &FinalizeTurnParams) -> Result<()> {
        let affected = self.conn.lock().execute(
            "UPDATE turns
             SET response_text = ?2, status = ?3, stop_reason = ?4, error_message = ?5,
                 completed_at = ?6
             WHERE turn_id = ?1",
            params![
                p.turn_id,
                p.response_text,
                p.status.as_str(),
                p.stop_reason.as_str(),
                p.error_message,
                now_ts()
            ],
        )?;
        if affected == 0 {
            return Err(StorageError::NotFound("turn"));
        }
        Ok(())
    }

    // ── events ──────────────────────────────────────────────────────

    /// Append an event with the next per-turn sequence number.
    ///
    /// Runs in a transaction that reads `MAX(seq)` for the turn before
    /// inserting `seq + 1`; the unique `(turn_id, seq)` index doubles as an
    /// integrity check. Blank `data_json` is stored as `{}`.
    pub fn append_event(
        &self,
        turn_id: &str,
        event_type: EventType,
        data_json: &str,
    ) -> Result<EventRecord> {
        let data = if data_json.trim().is_empty() {
            "{}"
        } else {
            data_json
        };
        let now = now_ts();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE turn_id = ?1",
            params![turn_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO events (turn_id, seq, type, data_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![turn_id, seq, event_type.as_str(), data, now],
        )?;
        let event_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(EventRecord {
            event_id,
            turn_id: turn_id.to_owned(),
            seq,
            event_type: event_type.as_str().to_owned(),
            data_json: data.to_owned(),
            created_at: Utc::now(),
        })
    }

    pub fn list_events_by_turn(&self, turn_id: &str) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, turn_id, seq, type, data_json, created_at
             FROM events WHERE turn_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![turn_id], map_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping + time helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const THREAD_SELECT: &str = "SELECT thread_id, client_id, agent_id, cwd, title, \
     agent_options_json, summary, created_at, updated_at FROM threads";

const TURN_SELECT: &str = "SELECT turn_id, thread_id, request_text, response_text, \
     is_internal, status, stop_reason, error_message, created_at, completed_at FROM turns";

pub(crate) fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn col_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn col_ts_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => col_ts_parse(&s, idx).map(Some),
    }
}

fn col_ts_parse(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn map_client(row: &Row<'_>) -> rusqlite::Result<ClientRecord> {
    Ok(ClientRecord {
        client_id: row.get(0)?,
        created_at: col_ts(row, 1)?,
        last_seen_at: col_ts(row, 2)?,
    })
}

fn map_thread(row: &Row<'_>) -> rusqlite::Result<ThreadRecord> {
    Ok(ThreadRecord {
        thread_id: row.get(0)?,
        client_id: row.get(1)?,
        agent_id: row.get(2)?,
        cwd: row.get(3)?,
        title: row.get(4)?,
        agent_options_json: row.get(5)?,
        summary: row.get(6)?,
        created_at: col_ts(row, 7)?,
        updated_at: col_ts(row, 8)?,
    })
}

fn map_turn(row: &Row<'_>) -> rusqlite::Result<TurnRecord> {
    Ok(TurnRecord {
        turn_id: row.get(0)?,
        thread_id: row.get(1)?,
        request_text: row.get(2)?,
        response_text: row.get(3)?,
        is_internal: row.get::<_, i64>(4)? != 0,
        status: row.get(5)?,
        stop_reason: row.get(6)?,
        error_message: row.get(7)?,
        created_at: col_ts(row, 8)?,
        completed_at: col_ts_opt(row, 9)?,
    })
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        event_id: row.get(0)?,
        turn_id: row.get(1)?,
        seq: row.get(2)?,
        event_type: row.get(3)?,
        data_json: row.get(4)?,
        created_at: col_ts(row, 5)?,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
