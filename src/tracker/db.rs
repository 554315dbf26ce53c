use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};

use crate::errors::TrackerError;

use super::events::EventPayload;
use super::lifecycle;
use super::models::*;

/// Async-safe handle to the tracker database.
///
/// Wraps `TrackerDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TrackerDb>>,
}

impl DbHandle {
    pub fn new(db: TrackerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TrackerDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, TrackerDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Current time as RFC 3339 UTC with millisecond precision.
///
/// Event ordering relies on these strings sorting lexically.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct TrackerDb {
    conn: Connection,
}

impl TrackerDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS issues (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    type TEXT NOT NULL DEFAULT 'BUG'
                        CHECK (type IN ('BUG', 'STORY', 'TASK')),
                    state TEXT NOT NULL DEFAULT 'New'
                        CHECK (state IN ('New', 'Active', 'Resolved', 'Closed', 'Removed')),
                    created_by TEXT NOT NULL DEFAULT 'system',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    issue_id INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
                    type TEXT NOT NULL,
                    actor TEXT NOT NULL DEFAULT 'system',
                    payload_json TEXT NOT NULL DEFAULT '{}',
                    ts TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_issues_state ON issues(state);
                CREATE INDEX IF NOT EXISTS idx_issues_created ON issues(created_at);
                CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id);
                CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
                CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migration: description arrived after the first schema.
        // Only "duplicate column" is tolerated.
        match self.conn.execute(
            "ALTER TABLE issues ADD COLUMN description TEXT NOT NULL DEFAULT ''",
            [],
        ) {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add description column: {}", e)),
        }

        Ok(())
    }

    // ── Issue CRUD ────────────────────────────────────────────────────

    /// Insert an issue and its `IssueCreated` event in one transaction.
    pub fn create_issue(&self, new: &NewIssue) -> Result<(Issue, Event)> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(TrackerError::BadRequest("title must not be empty".into()).into());
        }
        let created_by = if new.created_by.is_empty() {
            "system"
        } else {
            new.created_by.as_str()
        };
        let ts = now_ts();

        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO issues (title, type, state, description, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                title,
                new.issue_type.as_str(),
                IssueState::New.as_str(),
                new.description,
                created_by,
                ts
            ],
        )
        .context("Failed to insert issue")?;
        let id = tx.last_insert_rowid();
        let event = insert_event(
            &tx,
            id,
            created_by,
            &EventPayload::IssueCreated {
                title: title.to_string(),
                issue_type: new.issue_type,
            },
        )?;
        let issue = fetch_issue(&tx, id)?.context("Issue not found after insert")?;
        tx.commit().context("Failed to commit issue insert")?;
        Ok((issue, event))
    }

    pub fn list_issues(&self) -> Result<Vec<Issue>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, type, state, description, created_by, created_at, updated_at
                 FROM issues ORDER BY created_at DESC, id DESC",
            )
            .context("Failed to prepare list_issues")?;
        let rows = stmt
            .query_map([], IssueRow::read)
            .context("Failed to query issues")?;
        let mut issues = Vec::new();
        for row in rows {
            let r = row.context("Failed to read issue row")?;
            issues.push(r.into_issue()?);
        }
        Ok(issues)
    }

    pub fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        fetch_issue(&self.conn, id)
    }

    /// Like `get_issue`, but a missing row is a `TrackerError::IssueNotFound`.
    pub fn require_issue(&self, id: i64) -> Result<Issue> {
        self.get_issue(id)?
            .ok_or_else(|| TrackerError::IssueNotFound { id }.into())
    }

    /// Delete an issue; its events go with it via `ON DELETE CASCADE`.
    pub fn delete_issue(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM issues WHERE id = ?1", params![id])
            .context("Failed to delete issue")?;
        Ok(count > 0)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Move an issue to `to` if the lifecycle gate allows it.
    ///
    /// The state update and the `StateChanged` event commit together. On a
    /// rejected transition nothing is written.
    pub fn transition_issue(&self, id: i64, to: IssueState, actor: &str) -> Result<(Issue, Event)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let issue = fetch_issue(&tx, id)?.ok_or(TrackerError::IssueNotFound { id })?;
        let from = issue.state;
        lifecycle::check_transition(from, to)?;

        let ts = now_ts();
        tx.execute(
            "UPDATE issues SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![to.as_str(), ts, id],
        )
        .context("Failed to update issue state")?;
        let event = insert_event(&tx, id, actor, &EventPayload::StateChanged { from, to })?;
        let issue = fetch_issue(&tx, id)?.context("Issue not found after transition")?;
        tx.commit().context("Failed to commit transition")?;
        Ok((issue, event))
    }

    /// Gate an AI fix request: the issue must be `Active`. On success the
    /// `AIFixRequested` event is written; on rejection nothing is.
    pub fn begin_fix(&self, id: i64, actor: &str) -> Result<(Issue, Event)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let issue = fetch_issue(&tx, id)?.ok_or(TrackerError::IssueNotFound { id })?;
        if issue.state != IssueState::Active {
            return Err(TrackerError::FixRequiresActive {
                id,
                state: issue.state,
            }
            .into());
        }
        let event = insert_event(
            &tx,
            id,
            actor,
            &EventPayload::AiFixRequested {
                title: issue.title.clone(),
            },
        )?;
        tx.commit().context("Failed to commit fix request")?;
        Ok((issue, event))
    }

    // ── Events ────────────────────────────────────────────────────────

    pub fn append_event(&self, issue_id: i64, actor: &str, payload: &EventPayload) -> Result<Event> {
        insert_event(&self.conn, issue_id, actor, payload)
    }

    /// The audit trail of one issue, oldest first.
    pub fn list_events(&self, issue_id: i64) -> Result<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, issue_id, type, actor, payload_json, ts
                 FROM events WHERE issue_id = ?1 ORDER BY ts ASC, id ASC",
            )
            .context("Failed to prepare list_events")?;
        let rows = stmt
            .query_map(params![issue_id], |row| {
                Ok(EventRow {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    event_type: row.get(2)?,
                    actor: row.get(3)?,
                    payload_json: row.get(4)?,
                    ts: row.get(5)?,
                })
            })
            .context("Failed to query events")?;
        let mut events = Vec::new();
        for row in rows {
            let r = row.context("Failed to read event row")?;
            events.push(r.into_event()?);
        }
        Ok(events)
    }
}

fn fetch_issue(conn: &Connection, id: i64) -> Result<Option<Issue>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, type, state, description, created_by, created_at, updated_at
             FROM issues WHERE id = ?1",
        )
        .context("Failed to prepare get_issue")?;
    let mut rows = stmt
        .query_map(params![id], IssueRow::read)
        .context("Failed to query issue")?;
    match rows.next() {
        Some(row) => {
            let r = row.context("Failed to read issue row")?;
            Ok(Some(r.into_issue()?))
        }
        None => Ok(None),
    }
}

fn insert_event(
    conn: &Connection,
    issue_id: i64,
    actor: &str,
    payload: &EventPayload,
) -> Result<Event> {
    let payload_json = payload.payload_json()?;
    let ts = now_ts();
    conn.execute(
        "INSERT INTO events (issue_id, type, actor, payload_json, ts) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![issue_id, payload.event_type(), actor, payload_json, ts],
    )
    .with_context(|| format!("Failed to insert {} event", payload.event_type()))?;
    Ok(Event {
        id: conn.last_insert_rowid(),
        issue_id,
        actor: actor.to_string(),
        payload: payload.clone(),
        ts,
    })
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Intermediate row struct for reading issues before parsing the
/// type/state strings into enums.
struct IssueRow {
    id: i64,
    title: String,
    issue_type: String,
    state: String,
    description: String,
    created_by: String,
    created_at: String,
    updated_at: String,
}

impl IssueRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(IssueRow {
            id: row.get(0)?,
            title: row.get(1)?,
            issue_type: row.get(2)?,
            state: row.get(3)?,
            description: row.get(4)?,
            created_by: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_issue(self) -> Result<Issue> {
        let issue_type = IssueType::from_str(&self.issue_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse issue type")?;
        let state = IssueState::from_str(&self.state)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse issue state")?;
        Ok(Issue {
            id: self.id,
            title: self.title,
            issue_type,
            state,
            description: self.description,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct EventRow {
    id: i64,
    issue_id: i64,
    event_type: String,
    actor: String,
    payload_json: String,
    ts: String,
}

impl EventRow {
    fn into_event(self) -> Result<Event> {
        let payload = EventPayload::from_parts(&self.event_type, &self.payload_json)?;
        Ok(Event {
            id: self.id,
            issue_id: self.issue_id,
            actor: self.actor,
            payload,
            ts: self.ts,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
