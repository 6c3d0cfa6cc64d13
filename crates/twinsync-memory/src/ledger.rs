//! Durable per-spot ledger.
//!
//! Persists everything a spot needs to survive a restart without losing
//! streak continuity: the check log, every definition snapshot, and the
//! small mutable state blobs (streak, snooze, schedule anchor, runtime
//! overrides).
//!
//! # Storage layout
//!
//! | table          | key                 | contents                                        |
//! |----------------|---------------------|-------------------------------------------------|
//! | `check_results`| `id` (UUID)         | spot, definition snapshot, timestamp, trigger, items (JSON), notes, is_sorted |
//! | `definitions`  | `id` (UUID)         | spot, free text, created_at                     |
//! | `spot_state`   | `spot_id`           | streak (JSON), snooze (JSON), schedule anchor, overrides (JSON) |
//!
//! Timestamps are stored as fixed-width RFC-3339 strings (microseconds, `Z`)
//! so that lexicographic order equals chronological order.
//!
//! # Example
//!
//! ```rust
//! use twinsync_memory::ledger::Ledger;
//! use twinsync_types::Definition;
//!
//! let ledger = Ledger::open_in_memory().unwrap();
//! let def = Definition::parse("Expected: laptop").unwrap();
//! ledger.record_definition("desk", &def).unwrap();
//!
//! let latest = ledger.latest_definition("desk").unwrap().unwrap();
//! assert_eq!(latest.id, def.id);
//! ```

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;
use twinsync_types::{
    CheckResult, CheckTrigger, Definition, Item, SnoozeState, SpotError, SpotOverrides,
    StreakState,
};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt row in {table}: {details}")]
    Corrupt { table: &'static str, details: String },
}

impl From<LedgerError> for SpotError {
    fn from(err: LedgerError) -> Self {
        SpotError::Storage(err.to_string())
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    raw.parse::<DateTime<Utc>>().map_err(|e| LedgerError::Corrupt {
        table,
        details: format!("timestamp '{raw}': {e}"),
    })
}

fn insert_check(conn: &Connection, result: &CheckResult) -> Result<bool, LedgerError> {
    let items = serde_json::to_string(&result.items)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO check_results
             (id, spot_id, definition_id, timestamp, trigger, items, notes, is_sorted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            result.id.to_string(),
            result.spot_id,
            result.definition_id.to_string(),
            ts(result.timestamp),
            result.trigger.as_str(),
            items,
            result.notes,
            result.is_sorted,
        ],
    )?;
    Ok(inserted == 1)
}

// `column` is always a literal from this module, never user input.
fn upsert_column(
    conn: &Connection,
    spot_id: &str,
    column: &'static str,
    value: Option<String>,
) -> Result<(), LedgerError> {
    let sql = format!(
        "INSERT INTO spot_state (spot_id, {column}) VALUES (?1, ?2)
         ON CONFLICT(spot_id) DO UPDATE SET {column} = excluded.{column}"
    );
    conn.execute(&sql, params![spot_id, value])?;
    Ok(())
}

fn parse_uuid(table: &'static str, raw: &str) -> Result<Uuid, LedgerError> {
    Uuid::parse_str(raw).map_err(|e| LedgerError::Corrupt {
        table,
        details: format!("id '{raw}': {e}"),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed store for every spot's durable state.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        let ledger = Self { conn };
        ledger.init_schema()?;
        Ok(ledger)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS check_results (
                id            TEXT NOT NULL PRIMARY KEY,
                spot_id       TEXT NOT NULL,
                definition_id TEXT NOT NULL,
                timestamp     TEXT NOT NULL,
                trigger       TEXT NOT NULL,
                items         TEXT NOT NULL,
                notes         TEXT NOT NULL,
                is_sorted     INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_check_results_spot_ts
                ON check_results (spot_id, timestamp);
            CREATE TABLE IF NOT EXISTS definitions (
                id         TEXT NOT NULL PRIMARY KEY,
                spot_id    TEXT NOT NULL,
                text       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS spot_state (
                spot_id         TEXT NOT NULL PRIMARY KEY,
                streak          TEXT,
                snooze          TEXT,
                schedule_anchor TEXT,
                overrides       TEXT
            );",
        )?;
        // Ledgers created before runtime overrides were persisted.
        let has_overrides: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('spot_state') WHERE name = 'overrides'",
            [],
            |row| row.get(0),
        )?;
        if has_overrides == 0 {
            self.conn
                .execute_batch("ALTER TABLE spot_state ADD COLUMN overrides TEXT;")?;
        }
        Ok(())
    }

    // ── check log ────────────────────────────────────────────────────────────

    /// Append a check result.
    ///
    /// Returns `false` (and changes nothing) when a result with the same id
    /// is already stored.
    pub fn append_check(&self, result: &CheckResult) -> Result<bool, LedgerError> {
        insert_check(&self.conn, result)
    }

    /// Append a check result together with the streak it produced and, for
    /// automatic checks, the new schedule anchor. Either all of it is stored
    /// or none of it.
    ///
    /// Returns `false` (and changes nothing) when a result with the same id
    /// is already stored.
    pub fn commit_check(
        &mut self,
        result: &CheckResult,
        streak: &StreakState,
        anchor: Option<DateTime<Utc>>,
    ) -> Result<bool, LedgerError> {
        let tx = self.conn.transaction()?;
        if !insert_check(&tx, result)? {
            return Ok(false);
        }
        upsert_column(&tx, &result.spot_id, "streak", Some(serde_json::to_string(streak)?))?;
        if let Some(anchor) = anchor {
            upsert_column(&tx, &result.spot_id, "schedule_anchor", Some(ts(anchor)))?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// All checks for `spot_id` completed at or after `since`, oldest first.
    pub fn checks_since(
        &self,
        spot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, definition_id, timestamp, trigger, items, notes, is_sorted
             FROM check_results
             WHERE spot_id = ?1 AND timestamp >= ?2
             ORDER BY timestamp ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![spot_id, ts(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, definition_id, timestamp, trigger, items, notes, is_sorted) = row?;
            let trigger = trigger
                .parse::<CheckTrigger>()
                .map_err(|e| LedgerError::Corrupt {
                    table: "check_results",
                    details: e.to_string(),
                })?;
            results.push(CheckResult {
                id: parse_uuid("check_results", &id)?,
                spot_id: spot_id.to_string(),
                definition_id: parse_uuid("check_results", &definition_id)?,
                timestamp: parse_ts("check_results", &timestamp)?,
                trigger,
                items: serde_json::from_str::<Vec<Item>>(&items)?,
                notes,
                is_sorted,
            });
        }
        Ok(results)
    }

    /// Completion time of the most recent check for `spot_id`, if any.
    pub fn last_check_at(&self, spot_id: &str) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let raw: Option<String> = self.conn.query_row(
            "SELECT MAX(timestamp) FROM check_results WHERE spot_id = ?1",
            params![spot_id],
            |row| row.get(0),
        )?;
        raw.map(|r| parse_ts("check_results", &r)).transpose()
    }

    // ── definitions ──────────────────────────────────────────────────────────

    /// Store a definition snapshot. Re-recording the same snapshot id is a
    /// no-op.
    pub fn record_definition(&self, spot_id: &str, def: &Definition) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO definitions (id, spot_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![def.id.to_string(), spot_id, def.text, ts(def.created_at)],
        )?;
        Ok(())
    }

    /// The most recently recorded snapshot for `spot_id`.
    pub fn latest_definition(&self, spot_id: &str) -> Result<Option<Definition>, LedgerError> {
        Ok(self.definition_history(spot_id)?.pop())
    }

    /// Every recorded snapshot for `spot_id`, oldest first.
    pub fn definition_history(&self, spot_id: &str) -> Result<Vec<Definition>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text, created_at FROM definitions
             WHERE spot_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![spot_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut defs = Vec::new();
        for row in rows {
            let (id, text, created_at) = row?;
            let def = Definition::restore(
                parse_uuid("definitions", &id)?,
                &text,
                parse_ts("definitions", &created_at)?,
            )
            .map_err(|e| LedgerError::Corrupt {
                table: "definitions",
                details: e.to_string(),
            })?;
            defs.push(def);
        }
        Ok(defs)
    }

    // ── per-spot state blobs ────────────────────────────────────────────────

    fn save_column(
        &self,
        spot_id: &str,
        column: &'static str,
        value: Option<String>,
    ) -> Result<(), LedgerError> {
        upsert_column(&self.conn, spot_id, column, value)
    }

    fn load_column(&self, spot_id: &str, column: &'static str) -> Result<Option<String>, LedgerError> {
        let sql = format!("SELECT {column} FROM spot_state WHERE spot_id = ?1");
        let value: Option<Option<String>> = self
            .conn
            .query_row(&sql, params![spot_id], |row| row.get(0))
            .optional()?;
        Ok(value.flatten())
    }

    pub fn save_streak(&self, spot_id: &str, streak: &StreakState) -> Result<(), LedgerError> {
        self.save_column(spot_id, "streak", Some(serde_json::to_string(streak)?))
    }

    /// Stored streak, or the initial state when none was ever saved.
    pub fn load_streak(&self, spot_id: &str) -> Result<StreakState, LedgerError> {
        match self.load_column(spot_id, "streak")? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(StreakState::default()),
        }
    }

    /// Store the active snooze, or clear it with `None`.
    pub fn save_snooze(&self, spot_id: &str, snooze: Option<&SnoozeState>) -> Result<(), LedgerError> {
        let raw = snooze.map(serde_json::to_string).transpose()?;
        self.save_column(spot_id, "snooze", raw)
    }

    pub fn load_snooze(&self, spot_id: &str) -> Result<Option<SnoozeState>, LedgerError> {
        self.load_column(spot_id, "snooze")?
            .map(|raw| serde_json::from_str(&raw).map_err(LedgerError::from))
            .transpose()
    }

    /// Store the finish time of the last automatic check attempt.
    pub fn save_schedule_anchor(
        &self,
        spot_id: &str,
        anchor: Option<DateTime<Utc>>,
    ) -> Result<(), LedgerError> {
        self.save_column(spot_id, "schedule_anchor", anchor.map(ts))
    }

    pub fn load_schedule_anchor(&self, spot_id: &str) -> Result<Option<DateTime<Utc>>, LedgerError> {
        self.load_column(spot_id, "schedule_anchor")?
            .map(|raw| parse_ts("spot_state", &raw))
            .transpose()
    }

    pub fn save_overrides(&self, spot_id: &str, overrides: &SpotOverrides) -> Result<(), LedgerError> {
        self.save_column(spot_id, "overrides", Some(serde_json::to_string(overrides)?))
    }

    /// Stored runtime overrides, or none when the spot was never opened.
    pub fn load_overrides(&self, spot_id: &str) -> Result<SpotOverrides, LedgerError> {
        match self.load_column(spot_id, "overrides")? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(SpotOverrides::default()),
        }
    }

    // ── housekeeping ─────────────────────────────────────────────────────────

    /// Physically delete check rows older than `cutoff` for every spot.
    /// Returns the number of rows removed.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, LedgerError> {
        let removed = self.conn.execute(
            "DELETE FROM check_results WHERE timestamp < ?1",
            params![ts(cutoff)],
        )?;
        if removed > 0 {
            debug!(removed, cutoff = %cutoff, "purged expired check results");
        }
        Ok(removed)
    }

    /// Remove every row owned by `spot_id` in a single transaction.
    pub fn delete_spot(&mut self, spot_id: &str) -> Result<(), LedgerError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM check_results WHERE spot_id = ?1", params![spot_id])?;
        tx.execute("DELETE FROM definitions WHERE spot_id = ?1", params![spot_id])?;
        tx.execute("DELETE FROM spot_state WHERE spot_id = ?1", params![spot_id])?;
        tx.commit()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
