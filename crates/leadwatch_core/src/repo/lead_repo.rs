//! Lead store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide lookup, upsert, targeted transition updates and deletion keyed by
//!   the lead identity.
//! - Provide the two fixed time-threshold queries used by the sweeps.
//!
//! # Invariants
//! - Write paths must call `Lead::validate()` before SQL mutations.
//! - Single-record reads reject invalid persisted state instead of masking it.
//! - Sweep queries skip and log invalid rows so one bad record cannot hide
//!   the valid ones.
//! - All statements run under one connection lock, so a lookup and the write
//!   that follows it inside `upsert` are never interleaved with another call.

use crate::clock::cutoff_ms;
use crate::db::DbError;
use crate::model::lead::{Lead, LeadValidationError};
use log::error;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const LEAD_SELECT_SQL: &str = "SELECT
    id,
    email,
    name,
    phone,
    created_at,
    notified,
    in_stage_one,
    moved_at
FROM leads";

const EXPIRED_PREDICATE_SQL: &str = "((notified = 1 AND created_at <= ?1)
        OR (in_stage_one = 0 AND moved_at IS NOT NULL AND moved_at <= ?2))";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for lead persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(LeadValidationError),
    Db(DbError),
    InvalidData(String),
    /// A thread panicked while holding the connection lock.
    LockPoisoned,
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted lead data: {message}"),
            Self::LockPoisoned => write!(f, "lead store connection lock poisoned"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(_) | Self::LockPoisoned => None,
        }
    }
}

impl From<LeadValidationError> for RepoError {
    fn from(value: LeadValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of an upsert keyed by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Storage contract for lead records.
///
/// Implementations must be safe to call repeatedly and from several threads.
pub trait LeadStore: Send + Sync {
    fn find_by_identity(&self, identity: &str) -> RepoResult<Option<Lead>>;
    /// Inserts the lead if its identity is absent, overwrites it otherwise.
    fn upsert(&self, lead: &Lead) -> RepoResult<UpsertOutcome>;
    /// Sets `in_stage_one=false` and `moved_at`. Returns `false` when absent.
    fn mark_moved(&self, identity: &str, moved_at: i64) -> RepoResult<bool>;
    /// Sets `notified=true` only while the residency window that started at
    /// `created_at` is still current. Returns `false` otherwise.
    fn mark_notified(&self, identity: &str, created_at: i64) -> RepoResult<bool>;
    /// Deletes the lead. Returns `false` when absent.
    fn delete(&self, identity: &str) -> RepoResult<bool>;
    /// Deletes the lead only if it still matches the `find_expired` criteria.
    /// Returns `false` when absent or no longer expired.
    fn delete_if_expired(
        &self,
        identity: &str,
        now_ms: i64,
        notified_retention: Duration,
        moved_retention: Duration,
    ) -> RepoResult<bool>;
    /// Leads still in stage one, not yet notified, whose residency started at
    /// or before `now_ms - retention_threshold`.
    fn find_stale_stage_one(
        &self,
        now_ms: i64,
        retention_threshold: Duration,
    ) -> RepoResult<Vec<Lead>>;
    /// Leads notified at or before `now_ms - notified_retention`, or moved out
    /// of stage one at or before `now_ms - moved_retention`. Each lead once.
    fn find_expired(
        &self,
        now_ms: i64,
        notified_retention: Duration,
        moved_retention: Duration,
    ) -> RepoResult<Vec<Lead>>;
    fn count(&self) -> RepoResult<u64>;
}

/// SQLite-backed lead store.
pub struct SqliteLeadStore {
    conn: Mutex<Connection>,
}

impl SqliteLeadStore {
    /// Wraps a migrated connection (see `db::open_db`).
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Returns the underlying connection, e.g. for diagnostics.
    pub fn into_inner(self) -> RepoResult<Connection> {
        self.conn.into_inner().map_err(|_| RepoError::LockPoisoned)
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepoError::LockPoisoned)
    }
}

impl LeadStore for SqliteLeadStore {
    fn find_by_identity(&self, identity: &str) -> RepoResult<Option<Lead>> {
        let conn = self.lock()?;
        find_by_identity_in(&conn, identity)
    }

    fn upsert(&self, lead: &Lead) -> RepoResult<UpsertOutcome> {
        lead.validate()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM leads WHERE email = ?1;",
                [lead.identity.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE leads
                     SET
                        name = ?1,
                        phone = ?2,
                        created_at = ?3,
                        notified = ?4,
                        in_stage_one = ?5,
                        moved_at = ?6
                     WHERE id = ?7;",
                    params![
                        lead.name.as_str(),
                        lead.phone.as_str(),
                        lead.created_at,
                        bool_to_int(lead.notified),
                        bool_to_int(lead.in_stage_one),
                        lead.moved_at,
                        id,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO leads (
                        email,
                        name,
                        phone,
                        created_at,
                        notified,
                        in_stage_one,
                        moved_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                    params![
                        lead.identity.as_str(),
                        lead.name.as_str(),
                        lead.phone.as_str(),
                        lead.created_at,
                        bool_to_int(lead.notified),
                        bool_to_int(lead.in_stage_one),
                        lead.moved_at,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };
        tx.commit()?;

        Ok(outcome)
    }

    fn mark_moved(&self, identity: &str, moved_at: i64) -> RepoResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE leads
             SET
                in_stage_one = 0,
                moved_at = ?1
             WHERE email = ?2;",
            params![moved_at, identity],
        )?;
        Ok(changed > 0)
    }

    fn mark_notified(&self, identity: &str, created_at: i64) -> RepoResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE leads
             SET notified = 1
             WHERE email = ?1
               AND created_at = ?2;",
            params![identity, created_at],
        )?;
        Ok(changed > 0)
    }

    fn delete(&self, identity: &str) -> RepoResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM leads WHERE email = ?1;", [identity])?;
        Ok(changed > 0)
    }

    fn delete_if_expired(
        &self,
        identity: &str,
        now_ms: i64,
        notified_retention: Duration,
        moved_retention: Duration,
    ) -> RepoResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!("DELETE FROM leads WHERE {EXPIRED_PREDICATE_SQL} AND email = ?3;"),
            params![
                cutoff_ms(now_ms, notified_retention),
                cutoff_ms(now_ms, moved_retention),
                identity,
            ],
        )?;
        Ok(changed > 0)
    }

    fn find_stale_stage_one(
        &self,
        now_ms: i64,
        retention_threshold: Duration,
    ) -> RepoResult<Vec<Lead>> {
        let cutoff = cutoff_ms(now_ms, retention_threshold);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{LEAD_SELECT_SQL}
             WHERE in_stage_one = 1
               AND notified = 0
               AND created_at <= ?1
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let rows = stmt.query([cutoff])?;
        let leads = collect_valid_leads(rows)?;
        Ok(leads)
    }

    fn find_expired(
        &self,
        now_ms: i64,
        notified_retention: Duration,
        moved_retention: Duration,
    ) -> RepoResult<Vec<Lead>> {
        let notified_cutoff = cutoff_ms(now_ms, notified_retention);
        let moved_cutoff = cutoff_ms(now_ms, moved_retention);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{LEAD_SELECT_SQL}
             WHERE {EXPIRED_PREDICATE_SQL}
             ORDER BY id ASC;"
        ))?;
        let rows = stmt.query(params![notified_cutoff, moved_cutoff])?;
        let leads = collect_valid_leads(rows)?;
        Ok(leads)
    }

    fn count(&self) -> RepoResult<u64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM leads;", [], |row| {
            row.get::<_, i64>(0)
        })?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative lead count `{count}`")))
    }
}

fn find_by_identity_in(conn: &Connection, identity: &str) -> RepoResult<Option<Lead>> {
    let mut stmt = conn.prepare(&format!("{LEAD_SELECT_SQL} WHERE email = ?1;"))?;
    let mut rows = stmt.query([identity])?;
    let lead = match rows.next()? {
        Some(row) => Some(parse_lead_row(row)?),
        None => None,
    };

    Ok(lead)
}

/// Collects sweep candidates. Rows failing `parse_lead_row` with
/// `InvalidData` are logged and skipped; SQLite errors still abort.
fn collect_valid_leads(mut rows: rusqlite::Rows<'_>) -> RepoResult<Vec<Lead>> {
    let mut leads = Vec::new();
    while let Some(row) = rows.next()? {
        match parse_lead_row(row) {
            Ok(lead) => leads.push(lead),
            Err(RepoError::InvalidData(message)) => {
                let row_id: Option<i64> = row.get("id").ok();
                error!(
                    "event=lead_parse module=repo status=error row_id={:?} error={}",
                    row_id, message
                );
            }
            Err(err) => return Err(err),
        }
    }
    Ok(leads)
}

fn parse_lead_row(row: &Row<'_>) -> RepoResult<Lead> {
    let lead = Lead {
        id: Some(row.get("id")?),
        identity: row.get("email")?,
        name: row.get("name")?,
        phone: row.get("phone")?,
        created_at: row.get("created_at")?,
        notified: parse_flag(row.get("notified")?, "notified")?,
        in_stage_one: parse_flag(row.get("in_stage_one")?, "in_stage_one")?,
        moved_at: row.get("moved_at")?,
    };
    lead.validate().map_err(|err| {
        RepoError::InvalidData(format!("lead `{}` violates invariants: {err}", lead.identity))
    })?;
    Ok(lead)
}

fn parse_flag(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid {column} value `{other}` in leads.{column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
