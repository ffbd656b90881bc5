//! SQLite-backed persistence for enrollment records.
//!
//! One row per (learner, course) pair. Module progress and the credential
//! record are stored as JSON columns; the credential status and update
//! timestamp are additionally materialized as plain columns so the
//! reconciliation scan is a single indexed query.
//!
//! # Concurrency
//!
//! The connection is guarded by a mutex and every read-modify-write runs
//! inside an `IMMEDIATE` transaction, so [`EnrollmentStore::compare_and_swap`]
//! is atomic within the process. The transaction also keeps the swap atomic
//! at the database level, which preserves correctness if the store is later
//! opened by more than one writer.

mod secure;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, TransactionBehavior, params};

use learnova_types::{
    CourseId, CredentialRecord, CredentialStatus, Enrollment, EnrollmentKey, LearnerId,
    ModuleProgress,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open enrollment store at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("failed to prepare enrollment store path {path}: {source}")]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Sqlite {
        context: &'static str,
        source: rusqlite::Error,
    },
    #[error("corrupt enrollment record for {key}: {detail}")]
    Corrupt { key: String, detail: String },
    #[error("enrollment {0} already exists")]
    DuplicateEnrollment(EnrollmentKey),
    #[error("no enrollment found for {0}")]
    UnknownEnrollment(EnrollmentKey),
}

impl StoreError {
    fn sqlite(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sqlite { context, source }
    }
}

/// Outcome of a [`EnrollmentStore::compare_and_swap`] call.
#[derive(Debug)]
pub enum CasOutcome {
    /// The status matched an expected value; the swap and mutation were
    /// applied and committed.
    Swapped(Enrollment),
    /// Another caller got there first. Nothing was written.
    Lost { actual: CredentialStatus },
}

impl CasOutcome {
    #[must_use]
    pub const fn is_swapped(&self) -> bool {
        matches!(self, CasOutcome::Swapped(_))
    }
}

/// Durable keyed storage for enrollment records.
pub struct EnrollmentStore {
    conn: Mutex<Connection>,
}

impl EnrollmentStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS enrollments (
            learner_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            modules TEXT NOT NULL,
            completion_pct REAL NOT NULL,
            completion_triggered INTEGER NOT NULL,
            credential_status TEXT NOT NULL,
            credential TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (learner_id, course_id)
        );

        CREATE INDEX IF NOT EXISTS idx_enrollments_credential_status
        ON enrollments(credential_status);
    ";

    /// Open or create the enrollment database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        secure::prepare_store_path(path)?;
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::initialize(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .map_err(StoreError::sqlite("failed to set enrollment store pragmas"))?;
        conn.execute_batch(Self::SCHEMA)
            .map_err(StoreError::sqlite("failed to create enrollment schema"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a fresh enrollment. Fails if the key already has a record.
    pub fn put(&self, enrollment: &Enrollment) -> Result<(), StoreError> {
        let conn = self.lock();
        let row = Row::encode(enrollment)?;
        let result = conn.execute(
            "INSERT INTO enrollments (learner_id, course_id, modules, completion_pct,
                 completion_triggered, credential_status, credential, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                enrollment.key.learner.as_str(),
                enrollment.key.course.as_str(),
                row.modules,
                enrollment.completion_pct,
                enrollment.completion_triggered,
                enrollment.credential.status.as_str(),
                row.credential,
                format_timestamp(enrollment.created_at),
                format_timestamp(enrollment.updated_at),
            ],
        );
        drop(conn);

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateEnrollment(enrollment.key.clone()))
            }
            Err(source) => Err(StoreError::Sqlite {
                context: "failed to insert enrollment",
                source,
            }),
        }
    }

    /// Fetch an enrollment, or `None` if the key has no record.
    pub fn get(&self, key: &EnrollmentKey) -> Result<Option<Enrollment>, StoreError> {
        let conn = self.lock();
        Self::get_with(&conn, key)
    }

    /// Read-modify-write under a transaction.
    ///
    /// The mutator sees the current record; the updated record (with a fresh
    /// `updated_at`) is written back and returned.
    pub fn update<F>(&self, key: &EnrollmentKey, mutate: F) -> Result<Enrollment, StoreError>
    where
        F: FnOnce(&mut Enrollment),
    {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::sqlite("failed to start enrollment update"))?;

        let mut enrollment = Self::get_with(&tx, key)?
            .ok_or_else(|| StoreError::UnknownEnrollment(key.clone()))?;
        mutate(&mut enrollment);
        enrollment.updated_at = Utc::now();
        Self::write_back(&tx, &enrollment)?;

        tx.commit()
            .map_err(StoreError::sqlite("failed to commit enrollment update"))?;
        Ok(enrollment)
    }

    /// Atomically swap the credential status if it currently matches one of
    /// `expected`, applying `mutate` to the record in the same transaction.
    ///
    /// Exactly one of N concurrent callers with disjoint claims wins; losers
    /// observe [`CasOutcome::Lost`] with the status that beat them and no
    /// write occurs.
    pub fn compare_and_swap<F>(
        &self,
        key: &EnrollmentKey,
        expected: &[CredentialStatus],
        new: CredentialStatus,
        mutate: F,
    ) -> Result<CasOutcome, StoreError>
    where
        F: FnOnce(&mut Enrollment),
    {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::sqlite("failed to start credential swap"))?;

        let mut enrollment = Self::get_with(&tx, key)?
            .ok_or_else(|| StoreError::UnknownEnrollment(key.clone()))?;

        let actual = enrollment.credential.status;
        if !expected.contains(&actual) {
            tracing::debug!(%key, actual = actual.as_str(), "credential swap lost");
            return Ok(CasOutcome::Lost { actual });
        }
        debug_assert!(
            actual.can_transition_to(new) || actual == new,
            "illegal credential transition {actual:?} -> {new:?}"
        );

        mutate(&mut enrollment);
        enrollment.credential.status = new;
        enrollment.updated_at = Utc::now();
        Self::write_back(&tx, &enrollment)?;

        tx.commit()
            .map_err(StoreError::sqlite("failed to commit credential swap"))?;
        tracing::debug!(%key, new = new.as_str(), "credential swap applied");
        Ok(CasOutcome::Swapped(enrollment))
    }

    /// Delete an enrollment record. Returns whether a record existed.
    ///
    /// Deletion only happens on explicit user action (e.g. deleting the
    /// course); records are never garbage-collected.
    pub fn delete(&self, key: &EnrollmentKey) -> Result<bool, StoreError> {
        let conn = self.lock();
        let rows = conn
            .execute(
                "DELETE FROM enrollments WHERE learner_id = ?1 AND course_id = ?2",
                params![key.learner.as_str(), key.course.as_str()],
            )
            .map_err(StoreError::sqlite("failed to delete enrollment"))?;
        Ok(rows > 0)
    }

    /// All enrollment keys, ordered for stable iteration.
    pub fn list_keys(&self) -> Result<Vec<EnrollmentKey>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT learner_id, course_id FROM enrollments
                 ORDER BY learner_id ASC, course_id ASC",
            )
            .map_err(StoreError::sqlite("failed to prepare key listing"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(StoreError::sqlite("failed to list enrollment keys"))?;

        let mut keys = Vec::new();
        for row in rows {
            let (learner, course) =
                row.map_err(StoreError::sqlite("failed to read enrollment key row"))?;
            keys.push(decode_key(&learner, &course)?);
        }
        Ok(keys)
    }

    /// Keys whose credential status has been `pending` since before `cutoff`.
    ///
    /// These are indeterminate (the process may have crashed mid-issuance)
    /// and must be reconciled against the authority before any retry.
    pub fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EnrollmentKey>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT learner_id, course_id FROM enrollments
                 WHERE credential_status = 'pending' AND updated_at < ?1
                 ORDER BY updated_at ASC",
            )
            .map_err(StoreError::sqlite("failed to prepare stale-pending scan"))?;
        let rows = stmt
            .query_map([format_timestamp(cutoff)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(StoreError::sqlite("failed to scan stale pending rows"))?;

        let mut keys = Vec::new();
        for row in rows {
            let (learner, course) =
                row.map_err(StoreError::sqlite("failed to read stale pending row"))?;
            keys.push(decode_key(&learner, &course)?);
        }
        Ok(keys)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_with(
        conn: &Connection,
        key: &EnrollmentKey,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT modules, completion_pct, completion_triggered, credential,
                        created_at, updated_at
                 FROM enrollments WHERE learner_id = ?1 AND course_id = ?2",
            )
            .map_err(StoreError::sqlite("failed to prepare enrollment query"))?;
        let mut rows = stmt
            .query(params![key.learner.as_str(), key.course.as_str()])
            .map_err(StoreError::sqlite("failed to query enrollment"))?;
        let row = rows
            .next()
            .map_err(StoreError::sqlite("failed to read enrollment row"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let modules: String = row
            .get(0)
            .map_err(StoreError::sqlite("failed to read modules column"))?;
        let completion_pct: f64 = row
            .get(1)
            .map_err(StoreError::sqlite("failed to read completion column"))?;
        let completion_triggered: bool = row
            .get(2)
            .map_err(StoreError::sqlite("failed to read trigger column"))?;
        let credential: String = row
            .get(3)
            .map_err(StoreError::sqlite("failed to read credential column"))?;
        let created_at: String = row
            .get(4)
            .map_err(StoreError::sqlite("failed to read created_at column"))?;
        let updated_at: String = row
            .get(5)
            .map_err(StoreError::sqlite("failed to read updated_at column"))?;

        let corrupt = |detail: String| StoreError::Corrupt {
            key: key.to_string(),
            detail,
        };

        let modules: Vec<ModuleProgress> = serde_json::from_str(&modules)
            .map_err(|e| corrupt(format!("bad modules payload: {e}")))?;
        let credential: CredentialRecord = serde_json::from_str(&credential)
            .map_err(|e| corrupt(format!("bad credential payload: {e}")))?;
        let created_at = parse_timestamp(&created_at)
            .ok_or_else(|| corrupt(format!("bad created_at timestamp: {created_at:?}")))?;
        let updated_at = parse_timestamp(&updated_at)
            .ok_or_else(|| corrupt(format!("bad updated_at timestamp: {updated_at:?}")))?;

        Ok(Some(Enrollment {
            key: key.clone(),
            modules,
            completion_pct,
            completion_triggered,
            credential,
            created_at,
            updated_at,
        }))
    }

    fn write_back(conn: &Connection, enrollment: &Enrollment) -> Result<(), StoreError> {
        let row = Row::encode(enrollment)?;
        let changed = conn
            .execute(
                "UPDATE enrollments
                 SET modules = ?3, completion_pct = ?4, completion_triggered = ?5,
                     credential_status = ?6, credential = ?7, updated_at = ?8
                 WHERE learner_id = ?1 AND course_id = ?2",
                params![
                    enrollment.key.learner.as_str(),
                    enrollment.key.course.as_str(),
                    row.modules,
                    enrollment.completion_pct,
                    enrollment.completion_triggered,
                    enrollment.credential.status.as_str(),
                    row.credential,
                    format_timestamp(enrollment.updated_at),
                ],
            )
            .map_err(StoreError::sqlite("failed to write enrollment back"))?;
        if changed == 0 {
            return Err(StoreError::UnknownEnrollment(enrollment.key.clone()));
        }
        Ok(())
    }
}

/// JSON-encoded column payloads for one row.
struct Row {
    modules: String,
    credential: String,
}

impl Row {
    fn encode(enrollment: &Enrollment) -> Result<Self, StoreError> {
        let corrupt = |detail: String| StoreError::Corrupt {
            key: enrollment.key.to_string(),
            detail,
        };
        Ok(Self {
            modules: serde_json::to_string(&enrollment.modules)
                .map_err(|e| corrupt(format!("failed to encode modules: {e}")))?,
            credential: serde_json::to_string(&enrollment.credential)
                .map_err(|e| corrupt(format!("failed to encode credential: {e}")))?,
        })
    }
}

fn decode_key(learner: &str, course: &str) -> Result<EnrollmentKey, StoreError> {
    let corrupt = |detail: String| StoreError::Corrupt {
        key: format!("{learner}/{course}"),
        detail,
    };
    Ok(EnrollmentKey::new(
        LearnerId::new(learner).map_err(|e| corrupt(e.to_string()))?,
        CourseId::new(course).map_err(|e| corrupt(e.to_string()))?,
    ))
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
///
/// Fixed-width, so lexicographic comparison in SQL matches chronological
/// order (relied on by the stale-pending scan).
fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
