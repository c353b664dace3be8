//! SQLite persistence for repositories, commits and per-URL stats.
//!
//! A [`Store`] owns one connection behind a mutex. Every async method runs
//! its statement on the blocking pool and holds the lock only for that
//! call. The free functions in this module take a plain `&Connection` so the
//! aggregator can compose them inside a single transaction.

mod schema;

use crate::error::{AppError, Result};
use crate::models::{Commit, Counts, RepoMeta, Repository, UrlStat};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Handle to the accessibility database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a database file and run pending migrations.
    ///
    /// `:memory:` opens a private in-memory database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == ":memory:";

        if !in_memory {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let conn = if in_memory {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };

        if !in_memory {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                warn!("SQLite kept journal_mode={} for {}", mode, path.display());
            }
        }
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        schema::migrate(&conn)?;
        info!("Opened database at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Run a read or single-statement write on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| AppError::Store("connection lock poisoned".to_string()))?;
            f(&conn)
        })
        .await?
    }

    /// Run `f` inside one transaction; commits on `Ok`, rolls back on `Err`.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| AppError::Store("connection lock poisoned".to_string()))?;
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await?
    }

    pub async fn upsert_repository(&self, meta: RepoMeta, counts: Option<Counts>) -> Result<()> {
        self.call(move |conn| upsert_repository(conn, &meta, counts))
            .await
    }

    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.call(list_repositories).await
    }

    pub async fn find_repository_by_name(&self, name: &str) -> Result<Option<Repository>> {
        let name = name.to_string();
        self.call(move |conn| find_repository_by_name(conn, &name))
            .await
    }

    pub async fn commits_for_repository(&self, repo_id: i64) -> Result<Vec<Commit>> {
        self.call(move |conn| commits_for_repository(conn, repo_id))
            .await
    }

    pub async fn commit_count(&self, repo_id: i64) -> Result<usize> {
        self.call(move |conn| commit_count(conn, repo_id)).await
    }

    pub async fn find_commit(&self, repo_id: i64, hash: &str) -> Result<Option<Commit>> {
        let hash = hash.to_string();
        self.call(move |conn| find_commit(conn, repo_id, &hash))
            .await
    }

    pub async fn latest_commit(&self, repo_id: i64, branch: &str) -> Result<Option<Commit>> {
        let branch = branch.to_string();
        self.call(move |conn| latest_commit(conn, repo_id, &branch))
            .await
    }

    pub async fn find_prior_commit_by_short(
        &self,
        repo_id: i64,
        short_commit: &str,
        exclude_id: i64,
    ) -> Result<Option<Commit>> {
        let short_commit = short_commit.to_string();
        self.call(move |conn| find_prior_commit_by_short(conn, repo_id, &short_commit, exclude_id))
            .await
    }

    pub async fn url_stats_for_commit(&self, commit_id: i64) -> Result<Vec<UrlStat>> {
        self.call(move |conn| url_stats_for_commit(conn, commit_id))
            .await
    }
}

const REPOSITORY_COLUMNS: &str =
    "id, name, default_branch, total, error, warning, notice, updated_at";

const COMMIT_COLUMNS: &str = "id, repo_id, branch, pull_request, commit_hash, short_commit, \
     commit_message, total, error, warning, notice, latest, created_at";

const URL_STAT_COLUMNS: &str = "id, commit_id, repo_id, path, total, error, warning, notice";

/// Counts as SQLite integers; anything above `i64::MAX` is rejected.
fn sql_counts(counts: &Counts) -> Result<[i64; 4]> {
    let convert = |value: u64| {
        i64::try_from(value).map_err(|_| {
            AppError::InvalidPayload(format!("count {} is too large to store", value))
        })
    };
    Ok([
        convert(counts.total)?,
        convert(counts.error)?,
        convert(counts.warning)?,
        convert(counts.notice)?,
    ])
}

/// Reject counts the database cannot hold.
pub fn check_counts(counts: &Counts) -> Result<()> {
    sql_counts(counts).map(|_| ())
}

fn counts_from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<Counts> {
    let get = |idx: usize| -> rusqlite::Result<u64> {
        let value: i64 = row.get(idx)?;
        u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
    };
    Ok(Counts::new(
        get(first)?,
        get(first + 1)?,
        get(first + 2)?,
        get(first + 3)?,
    ))
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        name: row.get(1)?,
        default_branch: row.get(2)?,
        counts: counts_from_row(row, 3)?,
        updated_at: row.get::<_, DateTime<Utc>>(7)?,
    })
}

fn commit_from_row(row: &Row<'_>) -> rusqlite::Result<Commit> {
    Ok(Commit {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        branch: row.get(2)?,
        pull_request: row.get(3)?,
        commit: row.get(4)?,
        short_commit: row.get(5)?,
        commit_message: row.get(6)?,
        counts: counts_from_row(row, 7)?,
        latest: row.get(11)?,
        created_at: row.get::<_, DateTime<Utc>>(12)?,
    })
}

fn url_stat_from_row(row: &Row<'_>) -> rusqlite::Result<UrlStat> {
    Ok(UrlStat {
        id: row.get(0)?,
        commit_id: row.get(1)?,
        repo_id: row.get(2)?,
        path: row.get(3)?,
        counts: counts_from_row(row, 4)?,
    })
}

/// Insert or update a repository keyed by its numeric id.
///
/// With `counts = None` only the name and default branch change; a new row
/// starts at zero.
pub fn upsert_repository(conn: &Connection, meta: &RepoMeta, counts: Option<Counts>) -> Result<()> {
    let now = Utc::now();
    match counts {
        Some(c) => {
            let [total, error, warning, notice] = sql_counts(&c)?;
            conn.execute(
                "INSERT INTO repositories (id, name, default_branch, total, error, warning, notice, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     default_branch = excluded.default_branch,
                     total = excluded.total,
                     error = excluded.error,
                     warning = excluded.warning,
                     notice = excluded.notice,
                     updated_at = excluded.updated_at",
                params![
                    meta.id,
                    meta.full_name,
                    meta.default_branch,
                    total,
                    error,
                    warning,
                    notice,
                    now
                ],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO repositories (id, name, default_branch, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     default_branch = excluded.default_branch,
                     updated_at = excluded.updated_at",
                params![meta.id, meta.full_name, meta.default_branch, now],
            )?;
        }
    }
    debug!("Upserted repository {} ({})", meta.full_name, meta.id);
    Ok(())
}

/// Fields of a commit row known before its URLs are processed.
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub repo_id: i64,
    pub branch: String,
    pub pull_request: bool,
    pub commit: String,
    pub short_commit: String,
    pub commit_message: String,
}

/// Insert a commit row with zero counts and `latest = 0`; returns its row id.
pub fn insert_commit(conn: &Connection, commit: &NewCommit) -> Result<i64> {
    conn.execute(
        "INSERT INTO commits (repo_id, branch, pull_request, commit_hash, short_commit, commit_message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            commit.repo_id,
            commit.branch,
            commit.pull_request,
            commit.commit,
            commit.short_commit,
            commit.commit_message,
            Utc::now()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Clear `latest` on every commit of a branch; returns the number of rows changed.
pub fn clear_latest(conn: &Connection, repo_id: i64, branch: &str) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE commits SET latest = 0 WHERE repo_id = ?1 AND branch = ?2 AND latest = 1",
        params![repo_id, branch],
    )?;
    Ok(changed)
}

pub fn insert_url_stat(
    conn: &Connection,
    commit_id: i64,
    repo_id: i64,
    path: &str,
    counts: &Counts,
) -> Result<i64> {
    let [total, error, warning, notice] = sql_counts(counts)?;
    conn.execute(
        "INSERT INTO url_stats (commit_id, repo_id, path, total, error, warning, notice)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            commit_id,
            repo_id,
            path,
            total,
            error,
            warning,
            notice
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Store the overall counts on a commit and mark it latest.
pub fn finalize_commit(conn: &Connection, commit_id: i64, counts: &Counts) -> Result<()> {
    let [total, error, warning, notice] = sql_counts(counts)?;
    let changed = conn.execute(
        "UPDATE commits SET total = ?2, error = ?3, warning = ?4, notice = ?5, latest = 1
         WHERE id = ?1",
        params![
            commit_id,
            total,
            error,
            warning,
            notice
        ],
    )?;
    if changed == 0 {
        return Err(AppError::Store(format!("commit row {} vanished", commit_id)));
    }
    Ok(())
}

/// Repositories with at least one stored commit, by name.
///
/// A repository whose first report failed after the initial upsert has no
/// commits and is left out.
pub fn list_repositories(conn: &Connection) -> Result<Vec<Repository>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM repositories
         WHERE EXISTS (SELECT 1 FROM commits WHERE commits.repo_id = repositories.id)
         ORDER BY name",
        REPOSITORY_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], repository_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Look a repository up by `owner/name`.
///
/// Names are mutable, so if a stale row still carries the name the most
/// recently updated one wins.
pub fn find_repository_by_name(conn: &Connection, name: &str) -> Result<Option<Repository>> {
    let repo = conn
        .query_row(
            &format!(
                "SELECT {} FROM repositories WHERE name = ?1 ORDER BY updated_at DESC LIMIT 1",
                REPOSITORY_COLUMNS
            ),
            params![name],
            repository_from_row,
        )
        .optional()?;
    Ok(repo)
}

/// All commits of a repository, newest first.
pub fn commits_for_repository(conn: &Connection, repo_id: i64) -> Result<Vec<Commit>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM commits WHERE repo_id = ?1 ORDER BY id DESC",
        COMMIT_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![repo_id], commit_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn commit_count(conn: &Connection, repo_id: i64) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM commits WHERE repo_id = ?1",
        params![repo_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Most recent commit row matching a full or short hash.
pub fn find_commit(conn: &Connection, repo_id: i64, hash: &str) -> Result<Option<Commit>> {
    let commit = conn
        .query_row(
            &format!(
                "SELECT {} FROM commits
                 WHERE repo_id = ?1 AND (commit_hash = ?2 OR short_commit = ?2)
                 ORDER BY id DESC LIMIT 1",
                COMMIT_COLUMNS
            ),
            params![repo_id, hash],
            commit_from_row,
        )
        .optional()?;
    Ok(commit)
}

pub fn latest_commit(conn: &Connection, repo_id: i64, branch: &str) -> Result<Option<Commit>> {
    let commit = conn
        .query_row(
            &format!(
                "SELECT {} FROM commits WHERE repo_id = ?1 AND branch = ?2 AND latest = 1",
                COMMIT_COLUMNS
            ),
            params![repo_id, branch],
            commit_from_row,
        )
        .optional()?;
    Ok(commit)
}

/// Most recent commit with the given short hash, ignoring row `exclude_id`.
pub fn find_prior_commit_by_short(
    conn: &Connection,
    repo_id: i64,
    short_commit: &str,
    exclude_id: i64,
) -> Result<Option<Commit>> {
    let commit = conn
        .query_row(
            &format!(
                "SELECT {} FROM commits
                 WHERE repo_id = ?1 AND short_commit = ?2 AND id != ?3
                 ORDER BY id DESC LIMIT 1",
                COMMIT_COLUMNS
            ),
            params![repo_id, short_commit, exclude_id],
            commit_from_row,
        )
        .optional()?;
    Ok(commit)
}

pub fn url_stats_for_commit(conn: &Connection, commit_id: i64) -> Result<Vec<UrlStat>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM url_stats WHERE commit_id = ?1 ORDER BY id",
        URL_STAT_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![commit_id], url_stat_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
