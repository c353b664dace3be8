//! Schema creation and migrations.
//!
//! The database carries a single-row `schema_version` table. Bump
//! [`SCHEMA_VERSION`] and add a step to [`migrate`] when the layout changes.

use crate::error::{AppError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

pub const SCHEMA_VERSION: i64 = 2;

/// Bring a freshly opened connection up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        ",
    )?;

    let current: i64 = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?
        .unwrap_or(0);

    if current > SCHEMA_VERSION {
        return Err(AppError::Store(format!(
            "Schema version mismatch: database is at {}, this build supports {}",
            current, SCHEMA_VERSION
        )));
    }

    if current == SCHEMA_VERSION {
        debug!("Schema is up to date (version {})", current);
        return Ok(());
    }

    if current < 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                default_branch TEXT NOT NULL,
                total INTEGER NOT NULL DEFAULT 0,
                error INTEGER NOT NULL DEFAULT 0,
                warning INTEGER NOT NULL DEFAULT 0,
                notice INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_repositories_name ON repositories(name);

            CREATE TABLE IF NOT EXISTS commits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_id INTEGER NOT NULL REFERENCES repositories(id),
                branch TEXT NOT NULL,
                pull_request INTEGER NOT NULL DEFAULT 0,
                commit_hash TEXT NOT NULL,
                short_commit TEXT NOT NULL,
                commit_message TEXT NOT NULL,
                total INTEGER NOT NULL DEFAULT 0,
                error INTEGER NOT NULL DEFAULT 0,
                warning INTEGER NOT NULL DEFAULT 0,
                notice INTEGER NOT NULL DEFAULT 0,
                latest INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_commits_branch ON commits(repo_id, branch);
            CREATE INDEX IF NOT EXISTS idx_commits_short ON commits(repo_id, short_commit);

            CREATE TABLE IF NOT EXISTS url_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                commit_id INTEGER NOT NULL REFERENCES commits(id),
                repo_id INTEGER NOT NULL REFERENCES repositories(id),
                path TEXT NOT NULL,
                total INTEGER NOT NULL DEFAULT 0,
                error INTEGER NOT NULL DEFAULT 0,
                warning INTEGER NOT NULL DEFAULT 0,
                notice INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_url_stats_commit ON url_stats(commit_id);
            ",
        )?;
    }

    // v2: at most one latest commit per branch, enforced by the database.
    if current < 2 {
        conn.execute_batch(
            "
            CREATE UNIQUE INDEX IF NOT EXISTS idx_commits_one_latest
                ON commits(repo_id, branch) WHERE latest = 1;
            ",
        )?;
    }

    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        params![SCHEMA_VERSION],
    )?;
    info!("Migrated schema from version {} to {}", current, SCHEMA_VERSION);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(conn: &Connection) -> i64 {
        conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(version(&conn), SCHEMA_VERSION);

        // Running again is a no-op.
        migrate(&conn).unwrap();
        assert_eq!(version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute("UPDATE schema_version SET version = 99 WHERE id = 1", [])
            .unwrap();

        let err = migrate(&conn).unwrap_err();
        assert!(err.to_string().contains("Schema version mismatch"));
    }

    #[test]
    fn test_unique_latest_index() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO repositories (id, name, default_branch, updated_at)
             VALUES (1, 'a/b', 'main', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let insert = "INSERT INTO commits (repo_id, branch, commit_hash, short_commit, commit_message, latest, created_at)
                      VALUES (1, 'main', 'abc', 'abc', '', 1, '2024-01-01T00:00:00Z')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
