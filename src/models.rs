//! Data models for the accessibility dashboard.
//!
//! This module contains the stored rows (repositories, commits, per-URL
//! stats), the incoming webhook payload and the count tuple that flows
//! between them.

use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Number of characters kept in a truncated commit hash.
pub const SHORT_HASH_LEN: usize = 6;

/// Issue counts reported by an accessibility scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub error: u64,
    #[serde(default)]
    pub warning: u64,
    #[serde(default)]
    pub notice: u64,
}

impl Counts {
    pub fn new(total: u64, error: u64, warning: u64, notice: u64) -> Self {
        Self {
            total,
            error,
            warning,
            notice,
        }
    }

    /// Field-wise sum, or `None` if any field overflows.
    pub fn checked_add(self, rhs: Counts) -> Option<Counts> {
        Some(Counts {
            total: self.total.checked_add(rhs.total)?,
            error: self.error.checked_add(rhs.error)?,
            warning: self.warning.checked_add(rhs.warning)?,
            notice: self.notice.checked_add(rhs.notice)?,
        })
    }
}

/// Repository identity as resolved from the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMeta {
    /// Immutable numeric id.
    pub id: i64,
    /// `owner/name`, may change over time.
    pub full_name: String,
    /// Default branch of the repository.
    pub default_branch: String,
}

/// A tracked repository with the aggregate of its most recent report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub default_branch: String,
    #[serde(flatten)]
    pub counts: Counts,
    pub updated_at: DateTime<Utc>,
}

/// One ingested report for a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Surrogate row id (a hash may be reported more than once).
    pub id: i64,
    pub repo_id: i64,
    pub branch: String,
    pub pull_request: bool,
    pub commit: String,
    pub short_commit: String,
    pub commit_message: String,
    #[serde(flatten)]
    pub counts: Counts,
    pub latest: bool,
    pub created_at: DateTime<Utc>,
}

/// Counts for a single scanned page within one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlStat {
    pub id: i64,
    pub commit_id: i64,
    pub repo_id: i64,
    pub path: String,
    #[serde(flatten)]
    pub counts: Counts,
}

/// One scanned URL and its counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntry {
    pub path: String,
    pub counts: Counts,
}

impl UrlEntry {
    pub fn new(path: impl Into<String>, counts: Counts) -> Self {
        Self {
            path: path.into(),
            counts,
        }
    }
}

/// Report body posted by the CI pipeline to `/incoming`.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingReport {
    /// `owner/name` of the scanned repository.
    pub repository: String,
    pub branch: String,
    pub commit: String,
    #[serde(default)]
    pub commit_message: String,
    #[serde(default, deserialize_with = "deserialize_pull_request")]
    pub pull_request: bool,
    /// CI commit range such as `abc123...def456`.
    #[serde(default)]
    pub commit_range: Option<String>,
    /// Per-URL results in document order.
    #[serde(default, deserialize_with = "deserialize_url_entries")]
    pub data: Vec<UrlEntry>,
}

impl IncomingReport {
    /// Truncated hash of the reported commit.
    pub fn short_commit(&self) -> String {
        short_hash(&self.commit)
    }

    /// Short hash of the first commit in the range, falling back to the
    /// reported commit.
    pub fn baseline_short_commit(&self) -> String {
        self.commit_range
            .as_deref()
            .and_then(|range| range.split("...").next())
            .map(str::trim)
            .filter(|first| !first.is_empty())
            .map(short_hash)
            .unwrap_or_else(|| self.short_commit())
    }
}

/// First [`SHORT_HASH_LEN`] characters of a commit hash.
pub fn short_hash(commit: &str) -> String {
    commit.chars().take(SHORT_HASH_LEN).collect()
}

#[derive(Deserialize)]
struct PageResult {
    #[serde(default)]
    count: Counts,
}

fn deserialize_url_entries<'de, D>(deserializer: D) -> Result<Vec<UrlEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<UrlEntry>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of URL to scan result")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((url, page)) = map.next_entry::<String, PageResult>()? {
                entries.push(UrlEntry::new(url, page.count));
            }
            Ok(entries)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(EntriesVisitor)
}

fn deserialize_pull_request<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct PullRequestVisitor;

    impl<'de> Visitor<'de> for PullRequestVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean, a pull request number or \"false\"")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            let v = v.trim();
            Ok(!v.is_empty() && !v.eq_ignore_ascii_case("false"))
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(PullRequestVisitor)
}
