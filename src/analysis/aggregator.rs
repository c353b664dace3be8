//! Report ingestion and count aggregation.
//!
//! This module turns one incoming report into persisted repository, commit
//! and per-URL rows, and provides the pure helpers used along the way.

use crate::error::{AppError, Result};
use crate::models::{short_hash, Counts, IncomingReport, RepoMeta, UrlEntry};
use crate::store::{self, NewCommit, Store};
use std::collections::HashMap;
use tracing::{debug, info};
use url::Url;

/// Sum the counts of every entry, rejecting totals that overflow.
pub fn sum_counts(entries: &[UrlEntry]) -> Result<Counts> {
    entries.iter().try_fold(Counts::default(), |acc, entry| {
        acc.checked_add(entry.counts).ok_or_else(|| {
            AppError::InvalidPayload(format!("counts overflow at {}", entry.path))
        })
    })
}

/// Reduce a scanned URL to its path component.
///
/// Absolute URLs keep only their path; relative keys are resolved against a
/// dummy base so query strings and fragments are dropped the same way.
pub fn url_path(raw: &str) -> String {
    let parsed = Url::parse(raw).or_else(|_| {
        Url::parse("http://localhost/").and_then(|base| base.join(raw.trim()))
    });

    match parsed {
        Ok(url) if url.cannot_be_a_base() => raw.to_string(),
        Ok(url) => {
            let path = url.path();
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        }
        Err(_) => raw.to_string(),
    }
}

/// Drop repeated report keys, then reduce each key to its path.
///
/// A later entry with the same key replaces the earlier one's counts but
/// keeps the earlier position. Distinct keys that share a path (such as
/// `/search?q=a` and `/search?q=b`) stay separate entries.
pub fn normalize_entries(entries: &[UrlEntry]) -> Vec<UrlEntry> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut deduped: Vec<UrlEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        match positions.get(entry.path.as_str()) {
            Some(&idx) => deduped[idx].counts = entry.counts,
            None => {
                positions.insert(entry.path.as_str(), deduped.len());
                deduped.push(entry.clone());
            }
        }
    }

    deduped
        .into_iter()
        .map(|entry| UrlEntry::new(url_path(&entry.path), entry.counts))
        .collect()
}

/// What an ingestion wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub repo_id: i64,
    pub commit_id: i64,
    pub short_commit: String,
    pub overall: Counts,
    pub urls: usize,
}

/// Writes reports into the store.
#[derive(Clone)]
pub struct Aggregator {
    store: Store,
}

impl Aggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Persist one report for the repository described by `meta`.
    ///
    /// Counts that overflow or do not fit the database reject the report
    /// before anything is written. The repository row is then upserted on
    /// its own. Everything after that (commit row, latest flag, URL rows,
    /// totals, repository totals) is one transaction: on error nothing from
    /// that part is kept.
    pub async fn ingest(&self, meta: &RepoMeta, report: &IncomingReport) -> Result<IngestOutcome> {
        let entries = normalize_entries(&report.data);
        if entries.len() != report.data.len() {
            debug!(
                "Collapsed {} URL entries into {} keys",
                report.data.len(),
                entries.len()
            );
        }
        let overall = sum_counts(&entries)?;
        store::check_counts(&overall)?;

        self.store.upsert_repository(meta.clone(), None).await?;

        let new_commit = NewCommit {
            repo_id: meta.id,
            branch: report.branch.clone(),
            pull_request: report.pull_request,
            commit: report.commit.clone(),
            short_commit: short_hash(&report.commit),
            commit_message: report.commit_message.clone(),
        };
        let meta_owned = meta.clone();

        let outcome = self
            .store
            .transaction(move |tx| {
                let commit_id = store::insert_commit(tx, &new_commit)?;
                let cleared = store::clear_latest(tx, new_commit.repo_id, &new_commit.branch)?;
                debug!(
                    "Cleared latest flag on {} commit(s) of {}",
                    cleared, new_commit.branch
                );

                for entry in &entries {
                    store::insert_url_stat(
                        tx,
                        commit_id,
                        new_commit.repo_id,
                        &entry.path,
                        &entry.counts,
                    )?;
                }

                store::finalize_commit(tx, commit_id, &overall)?;
                store::upsert_repository(tx, &meta_owned, Some(overall))?;

                Ok(IngestOutcome {
                    repo_id: new_commit.repo_id,
                    commit_id,
                    short_commit: new_commit.short_commit.clone(),
                    overall,
                    urls: entries.len(),
                })
            })
            .await?;

        info!(
            "Recorded {}@{} on {}: {} URLs, {} errors, {} warnings, {} notices",
            meta.full_name,
            outcome.short_commit,
            report.branch,
            outcome.urls,
            outcome.overall.error,
            outcome.overall.warning,
            outcome.overall.notice
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RepoMeta {
        RepoMeta {
            id: 42,
            full_name: "octo/site".to_string(),
            default_branch: "main".to_string(),
        }
    }

    fn report(branch: &str, commit: &str, data: Vec<UrlEntry>) -> IncomingReport {
        IncomingReport {
            repository: "octo/site".to_string(),
            branch: branch.to_string(),
            commit: commit.to_string(),
            commit_message: "update".to_string(),
            pull_request: false,
            commit_range: None,
            data,
        }
    }

    fn two_urls() -> Vec<UrlEntry> {
        vec![
            UrlEntry::new("/a", Counts::new(5, 2, 1, 2)),
            UrlEntry::new("/b", Counts::new(3, 0, 1, 2)),
        ]
    }

    #[test]
    fn test_sum_counts() {
        assert_eq!(sum_counts(&two_urls()).unwrap(), Counts::new(8, 2, 2, 4));
        assert_eq!(sum_counts(&[]).unwrap(), Counts::default());
    }

    #[test]
    fn test_sum_counts_overflow_is_invalid_payload() {
        let entries = vec![
            UrlEntry::new("/a", Counts::new(u64::MAX, 0, 0, 0)),
            UrlEntry::new("/b", Counts::new(1, 0, 0, 0)),
        ];
        let err = sum_counts(&entries).unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(_)));
    }

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("http://localhost:4000/about/?x=1#top"), "/about/");
        assert_eq!(url_path("https://example.com"), "/");
        assert_eq!(url_path("/docs/index.html"), "/docs/index.html");
        assert_eq!(url_path("docs/"), "/docs/");
    }

    #[test]
    fn test_normalize_entries_last_write_wins() {
        let entries = vec![
            UrlEntry::new("http://localhost/a", Counts::new(1, 1, 0, 0)),
            UrlEntry::new("http://localhost/b", Counts::new(2, 0, 2, 0)),
            UrlEntry::new("http://localhost/a", Counts::new(9, 9, 0, 0)),
            UrlEntry::new("http://localhost/a?page=2", Counts::new(4, 4, 0, 0)),
        ];

        let normalized = normalize_entries(&entries);

        assert_eq!(
            normalized,
            vec![
                UrlEntry::new("/a", Counts::new(9, 9, 0, 0)),
                UrlEntry::new("/b", Counts::new(2, 0, 2, 0)),
                UrlEntry::new("/a", Counts::new(4, 4, 0, 0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_ingest_two_url_scenario() {
        let store = Store::in_memory().unwrap();
        let aggregator = Aggregator::new(store.clone());

        let outcome = aggregator
            .ingest(&meta(), &report("main", "abcdef1234", two_urls()))
            .await
            .unwrap();

        assert_eq!(outcome.overall, Counts::new(8, 2, 2, 4));
        assert_eq!(outcome.short_commit, "abcdef");
        assert_eq!(outcome.urls, 2);

        let commit = store.find_commit(42, "abcdef1234").await.unwrap().unwrap();
        assert_eq!(commit.counts, Counts::new(8, 2, 2, 4));
        assert!(commit.latest);
        assert_eq!(commit.short_commit, "abcdef");

        let repo = store.find_repository_by_name("octo/site").await.unwrap().unwrap();
        assert_eq!(repo.counts, Counts::new(8, 2, 2, 4));
        assert_eq!(repo.default_branch, "main");

        let stats = store.url_stats_for_commit(commit.id).await.unwrap();
        assert_eq!(stats.len(), 2);
        let summed = stats
            .iter()
            .try_fold(Counts::default(), |acc, s| acc.checked_add(s.counts))
            .unwrap();
        assert_eq!(summed, commit.counts);
    }

    #[tokio::test]
    async fn test_only_newest_commit_is_latest() {
        let store = Store::in_memory().unwrap();
        let aggregator = Aggregator::new(store.clone());

        for hash in ["111111aaaa", "222222bbbb", "333333cccc"] {
            aggregator
                .ingest(&meta(), &report("main", hash, two_urls()))
                .await
                .unwrap();
        }
        aggregator
            .ingest(&meta(), &report("feature", "444444dddd", vec![]))
            .await
            .unwrap();

        let commits = store.commits_for_repository(42).await.unwrap();
        let main_latest: Vec<_> = commits
            .iter()
            .filter(|c| c.branch == "main" && c.latest)
            .collect();
        assert_eq!(main_latest.len(), 1);
        assert_eq!(main_latest[0].commit, "333333cccc");

        let feature = store.latest_commit(42, "feature").await.unwrap().unwrap();
        assert_eq!(feature.commit, "444444dddd");
    }

    #[tokio::test]
    async fn test_reingest_updates_repository_in_place() {
        let store = Store::in_memory().unwrap();
        let aggregator = Aggregator::new(store.clone());

        aggregator
            .ingest(&meta(), &report("main", "abcdef1234", two_urls()))
            .await
            .unwrap();
        aggregator
            .ingest(
                &meta(),
                &report("main", "fedcba4321", vec![UrlEntry::new("/a", Counts::new(1, 0, 0, 1))]),
            )
            .await
            .unwrap();

        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].counts, Counts::new(1, 0, 0, 1));
    }

    #[tokio::test]
    async fn test_empty_payload_yields_zero_counts() {
        let store = Store::in_memory().unwrap();
        let aggregator = Aggregator::new(store.clone());

        aggregator
            .ingest(&meta(), &report("main", "abcdef1234", two_urls()))
            .await
            .unwrap();
        let outcome = aggregator
            .ingest(&meta(), &report("main", "0000001234", vec![]))
            .await
            .unwrap();

        assert_eq!(outcome.overall, Counts::default());
        let commit = store.latest_commit(42, "main").await.unwrap().unwrap();
        assert_eq!(commit.counts, Counts::default());
        assert_eq!(commit.id, outcome.commit_id);
        let repo = store.find_repository_by_name("octo/site").await.unwrap().unwrap();
        assert_eq!(repo.counts, Counts::default());
    }

    #[tokio::test]
    async fn test_pages_sharing_a_path_are_both_counted() {
        let store = Store::in_memory().unwrap();
        let aggregator = Aggregator::new(store.clone());

        let data = vec![
            UrlEntry::new("http://localhost:4000/search?q=a", Counts::new(5, 5, 0, 0)),
            UrlEntry::new("http://localhost:4000/search?q=b", Counts::new(2, 1, 1, 0)),
        ];
        let outcome = aggregator
            .ingest(&meta(), &report("main", "abcdef1234", data))
            .await
            .unwrap();

        assert_eq!(outcome.urls, 2);
        assert_eq!(outcome.overall, Counts::new(7, 6, 1, 0));
        let stats = store.url_stats_for_commit(outcome.commit_id).await.unwrap();
        let paths: Vec<_> = stats.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/search", "/search"]);
    }

    #[tokio::test]
    async fn test_repeated_key_is_counted_once() {
        let store = Store::in_memory().unwrap();
        let aggregator = Aggregator::new(store.clone());

        let data = vec![
            UrlEntry::new("http://localhost:4000/a", Counts::new(5, 5, 0, 0)),
            UrlEntry::new("http://localhost:4000/a", Counts::new(2, 1, 1, 0)),
        ];
        let outcome = aggregator
            .ingest(&meta(), &report("main", "abcdef1234", data))
            .await
            .unwrap();

        assert_eq!(outcome.urls, 1);
        assert_eq!(outcome.overall, Counts::new(2, 1, 1, 0));
        let stats = store.url_stats_for_commit(outcome.commit_id).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].path, "/a");
    }

    #[tokio::test]
    async fn test_count_too_large_to_store_rejects_report() {
        let store = Store::in_memory().unwrap();
        let aggregator = Aggregator::new(store.clone());

        let data = vec![UrlEntry::new("/a", Counts::new(1 << 63, 0, 0, 0))];
        let err = aggregator
            .ingest(&meta(), &report("main", "abcdef1234", data))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidPayload(_)));
        assert!(store.find_repository_by_name("octo/site").await.unwrap().is_none());
        assert_eq!(store.commit_count(42).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overflowing_totals_reject_report() {
        let store = Store::in_memory().unwrap();
        let aggregator = Aggregator::new(store.clone());

        let data = vec![
            UrlEntry::new("/a", Counts::new(u64::MAX, 0, 0, 0)),
            UrlEntry::new("/b", Counts::new(1, 0, 0, 0)),
        ];
        let err = aggregator
            .ingest(&meta(), &report("main", "abcdef1234", data))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidPayload(_)));
        assert_eq!(store.commit_count(42).await.unwrap(), 0);
    }
}
