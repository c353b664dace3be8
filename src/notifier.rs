//! Commit status notifications.
//!
//! After a report is stored, the notifier compares its error count with the
//! baseline commit of the CI range and posts the difference as a GitHub
//! commit status. A missing baseline skips the notification.

use crate::analysis::IngestOutcome;
use crate::error::Result;
use crate::github::{GitHubClient, StatusUpdate};
use crate::models::IncomingReport;
use crate::store::Store;
use std::sync::Arc;
use tracing::{debug, info};

pub const PUSH_CONTEXT: &str = "continuous-integration/accessboard/push";
pub const PULL_CONTEXT: &str = "continuous-integration/accessboard/pull";

/// Status context for a push or pull-request build.
pub fn status_context(pull_request: bool) -> &'static str {
    if pull_request {
        PULL_CONTEXT
    } else {
        PUSH_CONTEXT
    }
}

/// Describe the change in error count from `baseline` to `current`.
///
/// The reported number is always the magnitude of the change; the verb
/// carries the direction. No change counts as a decrease of 0.
pub fn describe_change(baseline: u64, current: u64) -> String {
    if current <= baseline {
        format!("decreased accessibility errors by {}", baseline - current)
    } else {
        format!("increased accessibility errors by {}", current - baseline)
    }
}

pub struct Notifier {
    github: Arc<GitHubClient>,
    store: Store,
    public_url: String,
}

impl Notifier {
    pub fn new(github: Arc<GitHubClient>, store: Store, public_url: &str) -> Self {
        Self {
            github,
            store,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the status for a stored report, or `None` if no baseline
    /// commit is known.
    pub async fn build_status(
        &self,
        report: &IncomingReport,
        outcome: &IngestOutcome,
    ) -> Result<Option<StatusUpdate>> {
        let baseline_short = report.baseline_short_commit();
        let baseline = self
            .store
            .find_prior_commit_by_short(outcome.repo_id, &baseline_short, outcome.commit_id)
            .await?;

        let Some(baseline) = baseline else {
            debug!(
                "No stored commit {} for {}; skipping status update",
                baseline_short, report.repository
            );
            return Ok(None);
        };

        Ok(Some(StatusUpdate {
            state: "success".to_string(),
            target_url: format!(
                "{}/commit/{}/{}",
                self.public_url, report.repository, report.commit
            ),
            description: describe_change(baseline.counts.error, outcome.overall.error),
            context: status_context(report.pull_request).to_string(),
        }))
    }

    /// Post the status for a stored report. Returns whether one was sent.
    pub async fn notify(&self, report: &IncomingReport, outcome: &IngestOutcome) -> Result<bool> {
        let Some(status) = self.build_status(report, outcome).await? else {
            return Ok(false);
        };

        self.github
            .post_status(&report.repository, &report.commit, &status)
            .await?;
        info!("{}: {}", report.repository, status.description);
        Ok(true)
    }
}
