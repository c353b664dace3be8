//! GitHub REST API client.
//!
//! Two calls are needed: resolving a repository's numeric id and default
//! branch from its `owner/name`, and posting a commit status.

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::models::RepoMeta;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Body of `POST /repos/{owner}/{repo}/statuses/{sha}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub state: String,
    pub target_url: String,
    pub description: String,
    pub context: String,
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

/// Check that `name` looks like `owner/repo`.
pub fn validate_full_name(name: &str) -> Result<()> {
    let mut parts = name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => Ok(()),
        _ => Err(AppError::InvalidPayload(format!(
            "repository must be 'owner/name', got '{}'",
            name
        ))),
    }
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/vnd.github+json");
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Resolve `owner/name` to the repository's id and default branch.
    pub async fn fetch_repository(&self, full_name: &str) -> Result<RepoMeta> {
        validate_full_name(full_name)?;
        let url = format!("{}/repos/{}", self.api_url, full_name);
        debug!("Fetching repository metadata from {}", url);

        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::GitHub(format!("request for {} timed out", full_name))
                } else if e.is_connect() {
                    AppError::GitHub(format!("cannot connect to {}", self.api_url))
                } else {
                    AppError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GitHub(format!(
                "lookup of {} failed with {}: {}",
                full_name, status, body
            )));
        }

        let meta: RepoMeta = response
            .json()
            .await
            .map_err(|e| AppError::GitHub(format!("unexpected repository JSON: {}", e)))?;
        info!("Resolved {} to repository id {}", full_name, meta.id);

        Ok(meta)
    }

    /// Post a commit status. Requires a token.
    pub async fn post_status(&self, full_name: &str, sha: &str, status: &StatusUpdate) -> Result<()> {
        if self.token.is_none() {
            return Err(AppError::Config(
                "a GitHub token is required to post commit statuses".to_string(),
            ));
        }
        validate_full_name(full_name)?;

        let url = format!("{}/repos/{}/statuses/{}", self.api_url, full_name, sha);
        let response = self
            .authorized(self.http.post(&url))
            .json(status)
            .send()
            .await?;

        if !response.status().is_success() {
            let code = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GitHub(format!(
                "status update for {}@{} failed with {}: {}",
                full_name, sha, code, body
            )));
        }

        info!("Posted commit status for {}@{}: got {}", full_name, sha, response.status());
        Ok(())
    }
}
