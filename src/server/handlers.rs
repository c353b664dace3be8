//! Route handlers.
//!
//! Missing repositories and commits are answered with a plain 404 message
//! (or an `unknown` badge), never a server error.

use super::{spawn_report, AppState};
use crate::badge::{self, BadgeStatus};
use crate::error::{AppError, Result};
use crate::models::{Commit, IncomingReport, Repository, UrlStat};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::info;

const UNKNOWN_REPO: &str = "I don't know that repo";
const UNKNOWN_COMMIT: &str = "I don't know that commit";
const NO_REPORTS: &str = "No reports run yet";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct RepositoryHistory {
    pub repository: Repository,
    /// Latest commit on the default branch, if any.
    pub latest: Option<Commit>,
    pub commits: Vec<Commit>,
}

#[derive(Serialize)]
pub struct CommitDetail {
    pub repository: String,
    pub commit: Commit,
    pub urls: Vec<UrlStat>,
}

#[derive(Serialize)]
pub struct RepositorySummary {
    pub results: Vec<Repository>,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Accept a CI report and process it in the background.
pub async fn incoming(State(state): State<AppState>, Json(report): Json<IncomingReport>) -> &'static str {
    info!(
        "Received report for {}@{} ({} URLs)",
        report.repository,
        report.short_commit(),
        report.data.len()
    );
    spawn_report(state, report);
    "ok"
}

pub async fn list_repositories(State(state): State<AppState>) -> Result<Response> {
    let repos = state.store.list_repositories().await?;
    if repos.is_empty() {
        return Ok(NO_REPORTS.into_response());
    }
    Ok(Json(repos).into_response())
}

async fn lookup_repository(state: &AppState, owner: &str, name: &str) -> Result<Repository> {
    state
        .store
        .find_repository_by_name(&format!("{}/{}", owner, name))
        .await?
        .ok_or_else(|| AppError::NotFound(UNKNOWN_REPO.to_string()))
}

/// `/repo/{owner}/{name}` serves the commit history; `/repo/{owner}/{name}.svg`
/// serves the badge.
pub async fn repository_page(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Response> {
    if let Some(name) = name.strip_suffix(".svg") {
        return badge_response(&state, &owner, name).await;
    }

    let repository = lookup_repository(&state, &owner, &name).await?;
    let commits = state.store.commits_for_repository(repository.id).await?;
    if commits.is_empty() {
        return Err(AppError::NotFound(UNKNOWN_REPO.to_string()));
    }
    let latest = state
        .store
        .latest_commit(repository.id, &repository.default_branch)
        .await?;

    Ok(Json(RepositoryHistory {
        repository,
        latest,
        commits,
    })
    .into_response())
}

async fn badge_response(state: &AppState, owner: &str, name: &str) -> Result<Response> {
    let errors = match lookup_repository(state, owner, name).await {
        Ok(repo) => {
            // A repository row without commits has no scan data yet.
            if state.store.commit_count(repo.id).await? > 0 {
                Some(repo.counts.error)
            } else {
                None
            }
        }
        Err(AppError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    let status = BadgeStatus::from_errors(errors);
    Ok((
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        badge::render_svg(status),
    )
        .into_response())
}

pub async fn commit_page(
    State(state): State<AppState>,
    Path((owner, name, commit)): Path<(String, String, String)>,
) -> Result<Json<CommitDetail>> {
    let repository = lookup_repository(&state, &owner, &name).await?;
    let commit = state
        .store
        .find_commit(repository.id, &commit)
        .await?
        .ok_or_else(|| AppError::NotFound(UNKNOWN_COMMIT.to_string()))?;
    let urls = state.store.url_stats_for_commit(commit.id).await?;

    Ok(Json(CommitDetail {
        repository: repository.name,
        commit,
        urls,
    }))
}

pub async fn repository_summary(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<RepositorySummary>> {
    let repository = lookup_repository(&state, &owner, &name).await?;
    Ok(Json(RepositorySummary {
        results: vec![repository],
    }))
}

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::super::{build_app, process_report};
    use super::*;
    use crate::github::tests::{config_for, spawn_fake_github};
    use crate::github::GitHubClient;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use std::time::Duration;
    use tower::ServiceExt;

    const FIXTURE: &str = include_str!("../../fixtures/report.json");

    async fn test_state() -> AppState {
        let (api_url, _) = spawn_fake_github().await;
        let github = GitHubClient::new(&config_for(&api_url, None)).unwrap();
        AppState::new(Store::in_memory().unwrap(), github, false, "http://localhost:3000")
    }

    fn app(state: &AppState) -> Router {
        build_app(state.clone(), true, 1024 * 1024)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn post_report(app: &Router, body: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/incoming")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn wait_for_commit(state: &AppState, repo_id: i64) {
        for _ in 0..100 {
            if state.store.commit_count(repo_id).await.unwrap() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("report was not ingested in time");
    }

    #[tokio::test]
    async fn test_empty_dashboard() {
        let state = test_state().await;
        let (status, _, body) = get(&app(&state), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, NO_REPORTS);
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = test_state().await;
        let (status, _, body) = get(&app(&state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn test_webhook_then_read_endpoints() {
        let state = test_state().await;
        let app = app(&state);

        let (status, body) = post_report(&app, FIXTURE).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        wait_for_commit(&state, 42).await;

        let (status, _, body) = get(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        let repos: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(repos[0]["name"], "octo/site");
        assert_eq!(repos[0]["total"], 9);

        let (status, _, body) = get(&app, "/api/octo/site").await;
        assert_eq!(status, StatusCode::OK);
        let summary: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(summary["results"][0]["id"], 42);
        assert_eq!(summary["results"][0]["error"], 3);
        assert_eq!(summary["results"][0]["warning"], 2);
        assert_eq!(summary["results"][0]["notice"], 4);

        let (status, _, body) = get(&app, "/repo/octo/site").await;
        assert_eq!(status, StatusCode::OK);
        let history: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(history["commits"].as_array().unwrap().len(), 1);
        assert_eq!(history["latest"]["short_commit"], "abcdef");
        assert_eq!(history["latest"]["latest"], true);

        let (status, _, body) = get(&app, "/commit/octo/site/abcdef").await;
        assert_eq!(status, StatusCode::OK);
        let detail: serde_json::Value = serde_json::from_str(&body).unwrap();
        let paths: Vec<_> = detail["urls"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["path"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(paths, vec!["/b/", "/a/", "/about/"]);

        let (status, content_type, body) = get(&app, "/repo/octo/site.svg").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("image/svg+xml"));
        assert!(body.contains("accessible: almost"));
    }

    #[tokio::test]
    async fn test_unknown_repository_is_not_an_error() {
        let state = test_state().await;
        let app = app(&state);

        let (status, _, body) = get(&app, "/api/nobody/here").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, UNKNOWN_REPO);

        let (status, _, body) = get(&app, "/repo/nobody/here").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, UNKNOWN_REPO);

        let (status, _, body) = get(&app, "/commit/nobody/here/abcdef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, UNKNOWN_REPO);

        let (status, content_type, body) = get(&app, "/repo/nobody/here.svg").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("image/svg+xml"));
        assert!(body.contains("accessible: unknown"));
    }

    #[tokio::test]
    async fn test_unknown_commit() {
        let state = test_state().await;
        let report: IncomingReport = serde_json::from_str(FIXTURE).unwrap();
        process_report(&state, &report).await.unwrap();

        let (status, _, body) = get(&app(&state), "/commit/octo/site/ffffff").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, UNKNOWN_COMMIT);
    }

    #[tokio::test]
    async fn test_failed_lookup_abandons_report() {
        let state = test_state().await;
        let mut report: IncomingReport = serde_json::from_str(FIXTURE).unwrap();
        report.repository = "octo/missing".to_string();

        let err = process_report(&state, &report).await.unwrap_err();
        assert!(matches!(err, AppError::GitHub(_)));
        assert!(state.store.list_repositories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_webhook_is_rejected() {
        let state = test_state().await;
        let (status, _) = post_report(&app(&state), "{\"repository\": 5}").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let state = test_state().await;
        let (status, _, body) = get(&app(&state), "/nope/at/all/here").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Not found");
    }
}
