//! Client for the upstream build/artifact metadata API.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::address::RepoRef;
use super::retry::Transient;

/// Artifacts fetched per page by the artifact scan.
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },
}

impl Transient for UpstreamError {
    fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Http { .. } => true,
            UpstreamError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Finds the archive holding the newest build output of a branch.
#[async_trait]
pub trait ArtifactApi: Send + Sync {
    /// Download URL of the newest matching archive, or `None` when the
    /// branch has no such archive.
    async fn latest_archive_url(
        &self,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Option<String>, UpstreamError>;
}

/// How "newest build on a branch" is determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Scan recent artifacts with a given name, newest first, and take the
    /// first one produced by a run on the branch.
    ArtifactScan { name: String, max_pages: u32 },
    /// Take the newest successful run on the branch and its first artifact.
    LatestRun,
}

#[derive(Debug, Deserialize)]
struct ArtifactList {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    id: u64,
    #[serde(default)]
    expired: bool,
    archive_download_url: String,
    workflow_run: Option<WorkflowRunRef>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunRef {
    head_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunList {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    id: u64,
    artifacts_url: String,
}

/// GitHub Actions REST API implementation of [`ArtifactApi`].
pub struct GithubApi {
    client: Client,
    base_url: String,
    headers: HeaderMap,
    strategy: LookupStrategy,
}

impl GithubApi {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        mut headers: HeaderMap,
        strategy: LookupStrategy,
    ) -> Self {
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers,
            strategy,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let http = |source| UpstreamError::Http {
            url: url.to_string(),
            source,
        };

        let resp = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await
            .map_err(http)?;

        if !resp.status().is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: resp.status(),
            });
        }

        resp.json().await.map_err(http)
    }

    async fn scan_artifacts(
        &self,
        repo: &RepoRef,
        branch: &str,
        name: &str,
        max_pages: u32,
    ) -> Result<Option<String>, UpstreamError> {
        let url = format!(
            "{}/repos/{}/{}/actions/artifacts",
            self.base_url, repo.owner, repo.repo
        );

        for page in 1..=max_pages {
            let list: ArtifactList = self
                .get_json(
                    &url,
                    &[
                        ("name", name.to_string()),
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;

            if list.artifacts.is_empty() {
                break;
            }

            let found = list.artifacts.into_iter().find(|artifact| {
                !artifact.expired
                    && artifact
                        .workflow_run
                        .as_ref()
                        .and_then(|run| run.head_branch.as_deref())
                        == Some(branch)
            });
            if let Some(artifact) = found {
                debug!(artifact_id = artifact.id, page, "artifact found on branch");
                return Ok(Some(artifact.archive_download_url));
            }
        }

        Ok(None)
    }

    async fn latest_run(
        &self,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Option<String>, UpstreamError> {
        let url = format!(
            "{}/repos/{}/{}/actions/runs",
            self.base_url, repo.owner, repo.repo
        );
        let runs: RunList = self
            .get_json(
                &url,
                &[
                    ("branch", branch.to_string()),
                    ("status", "success".to_string()),
                    ("per_page", "1".to_string()),
                ],
            )
            .await?;

        let Some(run) = runs.workflow_runs.into_iter().next() else {
            return Ok(None);
        };

        let artifacts: ArtifactList = self.get_json(&run.artifacts_url, &[]).await?;
        let archive = artifacts
            .artifacts
            .into_iter()
            .find(|artifact| !artifact.expired)
            .map(|artifact| artifact.archive_download_url);
        debug!(
            run_id = run.id,
            found = archive.is_some(),
            "latest run inspected"
        );
        Ok(archive)
    }
}

#[async_trait]
impl ArtifactApi for GithubApi {
    async fn latest_archive_url(
        &self,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Option<String>, UpstreamError> {
        match &self.strategy {
            LookupStrategy::ArtifactScan { name, max_pages } => {
                self.scan_artifacts(repo, branch, name, *max_pages).await
            }
            LookupStrategy::LatestRun => self.latest_run(repo, branch).await,
        }
    }
}
