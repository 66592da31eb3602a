//! In-process stand-ins for the upstream API and archive storage.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;

use artifact_proxy::{AppState, Config, build_router};

pub const TOKEN: &str = "test-token";

/// Fake upstream: artifact listing plus range-capable archive downloads.
pub struct Upstream {
    pub base: String,
    /// artifact id -> archive bytes
    archives: HashMap<String, Vec<u8>>,
    /// (branch, artifact id), newest first
    builds: Vec<(String, String)>,
    fail_listing: bool,
    pub list_calls: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub head_calls: AtomicUsize,
    pub range_calls: AtomicUsize,
}

#[derive(Default)]
pub struct UpstreamBuilder {
    archives: HashMap<String, Vec<u8>>,
    builds: Vec<(String, String)>,
    fail_listing: bool,
}

impl UpstreamBuilder {
    pub fn archive(mut self, id: &str, data: Vec<u8>) -> Self {
        self.archives.insert(id.to_string(), data);
        self
    }

    pub fn build_on(mut self, branch: &str, id: &str) -> Self {
        self.builds.push((branch.to_string(), id.to_string()));
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub async fn start(self) -> Arc<Upstream> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let upstream = Arc::new(Upstream {
            base,
            archives: self.archives,
            builds: self.builds,
            fail_listing: self.fail_listing,
            list_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            head_calls: AtomicUsize::new(0),
            range_calls: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route(
                "/repos/{owner}/{repo}/actions/artifacts",
                get(list_artifacts),
            )
            .route("/repos/{owner}/{repo}/actions/runs", get(list_runs))
            .route(
                "/repos/{owner}/{repo}/actions/runs/{run_id}/artifacts",
                get(run_artifacts),
            )
            .route(
                "/repos/{owner}/{repo}/actions/artifacts/{id}/zip",
                get(download),
            )
            .with_state(Arc::clone(&upstream));

        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        upstream
    }
}

impl Upstream {
    pub fn builder() -> UpstreamBuilder {
        UpstreamBuilder::default()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }
}

impl Upstream {
    fn artifact_json(&self, owner: &str, repo: &str, branch: &str, id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id.parse::<u64>().unwrap(),
            "name": "docs_html",
            "expired": false,
            "archive_download_url": format!(
                "{}/repos/{owner}/{repo}/actions/artifacts/{id}/zip",
                self.base
            ),
            "workflow_run": { "id": id.parse::<u64>().unwrap(), "head_branch": branch },
        })
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {TOKEN}").as_str())
}

async fn list_artifacts(
    State(upstream): State<Arc<Upstream>>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    upstream.list_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if upstream.fail_listing {
        return StatusCode::BAD_GATEWAY.into_response();
    }

    // Everything fits on the first page
    let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let artifacts: Vec<_> = if page == 1 {
        upstream
            .builds
            .iter()
            .map(|(branch, id)| upstream.artifact_json(&owner, &repo, branch, id))
            .collect()
    } else {
        Vec::new()
    };

    let body = serde_json::json!({ "total_count": artifacts.len(), "artifacts": artifacts });
    Json(body).into_response()
}

/// Newest successful run on `branch`; each build's run id is its artifact id.
async fn list_runs(
    State(upstream): State<Arc<Upstream>>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    upstream.run_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if upstream.fail_listing {
        return StatusCode::BAD_GATEWAY.into_response();
    }

    let branch = query.get("branch").cloned().unwrap_or_default();
    let runs: Vec<_> = upstream
        .builds
        .iter()
        .filter(|(b, _)| *b == branch)
        .take(1)
        .map(|(_, id)| {
            serde_json::json!({
                "id": id.parse::<u64>().unwrap(),
                "head_branch": branch,
                "artifacts_url": format!(
                    "{}/repos/{owner}/{repo}/actions/runs/{id}/artifacts",
                    upstream.base
                ),
            })
        })
        .collect();

    let body = serde_json::json!({ "total_count": runs.len(), "workflow_runs": runs });
    Json(body).into_response()
}

async fn run_artifacts(
    State(upstream): State<Arc<Upstream>>,
    Path((owner, repo, run_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    upstream.run_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let artifacts: Vec<_> = upstream
        .builds
        .iter()
        .filter(|(_, id)| *id == run_id)
        .take(1)
        .map(|(branch, id)| upstream.artifact_json(&owner, &repo, branch, id))
        .collect();

    let body = serde_json::json!({ "total_count": artifacts.len(), "artifacts": artifacts });
    Json(body).into_response()
}

async fn download(
    State(upstream): State<Arc<Upstream>>,
    method: Method,
    Path((_owner, _repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if method == Method::HEAD {
        upstream.head_calls.fetch_add(1, Ordering::SeqCst);
    } else {
        upstream.range_calls.fetch_add(1, Ordering::SeqCst);
    }
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(data) = upstream.archives.get(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(parse_range);

    match range {
        Some((start, end)) if start < data.len() => {
            let end = end.min(data.len() - 1);
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (
                        header::CONTENT_RANGE,
                        format!("bytes {start}-{end}/{}", data.len()),
                    ),
                ],
                Body::from(data[start..=end].to_vec()),
            )
                .into_response()
        }
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => (
            [(header::ACCEPT_RANGES, "bytes")],
            Body::from(data.clone()),
        )
            .into_response(),
    }
}

/// `start-end` of a `bytes=start-end` header, both ends inclusive.
fn parse_range(spec: &str) -> Option<(usize, usize)> {
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Build an archive from `(name, contents, deflate)` triples.
pub fn build_zip(files: &[(&str, &[u8], bool)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents, deflate) in files {
        let method = if *deflate {
            zip::CompressionMethod::Deflated
        } else {
            zip::CompressionMethod::Stored
        };
        let options = zip::write::SimpleFileOptions::default().compression_method(method);
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Start the proxy against `upstream`, returning its base URL and state.
pub async fn start_proxy(upstream: &Upstream) -> (String, AppState) {
    start_proxy_with(upstream, &[]).await
}

/// Like [`start_proxy`], with extra command line flags.
pub async fn start_proxy_with(upstream: &Upstream, args: &[&str]) -> (String, AppState) {
    let mut argv = vec![
        "artifact-proxy",
        "--token",
        TOKEN,
        "--api-url",
        upstream.base.as_str(),
        "--bind",
        "127.0.0.1:0",
    ];
    argv.extend_from_slice(args);
    let config = Config::try_parse_from(argv).unwrap();
    let state = AppState::from_config(&config).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = build_router(state.clone());
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    (base, state)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
