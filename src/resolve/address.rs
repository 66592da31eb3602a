//! Request path parsing.
//!
//! Two shapes are recognised, tried in this order:
//!
//! ```text
//! {owner}/{repo}/.../artifacts/{10-digit id}/{entry path?}   direct
//! {owner}/{repo}/{branch}/{entry path?}                      indirect
//! ```

/// Entry served when the request names a directory.
pub const INDEX_DOCUMENT: &str = "index.html";

/// Length of an upstream artifact identifier.
const ARTIFACT_ID_LEN: usize = 10;

/// Repository an address points into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

/// How the archive is named by the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A concrete, immutable artifact id.
    Artifact(String),
    /// A branch whose newest build has to be looked up.
    Branch(String),
}

/// A parsed request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAddress {
    pub repo: RepoRef,
    pub locator: Locator,
    /// Path inside the archive exactly as requested; may be empty.
    pub entry_path: String,
}

impl RequestAddress {
    pub fn is_direct(&self) -> bool {
        matches!(self.locator, Locator::Artifact(_))
    }

    /// An empty entry path is only served below a trailing slash, so that
    /// relative links inside the index document resolve correctly.
    pub fn needs_trailing_slash(&self, request_path: &str) -> bool {
        self.entry_path.is_empty() && !request_path.ends_with('/')
    }

    /// Name of the archive entry to serve.
    pub fn entry_name(&self) -> String {
        if self.entry_path.is_empty() || self.entry_path.ends_with('/') {
            format!("{}{}", self.entry_path, INDEX_DOCUMENT)
        } else {
            self.entry_path.clone()
        }
    }
}

/// Parse a request path into an address, or `None` when it matches neither shape.
pub fn parse_address(path: &str) -> Option<RequestAddress> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let segments: Vec<&str> = path.split('/').collect();

    parse_direct(&segments).or_else(|| parse_indirect(&segments))
}

fn parse_direct(segments: &[&str]) -> Option<RequestAddress> {
    let repo = repo_ref(segments)?;

    // The last artifacts/<id> pair wins, anywhere after owner and repo
    let marker = (2..segments.len().saturating_sub(1))
        .rev()
        .find(|&i| segments[i] == "artifacts" && is_artifact_id(segments[i + 1]))?;

    Some(RequestAddress {
        repo,
        locator: Locator::Artifact(segments[marker + 1].to_string()),
        entry_path: segments[marker + 2..].join("/"),
    })
}

fn parse_indirect(segments: &[&str]) -> Option<RequestAddress> {
    let repo = repo_ref(segments)?;
    let branch = segments.get(2).filter(|b| !b.is_empty())?;

    Some(RequestAddress {
        repo,
        locator: Locator::Branch(branch.to_string()),
        entry_path: segments[3..].join("/"),
    })
}

fn repo_ref(segments: &[&str]) -> Option<RepoRef> {
    match segments {
        [owner, repo, ..] if !owner.is_empty() && !repo.is_empty() => Some(RepoRef {
            owner: owner.to_string(),
            repo: repo.to_string(),
        }),
        _ => None,
    }
}

fn is_artifact_id(segment: &str) -> bool {
    segment.len() == ARTIFACT_ID_LEN && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Canonical download address of an artifact archive.
///
/// Depends only on the repository and artifact id, never on the entry path.
pub fn artifact_zip_url(api_base: &str, repo: &RepoRef, artifact_id: &str) -> String {
    format!(
        "{}/repos/{}/{}/actions/artifacts/{}/zip",
        api_base.trim_end_matches('/'),
        repo.owner,
        repo.repo,
        artifact_id
    )
}
