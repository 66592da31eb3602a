use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use std::net::SocketAddr;
use std::time::Duration;

use crate::resolve::{LookupStrategy, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Lookup {
    /// Scan recent artifacts with a given name for one built on the branch
    Artifacts,
    /// Take the first artifact of the newest successful run on the branch
    LatestRun,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "artifact-proxy")]
#[command(version)]
#[command(about = "Serve single files out of remote CI artifact archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  GET /acme/widgets/actions/artifacts/1234567890/report.html   file from a fixed artifact\n  \
  GET /acme/widgets/main/                                      index.html of the newest build on main")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "PROXY_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Credential sent to the upstream API and archive downloads
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Credential under the variable name older deployments set, used when `--token` is empty
    #[arg(long, env = "GITHUB_TOKEN_NOPERMISSIONS", hide = true, hide_env_values = true)]
    pub legacy_token: Option<String>,

    /// Base URL of the upstream REST API
    #[arg(long, env = "PROXY_API_URL", default_value = "https://api.github.com")]
    pub api_url: String,

    /// How the newest build of a branch is found
    #[arg(long, env = "PROXY_LOOKUP", value_enum, default_value_t = Lookup::Artifacts)]
    pub lookup: Lookup,

    /// Artifact name scanned for by the `artifacts` lookup
    #[arg(long, env = "PROXY_ARTIFACT_NAME", default_value = "docs_html")]
    pub artifact_name: String,

    /// Pages of artifacts scanned by the `artifacts` lookup
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: u32,

    /// Upstream attempts per branch resolution
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub resolve_attempts: u32,

    /// Pause between resolution attempts, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub resolve_backoff_ms: u64,

    /// Seconds a branch resolution stays cached
    #[arg(long, default_value_t = 300)]
    pub resolve_ttl: u64,

    /// Cache-Control max-age in seconds for files served by branch
    #[arg(long, default_value_t = 300)]
    pub branch_max_age: u64,

    /// Maximum number of archive readers kept alive
    #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u64).range(1..))]
    pub reader_capacity: u64,

    /// Timeout for each outbound HTTP request, in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,
}

impl Config {
    /// Headers attached to every outbound request.
    pub fn credential_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("token contains characters not allowed in a header")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    fn token(&self) -> Option<&str> {
        [&self.token, &self.legacy_token]
            .into_iter()
            .filter_map(|token| token.as_deref())
            .find(|token| !token.is_empty())
    }

    pub fn lookup_strategy(&self) -> LookupStrategy {
        match self.lookup {
            Lookup::Artifacts => LookupStrategy::ArtifactScan {
                name: self.artifact_name.clone(),
                max_pages: self.max_pages,
            },
            Lookup::LatestRun => LookupStrategy::LatestRun,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.resolve_attempts,
            backoff: Duration::from_millis(self.resolve_backoff_ms),
        }
    }

    pub fn resolve_ttl(&self) -> Duration {
        Duration::from_secs(self.resolve_ttl)
    }

    pub fn branch_max_age(&self) -> Duration {
        Duration::from_secs(self.branch_max_age)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}
