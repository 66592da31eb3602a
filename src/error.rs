use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::error::Error as _;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::resolve::ResolveError;

/// Terminal outcome of a request that could not be served.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("No artifact path provided. Provide a valid artifact url.")]
    NoAddress,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("File not found")]
    EntryNotFound {
        archive_url: String,
        entry: String,
    },

    #[error("Failed to read {entry} from the archive: {reason}")]
    Archive {
        entry: String,
        reason: anyhow::Error,
    },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoAddress | ProxyError::EntryNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::Resolve(
                ResolveError::NoArtifact { .. } | ResolveError::Exhausted { .. },
            ) => StatusCode::NOT_FOUND,
            ProxyError::Resolve(ResolveError::Upstream { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Archive { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match &self {
            ProxyError::NoAddress => debug!("path matches no address form"),
            ProxyError::Resolve(err) => {
                warn!(error = %err, cause = ?err.source(), "resolution failed")
            }
            ProxyError::EntryNotFound { archive_url, entry } => {
                warn!(archive = %archive_url, entry = %entry, "file not found in archive")
            }
            ProxyError::Archive { entry, reason } => {
                error!(entry = %entry, error = %reason, "failed to open archive entry")
            }
        }
        (self.status(), self.to_string()).into_response()
    }
}
