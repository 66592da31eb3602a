use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use mime_guess::mime;
use tracing::{error, info, instrument};

use crate::error::ProxyError;
use crate::resolve::parse_address;

use super::AppState;

/// Serve one archive entry.
///
/// Parses the path, redirects to the slash form if needed, resolves the
/// archive, reuses or builds its reader, looks up the entry and streams it.
#[instrument(skip_all, fields(path = %uri.path()))]
pub(super) async fn serve_entry(
    State(state): State<AppState>,
    uri: Uri,
    Path(path): Path<String>,
) -> Result<Response, ProxyError> {
    let address = parse_address(&path).ok_or(ProxyError::NoAddress)?;

    if address.needs_trailing_slash(uri.path()) {
        let location = match uri.query() {
            Some(query) => format!("{}/?{}", uri.path(), query),
            None => format!("{}/", uri.path()),
        };
        let headers = [(header::LOCATION, location)];
        return Ok((StatusCode::FOUND, headers).into_response());
    }

    let entry_name = address.entry_name();
    let resolved = state.resolver().resolve(&address).await?;
    let archive = state.readers().get_or_create(&resolved.archive_url);

    // An unreadable index is reported the same way as a missing entry
    let entry = archive.find(&entry_name).await.unwrap_or_else(|err| {
        error!(archive = %resolved.archive_url, error = %err, "failed to list archive entries");
        None
    });
    let Some(entry) = entry else {
        return Err(ProxyError::EntryNotFound {
            archive_url: resolved.archive_url,
            entry: entry_name,
        });
    };

    let stream = archive
        .open(&entry)
        .await
        .map_err(|reason| ProxyError::Archive {
            entry: entry_name.clone(),
            reason,
        })?;

    info!(
        archive = %resolved.archive_url,
        entry = %entry_name,
        size = entry.uncompressed_size,
        "streaming entry"
    );

    let headers = [
        (header::CONTENT_TYPE, content_type_for(&entry_name)),
        (header::CACHE_CONTROL, resolved.cache_policy.header_value()),
        (header::CONTENT_LENGTH, entry.uncompressed_size.to_string()),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}

pub(super) async fn no_address() -> ProxyError {
    ProxyError::NoAddress
}

/// `Content-Type` for an entry, guessed from its extension.
///
/// Textual types carry an explicit UTF-8 charset; unknown extensions fall
/// back to `application/octet-stream`.
pub fn content_type_for(path: &str) -> String {
    let guessed = mime_guess::from_path(path).first_or_octet_stream();
    let textual = guessed.type_() == mime::TEXT
        || guessed.subtype() == mime::JAVASCRIPT
        || guessed.subtype() == mime::JSON
        || guessed.subtype() == mime::XML;

    if textual && guessed.get_param(mime::CHARSET).is_none() {
        format!("{guessed}; charset=utf-8")
    } else {
        guessed.to_string()
    }
}
