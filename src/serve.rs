//! Range-aware delivery of published conversions.
//!
//! Some hosting platforms cap the size of a single response, so large files
//! are never sent whole: a request without `Range` for a file above the
//! threshold gets an empty 206 announcing the size, and every ranged
//! response is clamped to a maximum chunk.

use crate::api::ApiError;
use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderName,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use uade_cache::AudioFormat;
use uade_config::ServingConfig;
use uade_storage::{FileInfo, StorageBackend};

static ARTIFACT_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap());
static RANGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^bytes=(\d*)-(\d*)$").unwrap());

/// Tells the player that multi-range requests will not be honoured.
pub const X_SINGLE_RANGE_ONLY: HeaderName = HeaderName::from_static("x-single-range-only");

/// Formats tried, in order, when resolving an artifact id.
const PREFERENCE: [AudioFormat; 2] = [AudioFormat::Flac, AudioFormat::Wav];

/// An inclusive byte span within a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Parse a single-range `Range` header against a file of `size` bytes.
    ///
    /// Accepts `bytes=s-e`, `bytes=s-` and `bytes=-n` (the last `n` bytes).
    /// `end` is clamped to the file, then the span is shrunk to at most
    /// `max_chunk` bytes. Anything malformed, starting past the end of the
    /// file, or ending before it starts is `None`.
    pub fn parse(header: &str, size: u64, max_chunk: u64) -> Option<Self> {
        let captures = RANGE.captures(header.trim())?;
        let (start, end) = (&captures[1], &captures[2]);
        let last = size.checked_sub(1)?;
        let (start, end) = match (start.is_empty(), end.is_empty()) {
            (true, true) => return None,
            (true, false) => {
                let suffix: u64 = end.parse().ok()?;
                if suffix == 0 {
                    return None;
                }
                (size.saturating_sub(suffix), last)
            },
            (false, open_ended) => {
                let start: u64 = start.parse().ok()?;
                let end = match open_ended {
                    true => last,
                    false => end.parse().ok()?,
                };
                (start, end)
            },
        };
        if start >= size || end < start {
            return None;
        }
        let mut end = end.min(last);
        if max_chunk > 0 && end - start + 1 > max_chunk {
            end = start + max_chunk - 1;
        }
        Some(Self { start, end })
    }

    /// Number of bytes in the span; never zero.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

pub fn is_valid_id(id: &str) -> bool {
    ARTIFACT_ID.is_match(id)
}

/// Locate `{id}.flac` or `{id}.wav` in `store`.
async fn resolve(store: &dyn StorageBackend, id: &str) -> Result<Option<(FileInfo, AudioFormat)>, ApiError> {
    for format in PREFERENCE {
        let key = PathBuf::from(format!("{id}.{}", format.extension()));
        match store.stat(&key).await {
            Ok(info) => return Ok(Some((info, format))),
            Err(err) if err.is_not_found() => continue,
            Err(err) => {
                tracing::error!(error = ?err, %id, "Artifact lookup failed");
                return Err(ApiError::internal("storage error"));
            },
        }
    }
    Ok(None)
}

/// Respond to a play or download request for the artifact `id`.
///
/// `as_attachment` only switches between a download disposition and a
/// cacheable inline response; range handling is identical for both.
#[tracing::instrument(skip(store, config))]
pub async fn serve(
    store: &dyn StorageBackend,
    id: &str,
    range: Option<&str>,
    as_attachment: bool,
    config: &ServingConfig,
) -> Response {
    match respond(store, id, range, as_attachment, config).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn respond(
    store: &dyn StorageBackend,
    id: &str,
    range: Option<&str>,
    as_attachment: bool,
    config: &ServingConfig,
) -> Result<Response, ApiError> {
    if !is_valid_id(id) {
        return Err(ApiError::input("Invalid file_id"));
    }
    let Some((info, format)) = resolve(store, id).await? else {
        return Err(ApiError::not_found("File not found"));
    };
    let size = info.size;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.mime_type()));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    match as_attachment {
        true => {
            let disposition = format!("attachment; filename=\"uade_{id}.{}\"", format.extension());
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(CONTENT_DISPOSITION, value);
            }
        },
        false => {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
        },
    }

    let Some(header) = range else {
        if size > config.large_file_threshold_bytes {
            tracing::debug!(size, "Large file requested without a range; asking for ranges");
            headers.insert(X_SINGLE_RANGE_ONLY, HeaderValue::from_static("true"));
            return Ok((
                StatusCode::PARTIAL_CONTENT,
                headers,
                [(CONTENT_RANGE, format!("bytes 0-0/{size}")), (CONTENT_LENGTH, "0".to_string())],
                Body::empty(),
            )
                .into_response());
        }
        let body = open(store, &info, None).await?;
        return Ok((StatusCode::OK, headers, [(CONTENT_LENGTH, size.to_string())], body).into_response());
    };

    let Some(span) = ByteRange::parse(header, size, config.max_chunk_bytes) else {
        tracing::debug!(range = %header, size, "Unsatisfiable range");
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(CONTENT_RANGE, format!("bytes */{size}"))],
            Body::empty(),
        )
            .into_response());
    };
    let body = open(store, &info, Some(span)).await?;
    headers.insert(X_SINGLE_RANGE_ONLY, HeaderValue::from_static("true"));
    Ok((
        StatusCode::PARTIAL_CONTENT,
        headers,
        [(CONTENT_RANGE, span.content_range(size)), (CONTENT_LENGTH, span.length().to_string())],
        body,
    )
        .into_response())
}

async fn open(store: &dyn StorageBackend, info: &FileInfo, span: Option<ByteRange>) -> Result<Body, ApiError> {
    let range = span.map(|span| span.start..span.end + 1);
    match store.open(&info.path, range).await {
        Ok(stream) => Ok(Body::from_stream(stream)),
        Err(err) => {
            tracing::error!(error = ?err, path = %info.path.display(), "Could not open artifact");
            Err(ApiError::internal("storage error"))
        },
    }
}
