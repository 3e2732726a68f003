use crate::error::{ErrorKind, Result};
use crate::guard::{SafeUrl, UrlGuard};
use crate::sanitize::{FALLBACK_FILENAME, disposition_filename, sanitize_filename, sanitize_for_log};
use exn::ResultExt;
use reqwest::header::{CONTENT_DISPOSITION, LOCATION};
use reqwest::redirect::Policy;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use url::Url;

const USER_AGENT: &str = concat!("uade-web/", env!("CARGO_PKG_VERSION"));

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Where the body was written (inside the requested directory).
    pub path: PathBuf,
    pub bytes: u64,
    /// Sanitized file name the body was saved under.
    pub filename: String,
    /// URL that finally answered, after redirects.
    pub final_url: Url,
}

/// Downloads modules from validated URLs.
///
/// Redirects are followed by hand so that every hop is re-validated, and
/// each request goes out on a client pinned to the addresses the guard
/// approved. A DNS answer that changes between validation and connection
/// therefore cannot redirect the request to an internal host.
#[derive(Debug, Clone)]
pub struct Fetcher {
    guard: UrlGuard,
    timeout: Duration,
    max_bytes: u64,
    max_redirects: usize,
}

impl Fetcher {
    pub fn new(guard: UrlGuard, timeout: Duration, max_bytes: u64, max_redirects: usize) -> Self {
        Self {
            guard,
            timeout,
            max_bytes,
            max_redirects,
        }
    }

    pub fn guard(&self) -> &UrlGuard {
        &self.guard
    }

    /// Download `raw` into `dir` (which must exist), choosing a file name that
    /// does not collide with anything already there.
    #[instrument(skip(self, raw, dir), fields(url = %sanitize_for_log(raw)))]
    pub async fn fetch_into(&self, raw: &str, dir: &Path) -> Result<Fetched> {
        let mut current = self.guard.validate(raw).await?;
        let mut hops = 0;
        let response = loop {
            let response = self.send(&current).await?;
            if !response.status().is_redirection() {
                break response;
            }
            hops += 1;
            if hops > self.max_redirects {
                exn::bail!(ErrorKind::TooManyRedirects(self.max_redirects));
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| exn::Exn::from(ErrorKind::Network("redirect without a location".to_string())))?;
            let next = current.url().join(location).map_err(|_| ErrorKind::Unsafe("invalid redirect".to_string()))?;
            tracing::debug!(hop = hops, to = %sanitize_for_log(next.as_str()), "Following redirect");
            current = self.guard.validate(next.as_str()).await?;
        };

        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Status(status.as_u16()));
        }
        if let Some(length) = response.content_length()
            && length > self.max_bytes
        {
            exn::bail!(ErrorKind::TooLarge(self.max_bytes));
        }
        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| filename_from_url(current.url()));
        let path = unique_path(dir, &filename).await;
        let bytes = self.stream_to(response, &path).await?;
        tracing::info!(bytes, filename = %filename, "Downloaded");
        Ok(Fetched {
            path,
            bytes,
            filename,
            final_url: current.url().clone(),
        })
    }

    async fn send(&self, target: &SafeUrl) -> Result<reqwest::Response> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(self.timeout)
            .user_agent(USER_AGENT);
        if let Some(domain) = target.domain() {
            builder = builder.resolve_to_addrs(domain, target.addrs());
        }
        let client = builder.build().map_err(|e| ErrorKind::Network(e.to_string()))?;
        client.get(target.url().clone()).send().await.map_err(|e| self.map_reqwest(e).into())
    }

    async fn stream_to(&self, mut response: reqwest::Response, path: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(path).await.map_err(|e| ErrorKind::Io(e.to_string()))?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_reqwest(e))? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                exn::bail!(ErrorKind::TooLarge(self.max_bytes));
            }
            file.write_all(&chunk).await.map_err(|e| ErrorKind::Io(e.to_string()))?;
        }
        file.flush().await.or_raise(|| ErrorKind::Io(format!("flushing {}", path.display())))?;
        Ok(written)
    }

    fn map_reqwest(&self, err: reqwest::Error) -> ErrorKind {
        if err.is_timeout() {
            return ErrorKind::Timeout(self.timeout);
        }
        // Strip the URL: it may carry tokens and is already in the span.
        ErrorKind::Network(err.without_url().to_string())
    }
}

/// Name for a download with no `Content-Disposition`: the fragment when it
/// looks like a file name (`...?id=3#mod.tune`), else the last path segment.
pub(crate) fn filename_from_url(url: &Url) -> String {
    let fragment = url.fragment().filter(|f| f.contains('.')).map(percent_decode);
    let segment = url.path_segments().and_then(|mut s| s.next_back()).filter(|s| !s.is_empty()).map(percent_decode);
    fragment.or(segment).map(|name| sanitize_filename(&name)).unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn percent_decode(raw: &str) -> String {
    url::form_urlencoded::parse(format!("n={}", raw.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| raw.to_string())
}

async fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{n}_{filename}"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}
