//! HTTP client for streaming PDFs to disk.
//!
//! A response is accepted only if it is a success status, declares an
//! `application/pdf` content type, and carries at least one byte. The body is
//! streamed into a `.part` sibling and renamed into place once complete, so a
//! half-written PDF never sits under its final name.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::error::DownloadError;
use super::filename::partial_path;
use crate::config::ConfigurationError;
use crate::user_agent;

/// HTTP connect timeout for PDF hosts.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Whole-request timeout for PDF downloads (large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// HTTP client for PDF downloads.
///
/// Create once and clone freely; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the default download timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::HttpClient`] when client construction fails.
    pub fn new(email: Option<&str>) -> Result<Self, ConfigurationError> {
        Self::with_timeouts(
            email,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a client with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::HttpClient`] when client construction fails.
    pub fn with_timeouts(
        email: Option<&str>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(user_agent::download_user_agent(email))
            .gzip(true)
            .build()
            .map_err(|e| ConfigurationError::http_client("download", e))?;
        Ok(Self { client })
    }

    /// Downloads `url` to `dest`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for network failures, error statuses,
    /// non-PDF or empty responses, and file system failures. No file is left
    /// at `dest` or at its `.part` path on error.
    #[instrument(skip(self), fields(url = %url, dest = %dest.display()))]
    pub async fn fetch_pdf(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/pdf")
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(DownloadError::http_status(url, status.as_u16(), retry_after));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        if !content_type.as_deref().is_some_and(is_pdf_content_type) {
            return Err(DownloadError::not_pdf(url, content_type));
        }

        let part = partial_path(dest);
        let mut file = File::create(&part)
            .await
            .map_err(|e| DownloadError::io(&part, e))?;

        let written = match stream_to_file(&mut file, response, url, &part).await {
            Ok(0) => Err(DownloadError::empty_body(url)),
            other => other,
        };
        drop(file);

        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %part.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, dest).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(DownloadError::io(dest, e));
        }

        debug!(bytes, "PDF written");
        Ok(bytes)
    }
}

/// True for `application/pdf`, ignoring case and parameters.
fn is_pdf_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/pdf"))
}

/// Streams the response body into `file`, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| DownloadError::io(path, e))?;
    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf_content_type() {
        assert!(is_pdf_content_type("application/pdf"));
        assert!(is_pdf_content_type("Application/PDF; charset=binary"));
        assert!(!is_pdf_content_type("text/html; charset=utf-8"));
        assert!(!is_pdf_content_type("application/pdfx"));
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpClient::new(None).is_ok());
    }

    #[test]
    fn test_fetch_invalid_url_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("PMC1.pdf");
        let client = HttpClient::new(None).unwrap();

        let result = tokio_test::block_on(client.fetch_pdf("not-a-valid-url", &dest));

        assert!(matches!(result, Err(DownloadError::Network { .. })));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }
}
