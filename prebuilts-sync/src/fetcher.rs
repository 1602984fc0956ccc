//! HTTP retrieval of metadata documents and artifacts into staging storage.
//!
//! ## `fetch`: staging protocol
//!
//! 1. GET the URL (non-2xx → [`SyncError::HttpStatus`]).
//! 2. Stream the body into `<dest>.part`, checking the cancel token per chunk.
//! 3. Rename `<dest>.part` to `<dest>`.
//!
//! Any failure removes `<dest>.part`, so a retry always starts clean and
//! `<dest>` only ever holds a complete body.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{io_err, SyncError};

const CHUNK_SIZE: usize = 64 * 1024;
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking HTTP client shared by the resolver and the fetcher.
#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    cancel: CancelToken,
}

impl HttpClient {
    /// `timeout` bounds each request end to end, body included.
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout.min(MAX_CONNECT_TIMEOUT))
            .timeout(timeout)
            .user_agent(concat!("prebuilts/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent, cancel }
    }

    fn get(&self, url: &str) -> Result<ureq::Response, SyncError> {
        self.cancel.check()?;
        match self.agent.get(url).call() {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(status, _)) => Err(SyncError::HttpStatus {
                url: url.to_string(),
                status,
            }),
            Err(err) => Err(SyncError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// GET a small text document (metadata).
    pub fn get_text(&self, url: &str) -> Result<String, SyncError> {
        let body = self
            .get(url)?
            .into_string()
            .map_err(|e| SyncError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        self.cancel.check()?;
        Ok(body)
    }

    /// Stream `url` into `dest`. Returns the number of bytes written.
    pub fn fetch(&self, url: &str, dest: &Path) -> Result<u64, SyncError> {
        let part = part_path(dest);
        match self.fetch_into(url, &part) {
            Ok(bytes) => {
                if let Err(e) = std::fs::rename(&part, dest) {
                    let _ = std::fs::remove_file(&part);
                    return Err(io_err(dest, e));
                }
                tracing::debug!(url, bytes, path = %dest.display(), "fetched");
                Ok(bytes)
            }
            Err(err) => {
                let _ = std::fs::remove_file(&part);
                Err(err)
            }
        }
    }

    fn fetch_into(&self, url: &str, part: &Path) -> Result<u64, SyncError> {
        let response = self.get(url)?;

        if let Some(parent) = part.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut file = File::create(part).map_err(|e| io_err(part, e))?;

        let mut reader = response.into_reader();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            self.cancel.check()?;
            let n = reader.read(&mut buffer).map_err(|e| SyncError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).map_err(|e| io_err(part, e))?;
            total += n as u64;
        }
        file.sync_all().map_err(|e| io_err(part, e))?;
        Ok(total)
    }
}

/// `<dest>.part`: sibling of the final staging path.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn client() -> HttpClient {
        HttpClient::new(Duration::from_secs(10), CancelToken::new())
    }

    #[test]
    fn fetch_writes_body_and_returns_byte_count() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/bazel")
            .with_status(200)
            .with_body(b"#!/bin/sh\necho bazel\n")
            .create();
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("bazel");

        let bytes = client()
            .fetch(&format!("{}/bazel", server.url()), &dest)
            .unwrap();

        mock.assert();
        assert_eq!(bytes, 21);
        assert_eq!(std::fs::read(&dest).unwrap(), b"#!/bin/sh\necho bazel\n");
        assert!(!part_path(&dest).exists(), ".part must be renamed away");
    }

    #[test]
    fn non_success_status_is_http_status_error_and_leaves_nothing() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/gone").with_status(503).create();
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("gone");

        let err = client()
            .fetch(&format!("{}/gone", server.url()), &dest)
            .unwrap_err();

        assert!(
            matches!(err, SyncError::HttpStatus { status: 503, .. }),
            "got: {err}"
        );
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn unreachable_host_is_network_error() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("x");
        // Port 9 on localhost: nothing listens there in test environments.
        let err = client().fetch("http://127.0.0.1:9/x", &dest).unwrap_err();
        assert!(matches!(err, SyncError::Network { .. }), "got: {err}");
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn cancelled_client_does_not_request() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/bazel").expect(0).create();
        let cancel = CancelToken::new();
        cancel.cancel();
        let client = HttpClient::new(Duration::from_secs(10), cancel);
        let tmp = TempDir::new().unwrap();

        let err = client
            .fetch(&format!("{}/bazel", server.url()), &tmp.path().join("bazel"))
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        mock.assert();
    }

    #[test]
    fn get_text_reads_document() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/metadata/latest.json")
            .with_status(200)
            .with_body(r#"{"platforms":{}}"#)
            .create();
        let body = client()
            .get_text(&format!("{}/metadata/latest.json", server.url()))
            .unwrap();
        assert_eq!(body, r#"{"platforms":{}}"#);
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/stage/bazel")),
            PathBuf::from("/stage/bazel.part")
        );
    }
}
