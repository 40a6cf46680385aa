//! Backend candidates driving a local rclone binary.
//!
//! Two modes cover the tail of the fallback chain: `remote-download` asks a
//! configured remote (fshare) to fetch the source server-side, and `cat` is
//! the terminal fallback that pipes the source directly. Both stream the
//! child's stdout as the response body.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::transfer::TransferRequest;

use super::{Backend, BackendError, FetchOutcome, SourceResponse};

const DEFAULT_BINARY: &str = "rclone";

/// Hosts the remote-download mode services; everything else declines.
const REMOTE_DOWNLOAD_HOSTS: [&str; 2] = ["fshare.vn", "www.fshare.vn"];

#[derive(Debug, Clone)]
enum Mode {
    /// `rclone backend download <remote> <url>` for the configured remote.
    RemoteDownload { remote: String },
    /// `rclone cat <url>` with the password parameter stripped.
    Cat,
}

/// Backend candidate shelling out to rclone.
#[derive(Debug)]
pub struct RcloneBackend {
    binary: String,
    mode: Mode,
}

impl RcloneBackend {
    /// Candidate asking the given rclone remote to download the source
    /// server-side. Declines hosts the remote does not serve.
    #[must_use]
    pub fn remote_download(binary: Option<String>, remote: String) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| DEFAULT_BINARY.to_string()),
            mode: Mode::RemoteDownload { remote },
        }
    }

    /// Terminal fallback candidate piping the source through `rclone cat`.
    /// Accepts every URL; forwards it with the password parameter stripped,
    /// since rclone knows nothing about hoster passwords.
    #[must_use]
    pub fn cat(binary: Option<String>) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| DEFAULT_BINARY.to_string()),
            mode: Mode::Cat,
        }
    }

    /// The URL this candidate forwards and the argument list it runs.
    fn command_plan(&self, request: &TransferRequest) -> (Url, Vec<String>) {
        match &self.mode {
            Mode::RemoteDownload { remote } => {
                let url = request.source().clone();
                let args = vec![
                    "backend".to_string(),
                    "download".to_string(),
                    remote.clone(),
                    url.to_string(),
                ];
                (url, args)
            }
            Mode::Cat => {
                let url = request.source_without_password();
                let args = vec!["cat".to_string(), url.to_string()];
                (url, args)
            }
        }
    }
}

#[async_trait]
impl Backend for RcloneBackend {
    fn name(&self) -> &str {
        match self.mode {
            Mode::RemoteDownload { .. } => "rclone-download",
            Mode::Cat => "rclone-cat",
        }
    }

    #[instrument(skip(self, request), fields(backend = self.name(), source = %request.source()))]
    async fn fetch(&self, request: &TransferRequest) -> Result<FetchOutcome, BackendError> {
        if let Mode::RemoteDownload { .. } = self.mode {
            let host = request.source().host_str().unwrap_or_default();
            if !REMOTE_DOWNLOAD_HOSTS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(host))
            {
                return Ok(FetchOutcome::declined(format!(
                    "host {host} not served by the configured remote"
                )));
            }
        }

        let (final_url, args) = self.command_plan(request);
        debug!(binary = %self.binary, ?args, "spawning rclone");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::spawn(self.name(), e))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            BackendError::spawn(self.name(), io::Error::other("child stdout unavailable"))
        })?;

        let body = ChildStdoutStream {
            backend: self.name().to_string(),
            stdout: ReaderStream::new(stdout),
            child,
        };

        Ok(FetchOutcome::Accepted(SourceResponse::from_parts(
            reqwest::StatusCode::OK,
            final_url,
            None,
            None,
            body.boxed(),
        )))
    }
}

/// Body stream owning the rclone child.
///
/// Dropping the body (cancellation, consumer gone) kills the process via
/// `kill_on_drop` instead of leaving it writing into a closed pipe. A failed
/// child shows up as truncated output, which the sink surfaces; its exit
/// status is additionally logged once stdout drains.
struct ChildStdoutStream {
    backend: String,
    stdout: ReaderStream<ChildStdout>,
    child: Child,
}

impl Stream for ChildStdoutStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.stdout).poll_next(cx);
        if let Poll::Ready(None) = polled {
            match self.child.try_wait() {
                Ok(Some(status)) if !status.success() => {
                    warn!(backend = %self.backend, %status, "rclone exited with failure");
                }
                Err(error) => {
                    warn!(backend = %self.backend, error = %error, "failed to reap rclone");
                }
                _ => {}
            }
        }
        polled
    }
}
