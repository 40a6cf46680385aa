//! Storage sinks: the write side of the relay.
//!
//! A [`Sink`] accepts a named target and the relayed byte stream and reports
//! success or failure once. Sinks observe nothing about progress; the monitor
//! sits on the source side of the stream they consume.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};

use crate::backend::ByteStream;

/// Errors from the storage side of a transfer. All fatal; never retried.
#[derive(Debug, Error)]
pub enum SinkError {
    /// File system error while writing the target.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The source stream yielded an error mid-relay (including cancellation,
    /// which the relay reclassifies via the gate).
    #[error("source stream failed mid-transfer: {source}")]
    Source {
        /// The underlying stream error.
        #[source]
        source: io::Error,
    },

    /// Network error while pushing to a remote storage target.
    #[error("network error writing to storage target: {source}")]
    Network {
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The remote storage target answered with a non-success status.
    #[error("storage target answered HTTP {status}")]
    Upstream {
        /// The status code.
        status: u16,
    },
}

/// Contract for storage targets.
///
/// `store` consumes the stream and returns the number of bytes written.
/// Partially written data on failure or cancellation is left as-is; there is
/// no rollback contract.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Writes the byte stream under the given target name.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the write cannot complete.
    async fn store(&self, name: &str, body: ByteStream) -> Result<u64, SinkError>;
}

/// Sink writing into a local directory.
///
/// Target names are sanitized against path traversal and de-duplicated with
/// a numeric suffix instead of overwriting an existing file.
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    /// Creates a sink rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory targets are written under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Sink for FsSink {
    #[instrument(skip(self, body), fields(root = %self.root.display()))]
    async fn store(&self, name: &str, mut body: ByteStream) -> Result<u64, SinkError> {
        let path = unique_path(&self.root, &sanitize_name(name)).await;

        let file = File::create(&path)
            .await
            .map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
        let mut writer = BufWriter::new(file);
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(source) => {
                    // Keep the bytes that already arrived; no rollback contract.
                    let _ = writer.flush().await;
                    return Err(SinkError::Source { source });
                }
            };
            writer.write_all(&chunk).await.map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
            bytes_written += chunk.len() as u64;
        }

        writer.flush().await.map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), bytes_written, "target stored");
        Ok(bytes_written)
    }
}

/// Sink pushing to an HTTP storage remote with `PUT {base}/{name}`.
///
/// This matches serving storage over HTTP (an rclone remote): the body is
/// streamed, not buffered, and the remote's own naming semantics apply.
#[derive(Debug, Clone)]
pub struct HttpPutSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPutSink {
    /// Creates a sink pushing under the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Sink for HttpPutSink {
    #[instrument(skip(self, body), fields(base_url = %self.base_url))]
    async fn store(&self, name: &str, body: ByteStream) -> Result<u64, SinkError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(name)
        );

        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);
        let counted = body.inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });

        let response = self
            .client
            .put(&url)
            .body(reqwest::Body::wrap_stream(counted))
            .send()
            .await
            .map_err(|source| SinkError::Network { source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Upstream {
                status: status.as_u16(),
            });
        }

        let bytes_written = written.load(Ordering::Relaxed);
        info!(url, bytes_written, "target stored");
        Ok(bytes_written)
    }
}

/// Strips directory components so a hostile target name cannot escape the
/// sink root. Mapped separators leave `..`/`_` runs at the front; those are
/// trimmed along with leading dots and spaces.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    let cleaned = cleaned
        .trim_start_matches(['.', ' ', '_'])
        .trim_end_matches(['.', ' '])
        .to_string();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

/// Picks a path under `root` that does not collide with an existing file,
/// suffixing `name (n)` before the extension when needed.
async fn unique_path(root: &Path, name: &str) -> PathBuf {
    let candidate = root.join(name);
    if tokio::fs::metadata(&candidate).await.is_err() {
        return candidate;
    }

    let (stem, extension) = match name.rfind('.') {
        Some(index) if index > 0 => (&name[..index], &name[index..]),
        _ => (name, ""),
    };

    for n in 1u32.. {
        let candidate = root.join(format!("{stem} ({n}){extension}"));
        if tokio::fs::metadata(&candidate).await.is_err() {
            debug!(path = %candidate.display(), "target name collided, suffixed");
            return candidate;
        }
    }
    unreachable!("suffix search is unbounded")
}
