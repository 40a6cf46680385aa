//! Backend candidate for the debrid-link.com unrestrictor.
//!
//! The candidate declines any host outside its supported set, otherwise asks
//! the API to unrestrict the link and streams the resulting download URL.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::transfer::TransferRequest;

use super::{Backend, BackendError, FetchOutcome, SourceResponse};

const NAME: &str = "debrid-link";
const DEFAULT_BASE_URL: &str = "https://debrid-link.com/api/v2";

/// Hosters the provider unrestricts. The API rejects anything else, so the
/// candidate declines up front instead of burning a request.
const DEFAULT_HOSTERS: [&str; 8] = [
    "1fichier.com",
    "anonfiles.com",
    "ddl.to",
    "katfile.org",
    "mega.nz",
    "rapidgator.net",
    "uptobox.com",
    "zippyshare.com",
];

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    success: bool,
    error: Option<String>,
    value: Option<AddedDownload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddedDownload {
    download_url: String,
}

/// debrid-link.com backend candidate.
#[derive(Debug)]
pub struct DebridLinkBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    hosters: Vec<String>,
}

impl DebridLinkBackend {
    /// Creates a candidate against the production API.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            hosters: DEFAULT_HOSTERS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Overrides the API base URL (test seam).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the supported hoster set (test seam).
    #[must_use]
    pub fn with_hosters<I, S>(mut self, hosters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosters = hosters.into_iter().map(Into::into).collect();
        self
    }

    fn supports(&self, host: &str) -> bool {
        self.hosters.iter().any(|h| h.eq_ignore_ascii_case(host))
    }
}

#[async_trait]
impl Backend for DebridLinkBackend {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self, request), fields(backend = NAME, source = %request.source()))]
    async fn fetch(&self, request: &TransferRequest) -> Result<FetchOutcome, BackendError> {
        let Some(host) = request.source().host_str() else {
            return Ok(FetchOutcome::declined("source URL has no host"));
        };
        if !self.supports(host) {
            return Ok(FetchOutcome::declined(format!(
                "host {host} not in supported set"
            )));
        }

        let response = self
            .client
            .post(format!("{}/downloader/add", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "url": request.source().as_str(),
                "password": request.password().unwrap_or(""),
            }))
            .send()
            .await
            .map_err(|e| BackendError::network(NAME, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(BackendError::unsupported_input(
                NAME,
                request.source().as_str(),
            ));
        }
        if !status.is_success() {
            return Err(BackendError::status(NAME, status.as_u16()));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| BackendError::network(NAME, e))?;

        if !envelope.success {
            let message = envelope.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(BackendError::api(NAME, message));
        }
        let Some(added) = envelope.value else {
            return Err(BackendError::api(NAME, "success without download value"));
        };

        debug!(download_url = %added.download_url, "link unrestricted");

        let download = self
            .client
            .get(&added.download_url)
            .send()
            .await
            .map_err(|e| BackendError::network(NAME, e))?;
        if !download.status().is_success() {
            return Err(BackendError::status(NAME, download.status().as_u16()));
        }

        Ok(FetchOutcome::Accepted(SourceResponse::from_http(download)))
    }
}
