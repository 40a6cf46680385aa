//! Backend candidate for the real-debrid.com unrestrictor.
//!
//! Unlike debrid-link, the supported hoster set is not static: it is served
//! by the provider's `/hosts` endpoint and held in a [`HosterCache`] owned
//! by the candidate.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::transfer::TransferRequest;

use super::{Backend, BackendError, FetchOutcome, HosterCache, SourceResponse};

const NAME: &str = "real-debrid";
const DEFAULT_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

#[derive(Debug, Deserialize)]
struct UnrestrictedLink {
    download: String,
}

/// real-debrid.com backend candidate.
#[derive(Debug)]
pub struct RealDebridBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    hosters: HosterCache,
}

impl RealDebridBackend {
    /// Creates a candidate against the production API.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        let hosters = HosterCache::new(format!("{DEFAULT_BASE_URL}/hosts"));
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            hosters,
        }
    }

    /// Overrides the API base URL and re-points the hoster cache (test seam).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.hosters = HosterCache::new(format!("{}/hosts", self.base_url));
        self
    }

    /// Replaces the hoster cache (test seam or static configuration).
    #[must_use]
    pub fn with_hoster_cache(mut self, hosters: HosterCache) -> Self {
        self.hosters = hosters;
        self
    }
}

#[async_trait]
impl Backend for RealDebridBackend {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self, request), fields(backend = NAME, source = %request.source()))]
    async fn fetch(&self, request: &TransferRequest) -> Result<FetchOutcome, BackendError> {
        let Some(host) = request.source().host_str() else {
            return Ok(FetchOutcome::declined("source URL has no host"));
        };
        let supported = self
            .hosters
            .contains(host)
            .await
            .map_err(|e| BackendError::network(NAME, e))?;
        if !supported {
            return Ok(FetchOutcome::declined(format!(
                "host {host} not in provider hoster set"
            )));
        }

        let response = self
            .client
            .post(format!("{}/unrestrict/link", self.base_url))
            .bearer_auth(&self.api_key)
            .form(&[
                ("link", request.source().as_str()),
                ("password", request.password().unwrap_or("")),
            ])
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

        let unrestricted: UnrestrictedLink = response
            .json()
            .await
            .map_err(|e| BackendError::network(NAME, e))?;

        debug!(download = %unrestricted.download, "link unrestricted");

        let download = self
            .client
            .get(&unrestricted.download)
            .send()
            .await
            .map_err(|e| BackendError::network(NAME, e))?;
        if !download.status().is_success() {
            return Err(BackendError::status(NAME, download.status().as_u16()));
        }

        Ok(FetchOutcome::Accepted(SourceResponse::from_http(download)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(url: &str) -> TransferRequest {
        TransferRequest::new(url, Some("pw".to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_declines_host_outside_cached_set() {
        let backend = RealDebridBackend::new("key")
            .with_hoster_cache(HosterCache::preloaded(["mega.nz"]));
        let outcome = backend
            .fetch(&request("https://example.com/file.bin"))
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Declined { .. }));
    }

    #[tokio::test]
    async fn test_unrestricts_supported_host() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/unrestrict/link"))
            .and(header("authorization", "Bearer key"))
            .and(body_string_contains("link="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "download": format!("{}/dl/file.bin", server.uri()),
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/dl/file.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .set_body_bytes(b"bytes".to_vec()),
            )
            .mount(&server)
            .await;

        let backend = RealDebridBackend::new("key")
            .with_base_url(server.uri())
            .with_hoster_cache(HosterCache::preloaded(["mega.nz"]));

        let outcome = backend
            .fetch(&request("https://mega.nz/file/abc"))
            .await
            .unwrap();
        let FetchOutcome::Accepted(response) = outcome else {
            panic!("expected accept");
        };
        assert_eq!(response.content_length, Some(5));
    }

    #[tokio::test]
    async fn test_bad_request_is_unsupported_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unrestrict/link"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let backend = RealDebridBackend::new("key")
            .with_base_url(server.uri())
            .with_hoster_cache(HosterCache::preloaded(["mega.nz"]));

        let err = backend
            .fetch(&request("https://mega.nz/file/abc"))
            .await
            .unwrap_err();
        assert!(err.is_unsupported_input());
    }

    #[tokio::test]
    async fn test_provider_error_status_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unrestrict/link"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let backend = RealDebridBackend::new("key")
            .with_base_url(server.uri())
            .with_hoster_cache(HosterCache::preloaded(["mega.nz"]));

        let err = backend
            .fetch(&request("https://mega.nz/file/abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 503, .. }));
    }
}
