//! Lazily initialized cache of a provider's supported hoster domains.
//!
//! The original hoster discovery ran once at process start and lived in
//! ambient module state. Here the cache is an owned object injected into the
//! candidate: first use fetches the list, and entries are refreshed once
//! they outlive the TTL.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Default refresh interval for the cached hoster set.
pub const DEFAULT_HOSTER_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct CacheState {
    hosts: HashSet<String>,
    fetched_at: Instant,
}

/// Cached set of hoster domains, fetched from a provider endpoint.
///
/// The endpoint is expected to answer with a JSON object keyed by domain
/// (the real-debrid `/hosts` shape); only the keys are retained.
#[derive(Debug)]
pub struct HosterCache {
    client: reqwest::Client,
    endpoint: String,
    ttl: Duration,
    state: Mutex<Option<CacheState>>,
}

impl HosterCache {
    /// Creates a cache over the given endpoint with the default TTL.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_ttl(endpoint, DEFAULT_HOSTER_TTL)
    }

    /// Creates a cache with an explicit refresh interval.
    #[must_use]
    pub fn with_ttl(endpoint: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            ttl,
            state: Mutex::new(None),
        }
    }

    /// Creates a cache pre-seeded with a fixed host set that never expires.
    /// Test seam; also usable when the host list is configured statically.
    #[must_use]
    pub fn preloaded<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client: reqwest::Client::new(),
            endpoint: String::new(),
            ttl: Duration::MAX,
            state: Mutex::new(Some(CacheState {
                hosts: hosts.into_iter().map(Into::into).collect(),
                fetched_at: Instant::now(),
            })),
        }
    }

    /// Returns true when the given domain is in the (refreshed-as-needed)
    /// hoster set.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest::Error` when a refresh is due and the
    /// endpoint cannot be fetched; a previously cached set is not consulted
    /// in that case, so a candidate can surface the failure honestly.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn contains(&self, host: &str) -> Result<bool, reqwest::Error> {
        let mut state = self.state.lock().await;

        let stale = state
            .as_ref()
            .is_none_or(|cached| cached.fetched_at.elapsed() >= self.ttl);
        if stale {
            let hosts = self.fetch_hosts().await?;
            debug!(host_count = hosts.len(), "hoster set refreshed");
            *state = Some(CacheState {
                hosts,
                fetched_at: Instant::now(),
            });
        }

        Ok(state
            .as_ref()
            .is_some_and(|cached| cached.hosts.contains(host)))
    }

    async fn fetch_hosts(&self) -> Result<HashSet<String>, reqwest::Error> {
        let hosts: std::collections::HashMap<String, serde_json::Value> = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(hosts.into_keys().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_preloaded_cache_answers_without_network() {
        let cache = HosterCache::preloaded(["rapidgator.net", "mega.nz"]);
        assert!(cache.contains("rapidgator.net").await.unwrap());
        assert!(!cache.contains("example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_fetches_keys_from_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hosts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rapidgator.net": {"id": "rg", "name": "Rapidgator"},
                "1fichier.com": {"id": "1f", "name": "1fichier"},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = HosterCache::new(format!("{}/hosts", server.uri()));
        assert!(cache.contains("1fichier.com").await.unwrap());
        // Second lookup hits the cache, not the endpoint (expect(1) above).
        assert!(cache.contains("rapidgator.net").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_refreshes_after_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hosts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mega.nz": {},
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = HosterCache::with_ttl(format!("{}/hosts", server.uri()), Duration::ZERO);
        assert!(cache.contains("mega.nz").await.unwrap());
        assert!(cache.contains("mega.nz").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_surfaces_endpoint_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hosts"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = HosterCache::new(format!("{}/hosts", server.uri()));
        assert!(cache.contains("mega.nz").await.is_err());
    }
}
