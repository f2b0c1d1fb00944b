//! Upstream fetcher: the agent's view of "the network"

use crate::agent::{AgentRequest, AgentResponse, NetworkError, strip_hop_by_hop};
use axum::http::header;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Trait for issuing intercepted requests to the network
///
/// A transport failure is an `Err`; any HTTP status, including errors, is
/// an `Ok` response.
#[async_trait::async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &AgentRequest) -> Result<AgentResponse, NetworkError>;
}

/// Network implementation that forwards requests to a single upstream origin
pub struct UpstreamFetcher {
    client: Client,
    upstream: Url,
}

impl UpstreamFetcher {
    /// Create a fetcher for `upstream` (e.g. "http://127.0.0.1:3000")
    ///
    /// `timeout` is the transport's own timeout; the agent adds none.
    pub fn new(upstream: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let upstream = Url::parse(upstream)
            .map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", upstream, e)))?;

        // Redirects are passed through to the client untouched
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NetworkError::Transport(Box::new(e)))?;

        Ok(Self { client, upstream })
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Upstream URL for a request; only path and query come from the request
    fn resolve(&self, request: &AgentRequest) -> Url {
        let mut url = self.upstream.clone();
        url.set_path(request.path());
        url.set_query(request.uri().query());
        url
    }
}

#[async_trait::async_trait]
impl Network for UpstreamFetcher {
    async fn fetch(&self, request: &AgentRequest) -> Result<AgentResponse, NetworkError> {
        let url = self.resolve(request);

        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let response = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| NetworkError::Transport(Box::new(e)))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkError::Body(e.to_string()))?;

        debug!("Fetched {} {} -> {} ({} bytes)", request.method, url, status, body.len());

        Ok(AgentResponse::new(status, headers, body))
    }
}
