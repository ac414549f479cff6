//! reqwest-backed implementation of the [`Fetch`] capability
//!
//! One pooled client is built per fetcher and reused for every request
//! (discovery, JWKS, token endpoint, userinfo). Redirects are followed,
//! TLS peer verification can be disabled for test providers, and every
//! request is bounded by the configured timeout.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::capabilities::{Fetch, FetchRequest, FetchResponse, HttpMethod};
use crate::error::{Error, Result};

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Verify the TLS peer certificate and hostname
    pub verify_tls: bool,
    /// Optional proxy URL applied to all requests
    pub proxy: Option<String>,
    /// User-Agent header value
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            verify_tls: true,
            proxy: None,
            user_agent: format!("oxidc/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Pooled HTTP client implementing [`Fetch`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with the default configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the underlying client cannot
    /// be constructed.
    pub fn new() -> Result<Self> {
        Self::with_config(HttpConfig::default())
    }

    /// Build a fetcher with a custom configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on an invalid proxy URL or when
    /// the underlying client cannot be constructed.
    pub fn with_config(config: HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(config.user_agent.clone());

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::Configuration(format!("invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        debug!(url = %request.url, method = ?request.method, "outbound fetch");

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("request to {} failed: {e}", request.url)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("reading response body failed: {e}")))?;

        debug!(url = %request.url, status, "fetch complete");

        Ok(FetchResponse {
            status,
            body,
            content_type,
        })
    }
}
