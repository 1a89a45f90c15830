//! HTTP transport backed by `reqwest`.
//!
//! One attempt per call: retries, fallbacks and timeouts per strategy live in
//! `dropwire-core`. The client-level timeout here only bounds a request the
//! chain has already given up on.

use std::time::Duration;

use async_trait::async_trait;

use dropwire_core::error::TransportError;
use dropwire_core::request::{HttpRequest, HttpResponse, Method};
use dropwire_core::transport::HttpTransport;

/// Configuration for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("dropwire/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    request_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: ClientConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()?;
        Ok(Self {
            http,
            request_timeout: config.request_timeout,
        })
    }

    /// Wrap an existing client whose own timeout is `request_timeout`.
    pub fn from_client(http: reqwest::Client, request_timeout: Duration) -> Self {
        Self { http, request_timeout }
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Map a reqwest failure onto the transport taxonomy.
fn map_error(e: reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            ms: timeout.as_millis() as u64,
        }
    } else if e.is_connect() || e.is_request() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        tracing::debug!(method = %req.method, url = %req.url, "sending request");

        let mut builder = self.http.request(Self::method(req.method), &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }
        let request = builder
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let timeout = self.request_timeout;

        let resp = self
            .http
            .execute(request)
            .await
            .map_err(|e| map_error(e, timeout))?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| map_error(e, timeout))?;
        tracing::debug!(status, bytes = body.len(), url = %req.url, "response received");
        Ok(HttpResponse::new(status, body.to_vec()))
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}
