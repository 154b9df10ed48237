use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use wreq::{Client, Method, Proxy};

use crate::headers::Headers;

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream transport error ({kind:?}): {message}")]
pub struct UpstreamFailure {
    pub kind: TransportErrorKind,
    pub message: String,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, req: UpstreamHttpRequest) -> Result<UpstreamHttpResponse, UpstreamFailure>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// Buffered HTTP client shared by passthrough handlers, channel tests and
/// webhook notifications.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: Client,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);
        if let Some(proxy) = config
            .proxy
            .as_deref()
            .map(str::trim)
            .filter(|proxy| !proxy.is_empty())
        {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn send(&self, req: UpstreamHttpRequest) -> Result<UpstreamHttpResponse, UpstreamFailure> {
        let method = Method::from_bytes(req.method.as_str().as_bytes()).map_err(|err| {
            UpstreamFailure {
                kind: TransportErrorKind::Other,
                message: err.to_string(),
            }
        })?;
        let mut builder = self.client.request(method, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(map_wreq_error)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        Ok(UpstreamHttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() || err.is_connection_reset() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    UpstreamFailure {
        kind,
        message: err.to_string(),
    }
}

/// Joins a channel base URL and a request path without doubling slashes.
pub fn join_url(base_url: &str, path_and_query: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path_and_query.starts_with('/') {
        format!("{base}{path_and_query}")
    } else {
        format!("{base}/{path_and_query}")
    }
}
