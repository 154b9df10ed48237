use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::channel::Channel;
use crate::errors::ErrorBody;
use crate::health::{ChannelTester, TestFailure, TestRequest};
use crate::upstream::{UpstreamClient, UpstreamHttpRequest, join_url};

const TEST_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Deserialize)]
struct MaybeError {
    #[serde(default)]
    error: Option<ErrorBody>,
}

/// Health checks over the shared upstream client.
///
/// A channel passes when it answers 2xx and the body carries no `error`
/// object; some upstreams report failures inside a 200.
pub struct HttpChannelTester {
    client: Arc<dyn UpstreamClient>,
}

impl HttpChannelTester {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelTester for HttpChannelTester {
    async fn test(&self, channel: &Channel, request: &TestRequest) -> Result<(), TestFailure> {
        let body = serde_json::to_vec(request).map_err(|err| TestFailure::new(err.to_string()))?;
        let resp = self
            .client
            .send(UpstreamHttpRequest {
                method: http::Method::POST,
                url: join_url(&channel.base_url, TEST_PATH),
                headers: vec![
                    ("content-type".to_string(), "application/json".to_string()),
                    ("authorization".to_string(), format!("Bearer {}", channel.key)),
                ],
                body: Some(Bytes::from(body)),
            })
            .await
            .map_err(|err| TestFailure::new(err.to_string()))?;

        if let Ok(MaybeError { error: Some(error) }) = serde_json::from_slice(&resp.body) {
            let message = if error.message.is_empty() {
                format!("status {}: error object without message", resp.status)
            } else {
                error.message
            };
            return Err(TestFailure::new(message));
        }
        if !resp.is_success() {
            return Err(TestFailure::new(format!("bad response status code {}", resp.status)));
        }
        Ok(())
    }
}
