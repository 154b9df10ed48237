use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use tracing::debug;

use crate::channel::{Channel, ChannelRegistry};
use crate::errors::RelayError;
use crate::handler::{OperationHandler, RelayRequest, RelayResponse};
use crate::headers::{Headers, header_set, is_forwardable};
use crate::mode::RelayMode;
use crate::upstream::{TransportErrorKind, UpstreamClient, UpstreamHttpRequest, join_url};

/// Forwards the request unchanged to a random enabled channel, swapping in
/// the channel's key.
///
/// Bodies are neither inspected nor transcoded.
pub struct PassthroughHandler {
    registry: Arc<dyn ChannelRegistry>,
    client: Arc<dyn UpstreamClient>,
}

impl PassthroughHandler {
    pub fn new(registry: Arc<dyn ChannelRegistry>, client: Arc<dyn UpstreamClient>) -> Self {
        Self { registry, client }
    }

    async fn pick_channel(&self) -> Result<Channel, RelayError> {
        let channels = self.registry.list_channels(false).await.map_err(|err| {
            RelayError::new(500, err.to_string(), "one_api_error", "channel_registry_error")
        })?;
        channels
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(RelayError::no_available_channel)
    }
}

#[async_trait]
impl OperationHandler for PassthroughHandler {
    async fn handle(
        &self,
        request: &RelayRequest,
        mode: RelayMode,
    ) -> Result<RelayResponse, RelayError> {
        let channel = self.pick_channel().await?;
        debug!(
            event = "relay_dispatch",
            request_id = %request.request_id,
            mode = %mode,
            channel_id = channel.id
        );

        let mut headers: Headers = request
            .headers
            .iter()
            .filter(|(name, _)| is_forwardable(name))
            .cloned()
            .collect();
        header_set(&mut headers, "authorization", format!("Bearer {}", channel.key));

        let body = (!request.body.is_empty()).then(|| request.body.clone());
        let resp = self
            .client
            .send(UpstreamHttpRequest {
                method: request.method.clone(),
                url: join_url(&channel.base_url, &request.path_and_query()),
                headers,
                body,
            })
            .await
            .map_err(|failure| {
                let status = match failure.kind {
                    TransportErrorKind::Timeout => 504,
                    TransportErrorKind::Connect | TransportErrorKind::Other => 502,
                };
                RelayError::new(status, failure.message, "upstream_error", "do_request_failed")
                    .with_channel(channel.channel_ref())
            })?;

        if !resp.is_success() {
            return Err(RelayError::from_upstream(resp.status, &resp.body)
                .with_channel(channel.channel_ref()));
        }
        Ok(RelayResponse {
            status: resp.status,
            headers: resp
                .headers
                .into_iter()
                .filter(|(name, _)| is_forwardable(name))
                .collect(),
            body: resp.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::channel::{ChannelStatus, MemoryChannelRegistry};
    use crate::headers::header_get;
    use crate::upstream::{UpstreamFailure, UpstreamHttpResponse};

    struct ScriptedClient {
        response: Result<(u16, &'static str), TransportErrorKind>,
        seen: Mutex<Vec<UpstreamHttpRequest>>,
    }

    #[async_trait]
    impl UpstreamClient for ScriptedClient {
        async fn send(
            &self,
            req: UpstreamHttpRequest,
        ) -> Result<UpstreamHttpResponse, UpstreamFailure> {
            self.seen.lock().unwrap().push(req);
            match self.response {
                Ok((status, body)) => Ok(UpstreamHttpResponse {
                    status,
                    headers: vec![("connection".to_string(), "close".to_string())],
                    body: Bytes::from_static(body.as_bytes()),
                }),
                Err(kind) => Err(UpstreamFailure {
                    kind,
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn registry(status: ChannelStatus) -> Arc<MemoryChannelRegistry> {
        Arc::new(MemoryChannelRegistry::with_channels([Channel {
            id: 3,
            name: "azure-east".to_string(),
            status,
            base_url: "https://east.example.com".to_string(),
            key: "sk-east".to_string(),
            test_model: None,
        }]))
    }

    fn request() -> RelayRequest {
        RelayRequest {
            request_id: "req-1".to_string(),
            method: http::Method::POST,
            path: "/v1/chat/completions".to_string(),
            query: Some("api-version=2024-02-01".to_string()),
            headers: vec![
                ("authorization".to_string(), "Bearer caller".to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ],
            body: Bytes::from_static(br#"{"model":"gpt-4o"}"#),
        }
    }

    fn client(response: Result<(u16, &'static str), TransportErrorKind>) -> Arc<ScriptedClient> {
        Arc::new(ScriptedClient {
            response,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn forwards_with_channel_key() {
        let upstream = client(Ok((200, r#"{"id":"chatcmpl-1"}"#)));
        let handler = PassthroughHandler::new(registry(ChannelStatus::Enabled), upstream.clone());
        let resp = handler
            .handle(&request(), RelayMode::ChatCompletions)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], br#"{"id":"chatcmpl-1"}"#);
        assert!(header_get(&resp.headers, "connection").is_none());

        let seen = upstream.seen.lock().unwrap();
        assert_eq!(
            seen[0].url,
            "https://east.example.com/v1/chat/completions?api-version=2024-02-01"
        );
        assert_eq!(header_get(&seen[0].headers, "authorization"), Some("Bearer sk-east"));
    }

    #[tokio::test]
    async fn upstream_error_names_the_channel() {
        let upstream = client(Ok((401, r#"{"error":{"message":"bad key","code":"invalid_api_key"}}"#)));
        let handler = PassthroughHandler::new(registry(ChannelStatus::Enabled), upstream);
        let err = handler
            .handle(&request(), RelayMode::ChatCompletions)
            .await
            .unwrap_err();
        assert_eq!(err.status, 401);
        assert_eq!(err.error.code, "invalid_api_key");
        assert_eq!(err.channel.map(|c| c.id), Some(3));
    }

    #[tokio::test]
    async fn transport_timeout_maps_to_gateway_timeout() {
        let upstream = client(Err(TransportErrorKind::Timeout));
        let handler = PassthroughHandler::new(registry(ChannelStatus::Enabled), upstream);
        let err = handler
            .handle(&request(), RelayMode::Embeddings)
            .await
            .unwrap_err();
        assert_eq!(err.status, 504);
        assert_eq!(err.error.code, "do_request_failed");
    }

    #[tokio::test]
    async fn no_enabled_channel_is_unavailable() {
        let upstream = client(Ok((200, "{}")));
        let handler =
            PassthroughHandler::new(registry(ChannelStatus::ManuallyDisabled), upstream.clone());
        let err = handler
            .handle(&request(), RelayMode::ChatCompletions)
            .await
            .unwrap_err();
        assert_eq!(err.status, 503);
        assert!(err.channel.is_none());
        assert!(upstream.seen.lock().unwrap().is_empty());
    }
}
