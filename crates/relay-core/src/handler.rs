use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::RelayError;
use crate::headers::Headers;
use crate::mode::{HandlerGroup, RelayMode};

/// One inbound request as seen by operation handlers.
///
/// Retries reuse the same value; nothing in it changes between attempts.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub request_id: String,
    pub method: http::Method,
    pub path: String,
    /// Query string without the relay's own `retry` parameter.
    pub query: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
}

impl RelayRequest {
    pub fn path_and_query(&self) -> String {
        match self.query.as_deref() {
            Some(query) if !query.is_empty() => format!("{}?{}", self.path, query),
            _ => self.path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// Performs the upstream call for one handler group.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(
        &self,
        request: &RelayRequest,
        mode: RelayMode,
    ) -> Result<RelayResponse, RelayError>;
}

/// Handlers looked up by group, not by individual mode.
#[derive(Clone)]
pub struct HandlerSet {
    pub text: Arc<dyn OperationHandler>,
    pub image: Arc<dyn OperationHandler>,
    pub audio: Arc<dyn OperationHandler>,
}

impl HandlerSet {
    /// Uses one handler for every group.
    pub fn uniform(handler: Arc<dyn OperationHandler>) -> Self {
        Self {
            text: handler.clone(),
            image: handler.clone(),
            audio: handler,
        }
    }

    pub fn for_mode(&self, mode: RelayMode) -> &Arc<dyn OperationHandler> {
        match mode.group() {
            HandlerGroup::Image => &self.image,
            HandlerGroup::Audio => &self.audio,
            HandlerGroup::Text => &self.text,
        }
    }
}
