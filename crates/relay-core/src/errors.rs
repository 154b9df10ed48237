use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelRef;

/// OpenAI-style error object, serialized as the `error` member of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub param: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelopeOwned {
    error: ErrorBody,
}

/// Failure of one handler attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayError {
    pub status: u16,
    pub error: ErrorBody,
    /// Channel that served the failed attempt, if one was selected.
    pub channel: Option<ChannelRef>,
}

impl RelayError {
    pub fn new(
        status: u16,
        message: impl Into<String>,
        kind: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            status,
            error: ErrorBody {
                message: message.into(),
                kind: kind.into(),
                param: String::new(),
                code: code.into(),
            },
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: ChannelRef) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Caller-side request problem detected before any upstream call.
    pub fn bad_request(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(400, message, "invalid_request_error", code)
    }

    pub fn no_available_channel() -> Self {
        Self::new(
            503,
            "no available channel",
            "one_api_error",
            "no_available_channel",
        )
    }

    /// Builds an error from an upstream status and body, keeping the upstream
    /// `error` object when the body carries one.
    pub fn from_upstream(status: u16, body: &[u8]) -> Self {
        if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelopeOwned>(body)
            && !envelope.error.message.is_empty()
        {
            return Self {
                status,
                error: envelope.error,
                channel: None,
            };
        }
        let text = String::from_utf8_lossy(body);
        let message = if text.trim().is_empty() {
            format!("bad response status code {status}")
        } else {
            format!("bad response status code {status}: {}", text.trim())
        };
        Self::new(status, message, "upstream_error", format!("bad_response_status_code_{status}"))
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }

    /// `{"error": {...}}` response body.
    pub fn to_json_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&ErrorEnvelope { error: &self.error })
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.error.message)
    }
}

impl Error for RelayError {}

// Upstreams disagree on whether `code`/`param` are strings, numbers or null.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}
