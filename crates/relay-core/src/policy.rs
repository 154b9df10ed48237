//! Terminal error classification.
//!
//! Decides what the caller sees and whether the channel that produced the
//! error should leave rotation. Caller-caused errors never touch channel state.

use std::fmt;

use crate::errors::RelayError;

/// Kinds of terminal failure, in classification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected credentials on the channel.
    Credential,
    /// Channel account out of quota or billing.
    Quota,
    /// Channel does not serve the requested model.
    ModelUnavailable,
    /// Rate limits and timeouts.
    Transient,
    /// Upstream server failure.
    Upstream,
    /// Malformed caller input.
    RequestShape,
    Unknown,
}

impl ErrorKind {
    pub fn disables_channel(self) -> bool {
        matches!(
            self,
            ErrorKind::Credential
                | ErrorKind::Quota
                | ErrorKind::ModelUnavailable
                | ErrorKind::Upstream
        )
    }

    pub fn is_caller_caused(self) -> bool {
        matches!(self, ErrorKind::RequestShape)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Credential => "credential",
            ErrorKind::Quota => "quota",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::Transient => "transient",
            ErrorKind::Upstream => "upstream",
            ErrorKind::RequestShape => "request_shape",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CREDENTIAL_CODES: &[&str] = &["invalid_api_key", "account_deactivated"];
const QUOTA_CODES: &[&str] = &["insufficient_quota", "billing_not_active"];
const REQUEST_SHAPE_CODES: &[&str] = &["invalid_json", "bad_request_body"];

pub fn classify_error(err: &RelayError) -> ErrorKind {
    let status = err.status;
    let kind = err.error.kind.as_str();
    let code = err.error.code.as_str();

    if status == 401 || status == 403 || CREDENTIAL_CODES.contains(&code) {
        return ErrorKind::Credential;
    }
    if status == 402 || kind == "insufficient_quota" || QUOTA_CODES.contains(&code) {
        return ErrorKind::Quota;
    }
    if code == "model_not_found" {
        return ErrorKind::ModelUnavailable;
    }
    if matches!(status, 408 | 429 | 504) || code == "timeout" {
        return ErrorKind::Transient;
    }
    if (500..600).contains(&status) {
        return ErrorKind::Upstream;
    }
    if (400..500).contains(&status)
        || kind == "invalid_request_error"
        || REQUEST_SHAPE_CODES.contains(&code)
    {
        return ErrorKind::RequestShape;
    }
    ErrorKind::Unknown
}

/// `"{message} (request id: {id})"`.
pub fn message_with_request_id(message: &str, request_id: &str) -> String {
    format!("{message} (request id: {request_id})")
}

/// Outcome of classifying one terminal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub kind: ErrorKind,
    pub disable_channel: bool,
    /// Error as it should reach the caller.
    pub user_error: RelayError,
}

#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    pub auto_disable_channel: bool,
    pub rate_limit_message: String,
}

impl ErrorPolicy {
    pub fn new(auto_disable_channel: bool, rate_limit_message: impl Into<String>) -> Self {
        Self {
            auto_disable_channel,
            rate_limit_message: rate_limit_message.into(),
        }
    }

    pub fn judge(&self, err: &RelayError, request_id: &str) -> Verdict {
        let kind = classify_error(err);
        let mut user_error = err.clone();
        if err.status == 429 {
            user_error.error.message = self.rate_limit_message.clone();
        }
        user_error.error.message = message_with_request_id(&user_error.error.message, request_id);
        Verdict {
            kind,
            disable_channel: self.auto_disable_channel && kind.disables_channel(),
            user_error,
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new(true, relay_common::DEFAULT_RATE_LIMIT_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(status: u16, kind: &str, code: &str) -> RelayError {
        RelayError::new(status, "upstream said no", kind, code)
    }

    #[test]
    fn taxonomy_covers_known_failures() {
        let cases = [
            (err(401, "", ""), ErrorKind::Credential),
            (err(403, "", ""), ErrorKind::Credential),
            (err(400, "invalid_request_error", "invalid_api_key"), ErrorKind::Credential),
            (err(400, "", "account_deactivated"), ErrorKind::Credential),
            (err(429, "insufficient_quota", "insufficient_quota"), ErrorKind::Quota),
            (err(402, "", ""), ErrorKind::Quota),
            (err(404, "invalid_request_error", "model_not_found"), ErrorKind::ModelUnavailable),
            (err(429, "requests", "rate_limit_exceeded"), ErrorKind::Transient),
            (err(504, "", ""), ErrorKind::Transient),
            (err(500, "server_error", ""), ErrorKind::Upstream),
            (err(503, "", ""), ErrorKind::Upstream),
            (err(400, "invalid_request_error", ""), ErrorKind::RequestShape),
            (err(422, "", ""), ErrorKind::RequestShape),
            (err(200, "", "invalid_json"), ErrorKind::RequestShape),
            (err(302, "", ""), ErrorKind::Unknown),
        ];
        for (error, expected) in cases {
            assert_eq!(classify_error(&error), expected, "{error:?}");
        }
    }

    #[test]
    fn only_channel_faults_disable() {
        assert!(ErrorKind::Credential.disables_channel());
        assert!(ErrorKind::Quota.disables_channel());
        assert!(ErrorKind::ModelUnavailable.disables_channel());
        assert!(ErrorKind::Upstream.disables_channel());
        assert!(!ErrorKind::Transient.disables_channel());
        assert!(!ErrorKind::RequestShape.disables_channel());
        assert!(!ErrorKind::Unknown.disables_channel());
    }

    #[test]
    fn rate_limit_message_is_replaced() {
        let policy = ErrorPolicy::new(true, "connection problem, please retry");
        let verdict = policy.judge(&err(429, "requests", "rate_limit_exceeded"), "req-1");
        assert_eq!(
            verdict.user_error.error.message,
            "connection problem, please retry (request id: req-1)"
        );
        assert_eq!(verdict.user_error.status, 429);
        assert!(!verdict.disable_channel);
    }

    #[test]
    fn other_messages_keep_upstream_text() {
        let policy = ErrorPolicy::default();
        let verdict = policy.judge(&err(500, "server_error", ""), "req-2");
        assert_eq!(
            verdict.user_error.error.message,
            "upstream said no (request id: req-2)"
        );
        assert_eq!(verdict.user_error.status, 500);
        assert!(verdict.disable_channel);
    }

    #[test]
    fn switch_off_never_disables() {
        let policy = ErrorPolicy::new(false, "x");
        let verdict = policy.judge(&err(401, "", "invalid_api_key"), "req-3");
        assert_eq!(verdict.kind, ErrorKind::Credential);
        assert!(!verdict.disable_channel);
    }
}
