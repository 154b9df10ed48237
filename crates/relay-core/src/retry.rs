use tracing::{debug, warn};

use crate::errors::RelayError;
use crate::handler::{HandlerSet, RelayRequest, RelayResponse};
use crate::mode::RelayMode;

/// Attempts a request may still spend after the current one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts_remaining: u32,
}

impl RetryState {
    pub fn new(attempts_remaining: u32) -> Self {
        Self { attempts_remaining }
    }

    /// Resolves the raw `retry` query value.
    ///
    /// Absent or empty falls back to `default`; anything that is not a
    /// non-negative integer means no further attempts. A caller-supplied
    /// value is capped at `max`.
    pub fn resolve(raw: Option<&str>, default: u32, max: u32) -> Self {
        let attempts_remaining = match raw.map(str::trim) {
            None | Some("") => default,
            Some(value) => value
                .parse::<i64>()
                .ok()
                .map(|n| n.clamp(0, i64::from(max)) as u32)
                .unwrap_or(0),
        };
        Self { attempts_remaining }
    }

    /// State for the next attempt, or `None` when the failure is terminal.
    pub fn next(self) -> Option<Self> {
        self.attempts_remaining.checked_sub(1).map(Self::new)
    }
}

/// Failure left after the retry budget is spent.
#[derive(Debug, Clone)]
pub struct TerminalFailure {
    pub error: RelayError,
    /// Handler invocations made for this request, including the last one.
    pub attempts: u32,
}

/// Dispatches a request to its handler group and re-issues it on failure.
#[derive(Clone)]
pub struct RetryController {
    handlers: HandlerSet,
}

impl RetryController {
    pub fn new(handlers: HandlerSet) -> Self {
        Self { handlers }
    }

    /// Exactly one handler invocation.
    pub async fn attempt(
        &self,
        request: &RelayRequest,
        mode: RelayMode,
    ) -> Result<RelayResponse, RelayError> {
        self.handlers.for_mode(mode).handle(request, mode).await
    }

    /// Bounded loop: at most `state.attempts_remaining + 1` invocations.
    pub async fn run(
        &self,
        request: &RelayRequest,
        mode: RelayMode,
        mut state: RetryState,
    ) -> Result<RelayResponse, TerminalFailure> {
        let mut attempt_no: u32 = 1;
        loop {
            match self.attempt(request, mode).await {
                Ok(response) => {
                    if attempt_no > 1 {
                        debug!(
                            event = "relay_recovered",
                            request_id = %request.request_id,
                            mode = %mode,
                            attempt = attempt_no
                        );
                    }
                    return Ok(response);
                }
                Err(error) => {
                    warn!(
                        event = "relay_attempt_failed",
                        request_id = %request.request_id,
                        mode = %mode,
                        attempt = attempt_no,
                        attempts_remaining = state.attempts_remaining,
                        status = error.status,
                        channel_id = ?error.channel.as_ref().map(|c| c.id),
                        message = %error.message()
                    );
                    match state.next() {
                        Some(next) => {
                            state = next;
                            attempt_no += 1;
                        }
                        None => {
                            return Err(TerminalFailure {
                                error,
                                attempts: attempt_no,
                            });
                        }
                    }
                }
            }
        }
    }
}
