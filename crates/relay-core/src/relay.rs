use std::sync::Arc;
use std::time::SystemTime;

use relay_common::SweepMode;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelRef, ChannelRegistry, ChannelStatus};
use crate::errors::RelayError;
use crate::events::{ChannelStatusEvent, Event, EventHub, TransitionCause};
use crate::handler::{HandlerSet, RelayRequest, RelayResponse};
use crate::health::{HealthMonitor, SweepError, SweepReport};
use crate::mode::RelayMode;
use crate::notify::OperatorAlerts;
use crate::policy::ErrorPolicy;
use crate::retry::{RetryController, RetryState};

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Attempts granted when the request does not say otherwise.
    pub retry_times: u32,
    /// Cap on the attempts a caller may ask for through `?retry=`.
    pub max_retry_override: u32,
    pub sweep_mode: SweepMode,
    pub policy: ErrorPolicy,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            retry_times: relay_common::DEFAULT_RETRY_TIMES,
            max_retry_override: relay_common::MAX_RETRY_OVERRIDE,
            sweep_mode: SweepMode::default(),
            policy: ErrorPolicy::default(),
        }
    }
}

/// Result of a single attempt when retries travel through the client.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(RelayResponse),
    /// Failed with budget left: the caller should come back with this state.
    Retry(RetryState),
    Failed(RelayError),
}

/// Classify, dispatch, retry, and on terminal failure apply channel policy.
pub struct Relay {
    retry: RetryController,
    registry: Arc<dyn ChannelRegistry>,
    monitor: Arc<HealthMonitor>,
    alerts: OperatorAlerts,
    events: EventHub,
    options: RelayOptions,
}

impl Relay {
    pub fn new(
        handlers: HandlerSet,
        registry: Arc<dyn ChannelRegistry>,
        monitor: Arc<HealthMonitor>,
        alerts: OperatorAlerts,
        events: EventHub,
        options: RelayOptions,
    ) -> Self {
        Self {
            retry: RetryController::new(handlers),
            registry,
            monitor,
            alerts,
            events,
            options,
        }
    }

    pub fn retry_state(&self, raw: Option<&str>) -> RetryState {
        RetryState::resolve(
            raw,
            self.options.retry_times,
            self.options.max_retry_override,
        )
    }

    /// Runs the whole retry loop in-process.
    pub async fn relay(
        &self,
        request: &RelayRequest,
        state: RetryState,
    ) -> Result<RelayResponse, RelayError> {
        let mode = RelayMode::from_path(&request.path);
        match self.retry.run(request, mode, state).await {
            Ok(response) => Ok(response),
            Err(failure) => Err(self
                .handle_terminal(mode, failure.error, &request.request_id)
                .await),
        }
    }

    /// One attempt only; a failure with budget left is handed back as
    /// [`AttemptOutcome::Retry`] without touching channel state.
    pub async fn relay_once(&self, request: &RelayRequest, state: RetryState) -> AttemptOutcome {
        let mode = RelayMode::from_path(&request.path);
        let error = match self.retry.attempt(request, mode).await {
            Ok(response) => return AttemptOutcome::Success(response),
            Err(error) => error,
        };
        if let Some(next) = state.next() {
            warn!(
                event = "relay_attempt_failed",
                request_id = %request.request_id,
                mode = %mode,
                attempts_remaining = state.attempts_remaining,
                status = error.status,
                channel_id = ?error.channel.as_ref().map(|c| c.id),
                message = %error.message()
            );
            return AttemptOutcome::Retry(next);
        }
        AttemptOutcome::Failed(self.handle_terminal(mode, error, &request.request_id).await)
    }

    /// Applies the error policy to a terminal failure and returns the error
    /// as the caller should see it.
    pub async fn handle_terminal(
        &self,
        mode: RelayMode,
        err: RelayError,
        request_id: &str,
    ) -> RelayError {
        let verdict = self.options.policy.judge(&err, request_id);
        error!(
            event = "relay_error",
            request_id = %request_id,
            mode = %mode,
            kind = %verdict.kind,
            status = err.status,
            channel_id = ?err.channel.as_ref().map(|c| c.id),
            disable_channel = verdict.disable_channel,
            message = %err.message()
        );

        if verdict.disable_channel
            && let Some(channel) = err.channel.as_ref()
        {
            self.auto_disable(channel, err.message()).await;
        }

        if mode == RelayMode::ChatCompletions && !verdict.kind.is_caller_caused() {
            self.trigger_sweep().await;
        }
        verdict.user_error
    }

    async fn auto_disable(&self, channel: &ChannelRef, reason: &str) {
        let changed = match self
            .registry
            .compare_and_set_status(channel.id, ChannelStatus::Enabled, ChannelStatus::AutoDisabled)
            .await
        {
            Ok(changed) => changed,
            Err(err) => {
                warn!(event = "channel_status_write_failed", channel_id = channel.id, error = %err);
                return;
            }
        };
        if !changed {
            debug!(event = "channel_already_disabled", channel_id = channel.id);
            return;
        }

        warn!(
            event = "channel_disabled",
            channel_id = channel.id,
            channel = %channel.name,
            cause = "relay_error",
            %reason
        );
        self.alerts.channel_auto_disabled(channel, reason).await;
        self.events
            .emit(Event::ChannelStatusChanged(ChannelStatusEvent {
                at: SystemTime::now(),
                channel_id: channel.id,
                channel_name: channel.name.clone(),
                from: ChannelStatus::Enabled,
                to: ChannelStatus::AutoDisabled,
                cause: TransitionCause::RelayError,
                reason: Some(reason.to_string()),
            }))
            .await;
    }

    /// Starts a sweep on its own task so the caller going away cannot cancel
    /// it. Blocking mode waits for it to finish.
    pub async fn trigger_sweep(&self) {
        let Some(handle) = self.spawn_sweep() else {
            return;
        };
        if self.options.sweep_mode == SweepMode::Blocking
            && let Err(err) = handle.await
        {
            error!(event = "sweep_task_failed", error = %err);
        }
    }

    fn spawn_sweep(&self) -> Option<JoinHandle<Result<SweepReport, SweepError>>> {
        if self.monitor.is_running() {
            info!(event = "sweep_skipped", "health sweep already in flight");
            return None;
        }
        let monitor = self.monitor.clone();
        Some(tokio::spawn(async move { monitor.sweep().await }))
    }
}
