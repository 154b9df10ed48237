//! Fleet health sweep triggered by terminal chat-completion failures.
//!
//! Every channel, disabled ones included, is tested with the same minimal
//! chat request. A passing manually-disabled channel comes back; a failing
//! enabled channel is taken out as manually disabled. Nothing else moves.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelId, ChannelRegistry, ChannelStatus, RegistryError};
use crate::events::{ChannelStatusEvent, Event, EventHub, SweepEvent, TransitionCause};
use crate::notify::OperatorAlerts;

pub const DEFAULT_TEST_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestMessage {
    pub role: String,
    pub content: String,
}

/// Synthetic chat-completion body used for health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRequest {
    pub model: String,
    pub messages: Vec<TestMessage>,
    pub max_tokens: u32,
    pub stream: bool,
}

impl TestRequest {
    pub fn minimal() -> Self {
        Self {
            model: DEFAULT_TEST_MODEL.to_string(),
            messages: vec![TestMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: 1,
            stream: false,
        }
    }

    /// Same payload with the channel's own test model, if it has one.
    pub fn for_channel(&self, channel: &Channel) -> Self {
        let mut request = self.clone();
        if let Some(model) = channel
            .test_model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
        {
            request.model = model.to_string();
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TestFailure {
    pub message: String,
}

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Sends a test request to one specific channel, bypassing routing.
#[async_trait]
pub trait ChannelTester: Send + Sync {
    async fn test(&self, channel: &Channel, request: &TestRequest) -> Result<(), TestFailure>;
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("a health sweep is already running")]
    AlreadyRunning,
    #[error("channel listing failed: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tested: usize,
    pub enabled: Vec<ChannelId>,
    pub disabled: Vec<ChannelId>,
    /// Channels whose test could not run or whose status write failed.
    pub skipped: Vec<ChannelId>,
}

pub struct HealthMonitor {
    registry: Arc<dyn ChannelRegistry>,
    tester: Arc<dyn ChannelTester>,
    alerts: OperatorAlerts,
    events: EventHub,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Verdict {
    Healthy,
    Unhealthy(String),
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<dyn ChannelRegistry>,
        tester: Arc<dyn ChannelTester>,
        alerts: OperatorAlerts,
        events: EventHub,
    ) -> Self {
        Self {
            registry,
            tester,
            alerts,
            events,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(&self.running))
    }

    /// Runs one full sweep unless another is in flight.
    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        let Some(_guard) = self.try_begin() else {
            info!(event = "sweep_skipped", "health sweep already in flight");
            return Err(SweepError::AlreadyRunning);
        };

        let channels = self.registry.list_channels(true).await.map_err(|err| {
            error!(event = "sweep_aborted", error = %err);
            err
        })?;
        info!(event = "sweep_started", channels = channels.len());
        self.events
            .emit(Event::Sweep(SweepEvent::Started {
                at: SystemTime::now(),
                channels: channels.len(),
            }))
            .await;

        let request = TestRequest::minimal();
        let mut report = SweepReport::default();
        for channel in &channels {
            self.sweep_one(channel, &request, &mut report).await;
        }

        info!(
            event = "sweep_finished",
            tested = report.tested,
            enabled = ?report.enabled,
            disabled = ?report.disabled,
            skipped = ?report.skipped
        );
        self.events
            .emit(Event::Sweep(SweepEvent::Finished {
                at: SystemTime::now(),
                tested: report.tested,
                enabled: report.enabled.clone(),
                disabled: report.disabled.clone(),
            }))
            .await;
        Ok(report)
    }

    async fn sweep_one(&self, channel: &Channel, request: &TestRequest, report: &mut SweepReport) {
        let request = request.for_channel(channel);
        let outcome = AssertUnwindSafe(self.tester.test(channel, &request))
            .catch_unwind()
            .await;
        let verdict = match outcome {
            Ok(Ok(())) => Verdict::Healthy,
            Ok(Err(failure)) => Verdict::Unhealthy(failure.message),
            Err(_) => {
                error!(
                    event = "channel_test_panicked",
                    channel_id = channel.id,
                    channel = %channel.name
                );
                report.skipped.push(channel.id);
                return;
            }
        };
        report.tested += 1;

        let (next, reason) = match (&verdict, channel.status) {
            (Verdict::Healthy, ChannelStatus::ManuallyDisabled) => (ChannelStatus::Enabled, None),
            (Verdict::Unhealthy(reason), ChannelStatus::Enabled) => {
                (ChannelStatus::ManuallyDisabled, Some(reason.clone()))
            }
            (Verdict::Healthy, _) => {
                debug!(event = "channel_healthy", channel_id = channel.id, channel = %channel.name);
                return;
            }
            (Verdict::Unhealthy(reason), status) => {
                debug!(
                    event = "channel_unhealthy",
                    channel_id = channel.id,
                    channel = %channel.name,
                    %status,
                    %reason
                );
                return;
            }
        };

        match self
            .registry
            .compare_and_set_status(channel.id, channel.status, next)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    event = "channel_transition_lost",
                    channel_id = channel.id,
                    expected = %channel.status,
                    "status changed during sweep"
                );
                return;
            }
            Err(err) => {
                warn!(event = "channel_status_write_failed", channel_id = channel.id, error = %err);
                report.skipped.push(channel.id);
                return;
            }
        }

        let channel_ref = channel.channel_ref();
        match next {
            ChannelStatus::Enabled => {
                info!(event = "channel_enabled", channel_id = channel.id, channel = %channel.name);
                report.enabled.push(channel.id);
                self.alerts.channel_check_recovered(&channel_ref).await;
            }
            _ => {
                let reason = reason.as_deref().unwrap_or_default();
                warn!(
                    event = "channel_disabled",
                    channel_id = channel.id,
                    channel = %channel.name,
                    %reason
                );
                report.disabled.push(channel.id);
                self.alerts.channel_check_failed(&channel_ref, reason).await;
            }
        }
        self.events
            .emit(Event::ChannelStatusChanged(ChannelStatusEvent {
                at: SystemTime::now(),
                channel_id: channel.id,
                channel_name: channel.name.clone(),
                from: channel.status,
                to: next,
                cause: TransitionCause::HealthCheck,
                reason,
            }))
            .await;
    }
}
