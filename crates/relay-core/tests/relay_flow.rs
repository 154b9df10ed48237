use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use relay_common::SweepMode;
use relay_core::{
    AttemptOutcome, Channel, ChannelId, ChannelRef, ChannelRegistry, ChannelStatus,
    ChannelTester, ErrorPolicy, EventHub, HandlerSet, HealthMonitor, MemoryChannelRegistry,
    Notifier, NotifyError, OperationHandler, OperatorAlerts, RegistryError, RegistryResult,
    Relay, RelayError, RelayMode, RelayOptions, RelayRequest, RelayResponse, RetryState,
    TestFailure, TestRequest,
};
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Fails `failures` times with `error`, then succeeds.
struct FlakyHandler {
    failures: u32,
    error: RelayError,
    calls: AtomicU32,
}

impl FlakyHandler {
    fn new(failures: u32, error: RelayError) -> Arc<Self> {
        Arc::new(Self {
            failures,
            error,
            calls: AtomicU32::new(0),
        })
    }

    fn always(error: RelayError) -> Arc<Self> {
        Self::new(u32::MAX, error)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperationHandler for FlakyHandler {
    async fn handle(
        &self,
        _request: &RelayRequest,
        _mode: RelayMode,
    ) -> Result<RelayResponse, RelayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.error.clone());
        }
        Ok(RelayResponse {
            status: 200,
            headers: vec![("x-upstream".to_string(), "ok".to_string())],
            body: Bytes::from_static(br#"{"id":"cmpl-1"}"#),
        })
    }
}

/// Fails every check. With a gate, each check first waits for a permit.
#[derive(Default)]
struct FailingTester {
    calls: AtomicU32,
    gate: Option<Semaphore>,
}

impl FailingTester {
    fn gated() -> Self {
        Self {
            calls: AtomicU32::new(0),
            gate: Some(Semaphore::new(0)),
        }
    }
}

#[async_trait]
impl ChannelTester for FailingTester {
    async fn test(&self, _channel: &Channel, _request: &TestRequest) -> Result<(), TestFailure> {
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            drop(permit);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TestFailure::new("upstream unreachable"))
    }
}

/// In-memory registry whose listing can be switched to fail.
struct SwitchableRegistry {
    inner: MemoryChannelRegistry,
    fail_list: AtomicBool,
}

impl SwitchableRegistry {
    async fn status(&self, id: ChannelId) -> Option<ChannelStatus> {
        self.inner.status(id).await
    }
}

#[async_trait]
impl ChannelRegistry for SwitchableRegistry {
    async fn list_channels(&self, include_disabled: bool) -> RegistryResult<Vec<Channel>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("connection reset".to_string()));
        }
        self.inner.list_channels(include_disabled).await
    }

    async fn get_channel(&self, id: ChannelId) -> RegistryResult<Option<Channel>> {
        self.inner.get_channel(id).await
    }

    async fn set_channel_status(&self, id: ChannelId, status: ChannelStatus) -> RegistryResult<()> {
        self.inner.set_channel_status(id, status).await
    }

    async fn compare_and_set_status(
        &self,
        id: ChannelId,
        expected: ChannelStatus,
        next: ChannelStatus,
    ) -> RegistryResult<bool> {
        self.inner.compare_and_set_status(id, expected, next).await
    }
}

#[derive(Default)]
struct RecordingNotifier {
    emails: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(
        &self,
        _subject: &str,
        _recipient: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        self.emails.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn send_sms(&self, _channel_name: &str, _template_id: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

struct Fixture {
    registry: Arc<SwitchableRegistry>,
    tester: Arc<FailingTester>,
    notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_tester(FailingTester::default())
    }

    fn with_tester(tester: FailingTester) -> Self {
        let channels = [(1, "alpha"), (2, "beta")].map(|(id, name)| Channel {
            id,
            name: name.to_string(),
            status: ChannelStatus::Enabled,
            base_url: format!("https://{name}.example.com"),
            key: format!("sk-{name}"),
            test_model: None,
        });
        Self {
            registry: Arc::new(SwitchableRegistry {
                inner: MemoryChannelRegistry::with_channels(channels),
                fail_list: AtomicBool::new(false),
            }),
            tester: Arc::new(tester),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    fn relay(&self, handler: Arc<FlakyHandler>, retry_times: u32) -> Relay {
        self.build(handler, retry_times, SweepMode::Blocking).0
    }

    fn build(
        &self,
        handler: Arc<FlakyHandler>,
        retry_times: u32,
        sweep_mode: SweepMode,
    ) -> (Relay, Arc<HealthMonitor>) {
        let alerts = OperatorAlerts::new(
            self.notifier.clone(),
            Some("ops@example.com".to_string()),
            "2059401",
        );
        let events = EventHub::new(16);
        let monitor = Arc::new(HealthMonitor::new(
            self.registry.clone(),
            self.tester.clone(),
            alerts.clone(),
            events.clone(),
        ));
        let relay = Relay::new(
            HandlerSet::uniform(handler),
            self.registry.clone(),
            monitor.clone(),
            alerts,
            events,
            RelayOptions {
                retry_times,
                sweep_mode,
                policy: ErrorPolicy::new(true, "connection trouble, refresh and retry"),
                ..RelayOptions::default()
            },
        );
        (relay, monitor)
    }
}

fn request(path: &str) -> RelayRequest {
    RelayRequest {
        request_id: "req-42".to_string(),
        method: http::Method::POST,
        path: path.to_string(),
        query: None,
        headers: Vec::new(),
        body: Bytes::from_static(br#"{"model":"gpt-4o"}"#),
    }
}

fn channel_error(status: u16, kind: &str, code: &str) -> RelayError {
    RelayError::new(status, "upstream said no", kind, code).with_channel(ChannelRef {
        id: 1,
        name: "alpha".to_string(),
    })
}

#[tokio::test]
async fn invocations_are_bounded_by_budget() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(RelayError::new(500, "boom", "server_error", ""));
    let relay = fx.relay(handler.clone(), 0);

    let err = relay
        .relay(&request("/v1/completions"), RetryState::new(3))
        .await
        .unwrap_err();
    assert_eq!(handler.calls(), 4);
    assert_eq!(err.status, 500);
    assert_eq!(err.message(), "boom (request id: req-42)");
}

#[tokio::test]
async fn early_success_stops_retrying() {
    let fx = Fixture::new();
    let handler = FlakyHandler::new(2, RelayError::new(502, "bad gateway", "upstream_error", ""));
    let relay = fx.relay(handler.clone(), 0);

    let resp = relay
        .relay(&request("/v1/embeddings"), RetryState::new(5))
        .await
        .unwrap();
    assert_eq!(handler.calls(), 3);
    assert_eq!(resp.status, 200);
    assert_eq!(&resp.body[..], br#"{"id":"cmpl-1"}"#);
    assert_eq!(resp.headers, vec![("x-upstream".to_string(), "ok".to_string())]);
}

#[tokio::test]
async fn default_budget_applies_without_retry_param() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(RelayError::new(500, "boom", "server_error", ""));
    let relay = fx.relay(handler.clone(), 2);

    let state = relay.retry_state(None);
    relay
        .relay(&request("/v1/moderations"), state)
        .await
        .unwrap_err();
    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
async fn caller_errors_never_move_channels() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(channel_error(400, "invalid_request_error", ""));
    let relay = fx.relay(handler, 0);

    let err = relay
        .relay(&request("/v1/chat/completions"), RetryState::new(0))
        .await
        .unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(fx.tester.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.registry.status(1).await, Some(ChannelStatus::Enabled));
    assert_eq!(fx.registry.status(2).await, Some(ChannelStatus::Enabled));
    assert!(fx.notifier.emails.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rate_limit_message_replaces_upstream_text() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(channel_error(429, "requests", "rate_limit_exceeded"));
    let relay = fx.relay(handler, 0);

    let err = relay
        .relay(&request("/v1/completions"), RetryState::new(0))
        .await
        .unwrap_err();
    assert_eq!(err.status, 429);
    assert_eq!(
        err.message(),
        "connection trouble, refresh and retry (request id: req-42)"
    );
    assert_eq!(fx.registry.status(1).await, Some(ChannelStatus::Enabled));
}

#[tokio::test]
async fn credential_error_auto_disables_the_channel() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(channel_error(401, "invalid_request_error", "invalid_api_key"));
    let relay = fx.relay(handler, 0);

    relay
        .relay(&request("/v1/completions"), RetryState::new(0))
        .await
        .unwrap_err();
    assert_eq!(fx.registry.status(1).await, Some(ChannelStatus::AutoDisabled));
    assert_eq!(fx.registry.status(2).await, Some(ChannelStatus::Enabled));

    let emails = fx.notifier.emails.lock().unwrap();
    assert_eq!(emails.len(), 1);
    assert!(emails[0].contains("alpha"));
    assert!(emails[0].contains("upstream said no"));
}

#[tokio::test]
async fn auto_disable_switch_off_keeps_channel() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(channel_error(401, "", "invalid_api_key"));
    let alerts = OperatorAlerts::new(fx.notifier.clone(), None, "2059401");
    let events = EventHub::default();
    let monitor = Arc::new(HealthMonitor::new(
        fx.registry.clone(),
        fx.tester.clone(),
        alerts.clone(),
        events.clone(),
    ));
    let relay = Relay::new(
        HandlerSet::uniform(handler),
        fx.registry.clone(),
        monitor,
        alerts,
        events,
        RelayOptions {
            policy: ErrorPolicy::new(false, "slow down"),
            ..RelayOptions::default()
        },
    );

    relay
        .relay(&request("/v1/completions"), RetryState::new(0))
        .await
        .unwrap_err();
    assert_eq!(fx.registry.status(1).await, Some(ChannelStatus::Enabled));
}

#[tokio::test]
async fn terminal_chat_failure_runs_a_sweep() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(channel_error(503, "server_error", ""));
    let relay = fx.relay(handler, 0);

    relay
        .relay(&request("/v1/chat/completions"), RetryState::new(1))
        .await
        .unwrap_err();

    // Channel 1 went out through the error policy before the sweep listed it;
    // channel 2 failed its health check.
    assert_eq!(fx.tester.calls.load(Ordering::SeqCst), 2);
    assert_eq!(fx.registry.status(1).await, Some(ChannelStatus::AutoDisabled));
    assert_eq!(fx.registry.status(2).await, Some(ChannelStatus::ManuallyDisabled));
}

#[tokio::test]
async fn non_chat_failures_do_not_sweep() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(channel_error(503, "server_error", ""));
    let relay = fx.relay(handler, 0);

    relay
        .relay(&request("/v1/images/generations"), RetryState::new(0))
        .await
        .unwrap_err();
    assert_eq!(fx.tester.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn single_attempt_hands_back_remaining_budget() {
    let fx = Fixture::new();
    let handler = FlakyHandler::always(RelayError::new(500, "boom", "server_error", ""));
    let relay = fx.relay(handler.clone(), 0);
    let req = request("/v1/completions");

    let AttemptOutcome::Retry(next) = relay.relay_once(&req, RetryState::new(2)).await else {
        panic!("expected a retry");
    };
    assert_eq!(next, RetryState::new(1));

    let AttemptOutcome::Failed(err) = relay.relay_once(&req, RetryState::new(0)).await else {
        panic!("expected a terminal failure");
    };
    assert_eq!(err.message(), "boom (request id: req-42)");
    assert_eq!(handler.calls(), 2);
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn background_sweep_answers_before_transitions_land() {
    let fx = Fixture::with_tester(FailingTester::gated());
    let handler = FlakyHandler::always(channel_error(503, "server_error", ""));
    let (relay, monitor) = fx.build(handler, 0, SweepMode::Background);

    let err = relay
        .relay(&request("/v1/chat/completions"), RetryState::new(0))
        .await
        .unwrap_err();
    assert_eq!(err.status, 503);

    wait_until(|| monitor.is_running()).await;
    assert_eq!(fx.tester.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.registry.status(2).await, Some(ChannelStatus::Enabled));

    if let Some(gate) = &fx.tester.gate {
        gate.add_permits(1);
    }
    wait_until(|| !monitor.is_running()).await;
    assert_eq!(fx.tester.calls.load(Ordering::SeqCst), 2);
    assert_eq!(fx.registry.status(1).await, Some(ChannelStatus::AutoDisabled));
    assert_eq!(fx.registry.status(2).await, Some(ChannelStatus::ManuallyDisabled));
}

#[tokio::test]
async fn unlistable_registry_skips_sweep_and_keeps_error() {
    let fx = Fixture::new();
    fx.registry.fail_list.store(true, Ordering::SeqCst);
    let handler = FlakyHandler::always(channel_error(503, "server_error", ""));
    let relay = fx.relay(handler, 0);

    let err = relay
        .relay(&request("/v1/chat/completions"), RetryState::new(0))
        .await
        .unwrap_err();
    assert_eq!(err.status, 503);
    assert_eq!(err.message(), "upstream said no (request id: req-42)");
    assert_eq!(fx.tester.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.registry.status(2).await, Some(ChannelStatus::Enabled));
}
