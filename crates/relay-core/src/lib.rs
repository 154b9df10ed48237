//! Request dispatch and channel failover for the relay.
//!
//! The core only talks to its collaborators (handlers, channel registry,
//! notifier, channel tester) through traits. Reference implementations of
//! each live alongside so the binary can run without extra crates; HTTP
//! serving and persistence live elsewhere.

pub mod channel;
pub mod errors;
pub mod events;
pub mod handler;
pub mod headers;
pub mod health;
pub mod mode;
pub mod notify;
pub mod passthrough;
pub mod policy;
pub mod relay;
pub mod retry;
pub mod tester;
pub mod upstream;

pub use channel::{
    Channel, ChannelId, ChannelRef, ChannelRegistry, ChannelStatus, MemoryChannelRegistry,
    RegistryError, RegistryResult,
};
pub use errors::{ErrorBody, RelayError};
pub use events::{
    ChannelStatusEvent, Event, EventHub, EventSink, JsonLineSink, SweepEvent, TransitionCause,
};
pub use handler::{HandlerSet, OperationHandler, RelayRequest, RelayResponse};
pub use headers::{Headers, forwardable_headers, header_get, header_set};
pub use health::{
    ChannelTester, HealthMonitor, SweepError, SweepReport, TestFailure, TestRequest,
};
pub use mode::{HandlerGroup, RelayMode};
pub use notify::{LogNotifier, Notifier, NotifyError, OperatorAlerts, WebhookNotifier};
pub use passthrough::PassthroughHandler;
pub use policy::{ErrorKind, ErrorPolicy, Verdict, classify_error};
pub use relay::{AttemptOutcome, Relay, RelayOptions};
pub use retry::{RetryController, RetryState, TerminalFailure};
pub use tester::HttpChannelTester;
pub use upstream::{
    UpstreamClient, UpstreamClientConfig, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, WreqUpstreamClient,
};
