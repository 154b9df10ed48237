use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Message returned to callers in place of an upstream 429 body.
pub const DEFAULT_RATE_LIMIT_MESSAGE: &str = "网络连接遇到问题，请尝试刷新页面并重新尝试。";
pub const DEFAULT_RETRY_TIMES: u32 = 0;
/// Upper bound on a per-request `retry` override.
pub const MAX_RETRY_OVERRIDE: u32 = 10;
pub const DEFAULT_SMS_TEMPLATE_DISABLED: &str = "2059401";

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// How a non-terminal failure is re-attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTransport {
    /// Bounded loop inside the request task.
    #[default]
    Internal,
    /// `307` back to the same path with `?retry=<n-1>`.
    Redirect,
}

/// Whether a health sweep holds the failing response until it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    #[default]
    Background,
    Blocking,
}

impl FromStr for RetryTransport {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(Self::Internal),
            "redirect" => Ok(Self::Redirect),
            other => Err(format!("unknown retry transport: {other}")),
        }
    }
}

impl fmt::Display for RetryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => f.write_str("internal"),
            Self::Redirect => f.write_str("redirect"),
        }
    }
}

impl FromStr for SweepMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "blocking" => Ok(Self::Blocking),
            other => Err(format!("unknown sweep mode: {other}")),
        }
    }
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Background => f.write_str("background"),
            Self::Blocking => f.write_str("blocking"),
        }
    }
}

/// Final, merged global configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persist back to DB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Optional outbound proxy (for upstream egress).
    #[serde(default)]
    pub proxy: Option<String>,
    /// Attempts granted to a request that carries no `retry` query parameter.
    #[serde(default)]
    pub retry_times: u32,
    #[serde(default)]
    pub retry_transport: RetryTransport,
    #[serde(default)]
    pub sweep_mode: SweepMode,
    /// Master switch for disabling channels from terminal errors.
    #[serde(default = "default_true")]
    pub auto_disable_channel: bool,
    /// Operator mailbox for channel state notifications.
    #[serde(default)]
    pub root_user_email: Option<String>,
    /// Endpoint receiving email/SMS notification payloads.
    #[serde(default)]
    pub notify_webhook: Option<String>,
    #[serde(default = "default_sms_template_disabled")]
    pub sms_template_disabled: String,
    #[serde(default = "default_rate_limit_message")]
    pub rate_limit_message: String,
    /// Print channel events as JSON lines on stderr.
    #[serde(default)]
    pub event_log: bool,
}

fn default_true() -> bool {
    true
}

fn default_sms_template_disabled() -> String {
    DEFAULT_SMS_TEMPLATE_DISABLED.to_string()
}

fn default_rate_limit_message() -> String {
    DEFAULT_RATE_LIMIT_MESSAGE.to_string()
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub proxy: Option<String>,
    pub retry_times: Option<u32>,
    pub retry_transport: Option<RetryTransport>,
    pub sweep_mode: Option<SweepMode>,
    pub auto_disable_channel: Option<bool>,
    pub root_user_email: Option<String>,
    pub notify_webhook: Option<String>,
    pub sms_template_disabled: Option<String>,
    pub rate_limit_message: Option<String>,
    pub event_log: Option<bool>,
}

macro_rules! overlay_fields {
    ($target:expr, $other:expr, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $target.$field = $other.$field;
            }
        )+
    };
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        overlay_fields!(
            self,
            other,
            host,
            port,
            dsn,
            proxy,
            retry_times,
            retry_transport,
            sweep_mode,
            auto_disable_channel,
            root_user_email,
            notify_webhook,
            sms_template_disabled,
            rate_limit_message,
            event_log,
        );
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            proxy: self.proxy.filter(|value| !value.trim().is_empty()),
            retry_times: self.retry_times.unwrap_or(DEFAULT_RETRY_TIMES),
            retry_transport: self.retry_transport.unwrap_or_default(),
            sweep_mode: self.sweep_mode.unwrap_or_default(),
            auto_disable_channel: self.auto_disable_channel.unwrap_or(true),
            root_user_email: self
                .root_user_email
                .filter(|value| !value.trim().is_empty()),
            notify_webhook: self.notify_webhook.filter(|value| !value.trim().is_empty()),
            sms_template_disabled: self
                .sms_template_disabled
                .unwrap_or_else(default_sms_template_disabled),
            rate_limit_message: self
                .rate_limit_message
                .unwrap_or_else(default_rate_limit_message),
            event_log: self.event_log.unwrap_or(false),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            proxy: value.proxy,
            retry_times: Some(value.retry_times),
            retry_transport: Some(value.retry_transport),
            sweep_mode: Some(value.sweep_mode),
            auto_disable_channel: Some(value.auto_disable_channel),
            root_user_email: value.root_user_email,
            notify_webhook: value.notify_webhook,
            sms_template_disabled: Some(value.sms_template_disabled),
            rate_limit_message: Some(value.rate_limit_message),
            event_log: Some(value.event_log),
        }
    }
}
