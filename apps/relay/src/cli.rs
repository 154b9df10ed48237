use std::path::PathBuf;

use clap::Parser;
use relay_common::{GlobalConfigPatch, RetryTransport, SweepMode};

/// Every config flag is optional so that values persisted in the database
/// survive unless the operator overrides them here or through the env.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
pub(crate) struct Cli {
    #[arg(long, env = "RELAY_DSN")]
    pub(crate) dsn: Option<String>,
    /// Where the default sqlite database lives when no DSN is given.
    #[arg(long, env = "RELAY_DATA_DIR", default_value = "./data")]
    pub(crate) data_dir: PathBuf,
    /// JSON array of channels upserted into the database at startup.
    #[arg(long, env = "RELAY_CHANNELS_FILE")]
    pub(crate) channels_file: Option<PathBuf>,

    #[arg(long, env = "RELAY_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "RELAY_PORT")]
    pub(crate) port: Option<u16>,
    /// Egress proxy for upstream calls.
    #[arg(long, env = "RELAY_PROXY")]
    pub(crate) proxy: Option<String>,
    #[arg(long, env = "RELAY_RETRY_TIMES")]
    pub(crate) retry_times: Option<u32>,
    /// `internal` or `redirect`.
    #[arg(long, env = "RELAY_RETRY_TRANSPORT")]
    pub(crate) retry_transport: Option<RetryTransport>,
    /// `background` or `blocking`.
    #[arg(long, env = "RELAY_SWEEP_MODE")]
    pub(crate) sweep_mode: Option<SweepMode>,
    #[arg(long, env = "RELAY_AUTO_DISABLE_CHANNEL")]
    pub(crate) auto_disable_channel: Option<bool>,
    #[arg(long, env = "RELAY_ROOT_USER_EMAIL")]
    pub(crate) root_user_email: Option<String>,
    #[arg(long, env = "RELAY_NOTIFY_WEBHOOK")]
    pub(crate) notify_webhook: Option<String>,
    #[arg(long, env = "RELAY_SMS_TEMPLATE_DISABLED")]
    pub(crate) sms_template_disabled: Option<String>,
    #[arg(long, env = "RELAY_RATE_LIMIT_MESSAGE")]
    pub(crate) rate_limit_message: Option<String>,
    #[arg(long, env = "RELAY_EVENT_LOG")]
    pub(crate) event_log: Option<bool>,
}

impl Cli {
    pub(crate) fn config_patch(&self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            dsn: self.dsn.clone(),
            proxy: self.proxy.clone(),
            retry_times: self.retry_times,
            retry_transport: self.retry_transport,
            sweep_mode: self.sweep_mode,
            auto_disable_channel: self.auto_disable_channel,
            root_user_email: self.root_user_email.clone(),
            notify_webhook: self.notify_webhook.clone(),
            sms_template_disabled: self.sms_template_disabled.clone(),
            rate_limit_message: self.rate_limit_message.clone(),
            event_log: self.event_log,
        }
    }
}
