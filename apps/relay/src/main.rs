use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_common::{GlobalConfig, GlobalConfigPatch, MAX_RETRY_OVERRIDE};
use relay_core::{
    ChannelRegistry, ErrorPolicy, EventHub, EventSink, HandlerSet, HealthMonitor,
    HttpChannelTester, JsonLineSink, LogNotifier, Notifier, OperatorAlerts, PassthroughHandler,
    Relay, RelayOptions, UpstreamClient, UpstreamClientConfig, WebhookNotifier,
    WreqUpstreamClient,
};
use relay_router::proxy_router;
use relay_storage::{SeaOrmStorage, Storage};
use tracing::{error, info};

mod cli;
mod dsn;
mod seed;

use crate::cli::Cli;
use crate::dsn::resolve_dsn;
use crate::seed::load_channels_file;

const EVENT_BUFFER: usize = 256;
/// Bound on a single health check so a hung channel cannot stall a sweep.
const CHANNEL_TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        error!(event = "startup_failed", error = %format!("{err:#}"));
        eprintln!("relay failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let dsn = resolve_dsn(cli.dsn.as_deref(), &cli.data_dir)?;
    let storage = Arc::new(
        SeaOrmStorage::connect(&dsn)
            .await
            .with_context(|| format!("connect {dsn}"))?,
    );
    info!(event = "db_connected", dsn = %dsn);
    storage.sync().await.context("schema sync")?;

    let config = merge_config(&cli, &storage, dsn).await?;
    info!(
        event = "config_loaded",
        host = %config.host,
        port = config.port,
        proxy = %config.proxy.as_deref().unwrap_or(""),
        retry_times = config.retry_times,
        retry_transport = %config.retry_transport,
        sweep_mode = %config.sweep_mode,
        auto_disable_channel = config.auto_disable_channel
    );

    if let Some(path) = cli.channels_file.as_deref() {
        let channels = load_channels_file(path)?;
        let count = storage.import_channels(&channels).await?;
        info!(event = "channels_seeded", count, file = %path.display());
    }
    let channels = storage.list_channels(true).await?;
    let enabled = channels.iter().filter(|c| c.status.is_enabled()).count();
    info!(event = "channels_loaded", total = channels.len(), enabled);

    let relay = build_relay(&config, storage)?;
    let app = proxy_router(Arc::new(relay), config.retry_transport);
    serve(app, &format!("{}:{}", config.host, config.port)).await
}

/// CLI > ENV > DB > defaults; the result is written back to the DB.
async fn merge_config(
    cli: &Cli,
    storage: &SeaOrmStorage,
    dsn: String,
) -> anyhow::Result<GlobalConfig> {
    let mut patch = GlobalConfigPatch::default();
    if let Some(row) = storage.load_global_config().await? {
        patch.overlay(row.config.into());
    }
    let mut overrides = cli.config_patch();
    overrides.dsn = Some(dsn);
    patch.overlay(overrides);

    let config = patch.into_config()?;
    storage.upsert_global_config(&config).await?;
    Ok(config)
}

fn build_relay(config: &GlobalConfig, storage: Arc<SeaOrmStorage>) -> anyhow::Result<Relay> {
    let client: Arc<dyn UpstreamClient> = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig {
            proxy: config.proxy.clone(),
            ..UpstreamClientConfig::default()
        })
        .context("build upstream client")?,
    );
    let test_client: Arc<dyn UpstreamClient> = Arc::new(
        WreqUpstreamClient::new(tester_client_config(config))
            .context("build channel test client")?,
    );

    let notifier: Arc<dyn Notifier> = match config.notify_webhook.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(client.clone(), url)),
        None => Arc::new(LogNotifier),
    };
    let alerts = OperatorAlerts::new(
        notifier,
        config.root_user_email.clone(),
        config.sms_template_disabled.clone(),
    );

    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
    if config.event_log {
        sinks.push(Arc::new(JsonLineSink::stderr()));
    }
    let events = EventHub::with_sinks(EVENT_BUFFER, sinks);

    let registry: Arc<dyn ChannelRegistry> = storage;
    let monitor = Arc::new(HealthMonitor::new(
        registry.clone(),
        Arc::new(HttpChannelTester::new(test_client)),
        alerts.clone(),
        events.clone(),
    ));
    let handler = Arc::new(PassthroughHandler::new(registry.clone(), client));

    Ok(Relay::new(
        HandlerSet::uniform(handler),
        registry,
        monitor,
        alerts,
        events,
        RelayOptions {
            retry_times: config.retry_times,
            max_retry_override: MAX_RETRY_OVERRIDE.max(config.retry_times),
            sweep_mode: config.sweep_mode,
            policy: ErrorPolicy::new(
                config.auto_disable_channel,
                config.rate_limit_message.clone(),
            ),
        },
    ))
}

fn tester_client_config(config: &GlobalConfig) -> UpstreamClientConfig {
    let defaults = UpstreamClientConfig::default();
    UpstreamClientConfig {
        proxy: config.proxy.clone(),
        connect_timeout: defaults.connect_timeout.min(CHANNEL_TEST_TIMEOUT),
        request_timeout: CHANNEL_TEST_TIMEOUT,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(app: axum::Router, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(event = "listening", addr = %addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(event = "shutdown", "ctrl-c received");
            }
        })
        .await?;
    Ok(())
}
