use alert_pipeline::config::Config;
use alert_pipeline::debounce::Debouncer;
use alert_pipeline::feed;
use alert_pipeline::http::{self, HttpState};
use alert_pipeline::notify::Dispatcher;
use alert_pipeline::pipeline::{AlertPipeline, PipelineDeps};
use alert_pipeline::settings::{FileSettingsStore, SettingsStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,alert_pipeline=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(normalize_otlp_http_endpoint(endpoint));
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "alert-pipeline"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let settings: Arc<dyn SettingsStore> = Arc::new(
        FileSettingsStore::open(&config.settings_path)
            .await
            .with_context(|| {
                format!("failed to load settings from {}", config.settings_path.display())
            })?,
    );

    let client = reqwest::Client::builder()
        .timeout(config.delivery_timeout())
        .build()
        .context("failed to build outbound HTTP client")?;
    let dispatcher = Dispatcher::via_proxy(
        client,
        &config.notify_proxy_url,
        config.delivery_timeout(),
    );

    let (readings_tx, readings_rx) = mpsc::channel(256);
    let subscription = if config.enable_feed {
        tracing::info!(
            host = %config.mqtt_host,
            port = config.mqtt_port,
            prefix = %config.mqtt_topic_prefix,
            "starting telemetry feed"
        );
        Some(feed::subscribe(config.feed(), readings_tx))
    } else {
        tracing::warn!("telemetry feed disabled; only manual alerts will be sent");
        drop(readings_tx);
        None
    };

    let pipeline = AlertPipeline::spawn(PipelineDeps {
        settings: settings.clone(),
        dispatcher: Arc::new(dispatcher),
        debouncer: Arc::new(Debouncer::new()),
        readings: readings_rx,
        subscription,
        window_size: config.window_size,
        history_limit: config.history_limit,
    });

    let app = http::router(HttpState {
        pipeline: pipeline.clone(),
        settings,
    });
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind control API on {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
                futures::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
        })
        .await
        .context("control API server failed")?;

    pipeline.shutdown().await;
    tracing::info!("alert pipeline stopped");
    Ok(())
}
