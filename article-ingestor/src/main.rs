use std::sync::Arc;

use anyhow::Context;
use article_ingestor::{
    app_context::AppContext, checkpoint::ProgressTracker, config::Config, consumer_loop,
    reconcile::Reconciler, reconciler_loop, staging_loop,
};
use axum::{routing::get, Router};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use futures::future::ready;
use serve_metrics::{serve, setup_metrics_routes};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "article ingestor service"
}

fn start_health_liveness_server(config: &Config, context: Arc<AppContext>) -> JoinHandle<()> {
    let config = config.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(context.liveness.get_status())),
        );
    let router = setup_metrics_routes(router);
    let bind = format!("{}:{}", config.host, config.port);
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_with_defaults()
        .context("failed to load configuration from the environment")?;

    let consumer = SingleTopicConsumer::new(config.kafka.clone(), config.consumer.clone())
        .context("failed to create kafka consumer")?;

    let context = Arc::new(
        AppContext::new(&config)
            .await
            .context("failed to connect to the warehouse")?,
    );

    info!(
        "Subscribed to topic: {}",
        config.consumer.kafka_consumer_topic
    );

    start_health_liveness_server(&config, context.clone());

    let tracker = ProgressTracker::new(consumer.clone());
    for (partition, offset) in tracker.load() {
        info!(partition, offset, "resuming from committed position");
    }

    let (event_tx, event_rx) = mpsc::channel(config.max_batch_size * 4);
    let (reconcile_tx, reconcile_rx) = mpsc::channel(1);

    let cancel = CancellationToken::new();

    let consumer_handle = tokio::spawn(consumer_loop(consumer, event_tx, cancel.clone()));
    let mut staging_handle = tokio::spawn(staging_loop(
        config.clone(),
        context.warehouse.clone(),
        tracker,
        event_rx,
        reconcile_tx,
        context.staging_liveness.clone(),
    ));
    let reconciler = Reconciler::new(context.warehouse.clone(), config.retention());
    let mut reconciler_handle = tokio::spawn(reconciler_loop(
        reconciler,
        reconcile_rx,
        config.reconcile_interval(),
        config.reconcile_max_failures,
        context.reconciler_liveness.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining in-flight work");
            cancel.cancel();
        }
        result = &mut staging_handle => {
            // The pipeline stopped without being asked to; surface why
            cancel.cancel();
            let _unused = reconciler_handle.await;
            result.context("staging loop panicked")??;
            anyhow::bail!("staging loop exited unexpectedly");
        }
        result = &mut reconciler_handle => {
            cancel.cancel();
            result.context("reconciler loop panicked")??;
            anyhow::bail!("reconciler loop exited unexpectedly");
        }
    }

    // Let in-flight staging and reconciliation finish; the last stored
    // offsets are the resume point for the next run
    consumer_handle.await.context("consumer loop panicked")?;
    staging_handle.await.context("staging loop panicked")??;
    reconciler_handle
        .await
        .context("reconciler loop panicked")??;

    info!("shutdown complete");
    Ok(())
}
