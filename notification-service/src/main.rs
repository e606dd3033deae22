//! Notification service - request fan-out and Twilio status callback receiver.
//!
//! This binary:
//! - Consumes notification requests and publishes one send task per contact
//! - Receives delivery-status callbacks from Twilio
//! - Verifies their signature (production only)
//! - Publishes terminal statuses to Kafka
//! - Reports broker reachability on `/health`

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use notification::broker::WriterOptions;
use notification::requests::ConsumerSettings;
use notification::web::{TwilioRequestValidator, WebhookAuthGate};
use notification::{
    router, AppState, BrokerFactory, CallbackService, Config, NotificationRequestsConsumer,
    NotificationRequestsService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("notification_service_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        app_env = %config.app_env,
        status_callback_endpoint = %config.status_callback_endpoint,
        twilio_auth_configured = config.validator_secret().is_some(),
        kafka_addrs = ?config.kafka_addrs,
        requests_topic = %config.requests_topic,
        tasks_topic = %config.tasks_topic,
        status_topic = %config.status_topic,
        consumer_group = %config.consumer_group,
        max_attempts = config.max_attempts,
        "config_loaded"
    );

    let factory = BrokerFactory::from_config(&config).context("Failed to create Kafka factory")?;

    // Readiness is reported by /health; an unreachable broker at boot is not fatal
    if let Err(e) = factory.ping().await {
        warn!(error = %e, "kafka_unreachable_at_startup");
    }

    // Request fan-out: notification.requests → notification.tasks
    let tasks_writer = factory.new_writer_with(
        config.tasks_topic.clone(),
        WriterOptions {
            batch_timeout: Some(config.tasks_writer_batch_timeout),
        },
    );
    let reader = Arc::new(
        factory
            .new_reader(config.requests_topic.clone(), config.consumer_group.clone())
            .context("Failed to create Kafka reader")?,
    );
    let consumer = NotificationRequestsConsumer::new(
        NotificationRequestsService::new(
            Arc::new(tasks_writer.clone()),
            config.tasks_writer_batch_size,
        ),
        reader.clone(),
        ConsumerSettings::from_config(&config),
    );

    let status_writer = factory.new_writer(config.status_topic.clone());
    let callbacks = CallbackService::new(Arc::new(status_writer.clone()), config.max_attempts);

    let gate = if config.is_production() {
        Some(build_gate(&config)?)
    } else {
        warn!(app_env = %config.app_env, "webhook_signature_check_disabled");
        None
    };

    let port = config.port;
    let state = AppState::new(config, factory, callbacks);
    let app = router(state, gate);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // One shutdown flag for the server and the consumer
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    tokio::spawn({
        let shutdown_tx = Arc::clone(&shutdown_tx);
        async move {
            shutdown_signal().await;
            shutdown_tx.send_replace(true);
        }
    });

    // A failed consumer takes the server down with it
    let consumer_task = tokio::spawn({
        let shutdown_tx = Arc::clone(&shutdown_tx);
        let shutdown_rx = shutdown_rx.clone();
        async move {
            let result = consumer.run(wait_for_shutdown(shutdown_rx)).await;
            if let Err(e) = &result {
                error!(error = %e, "requests_consumer_failed");
            }
            shutdown_tx.send_replace(true);
            result
        }
    });

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .context("Server error")?;

    let consumed = consumer_task.await.context("Requests consumer panicked")?;

    // Leave the group, then flush and release the Kafka producers
    reader.close();
    tasks_writer.close().await;
    status_writer.close().await;

    consumed.context("Requests consumer failed")?;

    info!("notification_service_shutdown_complete");

    Ok(())
}

/// Build the signature gate, refusing to start without a usable secret.
fn build_gate(config: &Config) -> Result<WebhookAuthGate> {
    let Some(secret) = config.validator_secret() else {
        bail!("TWILIO_AUTH_TOKEN must be set in production");
    };

    Url::parse(&config.status_callback_endpoint)
        .context("STATUS_CALLBACK_ENDPOINT is not a valid URL")?;

    if config.status_callback_endpoint.ends_with('/') {
        warn!(
            status_callback_endpoint = %config.status_callback_endpoint,
            "status_callback_endpoint_trailing_slash"
        );
    }

    let validator = Arc::new(TwilioRequestValidator::new(secret));
    Ok(WebhookAuthGate::new(
        config.status_callback_endpoint.clone(),
        validator,
    ))
}

/// Resolve once the shutdown flag is raised.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("notification_service_shutting_down");
}
