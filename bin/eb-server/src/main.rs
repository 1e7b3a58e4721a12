//! EventBook Server
//!
//! Serves the booking HTTP API and, unless disabled, runs the expiration
//! worker that releases seats held by unconfirmed registrations.
//!
//! Configuration comes from an optional TOML file (`--config` / `EB_CONFIG`)
//! overlaid with `EB_*` environment variables; see `eb-config`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use eb_api::{create_router, AppState, RequestValidator};
use eb_booking::{
    BookingService, ConfirmationService, EventCatalog, ExpirationScheduler, ExpirationWorker,
    LogNotifier, NoopNotifier, Notifier, RetryPolicy, SmtpNotifier, SmtpSettings, WorkerHandle,
    WorkerSettings,
};
use eb_config::{
    AppConfig, BrokerBackend, BrokerConfig, NotifierBackend, NotifierConfig, StoreBackend,
};
use eb_queue::{
    AmqpDelayedQueue, AmqpSettings, DelayedPublisher, InMemoryDelayedQueue, QueueConsumer,
};
use eb_store::{MemoryStore, PostgresStore, Store};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};

/// EventBook booking server
#[derive(Parser, Debug)]
#[command(name = "eb-server")]
#[command(about = "Capacity-safe event booking with pending holds and automatic expiration")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "EB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    eb_common::init_logging(&config.logging.level, config.logging.format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        store = ?config.database.backend,
        broker = ?config.broker.backend,
        notifier = ?config.notifier.backend,
        "Starting EventBook server"
    );

    // 1. Metrics recorder
    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            eb_booking::describe_metrics();
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    // 2. Store
    let postgres = match config.database.backend {
        StoreBackend::Postgres => {
            let store = PostgresStore::connect(
                &config.database.url,
                config.database.max_connections,
                config.database.acquire_timeout(),
            )
            .await
            .context("Failed to connect to PostgreSQL")?;
            if config.database.run_migrations {
                store.migrate_up().await.context("Failed to apply migrations")?;
                info!("Database migrations applied");
            }
            Some(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store, data is lost on restart");
            None
        }
    };
    let store: Arc<dyn Store> = match &postgres {
        Some(pg) => pg.clone(),
        None => Arc::new(MemoryStore::new()),
    };

    // 3. Broker
    let (publisher, consumer) = connect_broker(&config.broker).await?;

    // 4. Notifier
    let notifier = build_notifier(&config.notifier)?;

    // 5. Workflows
    let retry = RetryPolicy::new(config.booking.max_attempts);
    let scheduler = ExpirationScheduler::new(publisher);
    let catalog = Arc::new(EventCatalog::new(store.clone(), retry));
    let booking = Arc::new(BookingService::new(
        store.clone(),
        scheduler.clone(),
        notifier.clone(),
        retry,
    ));
    let confirmation = Arc::new(ConfirmationService::new(store.clone(), notifier.clone(), retry));

    // 6. Expiration worker
    let worker = if config.worker.enabled {
        let worker = Arc::new(ExpirationWorker::new(store.clone(), scheduler, notifier));
        Some(worker.start(
            consumer.clone(),
            WorkerSettings {
                concurrency: config.worker.concurrency,
            },
        ))
    } else {
        info!("Expiration worker disabled in this process");
        None
    };

    // 7. HTTP API
    let state = AppState {
        catalog,
        booking,
        confirmation,
        store,
        validator: Arc::new(RequestValidator::new()?),
        metrics,
    };
    let app = create_router(state);

    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    info!("HTTP API stopped, draining background work");

    // Graceful shutdown
    stop_background(worker, consumer.as_ref(), config.server.shutdown_timeout()).await;

    if let Some(pg) = postgres {
        if config.database.rollback_on_shutdown {
            match pg.migrate_down().await {
                Ok(()) => info!("Database migrations rolled back"),
                Err(e) => error!(error = %e, "Failed to roll back migrations"),
            }
        }
        pg.close().await;
    }

    info!("EventBook server shutdown complete");
    Ok(())
}

/// Stop the expiration worker within `grace`, then make sure the consumer is closed.
async fn stop_background(
    worker: Option<WorkerHandle>,
    consumer: &dyn QueueConsumer,
    grace: Duration,
) {
    let worker_stopped = match worker {
        Some(handle) => {
            let stopped = tokio::time::timeout(grace, handle.shutdown()).await.is_ok();
            if !stopped {
                warn!(timeout_secs = grace.as_secs(), "Expiration worker did not stop in time");
            }
            stopped
        }
        None => false,
    };
    // A stopped worker has already closed the consumer
    if !worker_stopped {
        if let Err(e) = consumer.close().await {
            warn!(error = %e, "Failed to close broker connection");
        }
    }
}

async fn connect_broker(
    config: &BrokerConfig,
) -> Result<(Arc<dyn DelayedPublisher>, Arc<dyn QueueConsumer>)> {
    match config.backend {
        BrokerBackend::Amqp => {
            let queue = Arc::new(
                AmqpDelayedQueue::connect(AmqpSettings {
                    url: config.url.clone(),
                    exchange: config.exchange.clone(),
                    queue: config.queue.clone(),
                    prefetch: config.prefetch,
                    consumer_tag: format!("eb-server-{}", uuid::Uuid::new_v4()),
                })
                .await
                .context("Failed to connect to RabbitMQ")?,
            );
            let publisher: Arc<dyn DelayedPublisher> = queue.clone();
            let consumer: Arc<dyn QueueConsumer> = queue;
            Ok((publisher, consumer))
        }
        BrokerBackend::Memory => {
            warn!("Using in-memory broker, scheduled expirations are lost on restart");
            let queue = Arc::new(InMemoryDelayedQueue::new(config.queue.clone()));
            let publisher: Arc<dyn DelayedPublisher> = queue.clone();
            let consumer: Arc<dyn QueueConsumer> = queue;
            Ok((publisher, consumer))
        }
    }
}

fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match config.backend {
        NotifierBackend::Smtp => Arc::new(SmtpNotifier::new(&SmtpSettings {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            username: config.smtp_username.clone(),
            password: config.smtp_password.clone(),
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        })?),
        NotifierBackend::Log => Arc::new(LogNotifier),
        NotifierBackend::Disabled => Arc::new(NoopNotifier),
    };
    Ok(notifier)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
