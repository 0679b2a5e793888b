//! TenantCore Identity Server
//!
//! Process wiring for the identity core:
//! - MongoDB connection and index initialization
//! - Redis-backed cache (in-process when Redis is disabled)
//! - AMQP publisher for provisioning events
//! - Inbound billing bridge consuming tenant update events
//! - Hourly purge of expired verification tokens
//! - Health endpoints: `/health`, `/ready`
//!
//! ## Configuration
//!
//! Loaded from `TENANTCORE_CONFIG` or the standard config paths, then
//! overridden by `TENANTCORE_*` environment variables. `LOG_FORMAT` selects
//! `json` or `text` logs and `RUST_LOG` sets the filter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use mongodb::{bson::doc, Client, Database};
use tokio::{net::TcpListener, signal, sync::broadcast};
use tracing::{error, info, warn};

use tc_config::{AppConfig, ConfigLoader};
use tc_identity::cache::{CacheStore, CacheTtls, MemoryCacheStore, RedisCacheStore};
use tc_identity::collaborators::{HttpBillingClient, MongoSettingsService, SettingsService};
use tc_identity::events::{EventBridge, ProvisioningEvents};
use tc_identity::tenant::{MongoTenantRepository, TenantProvisioningService};
use tc_identity::verification::{
    MongoVerificationTokenRepository, TokenPolicy, VerificationTokenService,
};
use tc_identity::CacheLayer;
use tc_queue::amqp::{AmqpConsumer, AmqpConsumerConfig, AmqpPublisher, AmqpPublisherConfig};
use tc_queue::QueueConsumer;

const TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
struct AppState {
    db: Database,
    bridge_consumer: Option<Arc<dyn QueueConsumer>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tc_common::logging::init_logging("tc-identity-server");

    let config = ConfigLoader::new().load()?;
    info!(
        database = %config.mongodb.database,
        redis = config.redis.enabled,
        amqp = config.amqp.enabled,
        "Starting TenantCore identity server"
    );

    // MongoDB
    let client = Client::with_uri_str(&config.mongodb.uri).await?;
    let db = client.database(&config.mongodb.database);
    tc_identity::initialize_indexes(&db).await?;

    // Cache
    let cache = build_cache(&config).await;

    // Collaborators
    let billing = HttpBillingClient::new(
        &config.billing.base_url,
        Duration::from_secs(config.billing.timeout_secs),
    )?
    .with_cache(cache.clone());
    let settings: Arc<dyn SettingsService> = Arc::new(MongoSettingsService::new(&db));

    // Tenant provisioning
    let mut provisioning = TenantProvisioningService::new(
        Arc::new(MongoTenantRepository::new(&db)),
        cache.clone(),
        Arc::new(billing),
        settings.clone(),
    );
    if config.amqp.enabled {
        let publisher = AmqpPublisher::new(AmqpPublisherConfig {
            uri: config.amqp.uri.clone(),
            exchange: config.amqp.exchange.clone(),
            declare_exchange: true,
        })
        .await?;
        provisioning = provisioning.with_events(ProvisioningEvents::new(
            Arc::new(publisher),
            &config.amqp.provisioning_routing_key,
            &config.amqp.widget_routing_key,
        ));
    }
    let provisioning = Arc::new(provisioning);

    let tokens = Arc::new(VerificationTokenService::new(
        Arc::new(MongoVerificationTokenRepository::new(&db)),
        TokenPolicy::from_secs(
            config.tokens.max_per_hour,
            config.tokens.email_verification_ttl_secs,
            config.tokens.password_reset_ttl_secs,
        ),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();
    let mut bridge_consumer: Option<Arc<dyn QueueConsumer>> = None;

    // Inbound billing bridge
    if config.amqp.enabled {
        let consumer = Arc::new(AmqpConsumer::new(AmqpConsumerConfig {
            uri: config.amqp.uri.clone(),
            queue_name: config.amqp.inbound_queue.clone(),
            prefetch_count: config.amqp.prefetch_count,
            ..Default::default()
        })
        .await?);
        bridge_consumer = Some(consumer.clone());
        let bridge = EventBridge::new(provisioning.clone(), settings.clone());
        let shutdown_rx = shutdown_tx.subscribe();
        let batch_size = u32::from(config.amqp.prefetch_count.max(1));
        let idle = Duration::from_millis(config.amqp.poll_interval_ms);
        tasks.push(tokio::spawn(async move {
            bridge
                .run(consumer, shutdown_rx, batch_size, idle)
                .await;
        }));
        info!(queue = %config.amqp.inbound_queue, "Billing event bridge started");
    } else {
        warn!("AMQP disabled: provisioning events are not published and billing updates are not consumed");
    }

    // Token housekeeping
    {
        let tokens = tokens.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TOKEN_PURGE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = tokens.purge_expired(tc_identity::shared::now()).await {
                            warn!(error = %e, "Expired token purge failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Token housekeeping shutting down");
                        break;
                    }
                }
            }
        }));
    }

    // Health server
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(AppState {
            db: db.clone(),
            bridge_consumer,
        });
    let listener = TcpListener::bind(&addr).await?;
    info!("Health server listening on http://{}", addr);

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Health server failed");
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received, stopping");
    let _ = shutdown_tx.send(());

    for task in tasks {
        let _ = task.await;
    }
    let _ = server.await;

    info!("TenantCore identity server stopped");
    Ok(())
}

async fn build_cache(config: &AppConfig) -> CacheLayer {
    let ttls = CacheTtls::from_secs(
        config.cache.default_ttl_secs,
        config.cache.api_key_ttl_secs,
        config.cache.tenant_users_ttl_secs,
    );

    let store: Arc<dyn CacheStore> = if config.redis.enabled {
        match RedisCacheStore::connect(&config.redis.url).await {
            Ok(store) => {
                info!("Connected to Redis cache");
                Arc::new(store)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to in-process cache");
                Arc::new(MemoryCacheStore::new())
            }
        }
    } else {
        info!("Redis disabled, using in-process cache");
        Arc::new(MemoryCacheStore::new())
    };

    CacheLayer::new(store, ttls)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP" }))
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let bridge_up = state
        .bridge_consumer
        .as_ref()
        .map_or(true, |consumer| consumer.is_healthy());
    if !bridge_up {
        warn!("Readiness check failed: billing bridge consumer stopped");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "NOT_READY", "bridge": "DOWN" })),
        );
    }

    match state.db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "READY" }))),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "NOT_READY", "mongodb": "DOWN" })),
            )
        }
    }
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
            Ok(mut sig) => {
                sig.recv().await;
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
}
