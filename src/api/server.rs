use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get, routing::post};
use secrecy::ExposeSecret;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::auth::RateLimiter;
use super::services::{
    advance_application, apply, get_application, health, ingest_profile, ingest_role,
    list_applications, list_roles, sms_webhook,
};
use super::state::AppState;
use crate::broker::{Broker, RedisBroker};
use crate::clients::artifacts::ArtifactStore;
use crate::clients::fetch::PageFetcher;
use crate::clients::llm::{DocumentEngine, HttpDocumentEngine, StaticEngine};
use crate::clients::sms::{HttpSmsGateway, MemorySms, SmsGateway};
use crate::config::Config;
use crate::crypto::CredentialCipher;
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::hitl::HitlController;
use crate::observability::Metrics;
use crate::store::AppStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Assemble the dispatcher router. Shared with the API integration tests.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ingest/profile", post(ingest_profile))
        .route("/ingest/role", post(ingest_role))
        .route("/jobs/apply/{role_id}", post(apply))
        .route("/applications", get(list_applications))
        .route("/applications/{id}", get(get_application))
        .route("/applications/{id}/advance", post(advance_application))
        .route("/roles", get(list_roles))
        .route("/health", get(health))
        .route("/webhooks/sms", post(sms_webhook))
        .with_state(state)
        // Transparently decompress gzip request bodies at the middleware level
        .layer(RequestDecompressionLayer::new())
}

/// Entry point for `applybox dispatcher`: store + broker + loops + HTTP
pub async fn run(config: Config) -> Result<(), AnyError> {
    info!(path = %config.store.path.display(), "Opening application store");
    let store = Arc::new(AppStore::open(&config.store.path)?);

    info!(url = %config.broker.url, "Connecting to broker");
    let broker: Arc<dyn Broker> =
        Arc::new(RedisBroker::connect(&config.broker.url, &config.broker.namespace).await?);

    let cipher = match &config.secrets.encryption_key {
        Some(key) => Some(Arc::new(CredentialCipher::from_base64(key.expose_secret())?)),
        None => {
            warn!("APPLYBOX_ENCRYPTION_KEY not set; stored credentials are unavailable");
            None
        }
    };

    let engine: Arc<dyn DocumentEngine> = match &config.llm.endpoint {
        Some(endpoint) => Arc::new(HttpDocumentEngine::new(
            endpoint.clone(),
            config.llm.model.clone(),
            config.secrets.llm_api_key.clone(),
            config.llm.request_timeout.as_duration(),
        )?),
        None => {
            warn!("llm.endpoint not set; using the deterministic document engine");
            Arc::new(StaticEngine::new())
        }
    };

    let sms: Arc<dyn SmsGateway> = match (
        &config.sms.endpoint,
        &config.secrets.sms_account_id,
        &config.secrets.sms_auth_token,
    ) {
        (Some(endpoint), Some(account_id), Some(token)) => Arc::new(HttpSmsGateway::new(
            endpoint.clone(),
            config.sms.from_number.clone(),
            account_id.clone(),
            token.clone(),
            config.sms.send_timeout.as_duration(),
        )?),
        _ => {
            warn!("SMS gateway not fully configured; notifications stay in memory");
            Arc::new(MemorySms::new())
        }
    };

    let artifacts = ArtifactStore::new(
        Arc::new(object_store::memory::InMemory::new()),
        config.artifacts.bucket.clone(),
        config.artifacts.public_base_url.clone(),
    );

    let metrics = Arc::new(Metrics::new());
    let settings = DispatcherSettings::from_config(&config);
    let drain_grace = settings.drain_grace;

    let dispatcher = Arc::new(Dispatcher::new(
        store,
        broker,
        engine,
        artifacts,
        sms,
        cipher,
        settings,
        metrics,
    ));

    let hitl = Arc::new(HitlController::new(
        dispatcher.clone(),
        PageFetcher::new(Duration::from_secs(30))?,
    ));
    let limiter = RateLimiter::new(
        config.server.api.profile_rate_per_minute,
        Duration::from_secs(60),
    );

    let bind_addr = config.server.bind_addr;
    let state = AppState::new(config, dispatcher.clone(), hitl, limiter);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
    };

    let app = build_router(state);
    let listener = TcpListener::bind(bind_addr).await?;
    info!(address = %bind_addr, "Dispatcher API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the drain loops finish what is already queued
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(drain_grace + Duration::from_secs(5), loops)
        .await
        .is_err()
    {
        warn!("Dispatcher loops did not stop within the drain grace window");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => warn!(error = %err, "Failed to install signal handler"),
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
