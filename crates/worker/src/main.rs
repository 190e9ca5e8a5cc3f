//! `shotline-worker <episode_id>`: generate every pending shot of an
//! episode and print the final batch status as JSON.

mod config;

use std::sync::Arc;

use shotline_core::capability::CapabilityRegistry;
use shotline_core::types::DbId;
use shotline_events::EventBus;
use shotline_pipeline::ffmpeg::FfmpegFrameExtractor;
use shotline_pipeline::{
    AnchorDeriver, BatchService, LocalObjectStore, Orchestrator, PgShotStore, ShotStore,
};
use shotline_providers::{HttpProvider, ProviderSet};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ProviderEndpoint, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shotline_worker=debug,shotline_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let episode_id: DbId = std::env::args()
        .nth(1)
        .expect("usage: shotline-worker <episode_id>")
        .parse()
        .expect("episode_id must be an integer");

    let config = WorkerConfig::from_env();

    // --- Database ---
    let pool = shotline_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    shotline_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    shotline_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Providers ---
    let registry = match &config.provider_registry_path {
        Some(path) => {
            let json = std::fs::read_to_string(path).expect("Failed to read provider registry");
            CapabilityRegistry::from_json(&json).expect("Invalid provider registry")
        }
        None => CapabilityRegistry::builtin(),
    };

    let http = reqwest::Client::new();
    let mut providers = ProviderSet::new(registry.clone());
    for capability in registry.iter() {
        let Some(endpoint) = ProviderEndpoint::from_env(&capability.id) else {
            tracing::warn!(provider_id = %capability.id, "No endpoint configured, provider disabled");
            continue;
        };
        let adapter = HttpProvider::with_client(
            http.clone(),
            capability.id.clone(),
            endpoint.base_url,
            endpoint.api_key,
        );
        providers
            .register(Arc::new(adapter))
            .expect("registry provider must register");
    }
    if providers.is_empty() {
        tracing::error!("No provider endpoints configured, nothing can be generated");
        return;
    }
    tracing::info!(providers = providers.len(), "Providers ready");

    // --- Pipeline ---
    let store: Arc<dyn ShotStore> = Arc::new(PgShotStore::new(pool));
    let objects = Arc::new(LocalObjectStore::new(
        config.storage_root.clone(),
        config.storage_base_url.clone(),
    ));
    let deriver = AnchorDeriver::new(objects, Arc::new(FfmpegFrameExtractor::default()));
    let events = Arc::new(EventBus::default());
    let orchestrator = Orchestrator::new(providers, deriver, Arc::clone(&store))
        .with_event_bus(Arc::clone(&events));
    let service = BatchService::new(store, Arc::new(orchestrator));

    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!(
                    event_type = %event.event_type,
                    variation_id = ?event.source_entity_id,
                    payload = %event.payload,
                    "Job event",
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // --- Batch ---
    let plan = service
        .analyze_episode(episode_id, config.batch.output)
        .await
        .expect("Failed to analyze episode");
    if plan.job_count() == 0 && plan.unschedulable.is_empty() {
        tracing::info!(episode_id, "Nothing to generate");
        return;
    }

    let handle = service.start_plan(plan, config.batch.clone()).await;
    let finished = tokio::select! {
        result = service.wait_batch(handle) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(batch = %handle, "Interrupted, cancelling batch");
            service.shutdown();
            service.wait_batch(handle).await
        }
    };
    let result = finished.expect("batch must be registered");

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize batch result"),
    }
}
