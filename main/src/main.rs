use std::sync::Arc;

use api_router::{
    api_routes_v1,
    api_state::{ApiState, PreviewSession},
};
use axum::Router;
use common::{
    storage::{db::SurrealDbClient, tier_manager::StorageTierManager, tiers::kv::KvTier,
        tiers::remote::{HttpRemoteItems, RemoteItems},
    },
    utils::config::get_config,
};
use ingestion_pipeline::{ocr::OcrAdapter, repository::ItemRepository};
use preview_renderer::renderer::PdfPreviewRenderer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = Arc::new(get_config()?);

    // Storage tiers
    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    let remote_url = Url::parse(&config.remote_items_url)?;
    let remote = Arc::new(HttpRemoteItems::new(remote_url)) as Arc<dyn RemoteItems>;

    let kv = KvTier::durable(&config.data_dir)?;
    let session = KvTier::session();

    let tiers = Arc::new(StorageTierManager::new(
        remote,
        Arc::clone(&db),
        kv,
        session,
    ));
    let outcome = tiers.load_or_migrate().await?;
    info!(?outcome, "storage tiers loaded");

    let ocr = Arc::new(OcrAdapter::new(Arc::clone(&config)));
    let repository = Arc::new(ItemRepository::new(
        tiers,
        Arc::clone(&ocr),
        Arc::clone(&config),
    ));

    // The preview shares the rasterizer with the ingestion pipeline, so the
    // rendering engine is loaded at most once per process.
    let preview = Arc::new(PreviewSession::new(PdfPreviewRenderer::new(
        ocr,
        Arc::clone(&config),
    )));

    let api_state = ApiState::new(repository, db, preview, Arc::clone(&config));

    // Create Axum router
    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
