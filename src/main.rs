use std::sync::Arc;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get},
    Router,
};
use planning_poker::{config::Config, db, feed::ChangeFeed, index, rooms, store::SqliteGateway, sync::SyncContext, AppState};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("reading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("planning_poker=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(config.secure_cookies)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(config.token_lifetime_days)));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    db::init_schema(&db_pool).await.context("creating schema")?;

    let feed = ChangeFeed::new(config.feed_capacity);
    let gateway = Arc::new(SqliteGateway::new(db_pool, feed.clone()));
    let app_state = AppState {
        sync: SyncContext::new(gateway, feed),
        namer: rooms::RoomNamer::new(config.word_api_url.clone())?,
    };

    let mut app = Router::new()
        .route("/", get(index::index))
        .route("/history/{room_id}", delete(index::forget_room))
        .nest("/r", rooms::router())
        .with_state(app_state)
        .layer(session_layer);
    if let Some(origin) = &config.cors_origin {
        let origin: HeaderValue = origin.parse().with_context(|| format!("invalid CORS_ORIGIN {origin:?}"))?;
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE]),
        );
    }
    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
