use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::delete, routing::get, routing::post};
use clickhouse::Client;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use droprate_api::ref_db::RefDb;
use droprate_api::{AppState, handlers, migrations, refresh};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("droprate_api=debug,tower_http=debug")
        }))
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "droprate".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    migrations::run(&clickhouse_url, &clickhouse_user, &clickhouse_password).await?;

    let ch = Client::default()
        .with_url(&clickhouse_url)
        .with_database(&clickhouse_db)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);

    let ref_db_path =
        std::env::var("DROPRATE_REF_DB").unwrap_or_else(|_| "./droprate_ref.db".to_string());
    let ref_db = Arc::new(RefDb::open(&ref_db_path)?);
    tracing::info!("reference db opened at {ref_db_path}");

    let state = AppState::new(ch, ref_db)?;

    // Daily recomputation of every cached matrix view
    refresh::spawn_refresh_scheduler(state.clone());

    let app = Router::new()
        // Item reference data
        .route("/v3/items", get(handlers::items::get_items))
        .route("/v3/items/{itemId}", get(handlers::items::get_item_by_id))
        // Filterable matrix surface
        .route(
            "/v3/result/matrix/{server}",
            get(handlers::results::get_drop_matrix_filtered),
        )
        .route(
            "/v3/result/advanced",
            post(handlers::results::advanced_query),
        )
        // Aggregated result views
        .route(
            "/_private/result/matrix/{server}/{source}",
            get(handlers::results::get_drop_matrix),
        )
        .route(
            "/_private/result/pattern/{server}/{source}",
            get(handlers::results::get_pattern_matrix),
        )
        .route(
            "/_private/result/trend/{server}",
            get(handlers::results::get_trends),
        )
        // Cache management and manual refresh
        .route("/_private/cache", delete(handlers::admin::delete_cache))
        .route(
            "/_private/refresh/matrix/{server}",
            post(handlers::admin::refresh_drop_matrix),
        )
        .route(
            "/_private/refresh/pattern/{server}",
            post(handlers::admin::refresh_pattern_matrix),
        )
        .route(
            "/_private/refresh/trend/{server}",
            post(handlers::admin::refresh_trend),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = std::env::var("DROPRATE_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9010".to_string())
        .parse()?;
    tracing::info!("droprate-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
