//! One-shot refresh of every server's matrix views, for cron or first boot.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use droprate_api::ref_db::RefDb;
use droprate_api::{AppState, migrations, refresh};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("droprate_api=debug")),
        )
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "droprate".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    migrations::run(&clickhouse_url, &clickhouse_user, &clickhouse_password).await?;

    let ch = clickhouse::Client::default()
        .with_url(&clickhouse_url)
        .with_database(&clickhouse_db)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);

    let ref_db_path =
        std::env::var("DROPRATE_REF_DB").unwrap_or_else(|_| "./droprate_ref.db".to_string());
    let ref_db = Arc::new(RefDb::open(&ref_db_path)?);
    tracing::info!("reference db opened at {ref_db_path}");

    let state = AppState::new(ch, ref_db)?;

    for server in state.caches.servers() {
        tracing::info!("refreshing {server}");
        if let Err(e) = refresh::refresh_server(&state, &server).await {
            tracing::error!("refresh for {server} failed: {e}");
        }
    }

    Ok(())
}
