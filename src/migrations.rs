use clickhouse::Client;

/// Idempotent DDL for the raw drop-report tables. Reports land in two wide,
/// denormalized tables so every aggregation is a single-table scan: one row
/// per submitted report and one row per dropped item within a report.
const MIGRATIONS: &[&str] = &[
    "CREATE DATABASE IF NOT EXISTS droprate",
    r"CREATE TABLE IF NOT EXISTS droprate.drop_reports
(
    `server` LowCardinality(String) CODEC(ZSTD(1)),
    `stage_id` Int64 CODEC(Delta(8), ZSTD(1)),
    `pattern_id` Int64 CODEC(Delta(8), ZSTD(1)),
    `times` Int64 CODEC(ZSTD(1)),
    `account_id` Int64 CODEC(ZSTD(1)),
    `reliable` UInt8 CODEC(ZSTD(1)),
    `created_at` DateTime64(3) CODEC(Delta(8), ZSTD(1)),
    INDEX idx_account account_id TYPE bloom_filter(0.01) GRANULARITY 1
)
ENGINE = MergeTree
PARTITION BY toYYYYMM(created_at)
ORDER BY (server, stage_id, created_at)",
    r"CREATE TABLE IF NOT EXISTS droprate.drop_report_drops
(
    `server` LowCardinality(String) CODEC(ZSTD(1)),
    `stage_id` Int64 CODEC(Delta(8), ZSTD(1)),
    `item_id` Int64 CODEC(Delta(8), ZSTD(1)),
    `quantity` Int64 CODEC(ZSTD(1)),
    `account_id` Int64 CODEC(ZSTD(1)),
    `reliable` UInt8 CODEC(ZSTD(1)),
    `created_at` DateTime64(3) CODEC(Delta(8), ZSTD(1)),
    INDEX idx_account account_id TYPE bloom_filter(0.01) GRANULARITY 1
)
ENGINE = MergeTree
PARTITION BY toYYYYMM(created_at)
ORDER BY (server, stage_id, item_id, created_at)",
];

pub async fn run(url: &str, user: &str, password: &str) -> anyhow::Result<()> {
    let client = Client::default()
        .with_url(url)
        .with_user(user)
        .with_password(password);

    tracing::info!("running clickhouse migrations ({} statements)", MIGRATIONS.len());

    for (i, sql) in MIGRATIONS.iter().enumerate() {
        client.query(sql).execute().await.map_err(|e| {
            tracing::error!("migration {}/{} failed: {e}", i + 1, MIGRATIONS.len());
            e
        })?;
    }

    tracing::info!("clickhouse migrations complete");
    Ok(())
}
